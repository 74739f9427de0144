// Integration tests for the game engine.
//
// These drive complete games through the public API: a Game is started on
// the tokio runtime with paused time, player messages go in through the
// GameHandle, and assertions are made on the outbound GameEvent stream and on
// the score store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use trivia_core::config::GameConfig;
use trivia_core::model::{Player, PlayerId};
use trivia_core::question::{AnswerGroup, Question, QuestionError, QuestionSource};
use trivia_core::rank::{PlayerScore, Rank};
use trivia_core::store::{MemoryStore, ScoreStore, StoreError, QUESTION_LIMIT_KEY};
use trivia_game::error::GameError;
use trivia_game::game::Game;
use trivia_game::protocol::{GameEvent, GameState, RankMessage, StateMessage, TextMessage};

// ===========================================================================
// Test helpers
// ===========================================================================

fn config(rounds: u32) -> GameConfig {
    GameConfig {
        round_duration: Duration::from_secs(60),
        tick_interval: Duration::from_secs(10),
        delay_between_rounds: Duration::from_secs(5),
        rounds_per_game: rounds,
        tick_after_wrong_answer: false,
        question_limit: 0,
    }
}

fn question(id: u64, answers: &[(&str, u32)]) -> Question {
    let groups = answers
        .iter()
        .map(|(text, score)| AnswerGroup::new(vec![text.to_string()], *score))
        .collect();
    Question::new(id, format!("question {id}"), groups)
}

fn say(id: &str, text: &str) -> TextMessage {
    TextMessage::now(Player::new(id, id.to_uppercase()), text)
}

/// Serves a fixed list of questions by `played` index and records every
/// request.
struct ScriptedQuestions {
    questions: Vec<Question>,
    fail_at: Option<u64>,
    calls: Mutex<Vec<(i64, u64, usize)>>,
}

impl ScriptedQuestions {
    fn new(questions: Vec<Question>) -> Arc<Self> {
        Arc::new(Self {
            questions,
            fail_at: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Like `new`, but the question at position `played` cannot be loaded.
    fn failing_at(questions: Vec<Question>, played: u64) -> Arc<Self> {
        Arc::new(Self {
            questions,
            fail_at: Some(played),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(i64, u64, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl QuestionSource for ScriptedQuestions {
    fn next_question(&self, seed: i64, played: u64, limit: usize) -> Result<Question, QuestionError> {
        self.calls.lock().unwrap().push((seed, played, limit));
        if self.fail_at == Some(played) {
            return Err(QuestionError::NotFound { id: played + 1 });
        }
        if self.questions.is_empty() {
            return Err(QuestionError::Empty);
        }
        Ok(self.questions[(played as usize) % self.questions.len()].clone())
    }

    fn count(&self) -> usize {
        self.questions.len()
    }
}

/// A store whose reads and/or writes fail.
struct BrokenStore {
    fail_next_game: bool,
}

impl ScoreStore for BrokenStore {
    fn next_game(&self, _channel_id: &str) -> Result<(i64, u64), StoreError> {
        if self.fail_next_game {
            Err(StoreError::Poisoned)
        } else {
            Ok((1, 0))
        }
    }
    fn inc_round_played(&self, _channel_id: &str) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
    fn save_score(&self, _: &str, _: &str, _: &Rank) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
    fn channel_ranking(&self, _: &str, _: usize) -> Result<Rank, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn player_ranking(&self, _: usize) -> Result<Rank, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn player_score(&self, _: &PlayerId) -> Result<Option<PlayerScore>, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn channel_config(&self, _: &str, _: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Poisoned)
    }
    fn set_channel_config(&self, _: &str, _: &str, _: &str) -> Result<(), StoreError> {
        Err(StoreError::Poisoned)
    }
}

/// Next event that is not a best-effort tick, reveal, or wrong-answer notice.
async fn next_must_deliver(rx: &mut mpsc::Receiver<GameEvent>) -> GameEvent {
    loop {
        let event = rx.recv().await.expect("event channel closed");
        if !event.is_best_effort() {
            return event;
        }
    }
}

async fn next_state(rx: &mut mpsc::Receiver<GameEvent>) -> StateMessage {
    match next_must_deliver(rx).await {
        GameEvent::State(msg) => msg,
        other => panic!("expected state message, got {other:?}"),
    }
}

async fn next_rank(rx: &mut mpsc::Receiver<GameEvent>) -> RankMessage {
    match next_must_deliver(rx).await {
        GameEvent::Rank(msg) => msg,
        other => panic!("expected rank message, got {other:?}"),
    }
}

fn rows(rank: &Rank) -> Vec<(String, u32, usize)> {
    rank.iter()
        .map(|ps| (ps.player_id.to_string(), ps.score, ps.position))
        .collect()
}

// ===========================================================================
// Tests: full rounds
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn two_players_complete_a_round() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("ten", 10), ("twenty", 20)])]);
    let store = Arc::new(MemoryStore::new(3));
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions, store.clone(), tx).unwrap();
    let handle = game.start();

    assert_eq!(next_state(&mut rx).await.state, GameState::Started);

    let started = next_state(&mut rx).await;
    assert_eq!(started.state, GameState::RoundStarted);
    assert_eq!(started.round, 1);
    let snapshot = started.snapshot.unwrap();
    assert_eq!(snapshot.slots.len(), 2);
    assert_eq!(snapshot.answered_count(), 0);
    assert_eq!(handle.current_question().unwrap().id, 1);

    assert!(handle.submit(say("p1", "twenty")));

    // The claim shows up in the next batched reveal.
    let reveal = loop {
        match rx.recv().await.unwrap() {
            GameEvent::Snapshot(s) => break s,
            GameEvent::Tick { .. } => continue,
            other => panic!("unexpected event {other:?}"),
        }
    };
    assert_eq!(reveal.slots[1].player_name.as_deref(), Some("P1"));
    assert!(reveal.slots[1].highlight);
    assert!(!reveal.slots[0].answered);
    assert_eq!(reveal.slots[0].text, None);

    assert!(handle.submit(say("p2", "ten")));

    let finished = next_state(&mut rx).await;
    assert_eq!(finished.state, GameState::RoundFinished);
    assert_eq!(finished.snapshot.unwrap().answered_count(), 2);

    let rank = next_rank(&mut rx).await;
    assert!(rank.is_final);
    assert_eq!(rank.round, 1);
    assert_eq!(
        rows(&rank.rank),
        vec![("p1".to_string(), 20, 1), ("p2".to_string(), 10, 2)]
    );

    assert_eq!(next_state(&mut rx).await.state, GameState::Finished);

    let final_rank = handle.join().await.unwrap();
    assert_eq!(final_rank, rank.rank);
    assert_eq!(store.channel_ranking("chan", 0).unwrap().total(), 30);
    assert_eq!(store.next_game("chan").unwrap(), (3, 1));
}

#[tokio::test(start_paused = true)]
async fn unanswered_round_times_out_and_reveals() {
    let questions = ScriptedQuestions::new(vec![question(9, &[("only", 15)])]);
    let store = Arc::new(MemoryStore::new(0));
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions, store, tx).unwrap();
    let handle = game.start();

    assert_eq!(next_state(&mut rx).await.state, GameState::Started);
    assert_eq!(next_state(&mut rx).await.state, GameState::RoundStarted);
    let round_start = Instant::now();

    let timeout = next_state(&mut rx).await;
    assert_eq!(timeout.state, GameState::RoundTimeout);
    assert!(round_start.elapsed() >= Duration::from_secs(60));

    let snapshot = timeout.snapshot.unwrap();
    assert!(snapshot.show_unanswered);
    assert_eq!(snapshot.slots[0].text.as_deref(), Some("only"));
    assert_eq!(snapshot.slots[0].score, 15);
    assert!(!snapshot.slots[0].answered);
    assert_eq!(snapshot.slots[0].player_name, None);
    assert!(handle.current_question().is_none());

    let rank = next_rank(&mut rx).await;
    assert!(rank.is_final);
    assert!(rank.rank.is_empty());
    assert_eq!(next_state(&mut rx).await.state, GameState::Finished);
}

#[tokio::test(start_paused = true)]
async fn ticks_report_time_left() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("only", 1)])]);
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions, Arc::new(MemoryStore::new(0)), tx)
        .unwrap();
    let _handle = game.start();

    next_state(&mut rx).await;
    next_state(&mut rx).await;

    match rx.recv().await.unwrap() {
        GameEvent::Tick { channel_id, time_left } => {
            assert_eq!(channel_id, "chan");
            assert_eq!(time_left, Duration::from_secs(50));
        }
        other => panic!("expected tick, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn ticks_never_block_an_undrained_game() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 1)]), question(2, &[("b", 2)])]);
    let mut cfg = config(2);
    cfg.tick_interval = Duration::from_secs(1);
    let (tx, mut rx) = mpsc::channel(32);
    let game = Game::new("chan", "Channel", cfg, questions, Arc::new(MemoryStore::new(0)), tx).unwrap();
    let handle = game.start();

    // Nobody reads while the game runs.
    let rank = tokio::time::timeout(Duration::from_secs(600), handle.join())
        .await
        .expect("game should finish without a consumer")
        .unwrap();
    assert!(rank.is_empty());

    let mut states = Vec::new();
    let mut ticks = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            GameEvent::State(m) => states.push(m.state),
            GameEvent::Tick { .. } => ticks += 1,
            _ => {}
        }
    }
    assert_eq!(states.last(), Some(&GameState::Finished));
    assert!(ticks > 0);
    assert!(ticks < 32);
}

#[tokio::test(start_paused = true)]
async fn game_finishes_when_receiver_is_dropped() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 1)])]);
    let (tx, rx) = mpsc::channel(4);
    drop(rx);
    let game = Game::new("chan", "Channel", config(3), questions, Arc::new(MemoryStore::new(0)), tx)
        .unwrap();
    let rank = game.start().join().await.unwrap();
    assert!(rank.is_empty());
}

// ===========================================================================
// Tests: answers
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn claims_within_one_interval_share_a_reveal() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 30), ("b", 20), ("c", 10)])]);
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions, Arc::new(MemoryStore::new(0)), tx)
        .unwrap();
    let handle = game.start();
    next_state(&mut rx).await;
    next_state(&mut rx).await;

    handle.submit(say("p1", "a"));
    handle.submit(say("p2", "b"));

    // Collect through the tick at 30s left: three reveal intervals, only the
    // first of which has new claims.
    let mut reveals = Vec::new();
    loop {
        match rx.recv().await.unwrap() {
            GameEvent::Snapshot(s) => reveals.push(s),
            GameEvent::Tick { time_left, .. } if time_left == Duration::from_secs(30) => break,
            GameEvent::Tick { .. } => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert_eq!(reveals.len(), 1);
    let highlights: Vec<bool> = reveals[0].slots.iter().map(|s| s.highlight).collect();
    assert_eq!(highlights, vec![true, true, false]);
    assert_eq!(reveals[0].answered_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_answer_keeps_first_owner() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("ten", 10), ("twenty", 20)])]);
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions, Arc::new(MemoryStore::new(0)), tx)
        .unwrap();
    let handle = game.start();
    next_state(&mut rx).await;
    next_state(&mut rx).await;

    handle.submit(say("p1", "ten"));
    handle.submit(say("p2", "TEN"));

    let timeout = next_state(&mut rx).await;
    assert_eq!(timeout.state, GameState::RoundTimeout);
    let snapshot = timeout.snapshot.unwrap();
    assert_eq!(snapshot.slots[0].player_name.as_deref(), Some("P1"));

    let rank = next_rank(&mut rx).await;
    assert_eq!(rows(&rank.rank), vec![("p1".to_string(), 10, 1)]);
}

#[tokio::test(start_paused = true)]
async fn wrong_answer_tick_when_enabled() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("right", 10)])]);
    let mut cfg = config(1);
    cfg.tick_after_wrong_answer = true;
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", cfg, questions, Arc::new(MemoryStore::new(0)), tx).unwrap();
    let handle = game.start();
    next_state(&mut rx).await;
    next_state(&mut rx).await;

    // Malformed messages are dropped silently, even with wrong-answer ticks on.
    handle.submit(say("p1", "   "));
    handle.submit(say("p1", "wrong"));

    match rx.recv().await.unwrap() {
        GameEvent::WrongAnswer { channel_id, time_left } => {
            assert_eq!(channel_id, "chan");
            assert_eq!(time_left, Duration::from_secs(60));
        }
        other => panic!("expected wrong-answer notice, got {other:?}"),
    }

    handle.submit(say("p1", "right"));
    assert_eq!(next_state(&mut rx).await.state, GameState::RoundFinished);
}

#[tokio::test(start_paused = true)]
async fn wrong_answers_are_silent_by_default() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("right", 10)])]);
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions, Arc::new(MemoryStore::new(0)), tx)
        .unwrap();
    let handle = game.start();
    next_state(&mut rx).await;
    next_state(&mut rx).await;

    handle.submit(say("p1", "wrong"));
    handle.submit(say("p1", "right"));

    // No WrongAnswer precedes the round finishing.
    match rx.recv().await.unwrap() {
        GameEvent::State(m) => assert_eq!(m.state, GameState::RoundFinished),
        other => panic!("expected RoundFinished, got {other:?}"),
    }
}

// ===========================================================================
// Tests: multi-round sessions
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn ranks_accumulate_across_rounds() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 10)]), question(2, &[("b", 5)])]);
    let store = Arc::new(MemoryStore::new(11));
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(2), questions.clone(), store.clone(), tx).unwrap();
    let handle = game.start();

    let mut states = Vec::new();
    let mut ranks = Vec::new();

    states.push(next_state(&mut rx).await.state);
    states.push(next_state(&mut rx).await.state);
    handle.submit(say("p1", "a"));
    states.push(next_state(&mut rx).await.state);
    ranks.push(next_rank(&mut rx).await);

    states.push(next_state(&mut rx).await.state);
    handle.submit(say("p2", "b"));
    states.push(next_state(&mut rx).await.state);
    ranks.push(next_rank(&mut rx).await);
    states.push(next_state(&mut rx).await.state);

    assert_eq!(
        states,
        vec![
            GameState::Started,
            GameState::RoundStarted,
            GameState::RoundFinished,
            GameState::RoundStarted,
            GameState::RoundFinished,
            GameState::Finished,
        ]
    );

    assert!(!ranks[0].is_final);
    assert_eq!(rows(&ranks[0].rank), vec![("p1".to_string(), 10, 1)]);
    assert!(ranks[1].is_final);
    assert_eq!(
        rows(&ranks[1].rank),
        vec![("p1".to_string(), 10, 1), ("p2".to_string(), 5, 2)]
    );

    handle.join().await.unwrap();
    assert_eq!(questions.calls(), vec![(11, 0, 0), (11, 1, 0)]);
    assert_eq!(store.next_game("chan").unwrap(), (11, 2));
}

#[tokio::test(start_paused = true)]
async fn next_game_continues_question_order() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 1)])]);
    let store = Arc::new(MemoryStore::new(5));

    for _ in 0..2 {
        let (tx, _rx) = mpsc::channel(64);
        let game = Game::new("chan", "Channel", config(1), questions.clone(), store.clone(), tx).unwrap();
        game.start().join().await.unwrap();
    }

    let played: Vec<u64> = questions.calls().iter().map(|c| c.1).collect();
    assert_eq!(played, vec![0, 1]);
}

#[tokio::test(start_paused = true)]
async fn answers_sent_between_rounds_are_discarded() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 10)]), question(2, &[("b", 5)])]);
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(2), questions, Arc::new(MemoryStore::new(0)), tx)
        .unwrap();
    let handle = game.start();

    next_state(&mut rx).await;
    next_state(&mut rx).await;
    handle.submit(say("p1", "a"));
    assert_eq!(next_state(&mut rx).await.state, GameState::RoundFinished);
    next_rank(&mut rx).await;

    // Round two's answer arrives during the inter-round delay.
    handle.submit(say("p1", "b"));

    assert_eq!(next_state(&mut rx).await.state, GameState::RoundStarted);
    let end = next_state(&mut rx).await;
    assert_eq!(end.state, GameState::RoundTimeout);
    assert_eq!(end.snapshot.unwrap().answered_count(), 0);
}

// ===========================================================================
// Tests: failures
// ===========================================================================

#[test]
fn construction_fails_when_store_cannot_seed() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 1)])]);
    let (tx, _rx) = mpsc::channel(4);
    let result = Game::new(
        "chan",
        "Channel",
        config(1),
        questions,
        Arc::new(BrokenStore { fail_next_game: true }),
        tx,
    );
    match result {
        Err(GameError::Construction { channel_id, .. }) => assert_eq!(channel_id, "chan"),
        Err(other) => panic!("expected construction error, got {other:?}"),
        Ok(_) => panic!("expected construction error"),
    }
}

#[test]
fn construction_rejects_invalid_config() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 1)])]);
    let (tx, _rx) = mpsc::channel(4);
    let mut cfg = config(1);
    cfg.tick_interval = Duration::ZERO;
    let result = Game::new("chan", "Channel", cfg, questions, Arc::new(MemoryStore::new(0)), tx);
    assert!(matches!(result, Err(GameError::InvalidConfig(_))));
}

#[tokio::test(start_paused = true)]
async fn persistence_failures_do_not_stop_the_game() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 10)])]);
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new(
        "chan",
        "Channel",
        config(2),
        questions,
        Arc::new(BrokenStore { fail_next_game: false }),
        tx,
    )
    .unwrap();
    let handle = game.start();

    next_state(&mut rx).await;
    next_state(&mut rx).await;
    handle.submit(say("p1", "a"));
    assert_eq!(next_state(&mut rx).await.state, GameState::RoundFinished);

    let rank = handle.join().await.unwrap();
    assert_eq!(rank.get(&PlayerId::from("p1")).unwrap().score, 10);
}

#[tokio::test(start_paused = true)]
async fn missing_questions_skip_rounds() {
    let questions = ScriptedQuestions::new(Vec::new());
    let store = Arc::new(MemoryStore::new(4));
    let (tx, mut rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(2), questions.clone(), store.clone(), tx).unwrap();
    let handle = game.start();

    assert_eq!(next_state(&mut rx).await.state, GameState::Started);
    let first = next_rank(&mut rx).await;
    assert!(!first.is_final);
    let last = next_rank(&mut rx).await;
    assert!(last.is_final);
    assert_eq!(next_state(&mut rx).await.state, GameState::Finished);

    handle.join().await.unwrap();
    // The failing position is skipped rather than retried.
    assert_eq!(questions.calls(), vec![(4, 0, 0), (4, 1, 0)]);
    assert_eq!(store.next_game("chan").unwrap(), (4, 2));
}

#[tokio::test(start_paused = true)]
async fn skipped_round_is_not_replayed_by_next_game() {
    let questions = ScriptedQuestions::failing_at(
        vec![question(1, &[("a", 1)]), question(2, &[("b", 2)]), question(3, &[("c", 3)])],
        0,
    );
    let store = Arc::new(MemoryStore::new(8));

    for _ in 0..2 {
        let (tx, _rx) = mpsc::channel(64);
        let game = Game::new("chan", "Channel", config(2), questions.clone(), store.clone(), tx).unwrap();
        game.start().join().await.unwrap();
    }

    let played: Vec<u64> = questions.calls().iter().map(|c| c.1).collect();
    assert_eq!(played, vec![0, 1, 2, 3]);
    assert_eq!(store.next_game("chan").unwrap(), (8, 4));
}

// ===========================================================================
// Tests: configuration
// ===========================================================================

#[test]
fn channel_question_limit_overrides_default() {
    let store = Arc::new(MemoryStore::new(0));
    store.set_channel_config("chan", QUESTION_LIMIT_KEY, "25").unwrap();
    let mut cfg = config(1);
    cfg.question_limit = 100;

    let (tx, _rx) = mpsc::channel(4);
    let game = Game::new("chan", "Channel", cfg.clone(), ScriptedQuestions::new(vec![]), store.clone(), tx.clone())
        .unwrap();
    assert_eq!(game.question_limit(), 25);

    let other = Game::new("other", "Other", cfg.clone(), ScriptedQuestions::new(vec![]), store.clone(), tx.clone())
        .unwrap();
    assert_eq!(other.question_limit(), 100);

    store.set_channel_config("chan", QUESTION_LIMIT_KEY, "lots").unwrap();
    let invalid = Game::new("chan", "Channel", cfg, ScriptedQuestions::new(vec![]), store, tx).unwrap();
    assert_eq!(invalid.question_limit(), 100);
}

#[tokio::test(start_paused = true)]
async fn question_limit_is_passed_to_source() {
    let questions = ScriptedQuestions::new(vec![question(1, &[("a", 1)])]);
    let store = Arc::new(MemoryStore::new(2));
    store.set_channel_config("chan", QUESTION_LIMIT_KEY, "7").unwrap();
    let (tx, _rx) = mpsc::channel(64);
    let game = Game::new("chan", "Channel", config(1), questions.clone(), store, tx).unwrap();
    assert_eq!(game.state(), GameState::Created);
    assert!(game.current_question().is_none());
    game.start().join().await.unwrap();

    assert_eq!(questions.calls(), vec![(2, 0, 7)]);
}
