// Game orchestration: sequences rounds for one channel session and runs each
// round's event loop.
//
// A game runs on a single spawned task that is the only writer of the game
// and its current round. Hosts talk to it through the inbound sender on
// `GameHandle` and observe it through the outbound `GameEvent` channel.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use trivia_core::config::GameConfig;
use trivia_core::question::{Question, QuestionSource};
use trivia_core::rank::Rank;
use trivia_core::store::{ScoreStore, QUESTION_LIMIT_KEY};

use crate::error::GameError;
use crate::protocol::{
    GameEvent, GameState, RankMessage, RoundSnapshot, StateMessage, TextMessage,
};
use crate::round::Round;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Capacity of a game's inbound message queue.
pub const INBOUND_CAPACITY: usize = 256;

/// Outbound slots kept free for must-deliver events. Best-effort events are
/// dropped once the outbound channel has no more free slots than this (or
/// half its capacity, for small channels).
pub const BEST_EFFORT_HEADROOM: usize = 8;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// How a round's event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundEnd {
    Finished,
    TimedOut,
}

/// Host-side handle to a started game.
pub struct GameHandle {
    channel_id: String,
    inbound: mpsc::Sender<TextMessage>,
    current_question: watch::Receiver<Option<Arc<Question>>>,
    task: JoinHandle<Rank>,
}

impl GameHandle {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Queue a player message without waiting. Returns `false` if the queue
    /// is full or the game has ended.
    pub fn submit(&self, msg: TextMessage) -> bool {
        match self.inbound.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Inbound queue full for channel {}, message dropped", self.channel_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Question of the round in progress, if any.
    pub fn current_question(&self) -> Option<Arc<Question>> {
        self.current_question.borrow().clone()
    }

    /// Wait for the game to finish and return its final cumulative ranking.
    pub async fn join(self) -> Result<Rank, tokio::task::JoinError> {
        self.task.await
    }
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

/// One channel's session. Players are not tracked separately: everyone who
/// has scored appears in `rank`, and each round keeps the names of its own
/// claimants.
pub struct Game {
    channel_id: String,
    channel_name: String,
    config: GameConfig,
    state: GameState,
    seed: i64,
    /// Rounds played in this channel across all sessions; indexes the
    /// channel's question permutation.
    total_rounds_played: u64,
    question_limit: usize,
    rank: Rank,
    questions: Arc<dyn QuestionSource>,
    store: Arc<dyn ScoreStore>,
    events: mpsc::Sender<GameEvent>,
    current_question: watch::Sender<Option<Arc<Question>>>,
}

impl Game {
    /// Prepare a game for a channel. Fails if the channel's seed and round
    /// index cannot be read from the store or the config is invalid.
    pub fn new(
        channel_id: impl Into<String>,
        channel_name: impl Into<String>,
        config: GameConfig,
        questions: Arc<dyn QuestionSource>,
        store: Arc<dyn ScoreStore>,
        events: mpsc::Sender<GameEvent>,
    ) -> Result<Self, GameError> {
        let channel_id = channel_id.into();
        config.validate()?;

        let (seed, total_rounds_played) =
            store
                .next_game(&channel_id)
                .map_err(|source| GameError::Construction {
                    channel_id: channel_id.clone(),
                    source,
                })?;
        let question_limit = resolve_question_limit(store.as_ref(), &channel_id, config.question_limit);

        let (current_question, _) = watch::channel(None);

        debug!(
            "Game prepared for channel {}: seed={}, rounds_played={}, question_limit={}",
            channel_id, seed, total_rounds_played, question_limit
        );

        Ok(Self {
            channel_id,
            channel_name: channel_name.into(),
            config,
            state: GameState::Created,
            seed,
            total_rounds_played,
            question_limit,
            rank: Rank::new(),
            questions,
            store,
            events,
            current_question,
        })
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn question_limit(&self) -> usize {
        self.question_limit
    }

    /// Question of the round in progress, if any.
    pub fn current_question(&self) -> Option<Arc<Question>> {
        self.current_question.borrow().clone()
    }

    /// Spawn the game task. Consuming `self` makes a second start impossible.
    pub fn start(self) -> GameHandle {
        let channel_id = self.channel_id.clone();
        let current_question = self.current_question.subscribe();
        // The handle holds the only sender, so the inbound channel closes
        // once the host drops it.
        let (inbound, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);

        let task = tokio::spawn(self.run(inbound_rx));
        GameHandle {
            channel_id,
            inbound,
            current_question,
            task,
        }
    }

    async fn run(mut self, mut inbound: mpsc::Receiver<TextMessage>) -> Rank {
        self.state = GameState::Started;
        info!(
            "Game started in channel {} ({} rounds)",
            self.channel_id, self.config.rounds_per_game
        );
        self.emit_state(0, GameState::Started, None).await;

        let rounds = self.config.rounds_per_game;
        for round_no in 1..=rounds {
            if let Some(round_rank) = self.play_round(round_no, &mut inbound).await {
                self.rank = self.rank.add(&round_rank);
            }

            let is_final = round_no == rounds;
            self.emit(GameEvent::Rank(RankMessage {
                channel_id: self.channel_id.clone(),
                round: round_no,
                rank: self.rank.clone(),
                is_final,
            }))
            .await;

            if !is_final && !self.config.delay_between_rounds.is_zero() {
                tokio::time::sleep(self.config.delay_between_rounds).await;
            }
        }

        self.state = GameState::Finished;
        self.emit_state(rounds, GameState::Finished, None).await;
        info!(
            "Game finished in channel {}, {} players ranked",
            self.channel_id,
            self.rank.len()
        );
        self.rank
    }

    /// Play one round. Returns the round's ranking, or `None` if no question
    /// could be loaded and the round was skipped.
    async fn play_round(
        &mut self,
        round_no: u32,
        inbound: &mut mpsc::Receiver<TextMessage>,
    ) -> Option<Rank> {
        let question = match self.questions.next_question(
            self.seed,
            self.total_rounds_played,
            self.question_limit,
        ) {
            Ok(q) if q.slot_count() > 0 => q,
            Ok(q) => {
                error!(
                    "Question {} has no answers, skipping round {} in channel {}",
                    q.id, round_no, self.channel_id
                );
                self.advance_rounds_played();
                return None;
            }
            Err(e) => {
                error!(
                    "Failed to load question for round {} in channel {}: {}",
                    round_no, self.channel_id, e
                );
                // Advance past the failing position so the next round tries
                // a different question.
                self.advance_rounds_played();
                return None;
            }
        };

        self.discard_stale_messages(inbound);

        let mut round = Round::new(question, self.config.round_duration);
        self.current_question
            .send_replace(Some(Arc::new(round.question().clone())));
        info!(
            "Round {} started in channel {} with question {}",
            round_no,
            self.channel_id,
            round.question().id
        );

        let snapshot = round.snapshot(&self.channel_id, false);
        self.emit_state(round_no, GameState::RoundStarted, Some(snapshot))
            .await;

        let end = self.run_round_loop(&mut round, inbound).await;

        let (state, show_unanswered) = match end {
            RoundEnd::Finished => {
                round.mark_finished();
                (GameState::RoundFinished, false)
            }
            RoundEnd::TimedOut => {
                round.mark_timed_out();
                (GameState::RoundTimeout, true)
            }
        };
        info!(
            "Round {} in channel {} ended: {:?}",
            round_no,
            self.channel_id,
            round.status()
        );

        let ranking = round.ranking();
        self.persist_round(&ranking);

        let snapshot = round.snapshot(&self.channel_id, show_unanswered);
        self.current_question.send_replace(None);
        self.emit_state(round_no, state, Some(snapshot)).await;

        Some(ranking)
    }

    /// Multiplex player messages, the tick and reveal timers, and the round
    /// timeout until the round is complete. Timers are dropped on return.
    async fn run_round_loop(
        &mut self,
        round: &mut Round,
        inbound: &mut mpsc::Receiver<TextMessage>,
    ) -> RoundEnd {
        let period = self.config.tick_interval;
        let first_tick = Instant::now() + period;

        let mut tick = interval_at(first_tick, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reveal = interval_at(first_tick, period);
        reveal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout = sleep_until(round.end_at());
        tokio::pin!(timeout);

        // Once every sender is gone, stop polling so select! does not spin on
        // a closed channel; the round then runs out its timer.
        let mut inbound_open = true;

        loop {
            tokio::select! {
                // --- Player messages ---
                msg = inbound.recv(), if inbound_open => {
                    match msg {
                        Some(msg) => {
                            if self.handle_message(round, msg) {
                                return RoundEnd::Finished;
                            }
                        }
                        None => {
                            debug!("Inbound channel closed for channel {}", self.channel_id);
                            inbound_open = false;
                        }
                    }
                }

                // --- Time-left ticks ---
                _ = tick.tick() => {
                    self.emit_best_effort(GameEvent::Tick {
                        channel_id: self.channel_id.clone(),
                        time_left: round.time_left(),
                    });
                }

                // --- Batched reveal of new claims ---
                _ = reveal.tick() => {
                    if round.has_highlights() {
                        let snapshot = round.snapshot(&self.channel_id, false);
                        self.emit_best_effort(GameEvent::Snapshot(snapshot));
                        round.clear_highlights();
                    }
                }

                // --- Round timeout ---
                _ = &mut timeout => {
                    return RoundEnd::TimedOut;
                }
            }
        }
    }

    /// Apply one player message to the round. Returns `true` when the
    /// message completed the round.
    fn handle_message(&mut self, round: &mut Round, msg: TextMessage) -> bool {
        if let Err(violation) = msg.validate() {
            warn!("Dropping message in channel {}: {}", self.channel_id, violation);
            return false;
        }

        let outcome = round.answer(&msg.player, &msg.text);
        if !outcome.correct {
            if self.config.tick_after_wrong_answer {
                self.emit_best_effort(GameEvent::WrongAnswer {
                    channel_id: self.channel_id.clone(),
                    time_left: round.time_left(),
                });
            }
            return false;
        }

        if !outcome.is_new_claim() {
            debug!(
                "{} repeated a claimed answer in channel {}",
                msg.player.id, self.channel_id
            );
            return false;
        }

        debug!(
            "{} claimed slot {:?} in channel {}",
            msg.player.id, outcome.slot, self.channel_id
        );
        round.finished()
    }

    /// Drop messages queued while no round was accepting answers.
    fn discard_stale_messages(&self, inbound: &mut mpsc::Receiver<TextMessage>) {
        let mut dropped = 0usize;
        while inbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(
                "Discarded {} messages received between rounds in channel {}",
                dropped, self.channel_id
            );
        }
    }

    /// Record the round in the store. Failures are logged and otherwise
    /// ignored; the game carries on without them.
    fn persist_round(&mut self, ranking: &Rank) {
        self.advance_rounds_played();

        if ranking.is_empty() {
            return;
        }
        if let Err(e) = self
            .store
            .save_score(&self.channel_id, &self.channel_name, ranking)
        {
            warn!("Failed to save scores for channel {}: {}", self.channel_id, e);
        }
    }

    /// Move past the current question position, here and in the store, so
    /// the next game in the channel continues where this one left off.
    fn advance_rounds_played(&mut self) {
        self.total_rounds_played += 1;
        if let Err(e) = self.store.inc_round_played(&self.channel_id) {
            warn!(
                "Failed to record round played for channel {}: {}",
                self.channel_id, e
            );
        }
    }

    async fn emit_state(
        &self,
        round: u32,
        state: GameState,
        snapshot: Option<RoundSnapshot>,
    ) {
        self.emit(GameEvent::State(StateMessage {
            channel_id: self.channel_id.clone(),
            round,
            state,
            snapshot,
        }))
        .await;
    }

    /// Must-deliver send: waits for room in the outbound channel.
    async fn emit(&self, event: GameEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver gone for channel {}", self.channel_id);
        }
    }

    /// Best-effort send: never waits, drops the event under backpressure.
    fn emit_best_effort(&self, event: GameEvent) {
        let reserve = BEST_EFFORT_HEADROOM.min(self.events.max_capacity() / 2);
        if self.events.capacity() <= reserve {
            debug!("Outbound queue busy for channel {}, dropping {:?}", self.channel_id, event);
            return;
        }
        if let Err(e) = self.events.try_send(event) {
            debug!("Dropped best-effort event for channel {}: {}", self.channel_id, e);
        }
    }
}

/// The channel's stored question limit, or `default` when none is stored or
/// it cannot be read.
fn resolve_question_limit(store: &dyn ScoreStore, channel_id: &str, default: usize) -> usize {
    match store.channel_config(channel_id, QUESTION_LIMIT_KEY) {
        Ok(Some(value)) => match value.trim().parse::<usize>() {
            Ok(limit) => limit,
            Err(e) => {
                warn!(
                    "Ignoring invalid question limit {:?} for channel {}: {}",
                    value, channel_id, e
                );
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!(
                "Failed to read question limit for channel {}: {}",
                channel_id, e
            );
            default
        }
    }
}
