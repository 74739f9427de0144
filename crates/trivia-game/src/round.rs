// One question's lifetime: slot claims, timing, snapshots and ranking.
//
// A Round is owned and mutated only by its game's task, so it carries no
// synchronization of its own.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use trivia_core::model::{Player, PlayerId};
use trivia_core::question::Question;
use trivia_core::rank::{PlayerScore, Rank};

use crate::protocol::{RoundSnapshot, SlotView};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    /// Accepting answers. Entered on construction.
    Active,
    /// Every slot was claimed.
    Finished,
    /// The round duration elapsed first.
    TimedOut,
}

/// Result of evaluating one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerOutcome {
    pub correct: bool,
    pub already_answered: bool,
    pub slot: Option<usize>,
}

impl AnswerOutcome {
    const MISS: Self = Self {
        correct: false,
        already_answered: false,
        slot: None,
    };

    /// A correct answer that claimed a previously open slot.
    pub fn is_new_claim(&self) -> bool {
        self.correct && !self.already_answered
    }
}

#[derive(Debug, Clone)]
struct Claim {
    player_id: PlayerId,
    /// Arrival order of the claim within the round.
    seq: u64,
}

#[derive(Debug)]
pub struct Round {
    question: Question,
    claims: Vec<Option<Claim>>,
    highlighted: Vec<bool>,
    players: HashMap<PlayerId, Player>,
    end_at: Instant,
    status: RoundStatus,
    next_seq: u64,
}

impl Round {
    /// Start a round for `question`. The end time is fixed here.
    pub fn new(question: Question, duration: Duration) -> Self {
        let slots = question.slot_count();
        Self {
            question,
            claims: vec![None; slots],
            highlighted: vec![false; slots],
            players: HashMap::new(),
            end_at: Instant::now() + duration,
            status: RoundStatus::Active,
            next_seq: 0,
        }
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn status(&self) -> RoundStatus {
        self.status
    }

    pub fn end_at(&self) -> Instant {
        self.end_at
    }

    /// Evaluate a submission. Only an open slot hit while the round is active
    /// mutates state; the first claimant of a slot keeps it.
    pub fn answer(&mut self, player: &Player, text: &str) -> AnswerOutcome {
        if self.status != RoundStatus::Active {
            return AnswerOutcome::MISS;
        }

        let Some(slot) = self.question.check_answer(text) else {
            return AnswerOutcome::MISS;
        };

        if self.claims[slot].is_some() {
            return AnswerOutcome {
                correct: true,
                already_answered: true,
                slot: Some(slot),
            };
        }

        self.claims[slot] = Some(Claim {
            player_id: player.id.clone(),
            seq: self.next_seq,
        });
        self.next_seq += 1;
        self.highlighted[slot] = true;
        self.players
            .entry(player.id.clone())
            .or_insert_with(|| player.clone());

        AnswerOutcome {
            correct: true,
            already_answered: false,
            slot: Some(slot),
        }
    }

    /// Time until the round's end, saturating at zero. Informational only.
    pub fn time_left(&self) -> Duration {
        self.end_at.saturating_duration_since(Instant::now())
    }

    /// True iff every slot has been claimed.
    pub fn finished(&self) -> bool {
        self.claims.iter().all(Option::is_some)
    }

    /// Owner of a slot, if claimed.
    pub fn claimed_by(&self, slot: usize) -> Option<&Player> {
        self.claims
            .get(slot)?
            .as_ref()
            .and_then(|c| self.players.get(&c.player_id))
    }

    pub fn has_highlights(&self) -> bool {
        self.highlighted.iter().any(|h| *h)
    }

    pub fn clear_highlights(&mut self) {
        self.highlighted.fill(false);
    }

    pub fn mark_finished(&mut self) {
        if self.status == RoundStatus::Active {
            self.status = RoundStatus::Finished;
        }
    }

    pub fn mark_timed_out(&mut self) {
        if self.status == RoundStatus::Active {
            self.status = RoundStatus::TimedOut;
        }
    }

    /// View of the round. With `show_unanswered`, open slots reveal their
    /// text and score without an owner.
    pub fn snapshot(&self, channel_id: &str, show_unanswered: bool) -> RoundSnapshot {
        let slots = self
            .question
            .answers
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let owner = self.claimed_by(i);
                let answered = self.claims[i].is_some();
                SlotView {
                    text: (answered || show_unanswered).then(|| group.to_string()),
                    score: group.score,
                    answered,
                    player_name: owner.map(|p| p.name.clone()),
                    highlight: self.highlighted[i],
                }
            })
            .collect();

        RoundSnapshot {
            channel_id: channel_id.to_string(),
            question_id: self.question.id,
            question_text: self.question.text.clone(),
            show_unanswered,
            time_left: self.time_left(),
            slots,
        }
    }

    /// Per-player sum of claimed slot scores. Equal scores are ordered by
    /// each player's earliest claim.
    pub fn ranking(&self) -> Rank {
        let mut totals: HashMap<&PlayerId, (u64, u32)> = HashMap::new();
        for (i, claim) in self.claims.iter().enumerate() {
            let Some(claim) = claim else { continue };
            let score = self.question.answers[i].score;
            let entry = totals.entry(&claim.player_id).or_insert((claim.seq, 0));
            entry.0 = entry.0.min(claim.seq);
            entry.1 += score;
        }

        let mut by_first_claim: Vec<(&PlayerId, (u64, u32))> = totals.into_iter().collect();
        by_first_claim.sort_by_key(|(_, (first_seq, _))| *first_seq);

        by_first_claim
            .into_iter()
            .map(|(id, (_, score))| {
                let name = self
                    .players
                    .get(id)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                PlayerScore::new(id.clone(), name, score)
            })
            .collect()
    }
}
