// Inbound and outbound message types between a game and its host.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trivia_core::model::Player;
use trivia_core::rank::Rank;

use crate::error::ProtocolViolation;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A player's chat line addressed to a running game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub player: Player,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl TextMessage {
    /// A message stamped with the current time.
    pub fn now(player: Player, text: impl Into<String>) -> Self {
        Self {
            player,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolViolation> {
        if self.player.id.is_empty() {
            return Err(ProtocolViolation::EmptyPlayerId);
        }
        if self.text.trim().is_empty() {
            return Err(ProtocolViolation::EmptyText {
                player_id: self.player.id.to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Lifecycle states of a game and its rounds, in the order a host observes
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Created,
    Started,
    RoundStarted,
    RoundFinished,
    RoundTimeout,
    Finished,
}

/// One answer slot as seen by players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    /// Answer text; `None` while the slot is still hidden.
    pub text: Option<String>,
    pub score: u32,
    pub answered: bool,
    /// Name of the player who claimed the slot.
    pub player_name: Option<String>,
    /// Claimed since the previous reveal.
    pub highlight: bool,
}

/// Render-agnostic view of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub channel_id: String,
    pub question_id: u64,
    pub question_text: String,
    pub show_unanswered: bool,
    pub time_left: Duration,
    pub slots: Vec<SlotView>,
}

impl RoundSnapshot {
    pub fn answered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.answered).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    pub channel_id: String,
    /// 1-based round number; 0 for game-level transitions.
    pub round: u32,
    pub state: GameState,
    pub snapshot: Option<RoundSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankMessage {
    pub channel_id: String,
    pub round: u32,
    /// Cumulative ranking of the game so far.
    pub rank: Rank,
    pub is_final: bool,
}

/// Everything a game reports to its host. Hosts should ignore variants they
/// do not know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum GameEvent {
    /// State transition. Always delivered.
    State(StateMessage),
    /// Newly claimed answers, batched per tick. Best effort.
    Snapshot(RoundSnapshot),
    /// Periodic time-left notice. Best effort.
    Tick { channel_id: String, time_left: Duration },
    /// An incorrect guess, when enabled. Best effort.
    WrongAnswer { channel_id: String, time_left: Duration },
    /// Running ranking after a round. Always delivered.
    Rank(RankMessage),
}

impl GameEvent {
    /// Whether the event may be dropped under backpressure.
    pub fn is_best_effort(&self) -> bool {
        matches!(
            self,
            GameEvent::Snapshot(_) | GameEvent::Tick { .. } | GameEvent::WrongAnswer { .. }
        )
    }
}
