// Score persistence contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::model::PlayerId;
use crate::rank::{PlayerScore, Rank};

/// Channel config key holding a per-channel question limit override.
pub const QUESTION_LIMIT_KEY: &str = "question_limit";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Persists cumulative rankings and per-channel bookkeeping. Shared by every
/// running game, so implementations must tolerate concurrent calls.
pub trait ScoreStore: Send + Sync {
    /// Seed and number of rounds already played for the channel. The seed is
    /// fixed the first time a channel is seen.
    fn next_game(&self, channel_id: &str) -> Result<(i64, u64), StoreError>;

    /// Record that one more round was played in the channel.
    fn inc_round_played(&self, channel_id: &str) -> Result<(), StoreError>;

    /// Add a round's scores to the channel's cumulative ranking.
    fn save_score(&self, channel_id: &str, channel_name: &str, rank: &Rank) -> Result<(), StoreError>;

    /// Cumulative ranking of a channel. `limit` of 0 returns everyone.
    fn channel_ranking(&self, channel_id: &str, limit: usize) -> Result<Rank, StoreError>;

    /// Cumulative ranking across all channels. `limit` of 0 returns everyone.
    fn player_ranking(&self, limit: usize) -> Result<Rank, StoreError>;

    /// A player's total across all channels, if they have ever scored.
    fn player_score(&self, player_id: &PlayerId) -> Result<Option<PlayerScore>, StoreError>;

    fn channel_config(&self, channel_id: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn set_channel_config(&self, channel_id: &str, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Truncate a ranking to its first `limit` entries (0 keeps everything).
pub(crate) fn truncate(rank: Rank, limit: usize) -> Rank {
    if limit == 0 || rank.len() <= limit {
        return rank;
    }
    Rank::from_scores(rank.into_vec().into_iter().take(limit).collect())
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    rounds_played: HashMap<String, u64>,
    player_names: HashMap<PlayerId, String>,
    /// channel id -> player id -> score, in first-scored order.
    scores: HashMap<String, Vec<(PlayerId, u32)>>,
    config: HashMap<(String, String), String>,
}

/// Non-persistent store. Every channel shares the seed given at
/// construction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    seed: i64,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new(seed: i64) -> Self {
        Self {
            seed,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl ScoreStore for MemoryStore {
    fn next_game(&self, channel_id: &str) -> Result<(i64, u64), StoreError> {
        let played = self
            .state()?
            .rounds_played
            .get(channel_id)
            .copied()
            .unwrap_or(0);
        Ok((self.seed, played))
    }

    fn inc_round_played(&self, channel_id: &str) -> Result<(), StoreError> {
        *self
            .state()?
            .rounds_played
            .entry(channel_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    fn save_score(&self, channel_id: &str, _channel_name: &str, rank: &Rank) -> Result<(), StoreError> {
        let mut state = self.state()?;
        for ps in rank {
            state
                .player_names
                .insert(ps.player_id.clone(), ps.name.clone());
        }

        let scores = state.scores.entry(channel_id.to_string()).or_default();
        for ps in rank {
            match scores.iter_mut().find(|(id, _)| id == &ps.player_id) {
                Some((_, score)) => *score = score.saturating_add(ps.score),
                None => scores.push((ps.player_id.clone(), ps.score)),
            }
        }
        Ok(())
    }

    fn channel_ranking(&self, channel_id: &str, limit: usize) -> Result<Rank, StoreError> {
        let state = self.state()?;
        let rank: Rank = state
            .scores
            .get(channel_id)
            .into_iter()
            .flatten()
            .map(|(id, score)| {
                let name = state.player_names.get(id).cloned().unwrap_or_default();
                PlayerScore::new(id.clone(), name, *score)
            })
            .collect();
        Ok(truncate(rank, limit))
    }

    fn player_ranking(&self, limit: usize) -> Result<Rank, StoreError> {
        let state = self.state()?;
        let mut channels: Vec<&String> = state.scores.keys().collect();
        channels.sort();

        let mut total = Rank::new();
        for channel in channels {
            let rank: Rank = state.scores[channel]
                .iter()
                .map(|(id, score)| {
                    let name = state.player_names.get(id).cloned().unwrap_or_default();
                    PlayerScore::new(id.clone(), name, *score)
                })
                .collect();
            total = total.add(&rank);
        }
        Ok(truncate(total, limit))
    }

    fn player_score(&self, player_id: &PlayerId) -> Result<Option<PlayerScore>, StoreError> {
        Ok(self.player_ranking(0)?.get(player_id).cloned())
    }

    fn channel_config(&self, channel_id: &str, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .state()?
            .config
            .get(&(channel_id.to_string(), key.to_string()))
            .cloned())
    }

    fn set_channel_config(&self, channel_id: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.state()?
            .config
            .insert((channel_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }
}
