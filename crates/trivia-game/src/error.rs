// Engine error types.

use thiserror::Error;
use trivia_core::config::ConfigError;
use trivia_core::store::StoreError;

#[derive(Debug, Error)]
pub enum GameError {
    /// The channel's seed / round index could not be read, so no game can be
    /// created for it.
    #[error("failed to prepare game for channel {channel_id}: {source}")]
    Construction {
        channel_id: String,
        #[source]
        source: StoreError,
    },

    #[error("invalid game config: {0}")]
    InvalidConfig(#[from] ConfigError),
}

/// A malformed inbound message. Dropped by the round loop with a warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("message has an empty player id")]
    EmptyPlayerId,

    #[error("message from {player_id} has no text")]
    EmptyText { player_id: String },
}
