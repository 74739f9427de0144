// Library root: the round/game state machine and the message types it
// exchanges with session hosts.

pub mod error;
pub mod game;
pub mod protocol;
pub mod round;
