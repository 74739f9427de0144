// Library root: the player/rank model, the question pool, score persistence
// and configuration shared by the game engine and the hosts that run it.

pub mod config;
pub mod model;
pub mod question;
pub mod rank;
pub mod sqlite;
pub mod store;
