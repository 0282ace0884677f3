#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod progression;
pub mod time;

pub use error::Error;
pub use progression::{LevelProgress, LevelStatus, ProgressionInput, Unavailable};
pub use time::Clock;
