//! Shared types, error helpers, and the clock abstraction used across all
//! parley crates.

pub mod clock;
pub mod error;
pub mod types;

pub use {
    clock::{Clock, FixedClock, SharedClock, SystemClock},
    error::FromMessage,
};
