//! Runtime for processing conversation turns
//!
//! The turn processor owns the per-conversation pipeline; I/O goes through
//! the traits in [`traits`] so tests can swap in mocks.

mod processor;
pub mod traits;
mod turn;

#[cfg(test)]
pub mod testing;

pub use processor::{TurnError, TurnOutcome, TurnProcessor, DEFAULT_PROMPT_TIMEOUT_SECS};
pub use traits::*;
