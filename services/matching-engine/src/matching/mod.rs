//! Matching logic
//!
//! Crossing predicates, the taker executor, and the conditional-order
//! trigger book.

pub mod crossing;
pub mod executor;
pub mod trigger;

pub use executor::{execute, Execution, MatchContext, MatchOutcome, Residual};
pub use trigger::TriggerBook;
