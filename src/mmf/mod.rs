//! Match function implementations
//!
//! A match function turns one profile into a stream of match proposals by
//! claiming tickets from the store. The director is its only consumer.

pub mod function;
pub mod scoring;

pub use function::{FifoMatchFunction, MatchFunction, MatchFunctionConfig};
pub use scoring::score_tickets;
