//! Rallypoint - Matchmaking director service
//!
//! This crate turns a stream of player match requests (tickets) into
//! balanced, resource-backed game sessions: a concurrent ticket store with
//! atomic claim semantics, pool-based filtering, a FIFO match function, and
//! a periodic director that finalizes proposals through a server allocator.

pub mod config;
pub mod director;
pub mod error;
pub mod metrics;
pub mod mmf;
pub mod pool;
pub mod profile;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use director::{Director, ServerAllocator};
pub use mmf::{FifoMatchFunction, MatchFunction};
pub use pool::Pool;
pub use profile::{MatchProfile, ProfileRegistry};
pub use store::TicketStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
