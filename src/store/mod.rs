//! Concurrency-safe ticket storage
//!
//! The ticket store is the single source of truth for ticket state and the
//! only component allowed to mutate it. Every other component requests
//! mutations through the store's atomic API.

pub mod ticket;

pub use ticket::{SweepOutcome, TicketStore, TicketStoreConfig, TicketStoreStats};
