//! Pool filtering for ticket selection
//!
//! A pool is a named, declarative filter over ticket search fields. Pools
//! perform no mutation; claiming tickets is strictly the ticket store's
//! responsibility.

pub mod filter;

pub use filter::{NumericRangeFilter, Pool, StringEqualsFilter};
