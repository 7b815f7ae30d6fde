//! Metrics collection and exposition
//!
//! Prometheus metrics for the matchmaking service. The collector bridges
//! store and director statistics into a registry served by the HTTP layer.

pub mod collector;

pub use collector::MetricsCollector;
