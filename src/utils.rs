//! Utility functions for the matchmaking service

use crate::types::TicketId;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique ticket ID
pub fn generate_ticket_id() -> TicketId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds a ticket has waited since creation, clamped at zero
pub fn wait_seconds(create_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - create_time).num_milliseconds();
    if millis <= 0 {
        0.0
    } else {
        millis as f64 / 1000.0
    }
}
