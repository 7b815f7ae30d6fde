//! Proposal scoring
//!
//! Scores bias the director toward serving long-waiting players first when
//! allocator capacity is scarce, with a capped bonus so fast pools are not
//! starved.

use crate::types::Ticket;
use crate::utils::wait_seconds;
use chrono::{DateTime, Utc};

/// Score every proposal starts from
pub const BASE_SCORE: f64 = 100.0;

/// Bonus per second of average wait
pub const WAIT_BONUS_PER_SECOND: f64 = 10.0;

/// Cap on the wait bonus
pub const MAX_WAIT_BONUS: f64 = 50.0;

/// Priority score for a set of claimed tickets
///
/// `base + min(cap, 10 x average wait seconds)`; higher scores are allocated
/// first within a profile.
pub fn score_tickets(tickets: &[Ticket], now: DateTime<Utc>) -> f64 {
    if tickets.is_empty() {
        return BASE_SCORE;
    }

    let total_wait: f64 = tickets
        .iter()
        .map(|ticket| wait_seconds(ticket.create_time, now))
        .sum();
    let average_wait = total_wait / tickets.len() as f64;

    BASE_SCORE + (WAIT_BONUS_PER_SECOND * average_wait).min(MAX_WAIT_BONUS)
}
