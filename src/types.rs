//! Common types used throughout the matchmaking service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Unique identifier for tickets
pub type TicketId = Uuid;

/// Unique identifier for proposed matches
pub type MatchId = String;

/// Opaque caller-defined metadata attached to tickets, proposals and assignments
pub type Extensions = HashMap<String, serde_json::Value>;

/// Searchable attributes of a ticket
///
/// All fields are immutable after ticket creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFields {
    /// Free-form tags, matched by presence
    #[serde(default)]
    pub tags: HashSet<String>,
    /// Numeric attributes, matched by inclusive range filters
    #[serde(default)]
    pub numeric_args: HashMap<String, f64>,
    /// String attributes, matched by exact equality
    #[serde(default)]
    pub string_args: HashMap<String, String>,
}

impl SearchFields {
    /// Build search fields from a list of tags
    pub fn with_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Lifecycle state of a ticket
///
/// The state is the only mutable aspect of a ticket and is owned exclusively
/// by the ticket store. A ticket is visible to pool queries only while
/// `Pending`; it never regresses from `Assigned`.
#[derive(Debug, Clone, PartialEq)]
pub enum TicketState {
    /// Waiting in the pool
    Pending,
    /// Exclusively claimed by an in-flight proposal
    Reserved {
        owner: String,
        expires_at: DateTime<Utc>,
    },
    /// Matched to a session, assignment available for polling
    Assigned,
    /// Aged out without a match (terminal)
    Expired,
}

impl TicketState {
    /// Short label for logging and metrics
    pub fn label(&self) -> &'static str {
        match self {
            TicketState::Pending => "pending",
            TicketState::Reserved { .. } => "reserved",
            TicketState::Assigned => "assigned",
            TicketState::Expired => "expired",
        }
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A player's request to be matched
///
/// Everything here is write-once at creation time; the mutable state lives
/// in the ticket store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub search_fields: SearchFields,
    #[serde(default)]
    pub extensions: Extensions,
    pub create_time: DateTime<Utc>,
}

/// Connection information delivered to matched tickets
///
/// An empty `connection` denotes "no assignment yet". Once written for a
/// ticket the assignment is immutable and idempotent to re-read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub connection: String,
    #[serde(default)]
    pub extensions: Extensions,
}

/// A candidate match produced by a match function, pending finalization
///
/// Proposals are ephemeral: created by the match function, consumed by the
/// director within the same cycle, never persisted beyond it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchProposal {
    pub match_id: MatchId,
    pub profile_name: String,
    /// Claimed tickets, one claim set per pool concatenated in profile-pool order
    pub tickets: Vec<Ticket>,
    /// Pool name to claimed ticket ids, for deterministic side assignment
    pub teams: HashMap<String, Vec<TicketId>>,
    /// Priority score used by the director when resources are scarce
    pub score: f64,
}

impl MatchProposal {
    /// Ids of all claimed tickets, in proposal order
    pub fn ticket_ids(&self) -> Vec<TicketId> {
        self.tickets.iter().map(|t| t.id).collect()
    }

    /// Number of players this proposal seats
    pub fn player_count(&self) -> usize {
        self.tickets.len()
    }
}

/// Frontend request to create a new ticket
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTicketRequest {
    #[serde(default)]
    pub search_fields: SearchFields,
    #[serde(default)]
    pub extensions: Extensions,
}

/// Frontend response carrying the id of a newly created ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTicketResponse {
    pub id: TicketId,
}
