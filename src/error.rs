//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid ticket: {reason}")]
    InvalidTicket { reason: String },

    #[error("Ticket not found: {ticket_id}")]
    TicketNotFound { ticket_id: String },

    #[error("Invalid match profile: {reason}")]
    InvalidProfile { reason: String },

    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("Server allocation failed: {message}")]
    AllocationFailed { message: String },

    #[error("Match function failed: {reason}")]
    MatchFunctionFailed { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}
