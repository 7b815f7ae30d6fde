//! Server allocator boundary
//!
//! The concrete game-server fleet is outside this service; the director only
//! sees the narrow allocate call. Deployments without a fleet manager can use
//! the static round-robin implementation.

use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Session resource returned by an allocator
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Connection token clients use to reach the session
    pub connection: String,
}

/// Boundary to the external game-server allocator
#[async_trait]
pub trait ServerAllocator: Send + Sync {
    /// Request a session for one match; may block on external I/O
    async fn allocate(&self, game_mode: &str, player_count: usize) -> Result<Allocation>;
}

/// Round-robin allocator over a fixed fleet of endpoints
pub struct StaticFleetAllocator {
    endpoints: Vec<String>,
    next: AtomicUsize,
}

impl StaticFleetAllocator {
    pub fn new(endpoints: Vec<String>) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(MatchmakingError::ConfigurationError {
                message: "Static fleet allocator needs at least one endpoint".to_string(),
            }
            .into());
        }

        Ok(Self {
            endpoints,
            next: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ServerAllocator for StaticFleetAllocator {
    async fn allocate(&self, game_mode: &str, player_count: usize) -> Result<Allocation> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        let connection = self.endpoints[index].clone();

        debug!(
            "Allocated '{}' for {} players of mode '{}'",
            connection, player_count, game_mode
        );
        Ok(Allocation { connection })
    }
}
