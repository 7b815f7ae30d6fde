//! Shared fixtures for integration tests
//!
//! Hand-written allocator doubles and helpers for assembling a complete
//! matchmaking core without the HTTP layer.

use async_trait::async_trait;
use rallypoint::director::{Allocation, Director, DirectorConfig, ServerAllocator};
use rallypoint::error::{MatchmakingError, Result};
use rallypoint::mmf::FifoMatchFunction;
use rallypoint::pool::Pool;
use rallypoint::profile::{MatchProfile, ProfileRegistry};
use rallypoint::store::TicketStore;
use rallypoint::types::{Extensions, SearchFields, TicketId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Allocator that records every allocation and mints unique connections
pub struct RecordingAllocator {
    counter: AtomicUsize,
    allocations: Mutex<Vec<(String, usize)>>,
}

impl RecordingAllocator {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            allocations: Mutex::new(Vec::new()),
        }
    }

    /// Every (game_mode, player_count) pair seen so far
    pub fn allocations(&self) -> Vec<(String, usize)> {
        self.allocations.lock().unwrap().clone()
    }

    pub fn allocation_count(&self) -> usize {
        self.allocations.lock().unwrap().len()
    }
}

#[async_trait]
impl ServerAllocator for RecordingAllocator {
    async fn allocate(&self, game_mode: &str, player_count: usize) -> Result<Allocation> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.allocations
            .lock()
            .unwrap()
            .push((game_mode.to_string(), player_count));
        Ok(Allocation {
            connection: format!("match-{}.test:7777", n),
        })
    }
}

/// Allocator that fails a configured number of times before succeeding
pub struct FlakyAllocator {
    failures_remaining: AtomicUsize,
    inner: RecordingAllocator,
}

impl FlakyAllocator {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(times),
            inner: RecordingAllocator::new(),
        }
    }

    pub fn allocation_count(&self) -> usize {
        self.inner.allocation_count()
    }
}

#[async_trait]
impl ServerAllocator for FlakyAllocator {
    async fn allocate(&self, game_mode: &str, player_count: usize) -> Result<Allocation> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(MatchmakingError::AllocationFailed {
                message: "Fleet exhausted".to_string(),
            }
            .into());
        }
        self.inner.allocate(game_mode, player_count).await
    }
}

/// Allocator that fails only for one game mode
pub struct SelectiveAllocator {
    failing_mode: String,
    inner: RecordingAllocator,
}

impl SelectiveAllocator {
    pub fn failing_for(mode: impl Into<String>) -> Self {
        Self {
            failing_mode: mode.into(),
            inner: RecordingAllocator::new(),
        }
    }
}

#[async_trait]
impl ServerAllocator for SelectiveAllocator {
    async fn allocate(&self, game_mode: &str, player_count: usize) -> Result<Allocation> {
        if game_mode == self.failing_mode {
            return Err(MatchmakingError::AllocationFailed {
                message: format!("No servers for mode '{}'", game_mode),
            }
            .into());
        }
        self.inner.allocate(game_mode, player_count).await
    }
}

/// Profile with a single tag-filtered pool
pub fn tag_profile(name: &str, tag: &str, players_needed: u64) -> MatchProfile {
    MatchProfile::new(name)
        .with_pool(Pool::new(format!("{}-pool", name)).with_tag(tag))
        .with_players_needed(players_needed)
}

/// Create `count` tickets carrying one tag, with strictly increasing create times
pub fn create_tagged_tickets(store: &TicketStore, tag: &str, count: usize) -> Vec<TicketId> {
    let mut ids = Vec::with_capacity(count);
    for _ in 0..count {
        let ticket = store
            .create(SearchFields::with_tags([tag]), Extensions::new())
            .unwrap();
        ids.push(ticket.id);
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    ids
}

/// Assemble a director over the given store, profiles and allocator
pub fn build_director(
    store: TicketStore,
    profiles: Vec<MatchProfile>,
    allocator: Arc<dyn ServerAllocator>,
) -> Director {
    let registry = ProfileRegistry::new();
    for profile in profiles {
        registry.register(profile).unwrap();
    }
    let match_function = Arc::new(FifoMatchFunction::new(store.clone()));
    Director::new(
        store,
        registry,
        match_function,
        allocator,
        DirectorConfig::default(),
    )
}
