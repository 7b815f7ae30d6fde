//! Ticket store implementation and the atomic claim protocol
//!
//! This module provides the core TicketStore that owns ticket state
//! transitions: creation, pool queries, all-or-nothing reservation,
//! assignment and TTL sweeping.

use crate::error::{MatchmakingError, Result};
use crate::pool::Pool;
use crate::types::{Assignment, Extensions, SearchFields, Ticket, TicketId, TicketState};
use crate::utils::{current_timestamp, generate_ticket_id};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Store-level tuning knobs
#[derive(Debug, Clone)]
pub struct TicketStoreConfig {
    /// Maximum age of a Pending ticket before the sweep expires it
    pub pending_ttl_seconds: u64,
    /// How long a reservation may be held before the sweep reverts it
    pub reservation_ttl_seconds: u64,
    /// Grace period before an Assigned ticket is removed
    pub assignment_ttl_seconds: u64,
}

impl Default for TicketStoreConfig {
    fn default() -> Self {
        Self {
            pending_ttl_seconds: 600,   // 10 minutes
            reservation_ttl_seconds: 30,
            assignment_ttl_seconds: 300, // 5 minutes
        }
    }
}

/// Counters accumulated over the store's lifetime plus current occupancy
#[derive(Debug, Clone, Default)]
pub struct TicketStoreStats {
    /// Total tickets created
    pub tickets_created: u64,
    /// Total tickets transitioned to Assigned
    pub tickets_assigned: u64,
    /// Total Pending tickets expired by the sweep
    pub tickets_expired: u64,
    /// Total tickets cancelled by clients
    pub tickets_cancelled: u64,
    /// Total failed try_reserve calls (contention)
    pub reserve_conflicts: u64,
    /// Total leaked reservations reverted by the sweep
    pub reservations_reverted: u64,
    /// Current number of Pending tickets
    pub pending_tickets: usize,
    /// Current number of Reserved tickets
    pub reserved_tickets: usize,
    /// Current number of Assigned tickets
    pub assigned_tickets: usize,
}

/// Result of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub expired_pending: usize,
    pub reverted_reservations: usize,
    pub removed_assigned: usize,
}

impl SweepOutcome {
    pub fn is_noop(&self) -> bool {
        self.expired_pending == 0 && self.reverted_reservations == 0 && self.removed_assigned == 0
    }
}

/// Internal per-ticket record: the write-once ticket plus the mutable state
#[derive(Debug, Clone)]
struct TicketRecord {
    ticket: Ticket,
    state: TicketState,
    assignment: Option<Assignment>,
    assigned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct StoreCounters {
    tickets_created: u64,
    tickets_assigned: u64,
    tickets_expired: u64,
    tickets_cancelled: u64,
    reserve_conflicts: u64,
    reservations_reverted: u64,
}

/// Concurrency-safe registry of tickets with atomic state transitions
///
/// Mutating calls take a short write-lock critical section covering only the
/// check-then-flip; no I/O ever happens under the lock. `try_reserve` is
/// all-or-nothing: either every requested ticket moves Pending to Reserved
/// or none does, which is what keeps a ticket out of two simultaneously
/// computed proposals.
#[derive(Clone)]
pub struct TicketStore {
    records: Arc<RwLock<HashMap<TicketId, TicketRecord>>>,
    counters: Arc<RwLock<StoreCounters>>,
    config: TicketStoreConfig,
}

impl TicketStore {
    /// Create a store with default configuration
    pub fn new() -> Self {
        Self::with_config(TicketStoreConfig::default())
    }

    /// Create a store with explicit configuration
    pub fn with_config(config: TicketStoreConfig) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(StoreCounters::default())),
            config,
        }
    }

    /// Create a new Pending ticket; always succeeds
    pub fn create(&self, search_fields: SearchFields, extensions: Extensions) -> Result<Ticket> {
        let ticket = Ticket {
            id: generate_ticket_id(),
            search_fields,
            extensions,
            create_time: current_timestamp(),
        };

        {
            let mut records = self.write_records()?;
            records.insert(
                ticket.id,
                TicketRecord {
                    ticket: ticket.clone(),
                    state: TicketState::Pending,
                    assignment: None,
                    assigned_at: None,
                },
            );
        }

        self.write_counters()?.tickets_created += 1;

        debug!("Created ticket {}", ticket.id);
        Ok(ticket)
    }

    /// Look up the write-once part of a ticket
    pub fn get(&self, ticket_id: TicketId) -> Result<Option<Ticket>> {
        let records = self.read_records()?;
        Ok(records.get(&ticket_id).map(|record| record.ticket.clone()))
    }

    /// Current state of a ticket, if it still exists
    pub fn state(&self, ticket_id: TicketId) -> Result<Option<TicketState>> {
        let records = self.read_records()?;
        Ok(records.get(&ticket_id).map(|record| record.state.clone()))
    }

    /// All Pending tickets matching the pool, oldest first
    ///
    /// Tickets in any other state are never returned. The FIFO order is as
    /// observed at query time; a failed reservation plus re-query may observe
    /// a different order under contention.
    pub fn query_pending(&self, pool: &Pool) -> Result<Vec<Ticket>> {
        let records = self.read_records()?;

        let mut matching: Vec<Ticket> = records
            .values()
            .filter(|record| record.state == TicketState::Pending)
            .filter(|record| pool.matches(&record.ticket.search_fields))
            .map(|record| record.ticket.clone())
            .collect();

        matching.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(matching)
    }

    /// Atomically move the given tickets from Pending to Reserved
    ///
    /// Succeeds only if every id is currently Pending; otherwise nothing is
    /// mutated and `false` is returned. Callers must treat a failure as
    /// contention and retry with a fresh query, never assume partial success.
    pub fn try_reserve(&self, ticket_ids: &[TicketId], owner: &str) -> Result<bool> {
        if ticket_ids.is_empty() {
            return Ok(false);
        }

        let expires_at = current_timestamp()
            + ChronoDuration::seconds(self.config.reservation_ttl_seconds as i64);

        let mut records = self.write_records()?;

        let all_pending = ticket_ids.iter().all(|id| {
            records
                .get(id)
                .map(|record| record.state == TicketState::Pending)
                .unwrap_or(false)
        });

        if !all_pending {
            drop(records);
            self.write_counters()?.reserve_conflicts += 1;
            debug!(
                "Reservation conflict for owner '{}' over {} tickets",
                owner,
                ticket_ids.len()
            );
            return Ok(false);
        }

        for id in ticket_ids {
            if let Some(record) = records.get_mut(id) {
                record.state = TicketState::Reserved {
                    owner: owner.to_string(),
                    expires_at,
                };
            }
        }

        debug!(
            "Reserved {} tickets for owner '{}' until {}",
            ticket_ids.len(),
            owner,
            expires_at
        );
        Ok(true)
    }

    /// Move Reserved tickets back to Pending; ids in any other state are skipped
    pub fn release(&self, ticket_ids: &[TicketId]) -> Result<usize> {
        let mut records = self.write_records()?;
        let mut released = 0;

        for id in ticket_ids {
            if let Some(record) = records.get_mut(id) {
                if matches!(record.state, TicketState::Reserved { .. }) {
                    record.state = TicketState::Pending;
                    released += 1;
                }
            }
        }

        if released > 0 {
            debug!("Released {} tickets back to Pending", released);
        }
        Ok(released)
    }

    /// Atomically move Reserved tickets to Assigned and store the assignment
    ///
    /// All-or-nothing: fails (returning `false`, mutating nothing) unless
    /// every id is currently Reserved by `owner` with an unexpired deadline.
    /// The owner check enforces that only the proposal that claimed the
    /// tickets can convert them.
    pub fn assign(
        &self,
        ticket_ids: &[TicketId],
        owner: &str,
        assignment: &Assignment,
    ) -> Result<bool> {
        if ticket_ids.is_empty() {
            return Ok(false);
        }

        let now = current_timestamp();
        let mut records = self.write_records()?;

        let all_held = ticket_ids.iter().all(|id| {
            records
                .get(id)
                .map(|record| match &record.state {
                    TicketState::Reserved {
                        owner: held_by,
                        expires_at,
                    } => held_by == owner && *expires_at > now,
                    _ => false,
                })
                .unwrap_or(false)
        });

        if !all_held {
            warn!(
                "Assignment rejected for owner '{}': not all {} tickets are held",
                owner,
                ticket_ids.len()
            );
            return Ok(false);
        }

        for id in ticket_ids {
            if let Some(record) = records.get_mut(id) {
                record.state = TicketState::Assigned;
                record.assignment = Some(assignment.clone());
                record.assigned_at = Some(now);
            }
        }
        drop(records);

        self.write_counters()?.tickets_assigned += ticket_ids.len() as u64;

        info!(
            "Assigned {} tickets to connection '{}'",
            ticket_ids.len(),
            assignment.connection
        );
        Ok(true)
    }

    /// Read a ticket's assignment without blocking on matchmaking
    ///
    /// Returns `None` for unknown (or already removed) tickets. A known but
    /// not-yet-matched ticket yields an assignment with an empty connection.
    pub fn get_assignment(&self, ticket_id: TicketId) -> Result<Option<Assignment>> {
        let records = self.read_records()?;
        Ok(records
            .get(&ticket_id)
            .map(|record| record.assignment.clone().unwrap_or_default()))
    }

    /// Remove a ticket at the client's request, whatever its state
    ///
    /// Cancelling a Reserved ticket is allowed: the owning proposal's
    /// all-or-nothing `assign` will subsequently fail and the director
    /// releases the proposal's remaining tickets.
    pub fn cancel(&self, ticket_id: TicketId) -> Result<bool> {
        let removed = {
            let mut records = self.write_records()?;
            records.remove(&ticket_id)
        };

        match removed {
            Some(record) => {
                self.write_counters()?.tickets_cancelled += 1;
                info!(
                    "Cancelled ticket {} (was {})",
                    ticket_id,
                    record.state.label()
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Silently delete a ticket and its assignment
    pub fn remove(&self, ticket_id: TicketId) -> Result<bool> {
        let mut records = self.write_records()?;
        Ok(records.remove(&ticket_id).is_some())
    }

    /// One maintenance pass over the store
    ///
    /// Expires Pending tickets past their max age, reverts reservations whose
    /// deadline has passed (leaked by crashed or timed-out tasks), and removes
    /// Assigned tickets past the retrieval grace period.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepOutcome> {
        let pending_cutoff = now - ChronoDuration::seconds(self.config.pending_ttl_seconds as i64);
        let assigned_cutoff =
            now - ChronoDuration::seconds(self.config.assignment_ttl_seconds as i64);

        let mut outcome = SweepOutcome::default();
        let mut to_remove: Vec<TicketId> = Vec::new();

        {
            let mut records = self.write_records()?;

            for (id, record) in records.iter_mut() {
                match &record.state {
                    TicketState::Pending => {
                        if record.ticket.create_time < pending_cutoff {
                            record.state = TicketState::Expired;
                            to_remove.push(*id);
                            outcome.expired_pending += 1;
                        }
                    }
                    TicketState::Reserved { expires_at, owner } => {
                        if *expires_at <= now {
                            warn!(
                                "Reverting expired reservation on ticket {} held by '{}'",
                                id, owner
                            );
                            record.state = TicketState::Pending;
                            outcome.reverted_reservations += 1;
                        }
                    }
                    TicketState::Assigned => {
                        if record.assigned_at.map(|at| at < assigned_cutoff).unwrap_or(false) {
                            to_remove.push(*id);
                            outcome.removed_assigned += 1;
                        }
                    }
                    TicketState::Expired => {
                        to_remove.push(*id);
                    }
                }
            }

            for id in &to_remove {
                records.remove(id);
            }
        }

        if outcome.expired_pending > 0 || outcome.reverted_reservations > 0 {
            let mut counters = self.write_counters()?;
            counters.tickets_expired += outcome.expired_pending as u64;
            counters.reservations_reverted += outcome.reverted_reservations as u64;
        }

        if !outcome.is_noop() {
            info!(
                "Sweep: expired {} pending, reverted {} reservations, removed {} assigned",
                outcome.expired_pending, outcome.reverted_reservations, outcome.removed_assigned
            );
        }

        Ok(outcome)
    }

    /// Snapshot of counters and current occupancy
    pub fn stats(&self) -> Result<TicketStoreStats> {
        let (pending, reserved, assigned) = {
            let records = self.read_records()?;
            let mut pending = 0;
            let mut reserved = 0;
            let mut assigned = 0;
            for record in records.values() {
                match record.state {
                    TicketState::Pending => pending += 1,
                    TicketState::Reserved { .. } => reserved += 1,
                    TicketState::Assigned => assigned += 1,
                    TicketState::Expired => {}
                }
            }
            (pending, reserved, assigned)
        };

        let counters = self
            .counters
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire store counters lock".to_string(),
            })?;

        Ok(TicketStoreStats {
            tickets_created: counters.tickets_created,
            tickets_assigned: counters.tickets_assigned,
            tickets_expired: counters.tickets_expired,
            tickets_cancelled: counters.tickets_cancelled,
            reserve_conflicts: counters.reserve_conflicts,
            reservations_reverted: counters.reservations_reverted,
            pending_tickets: pending,
            reserved_tickets: reserved,
            assigned_tickets: assigned,
        })
    }

    /// Total number of live tickets
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_records()?.len())
    }

    /// Whether the store holds no tickets
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read_records()?.is_empty())
    }

    /// Spawn the periodic sweep task
    pub fn start_sweep_task(&self, sweep_interval: Duration) -> JoinHandle<()> {
        let store = self.clone();

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);

            loop {
                ticker.tick().await;

                match store.sweep(current_timestamp()) {
                    Ok(outcome) => {
                        if !outcome.is_noop() {
                            debug!("Sweep pass completed: {:?}", outcome);
                        }
                    }
                    Err(e) => {
                        error!("Error during ticket sweep: {}", e);
                    }
                }
            }
        })
    }

    fn read_records(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<TicketId, TicketRecord>>> {
        self.records
            .read()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire ticket store lock".to_string(),
                }
                .into()
            })
    }

    fn write_records(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<TicketId, TicketRecord>>> {
        self.records
            .write()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire ticket store lock".to_string(),
                }
                .into()
            })
    }

    fn write_counters(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreCounters>> {
        self.counters
            .write()
            .map_err(|_| {
                MatchmakingError::InternalError {
                    message: "Failed to acquire store counters lock".to_string(),
                }
                .into()
            })
    }
}

impl Default for TicketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SearchFields;

    fn duel_ticket(store: &TicketStore) -> Ticket {
        store
            .create(SearchFields::with_tags(["duel"]), Extensions::new())
            .unwrap()
    }

    fn duel_pool() -> Pool {
        Pool::new("duelists").with_tag("duel")
    }

    #[test]
    fn test_create_starts_pending() {
        let store = TicketStore::new();
        let ticket = duel_ticket(&store);

        assert_eq!(store.state(ticket.id).unwrap(), Some(TicketState::Pending));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_query_pending_is_fifo() {
        let store = TicketStore::new();
        let first = duel_ticket(&store);
        let second = duel_ticket(&store);
        let third = duel_ticket(&store);

        let results = store.query_pending(&duel_pool()).unwrap();
        let ids: Vec<_> = results.iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().position(|&id| id == first.id).unwrap()
            <= ids.iter().position(|&id| id == second.id).unwrap());
        assert!(ids.iter().position(|&id| id == second.id).unwrap()
            <= ids.iter().position(|&id| id == third.id).unwrap());
    }

    #[test]
    fn test_query_pending_skips_non_pending() {
        let store = TicketStore::new();
        let reserved = duel_ticket(&store);
        let pending = duel_ticket(&store);

        assert!(store.try_reserve(&[reserved.id], "mmf-1").unwrap());

        let results = store.query_pending(&duel_pool()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, pending.id);
    }

    #[test]
    fn test_try_reserve_is_all_or_nothing() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);
        let b = duel_ticket(&store);

        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());

        // b is still Pending but a is not, so the union must fail untouched
        assert!(!store.try_reserve(&[a.id, b.id], "mmf-2").unwrap());
        assert_eq!(store.state(b.id).unwrap(), Some(TicketState::Pending));

        let stats = store.stats().unwrap();
        assert_eq!(stats.reserve_conflicts, 1);
    }

    #[test]
    fn test_try_reserve_unknown_ticket_fails() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);

        assert!(!store
            .try_reserve(&[a.id, generate_ticket_id()], "mmf-1")
            .unwrap());
        assert_eq!(store.state(a.id).unwrap(), Some(TicketState::Pending));
    }

    #[test]
    fn test_release_returns_tickets_to_pending() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);
        let b = duel_ticket(&store);

        assert!(store.try_reserve(&[a.id, b.id], "mmf-1").unwrap());
        assert_eq!(store.release(&[a.id, b.id]).unwrap(), 2);

        assert_eq!(store.state(a.id).unwrap(), Some(TicketState::Pending));
        assert_eq!(store.query_pending(&duel_pool()).unwrap().len(), 2);
    }

    #[test]
    fn test_assign_requires_matching_owner() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);

        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());

        let assignment = Assignment {
            connection: "game-1.example.com:7777".to_string(),
            extensions: Extensions::new(),
        };

        assert!(!store.assign(&[a.id], "mmf-2", &assignment).unwrap());
        assert!(store.assign(&[a.id], "mmf-1", &assignment).unwrap());
        assert_eq!(store.state(a.id).unwrap(), Some(TicketState::Assigned));
    }

    #[test]
    fn test_assign_fails_without_reservation() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);

        let assignment = Assignment {
            connection: "game-1.example.com:7777".to_string(),
            extensions: Extensions::new(),
        };
        assert!(!store.assign(&[a.id], "mmf-1", &assignment).unwrap());
        assert_eq!(store.state(a.id).unwrap(), Some(TicketState::Pending));
    }

    #[test]
    fn test_assignment_read_is_idempotent() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);

        // Known but unmatched tickets poll as an empty connection
        let early = store.get_assignment(a.id).unwrap().unwrap();
        assert!(early.connection.is_empty());

        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());
        let assignment = Assignment {
            connection: "game-1.example.com:7777".to_string(),
            extensions: Extensions::new(),
        };
        assert!(store.assign(&[a.id], "mmf-1", &assignment).unwrap());

        for _ in 0..3 {
            let read = store.get_assignment(a.id).unwrap().unwrap();
            assert_eq!(read.connection, "game-1.example.com:7777");
        }

        // Unknown tickets read as not found
        assert!(store.get_assignment(generate_ticket_id()).unwrap().is_none());
    }

    #[test]
    fn test_cancel_any_state() {
        let store = TicketStore::new();
        let pending = duel_ticket(&store);
        let reserved = duel_ticket(&store);
        assert!(store.try_reserve(&[reserved.id], "mmf-1").unwrap());

        assert!(store.cancel(pending.id).unwrap());
        assert!(store.cancel(reserved.id).unwrap());
        assert!(!store.cancel(pending.id).unwrap());
        assert_eq!(store.len().unwrap(), 0);

        // The proposal holding the cancelled reservation can no longer assign
        let assignment = Assignment::default();
        assert!(!store.assign(&[reserved.id], "mmf-1", &assignment).unwrap());
    }

    #[test]
    fn test_sweep_expires_old_pending() {
        let store = TicketStore::with_config(TicketStoreConfig {
            pending_ttl_seconds: 60,
            ..Default::default()
        });
        let a = duel_ticket(&store);

        let outcome = store
            .sweep(current_timestamp() + ChronoDuration::seconds(61))
            .unwrap();
        assert_eq!(outcome.expired_pending, 1);
        assert!(store.get(a.id).unwrap().is_none());
        assert_eq!(store.stats().unwrap().tickets_expired, 1);
    }

    #[test]
    fn test_sweep_reverts_expired_reservations() {
        let store = TicketStore::with_config(TicketStoreConfig {
            reservation_ttl_seconds: 5,
            ..Default::default()
        });
        let a = duel_ticket(&store);
        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());

        // Before the deadline nothing changes
        let outcome = store.sweep(current_timestamp()).unwrap();
        assert_eq!(outcome.reverted_reservations, 0);

        let outcome = store
            .sweep(current_timestamp() + ChronoDuration::seconds(6))
            .unwrap();
        assert_eq!(outcome.reverted_reservations, 1);
        assert_eq!(store.state(a.id).unwrap(), Some(TicketState::Pending));
    }

    #[test]
    fn test_sweep_removes_retrieved_assignments() {
        let store = TicketStore::with_config(TicketStoreConfig {
            assignment_ttl_seconds: 10,
            ..Default::default()
        });
        let a = duel_ticket(&store);
        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());
        assert!(store
            .assign(&[a.id], "mmf-1", &Assignment::default())
            .unwrap());

        let outcome = store
            .sweep(current_timestamp() + ChronoDuration::seconds(11))
            .unwrap();
        assert_eq!(outcome.removed_assigned, 1);
        assert!(store.get_assignment(a.id).unwrap().is_none());
    }

    #[test]
    fn test_expired_reservation_cannot_be_assigned() {
        let store = TicketStore::with_config(TicketStoreConfig {
            reservation_ttl_seconds: 0,
            ..Default::default()
        });
        let a = duel_ticket(&store);
        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());

        // Deadline has already passed even though the sweep has not run yet
        assert!(!store
            .assign(&[a.id], "mmf-1", &Assignment::default())
            .unwrap());
    }

    #[test]
    fn test_stats_occupancy() {
        let store = TicketStore::new();
        let a = duel_ticket(&store);
        let _b = duel_ticket(&store);
        let c = duel_ticket(&store);

        assert!(store.try_reserve(&[a.id], "mmf-1").unwrap());
        assert!(store.try_reserve(&[c.id], "mmf-2").unwrap());
        assert!(store
            .assign(&[c.id], "mmf-2", &Assignment::default())
            .unwrap());

        let stats = store.stats().unwrap();
        assert_eq!(stats.tickets_created, 3);
        assert_eq!(stats.pending_tickets, 1);
        assert_eq!(stats.reserved_tickets, 1);
        assert_eq!(stats.assigned_tickets, 1);
        assert_eq!(stats.tickets_assigned, 1);
    }
}
