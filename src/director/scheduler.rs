//! Director scheduling loop
//!
//! Runs on a fixed interval. Within a tick, one task per active profile runs
//! the match function and finalizes its proposals; the tick barrier waits for
//! every profile task so work never accumulates across ticks under a slow
//! allocator. Per-profile failures are isolated, logged and retried on the
//! next tick.

use crate::director::allocator::ServerAllocator;
use crate::error::{MatchmakingError, Result};
use crate::mmf::MatchFunction;
use crate::profile::{MatchProfile, ProfileRegistry};
use crate::store::TicketStore;
use crate::types::{Assignment, Extensions, MatchProposal};
use std::cmp::Ordering;
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, Instant};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Director timing configuration
#[derive(Debug, Clone)]
pub struct DirectorConfig {
    /// Seconds between cycle starts
    pub tick_interval_seconds: u64,
    /// Budget for draining one profile's proposal stream
    pub mmf_timeout_seconds: u64,
    /// Budget for a single allocator call
    pub allocation_timeout_seconds: u64,
    /// Hard wall-clock budget for one profile's whole task within a tick
    pub profile_budget_seconds: u64,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 5,
            mmf_timeout_seconds: 10,
            allocation_timeout_seconds: 5,
            profile_budget_seconds: 30,
        }
    }
}

impl DirectorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    fn mmf_timeout(&self) -> Duration {
        Duration::from_secs(self.mmf_timeout_seconds)
    }

    fn allocation_timeout(&self) -> Duration {
        Duration::from_secs(self.allocation_timeout_seconds)
    }

    fn profile_budget(&self) -> Duration {
        Duration::from_secs(self.profile_budget_seconds)
    }
}

/// Counters accumulated over the director's lifetime
#[derive(Debug, Clone, Default)]
pub struct DirectorStats {
    /// Completed cycles
    pub ticks_completed: u64,
    /// Proposals received from match functions
    pub proposals_seen: u64,
    /// Proposals successfully converted to assignments
    pub matches_assigned: u64,
    /// Tickets moved to Assigned
    pub tickets_assigned: u64,
    /// Allocator failures and timeouts
    pub allocation_failures: u64,
    /// Proposals dropped because a ticket vanished mid-finalization
    pub stale_proposals: u64,
    /// Profile tasks that failed or overran their budget
    pub profile_failures: u64,
}

/// What happened during one cycle, for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub profiles_processed: usize,
    pub proposals: usize,
    pub matches_assigned: usize,
    pub allocation_failures: usize,
    pub profile_failures: usize,
}

#[derive(Debug, Default)]
struct ProfileOutcome {
    proposals: usize,
    assigned: usize,
    tickets_assigned: usize,
    allocation_failures: usize,
    stale_proposals: usize,
}

/// The periodic orchestrator that turns proposals into assignments
#[derive(Clone)]
pub struct Director {
    store: TicketStore,
    registry: ProfileRegistry,
    match_function: Arc<dyn MatchFunction>,
    allocator: Arc<dyn ServerAllocator>,
    config: DirectorConfig,
    stats: Arc<RwLock<DirectorStats>>,
}

impl Director {
    pub fn new(
        store: TicketStore,
        registry: ProfileRegistry,
        match_function: Arc<dyn MatchFunction>,
        allocator: Arc<dyn ServerAllocator>,
        config: DirectorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            match_function,
            allocator,
            config,
            stats: Arc::new(RwLock::new(DirectorStats::default())),
        }
    }

    /// Run one full cycle: fan out per profile, barrier, aggregate
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let profiles = self.registry.list()?;
        if profiles.is_empty() {
            debug!("No profiles registered, skipping cycle");
            return Ok(CycleSummary::default());
        }

        let started = Instant::now();
        let mut handles: Vec<(String, JoinHandle<Result<ProfileOutcome>>)> =
            Vec::with_capacity(profiles.len());

        for profile in profiles {
            let director = self.clone();
            let name = profile.name.clone();
            let budget = self.config.profile_budget();
            let handle = tokio::spawn(async move {
                match timeout(budget, director.process_profile(profile)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(MatchmakingError::MatchFunctionFailed {
                        reason: "Profile task exceeded its budget".to_string(),
                    }
                    .into()),
                }
            });
            handles.push((name, handle));
        }

        let mut summary = CycleSummary::default();

        // Barrier: every profile task finishes before the next tick may start
        for (name, handle) in handles {
            summary.profiles_processed += 1;
            match handle.await {
                Ok(Ok(outcome)) => {
                    summary.proposals += outcome.proposals;
                    summary.matches_assigned += outcome.assigned;
                    summary.allocation_failures += outcome.allocation_failures;
                    self.record_outcome(&outcome)?;
                }
                Ok(Err(e)) => {
                    summary.profile_failures += 1;
                    self.record_profile_failure()?;
                    error!("Profile '{}' failed this cycle: {}", name, e);
                }
                Err(e) => {
                    summary.profile_failures += 1;
                    self.record_profile_failure()?;
                    error!("Profile '{}' task panicked: {}", name, e);
                }
            }
        }

        {
            let mut stats = self.write_stats()?;
            stats.ticks_completed += 1;
        }

        if summary.proposals > 0 || summary.profile_failures > 0 {
            info!(
                "Cycle done in {:.0}ms: {} profiles, {} proposals, {} assigned, {} allocation failures",
                started.elapsed().as_secs_f64() * 1000.0,
                summary.profiles_processed,
                summary.proposals,
                summary.matches_assigned,
                summary.allocation_failures
            );
        }

        Ok(summary)
    }

    /// Run the match function for one profile and finalize its proposals
    async fn process_profile(&self, profile: MatchProfile) -> Result<ProfileOutcome> {
        let mut stream = self.match_function.run(profile.clone()).await?;
        let deadline = Instant::now() + self.config.mmf_timeout();

        let mut proposals: Vec<MatchProposal> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(Some(proposal)) => proposals.push(proposal),
                Ok(None) => break,
                Err(_) => {
                    // Dropping the stream makes the producer release unsent
                    // claims; anything it already holds self-expires.
                    warn!(
                        "Match function for profile '{}' exceeded {}s, proceeding with {} proposals",
                        profile.name,
                        self.config.mmf_timeout_seconds,
                        proposals.len()
                    );
                    break;
                }
            }
        }
        drop(stream);

        let mut outcome = ProfileOutcome {
            proposals: proposals.len(),
            ..Default::default()
        };

        // Longest-waiting matches get first claim on scarce capacity
        proposals.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        for proposal in proposals {
            self.finalize_proposal(&profile, proposal, &mut outcome).await;
        }

        Ok(outcome)
    }

    /// Allocate a session for one proposal and commit or roll back the claim
    async fn finalize_proposal(
        &self,
        profile: &MatchProfile,
        proposal: MatchProposal,
        outcome: &mut ProfileOutcome,
    ) {
        let ticket_ids = proposal.ticket_ids();
        let game_mode = profile.game_mode();

        let allocation = match timeout(
            self.config.allocation_timeout(),
            self.allocator.allocate(&game_mode, proposal.player_count()),
        )
        .await
        {
            Ok(Ok(allocation)) => allocation,
            Ok(Err(e)) => {
                error!(
                    "Allocation failed for match {} ({}): {}",
                    proposal.match_id, game_mode, e
                );
                self.rollback(&ticket_ids);
                outcome.allocation_failures += 1;
                return;
            }
            Err(_) => {
                error!(
                    "Allocation timed out for match {} after {}s",
                    proposal.match_id, self.config.allocation_timeout_seconds
                );
                self.rollback(&ticket_ids);
                outcome.allocation_failures += 1;
                return;
            }
        };

        let mut extensions = Extensions::new();
        extensions.insert("game_mode".to_string(), serde_json::json!(game_mode));
        if let Ok(teams) = serde_json::to_value(&proposal.teams) {
            extensions.insert("teams".to_string(), teams);
        }
        let assignment = Assignment {
            connection: allocation.connection,
            extensions,
        };

        match self
            .store
            .assign(&ticket_ids, &proposal.match_id, &assignment)
        {
            Ok(true) => {
                info!(
                    "Match {} assigned {} tickets to '{}'",
                    proposal.match_id,
                    ticket_ids.len(),
                    assignment.connection
                );
                outcome.assigned += 1;
                outcome.tickets_assigned += ticket_ids.len();
            }
            Ok(false) => {
                // A ticket was cancelled or its reservation lapsed; put the
                // survivors back into the pool for the next cycle.
                warn!(
                    "Match {} went stale before assignment, releasing {} tickets",
                    proposal.match_id,
                    ticket_ids.len()
                );
                self.rollback(&ticket_ids);
                outcome.stale_proposals += 1;
            }
            Err(e) => {
                error!("Assignment failed for match {}: {}", proposal.match_id, e);
                self.rollback(&ticket_ids);
                outcome.stale_proposals += 1;
            }
        }
    }

    fn rollback(&self, ticket_ids: &[crate::types::TicketId]) {
        if let Err(e) = self.store.release(ticket_ids) {
            error!("Failed to release tickets after rollback: {}", e);
        }
    }

    /// Spawn the fixed-interval scheduling loop
    pub fn start(&self) -> JoinHandle<()> {
        let director = self.clone();
        let tick = self.config.tick_interval();

        tokio::spawn(async move {
            let mut ticker = interval(tick);

            loop {
                ticker.tick().await;

                if let Err(e) = director.run_cycle().await {
                    // Fatal cycle errors abort this tick; the next interval retries
                    error!("Director cycle aborted: {}", e);
                }
            }
        })
    }

    /// Snapshot of director counters
    pub fn stats(&self) -> Result<DirectorStats> {
        let stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire director stats lock".to_string(),
            })?;
        Ok(stats.clone())
    }

    fn record_outcome(&self, outcome: &ProfileOutcome) -> Result<()> {
        let mut stats = self.write_stats()?;
        stats.proposals_seen += outcome.proposals as u64;
        stats.matches_assigned += outcome.assigned as u64;
        stats.tickets_assigned += outcome.tickets_assigned as u64;
        stats.allocation_failures += outcome.allocation_failures as u64;
        stats.stale_proposals += outcome.stale_proposals as u64;
        Ok(())
    }

    fn record_profile_failure(&self) -> Result<()> {
        self.write_stats()?.profile_failures += 1;
        Ok(())
    }

    fn write_stats(&self) -> Result<std::sync::RwLockWriteGuard<'_, DirectorStats>> {
        self.stats.write().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire director stats lock".to_string(),
            }
            .into()
        })
    }
}
