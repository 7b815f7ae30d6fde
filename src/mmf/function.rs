//! FIFO match function and the claim loop
//!
//! The match function repeatedly claims the required ticket counts from each
//! of a profile's pools and groups them into proposals. Contention with
//! concurrent runs over overlapping pools is handled by re-querying after a
//! failed reservation, up to a bounded retry count.

use crate::error::Result;
use crate::mmf::scoring::score_tickets;
use crate::profile::MatchProfile;
use crate::store::TicketStore;
use crate::types::{MatchId, MatchProposal, Ticket, TicketId};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Tuning knobs for the claim loop
#[derive(Debug, Clone)]
pub struct MatchFunctionConfig {
    /// Reservation retries before a run gives up on the current cycle
    pub max_reserve_retries: u32,
    /// Safety valve on proposals per invocation
    pub max_proposals_per_run: usize,
    /// Buffered proposals between producer and director
    pub channel_capacity: usize,
}

impl Default for MatchFunctionConfig {
    fn default() -> Self {
        Self {
            max_reserve_retries: 3,
            max_proposals_per_run: 128,
            channel_capacity: 32,
        }
    }
}

/// Boundary between the director and a match function
///
/// Implementations stream proposals as they are produced; the director
/// consumes the stream under its per-profile deadline.
#[async_trait]
pub trait MatchFunction: Send + Sync {
    async fn run(&self, profile: MatchProfile) -> Result<ReceiverStream<MatchProposal>>;
}

/// Match function that claims the oldest eligible tickets first
///
/// Reservation owner is the proposal's match id, so every claim is tied to
/// the proposal identity that made it.
pub struct FifoMatchFunction {
    store: TicketStore,
    config: MatchFunctionConfig,
    sequence: Arc<AtomicU64>,
}

impl FifoMatchFunction {
    pub fn new(store: TicketStore) -> Self {
        Self::with_config(store, MatchFunctionConfig::default())
    }

    pub fn with_config(store: TicketStore, config: MatchFunctionConfig) -> Self {
        Self {
            store,
            config,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_match_id(sequence: &AtomicU64, profile_name: &str) -> MatchId {
        let n = sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", profile_name, n)
    }

    /// Select the first `needed` candidates not already taken by an earlier pool
    ///
    /// Overlapping pools within one profile must not contribute the same
    /// ticket twice; a proposal's id list carries no duplicates.
    fn select_for_pool(
        candidates: Vec<Ticket>,
        needed: usize,
        taken: &HashSet<TicketId>,
    ) -> Option<Vec<Ticket>> {
        let selected: Vec<Ticket> = candidates
            .into_iter()
            .filter(|ticket| !taken.contains(&ticket.id))
            .take(needed)
            .collect();

        if selected.len() < needed {
            None
        } else {
            Some(selected)
        }
    }

    /// Query every pool and attempt one atomic claim
    ///
    /// Returns `Ok(None)` when supply is insufficient (normal termination)
    /// or when the bounded retries are exhausted under contention.
    fn claim_one_match(
        store: &TicketStore,
        sequence: &AtomicU64,
        profile: &MatchProfile,
        max_retries: u32,
    ) -> Result<Option<MatchProposal>> {
        let needed = profile.players_needed_per_pool();
        let mut retries = 0;

        loop {
            let mut taken: HashSet<TicketId> = HashSet::new();
            let mut per_pool: Vec<(String, Vec<Ticket>)> = Vec::with_capacity(profile.pools.len());
            let mut supply_ok = true;

            for pool in &profile.pools {
                let candidates = store.query_pending(pool)?;
                match Self::select_for_pool(candidates, needed, &taken) {
                    Some(selected) => {
                        taken.extend(selected.iter().map(|t| t.id));
                        per_pool.push((pool.name.clone(), selected));
                    }
                    None => {
                        supply_ok = false;
                        break;
                    }
                }
            }

            if !supply_ok {
                return Ok(None);
            }

            let match_id = Self::next_match_id(sequence, &profile.name);
            let ticket_ids: Vec<TicketId> = per_pool
                .iter()
                .flat_map(|(_, tickets)| tickets.iter().map(|t| t.id))
                .collect();

            if store.try_reserve(&ticket_ids, &match_id)? {
                let tickets: Vec<Ticket> = per_pool
                    .iter()
                    .flat_map(|(_, tickets)| tickets.iter().cloned())
                    .collect();
                let teams: HashMap<String, Vec<TicketId>> = per_pool
                    .into_iter()
                    .map(|(pool_name, tickets)| {
                        (pool_name, tickets.iter().map(|t| t.id).collect())
                    })
                    .collect();
                let score = score_tickets(&tickets, current_timestamp());

                debug!(
                    "Proposal {} claims {} tickets (score {:.1})",
                    match_id,
                    tickets.len(),
                    score
                );

                return Ok(Some(MatchProposal {
                    match_id,
                    profile_name: profile.name.clone(),
                    tickets,
                    teams,
                    score,
                }));
            }

            retries += 1;
            if retries > max_retries {
                warn!(
                    "Giving up on profile '{}' after {} reservation conflicts",
                    profile.name, retries
                );
                return Ok(None);
            }
            debug!(
                "Reservation conflict on profile '{}', retry {}/{}",
                profile.name, retries, max_retries
            );
        }
    }

    /// Produce proposals until supply runs out, sending each into the channel
    async fn run_loop(
        store: TicketStore,
        config: MatchFunctionConfig,
        sequence: Arc<AtomicU64>,
        profile: MatchProfile,
        tx: mpsc::Sender<MatchProposal>,
    ) {
        let mut produced = 0;

        while produced < config.max_proposals_per_run {
            let proposal = match Self::claim_one_match(
                &store,
                &sequence,
                &profile,
                config.max_reserve_retries,
            ) {
                Ok(Some(proposal)) => proposal,
                Ok(None) => break,
                Err(e) => {
                    error!("Match function failed on profile '{}': {}", profile.name, e);
                    break;
                }
            };

            let ticket_ids = proposal.ticket_ids();
            if tx.send(proposal).await.is_err() {
                // Director stopped listening; hand the claim back instead of
                // waiting for the reservation TTL.
                if let Err(e) = store.release(&ticket_ids) {
                    error!("Failed to release orphaned proposal tickets: {}", e);
                }
                debug!(
                    "Proposal consumer for profile '{}' went away, released {} tickets",
                    profile.name,
                    ticket_ids.len()
                );
                return;
            }
            produced += 1;
        }

        if produced > 0 {
            info!(
                "Match function produced {} proposals for profile '{}'",
                produced, profile.name
            );
        }
    }
}

#[async_trait]
impl MatchFunction for FifoMatchFunction {
    async fn run(&self, profile: MatchProfile) -> Result<ReceiverStream<MatchProposal>> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        let store = self.store.clone();
        let config = self.config.clone();
        let sequence = self.sequence.clone();

        tokio::spawn(async move {
            Self::run_loop(store, config, sequence, profile, tx).await;
        });

        Ok(ReceiverStream::new(rx))
    }
}
