//! Metrics collection using Prometheus
//!
//! The collector owns the registry plus typed metric families for tickets,
//! matches and the director loop. Values are bridged from the store and
//! director stats snapshots on a fixed cadence.

use crate::director::DirectorStats;
use crate::store::TicketStoreStats;
use anyhow::Result;
use prometheus::{IntGauge, IntGaugeVec, Opts, Registry};
use std::sync::Arc;

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Ticket store metrics
    ticket_metrics: TicketMetrics,

    /// Director loop metrics
    director_metrics: DirectorMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,
}

/// Ticket store metrics
#[derive(Clone)]
pub struct TicketMetrics {
    /// Tickets created since startup
    pub tickets_created: IntGauge,

    /// Tickets assigned since startup
    pub tickets_assigned: IntGauge,

    /// Pending tickets expired by the TTL sweep
    pub tickets_expired: IntGauge,

    /// Tickets cancelled by clients
    pub tickets_cancelled: IntGauge,

    /// Failed reservation attempts (contention)
    pub reserve_conflicts: IntGauge,

    /// Leaked reservations reverted by the sweep
    pub reservations_reverted: IntGauge,

    /// Current tickets by state
    pub tickets_by_state: IntGaugeVec,
}

/// Director loop metrics
#[derive(Clone)]
pub struct DirectorMetrics {
    /// Completed director cycles
    pub ticks_completed: IntGauge,

    /// Proposals received from match functions
    pub proposals_seen: IntGauge,

    /// Proposals converted to assignments
    pub matches_assigned: IntGauge,

    /// Allocator failures and timeouts
    pub allocation_failures: IntGauge,

    /// Proposals dropped because a ticket vanished mid-finalization
    pub stale_proposals: IntGauge,

    /// Profile tasks that failed or overran their budget
    pub profile_failures: IntGauge,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let ticket_metrics = TicketMetrics::new(&registry)?;
        let director_metrics = DirectorMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            ticket_metrics,
            director_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get ticket metrics
    pub fn tickets(&self) -> &TicketMetrics {
        &self.ticket_metrics
    }

    /// Get director metrics
    pub fn director(&self) -> &DirectorMetrics {
        &self.director_metrics
    }

    /// Bridge a ticket store stats snapshot into the registry
    pub fn update_from_store_stats(&self, stats: &TicketStoreStats) {
        let m = &self.ticket_metrics;
        m.tickets_created.set(stats.tickets_created as i64);
        m.tickets_assigned.set(stats.tickets_assigned as i64);
        m.tickets_expired.set(stats.tickets_expired as i64);
        m.tickets_cancelled.set(stats.tickets_cancelled as i64);
        m.reserve_conflicts.set(stats.reserve_conflicts as i64);
        m.reservations_reverted.set(stats.reservations_reverted as i64);
        m.tickets_by_state
            .with_label_values(&["pending"])
            .set(stats.pending_tickets as i64);
        m.tickets_by_state
            .with_label_values(&["reserved"])
            .set(stats.reserved_tickets as i64);
        m.tickets_by_state
            .with_label_values(&["assigned"])
            .set(stats.assigned_tickets as i64);
    }

    /// Bridge a director stats snapshot into the registry
    pub fn update_from_director_stats(&self, stats: &DirectorStats) {
        let m = &self.director_metrics;
        m.ticks_completed.set(stats.ticks_completed as i64);
        m.proposals_seen.set(stats.proposals_seen as i64);
        m.matches_assigned.set(stats.matches_assigned as i64);
        m.allocation_failures.set(stats.allocation_failures as i64);
        m.stale_proposals.set(stats.stale_proposals as i64);
        m.profile_failures.set(stats.profile_failures as i64);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds = IntGauge::with_opts(Opts::new(
            "rallypoint_uptime_seconds",
            "Service uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::with_opts(Opts::new(
            "rallypoint_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        ))?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
        })
    }
}

impl TicketMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let tickets_created = IntGauge::with_opts(Opts::new(
            "rallypoint_tickets_created",
            "Tickets created since startup",
        ))?;
        registry.register(Box::new(tickets_created.clone()))?;

        let tickets_assigned = IntGauge::with_opts(Opts::new(
            "rallypoint_tickets_assigned",
            "Tickets assigned since startup",
        ))?;
        registry.register(Box::new(tickets_assigned.clone()))?;

        let tickets_expired = IntGauge::with_opts(Opts::new(
            "rallypoint_tickets_expired",
            "Pending tickets expired by the TTL sweep",
        ))?;
        registry.register(Box::new(tickets_expired.clone()))?;

        let tickets_cancelled = IntGauge::with_opts(Opts::new(
            "rallypoint_tickets_cancelled",
            "Tickets cancelled by clients",
        ))?;
        registry.register(Box::new(tickets_cancelled.clone()))?;

        let reserve_conflicts = IntGauge::with_opts(Opts::new(
            "rallypoint_reserve_conflicts",
            "Failed reservation attempts",
        ))?;
        registry.register(Box::new(reserve_conflicts.clone()))?;

        let reservations_reverted = IntGauge::with_opts(Opts::new(
            "rallypoint_reservations_reverted",
            "Leaked reservations reverted by the sweep",
        ))?;
        registry.register(Box::new(reservations_reverted.clone()))?;

        let tickets_by_state = IntGaugeVec::new(
            Opts::new("rallypoint_tickets_by_state", "Current tickets by state"),
            &["state"],
        )?;
        registry.register(Box::new(tickets_by_state.clone()))?;

        Ok(Self {
            tickets_created,
            tickets_assigned,
            tickets_expired,
            tickets_cancelled,
            reserve_conflicts,
            reservations_reverted,
            tickets_by_state,
        })
    }
}

impl DirectorMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ticks_completed = IntGauge::with_opts(Opts::new(
            "rallypoint_director_ticks_completed",
            "Completed director cycles",
        ))?;
        registry.register(Box::new(ticks_completed.clone()))?;

        let proposals_seen = IntGauge::with_opts(Opts::new(
            "rallypoint_director_proposals_seen",
            "Proposals received from match functions",
        ))?;
        registry.register(Box::new(proposals_seen.clone()))?;

        let matches_assigned = IntGauge::with_opts(Opts::new(
            "rallypoint_director_matches_assigned",
            "Proposals converted to assignments",
        ))?;
        registry.register(Box::new(matches_assigned.clone()))?;

        let allocation_failures = IntGauge::with_opts(Opts::new(
            "rallypoint_director_allocation_failures",
            "Allocator failures and timeouts",
        ))?;
        registry.register(Box::new(allocation_failures.clone()))?;

        let stale_proposals = IntGauge::with_opts(Opts::new(
            "rallypoint_director_stale_proposals",
            "Proposals dropped because a ticket vanished mid-finalization",
        ))?;
        registry.register(Box::new(stale_proposals.clone()))?;

        let profile_failures = IntGauge::with_opts(Opts::new(
            "rallypoint_director_profile_failures",
            "Profile tasks that failed or overran their budget",
        ))?;
        registry.register(Box::new(profile_failures.clone()))?;

        Ok(Self {
            ticks_completed,
            proposals_seen,
            matches_assigned,
            allocation_failures,
            stale_proposals,
            profile_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_registers_families() {
        let collector = MetricsCollector::new().unwrap();

        let stats = TicketStoreStats {
            tickets_created: 10,
            pending_tickets: 4,
            ..Default::default()
        };
        collector.update_from_store_stats(&stats);

        let families = collector.registry().gather();
        assert!(!families.is_empty());

        let names: Vec<String> = families
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.iter().any(|n| n.contains("tickets_created")));
        assert!(names.iter().any(|n| n.contains("tickets_by_state")));
    }

    #[test]
    fn test_store_bridge_sets_values() {
        let collector = MetricsCollector::new().unwrap();
        let stats = TicketStoreStats {
            tickets_created: 7,
            reserve_conflicts: 3,
            ..Default::default()
        };
        collector.update_from_store_stats(&stats);

        assert_eq!(collector.tickets().tickets_created.get(), 7);
        assert_eq!(collector.tickets().reserve_conflicts.get(), 3);
    }

    #[test]
    fn test_director_bridge_sets_values() {
        let collector = MetricsCollector::new().unwrap();
        let stats = DirectorStats {
            ticks_completed: 5,
            matches_assigned: 2,
            ..Default::default()
        };
        collector.update_from_director_stats(&stats);

        assert_eq!(collector.director().ticks_completed.get(), 5);
        assert_eq!(collector.director().matches_assigned.get(), 2);
    }
}
