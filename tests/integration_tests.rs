//! Integration tests for the rallypoint matchmaking service
//!
//! These tests validate the entire core working together, including:
//! - The end-to-end ticket lifecycle from creation to assignment
//! - No-double-claim guarantees under concurrent match function runs
//! - Release-and-retry behavior on allocator failures
//! - Reservation expiry recovery
//! - Per-profile failure isolation

// Modules for organizing tests
mod fixtures;

use rallypoint::mmf::{FifoMatchFunction, MatchFunction};
use rallypoint::pool::Pool;
use rallypoint::profile::MatchProfile;
use rallypoint::store::{TicketStore, TicketStoreConfig};
use rallypoint::types::{Extensions, SearchFields, TicketId, TicketState};
use rallypoint::utils::current_timestamp;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_stream::StreamExt;

use fixtures::{
    build_director, create_tagged_tickets, tag_profile, FlakyAllocator, RecordingAllocator,
    SelectiveAllocator,
};

#[tokio::test]
async fn test_end_to_end_duel_scenario() {
    let store = TicketStore::new();
    let ids = create_tagged_tickets(&store, "duel", 2);

    let allocator = Arc::new(RecordingAllocator::new());
    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        allocator.clone(),
    );

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);

    // Both tickets share one non-empty connection
    let first = store.get_assignment(ids[0]).unwrap().unwrap();
    let second = store.get_assignment(ids[1]).unwrap().unwrap();
    assert!(!first.connection.is_empty());
    assert_eq!(first.connection, second.connection);

    // The allocator saw one request for two players of the duel mode
    assert_eq!(allocator.allocations(), vec![("duel".to_string(), 2)]);

    // Assignment extensions carry the mode and the team map
    assert_eq!(
        first.extensions.get("game_mode"),
        Some(&serde_json::json!("duel"))
    );
    assert!(first.extensions.contains_key("teams"));
}

#[tokio::test]
async fn test_no_double_claim_across_concurrent_runs() {
    let store = TicketStore::new();
    for _ in 0..40 {
        store
            .create(SearchFields::with_tags(["brawl"]), Extensions::new())
            .unwrap();
    }

    let profile = tag_profile("brawl", "brawl", 2);
    let mmf = Arc::new(FifoMatchFunction::new(store.clone()));

    // Several match function runs race over one fully overlapping pool
    let mut handles = Vec::new();
    for _ in 0..4 {
        let mmf = mmf.clone();
        let profile = profile.clone();
        handles.push(tokio::spawn(async move {
            let mut stream = mmf.run(profile).await.unwrap();
            let mut proposals = Vec::new();
            while let Some(proposal) = stream.next().await {
                proposals.push(proposal);
            }
            proposals
        }));
    }

    let mut seen: HashSet<TicketId> = HashSet::new();
    let mut total_claimed = 0;
    for result in futures::future::join_all(handles).await {
        for proposal in result.unwrap() {
            for id in proposal.ticket_ids() {
                // The same ticket must never appear in two proposals
                assert!(seen.insert(id), "ticket {} claimed twice", id);
                total_claimed += 1;
            }
        }
    }

    // Every claimed ticket is Reserved, everything else is still Pending
    assert_eq!(
        store.stats().unwrap().reserved_tickets,
        total_claimed,
        "claims and reservations disagree"
    );
    assert!(total_claimed <= 40);
}

#[tokio::test]
async fn test_allocator_failure_releases_then_next_cycle_recovers() {
    let store = TicketStore::new();
    let ids = create_tagged_tickets(&store, "duel", 2);

    // First allocation fails, the retry on the next cycle succeeds
    let allocator = Arc::new(FlakyAllocator::failing(1));
    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        allocator.clone(),
    );

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 0);
    assert_eq!(summary.allocation_failures, 1);
    for id in &ids {
        assert_eq!(store.state(*id).unwrap(), Some(TicketState::Pending));
    }

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);
    assert_eq!(allocator.allocation_count(), 1);
    for id in &ids {
        assert_eq!(store.state(*id).unwrap(), Some(TicketState::Assigned));
    }
}

#[tokio::test]
async fn test_supply_precondition_leaves_remainder_pending() {
    let store = TicketStore::new();
    let ids = create_tagged_tickets(&store, "duel", 3);

    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        Arc::new(RecordingAllocator::new()),
    );

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);

    // Oldest two were matched, the newest is still waiting
    assert_eq!(store.state(ids[0]).unwrap(), Some(TicketState::Assigned));
    assert_eq!(store.state(ids[1]).unwrap(), Some(TicketState::Assigned));
    assert_eq!(store.state(ids[2]).unwrap(), Some(TicketState::Pending));
}

#[tokio::test]
async fn test_starvation_until_second_ticket_arrives() {
    let store = TicketStore::new();
    let first = create_tagged_tickets(&store, "duel", 1);

    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        Arc::new(RecordingAllocator::new()),
    );

    for _ in 0..5 {
        let summary = director.run_cycle().await.unwrap();
        assert_eq!(summary.matches_assigned, 0);
        assert_eq!(store.state(first[0]).unwrap(), Some(TicketState::Pending));
    }

    create_tagged_tickets(&store, "duel", 1);
    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);
}

#[tokio::test]
async fn test_assignment_reads_are_idempotent_until_removed() {
    let store = TicketStore::new();
    let ids = create_tagged_tickets(&store, "duel", 2);

    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        Arc::new(RecordingAllocator::new()),
    );
    director.run_cycle().await.unwrap();

    let reference = store.get_assignment(ids[0]).unwrap().unwrap();
    for _ in 0..10 {
        let read = store.get_assignment(ids[0]).unwrap().unwrap();
        assert_eq!(read, reference);
    }

    store.remove(ids[0]).unwrap();
    assert!(store.get_assignment(ids[0]).unwrap().is_none());
}

#[tokio::test]
async fn test_expired_reservation_is_recovered_and_rematched() {
    let store = TicketStore::with_config(TicketStoreConfig {
        reservation_ttl_seconds: 1,
        ..Default::default()
    });
    let ids = create_tagged_tickets(&store, "duel", 2);

    // A crashed task left both tickets Reserved
    assert!(store
        .try_reserve(&[ids[0], ids[1]], "crashed-run")
        .unwrap());

    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        Arc::new(RecordingAllocator::new()),
    );

    // Nothing matchable while the claim is held
    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 0);

    // The sweep reclaims the leaked reservation after its deadline
    let outcome = store
        .sweep(current_timestamp() + chrono::Duration::seconds(2))
        .unwrap();
    assert_eq!(outcome.reverted_reservations, 2);

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);
}

#[tokio::test]
async fn test_profile_failures_are_isolated() {
    let store = TicketStore::new();
    let duel_ids = create_tagged_tickets(&store, "duel", 2);
    let brawl_ids = create_tagged_tickets(&store, "brawl", 2);

    // Allocation fails only for the brawl mode
    let director = build_director(
        store.clone(),
        vec![
            tag_profile("duel", "duel", 2),
            tag_profile("brawl", "brawl", 2),
        ],
        Arc::new(SelectiveAllocator::failing_for("brawl")),
    );

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);
    assert_eq!(summary.allocation_failures, 1);

    for id in duel_ids {
        assert_eq!(store.state(id).unwrap(), Some(TicketState::Assigned));
    }
    // Brawl tickets went back to Pending and stay eligible
    for id in brawl_ids {
        assert_eq!(store.state(id).unwrap(), Some(TicketState::Pending));
    }
}

#[tokio::test]
async fn test_overlapping_profiles_first_reserve_wins() {
    let store = TicketStore::new();
    create_tagged_tickets(&store, "duel", 2);

    // Two profiles compete for the same two tickets
    let director = build_director(
        store.clone(),
        vec![
            tag_profile("duel-a", "duel", 2),
            tag_profile("duel-b", "duel", 2),
        ],
        Arc::new(RecordingAllocator::new()),
    );

    let summary = director.run_cycle().await.unwrap();
    // Exactly one profile converts the pair; the loser sees empty supply
    assert_eq!(summary.matches_assigned, 1);
    assert_eq!(store.stats().unwrap().assigned_tickets, 2);
}

#[tokio::test]
async fn test_team_profile_produces_balanced_sides() {
    let store = TicketStore::new();
    for _ in 0..2 {
        store
            .create(SearchFields::with_tags(["battle", "red"]), Extensions::new())
            .unwrap();
        store
            .create(
                SearchFields::with_tags(["battle", "blue"]),
                Extensions::new(),
            )
            .unwrap();
    }

    let profile = MatchProfile::new("team-battle")
        .with_pool(Pool::new("red-eligible").with_tag("red"))
        .with_pool(Pool::new("blue-eligible").with_tag("blue"))
        .with_players_needed(2);

    let allocator = Arc::new(RecordingAllocator::new());
    let director = build_director(store.clone(), vec![profile], allocator.clone());

    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 1);
    assert_eq!(
        allocator.allocations(),
        vec![("team-battle".to_string(), 4)]
    );

    // The assignment's team map names both pools with two tickets each
    let assigned = store.stats().unwrap().assigned_tickets;
    assert_eq!(assigned, 4);

    let pool = Pool::new("any").with_tag("battle");
    assert!(store.query_pending(&pool).unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_ticket_is_gone_for_clients_and_matchmaking() {
    let store = TicketStore::new();
    let ids = create_tagged_tickets(&store, "duel", 2);

    assert!(store.cancel(ids[0]).unwrap());
    assert!(store.get_assignment(ids[0]).unwrap().is_none());

    let director = build_director(
        store.clone(),
        vec![tag_profile("duel", "duel", 2)],
        Arc::new(RecordingAllocator::new()),
    );

    // The surviving ticket alone cannot form a match
    let summary = director.run_cycle().await.unwrap();
    assert_eq!(summary.matches_assigned, 0);
    assert_eq!(store.state(ids[1]).unwrap(), Some(TicketState::Pending));
}
