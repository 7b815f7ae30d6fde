//! Match Tester CLI Tool
//!
//! Command-line tool that drives an in-process matchmaking core (store,
//! profiles, director) without the HTTP layer, for smoke-testing match
//! behavior and measuring throughput.
//!
//! Usage:
//!   cargo run --bin match-tester -- --help
//!   cargo run --bin match-tester run-scenario --scenario duel
//!   cargo run --bin match-tester run-all-scenarios
//!   cargo run --bin match-tester soak --tickets 1000 --ticks 20

use anyhow::Result;
use clap::{Parser, Subcommand};
use rallypoint::director::{Director, DirectorConfig, StaticFleetAllocator};
use rallypoint::mmf::FifoMatchFunction;
use rallypoint::pool::Pool;
use rallypoint::profile::{MatchProfile, ProfileRegistry};
use rallypoint::store::TicketStore;
use rallypoint::types::{Extensions, SearchFields, TicketId};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "match-tester")]
#[command(about = "In-process matchmaking tester for the rallypoint core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a predefined test scenario
    RunScenario {
        /// Scenario name (duel, team-battle, regional, starvation)
        #[arg(short, long)]
        scenario: String,
    },
    /// Run all test scenarios
    RunAllScenarios,
    /// Flood the store with tickets and measure assignment throughput
    Soak {
        /// Number of tickets to create
        #[arg(short, long, default_value = "1000")]
        tickets: usize,
        /// Director cycles to run
        #[arg(long, default_value = "20")]
        ticks: u32,
    },
}

/// One self-contained scenario: profiles, tickets and the expected outcome
struct Scenario {
    name: &'static str,
    profiles: Vec<MatchProfile>,
    tickets: Vec<SearchFields>,
    expected_matches: usize,
    expected_leftover: usize,
}

impl Scenario {
    fn duel() -> Self {
        Self {
            name: "duel",
            profiles: vec![MatchProfile::new("duel")
                .with_pool(Pool::new("duelists").with_tag("duel"))
                .with_players_needed(2)],
            tickets: vec![
                SearchFields::with_tags(["duel"]),
                SearchFields::with_tags(["duel"]),
                SearchFields::with_tags(["duel"]),
                SearchFields::with_tags(["duel"]),
            ],
            expected_matches: 2,
            expected_leftover: 0,
        }
    }

    fn team_battle() -> Self {
        let mut tickets = Vec::new();
        for _ in 0..3 {
            tickets.push(SearchFields::with_tags(["battle", "red"]));
            tickets.push(SearchFields::with_tags(["battle", "blue"]));
        }
        Self {
            name: "team-battle",
            profiles: vec![MatchProfile::new("team-battle")
                .with_pool(Pool::new("red-eligible").with_tag("red"))
                .with_pool(Pool::new("blue-eligible").with_tag("blue"))
                .with_players_needed(3)],
            tickets,
            expected_matches: 1,
            expected_leftover: 0,
        }
    }

    fn regional() -> Self {
        let mut eu = SearchFields::with_tags(["duel"]);
        eu.string_args.insert("region".to_string(), "eu".to_string());
        let mut na = SearchFields::with_tags(["duel"]);
        na.string_args.insert("region".to_string(), "na".to_string());
        Self {
            name: "regional",
            profiles: vec![
                MatchProfile::new("duel-eu")
                    .with_pool(Pool::new("eu").with_tag("duel").with_string_equals("region", "eu"))
                    .with_players_needed(2),
                MatchProfile::new("duel-na")
                    .with_pool(Pool::new("na").with_tag("duel").with_string_equals("region", "na"))
                    .with_players_needed(2),
            ],
            tickets: vec![eu.clone(), na.clone(), eu, na],
            expected_matches: 2,
            expected_leftover: 0,
        }
    }

    fn starvation() -> Self {
        Self {
            name: "starvation",
            profiles: vec![MatchProfile::new("duel")
                .with_pool(Pool::new("duelists").with_tag("duel"))
                .with_players_needed(2)],
            tickets: vec![SearchFields::with_tags(["duel"])],
            expected_matches: 0,
            expected_leftover: 1,
        }
    }

    fn all() -> Vec<Self> {
        vec![
            Self::duel(),
            Self::team_battle(),
            Self::regional(),
            Self::starvation(),
        ]
    }
}

/// Build a core wired to a static two-server fleet
fn build_core(profiles: &[MatchProfile]) -> Result<(TicketStore, Director)> {
    let store = TicketStore::new();
    let registry = ProfileRegistry::new();
    for profile in profiles {
        registry.register(profile.clone())?;
    }

    let allocator = Arc::new(StaticFleetAllocator::new(vec![
        "game-1.test:7777".to_string(),
        "game-2.test:7777".to_string(),
    ])?);
    let match_function = Arc::new(FifoMatchFunction::new(store.clone()));
    let director = Director::new(
        store.clone(),
        registry,
        match_function,
        allocator,
        DirectorConfig::default(),
    );

    Ok((store, director))
}

async fn run_scenario(scenario: &Scenario) -> Result<bool> {
    let (store, director) = build_core(&scenario.profiles)?;

    let mut ids: Vec<TicketId> = Vec::new();
    for fields in &scenario.tickets {
        ids.push(store.create(fields.clone(), Extensions::new())?.id);
        // Spread create times so FIFO ordering is observable
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let summary = director.run_cycle().await?;

    let mut assigned = 0;
    for id in &ids {
        if let Some(assignment) = store.get_assignment(*id)? {
            if !assignment.connection.is_empty() {
                assigned += 1;
            }
        }
    }
    let leftover = store.stats()?.pending_tickets;

    let ok = summary.matches_assigned == scenario.expected_matches
        && leftover == scenario.expected_leftover;

    println!(
        "  {} matches (expected {}), {} tickets assigned, {} left pending (expected {})",
        summary.matches_assigned,
        scenario.expected_matches,
        assigned,
        leftover,
        scenario.expected_leftover
    );

    Ok(ok)
}

async fn run_soak(ticket_count: usize, ticks: u32) -> Result<()> {
    let profile = MatchProfile::new("soak-duel")
        .with_pool(Pool::new("duelists").with_tag("duel"))
        .with_players_needed(2);
    let (store, director) = build_core(&[profile])?;

    println!("Creating {} tickets...", ticket_count);
    let create_start = Instant::now();
    for _ in 0..ticket_count {
        store.create(SearchFields::with_tags(["duel"]), Extensions::new())?;
    }
    println!(
        "  created in {:.1}ms",
        create_start.elapsed().as_secs_f64() * 1000.0
    );

    println!("Running {} director cycles...", ticks);
    let cycle_start = Instant::now();
    for _ in 0..ticks {
        director.run_cycle().await?;
    }
    let elapsed = cycle_start.elapsed();

    let store_stats = store.stats()?;
    let director_stats = director.stats()?;

    println!("Results:");
    println!("  Cycles: {}", director_stats.ticks_completed);
    println!("  Matches assigned: {}", director_stats.matches_assigned);
    println!("  Tickets assigned: {}", director_stats.tickets_assigned);
    println!("  Reserve conflicts: {}", store_stats.reserve_conflicts);
    println!("  Pending leftover: {}", store_stats.pending_tickets);
    println!(
        "  Throughput: {:.0} tickets/s",
        director_stats.tickets_assigned as f64 / elapsed.as_secs_f64()
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunScenario { scenario } => {
            let scenarios = Scenario::all();
            let found = scenarios.iter().find(|s| s.name == scenario.to_lowercase());
            match found {
                Some(s) => {
                    println!("Running scenario: {}", s.name);
                    if run_scenario(s).await? {
                        println!("Scenario '{}' passed", s.name);
                    } else {
                        println!("Scenario '{}' FAILED", s.name);
                        std::process::exit(1);
                    }
                }
                None => {
                    eprintln!(
                        "Unknown scenario '{}'. Available: duel, team-battle, regional, starvation",
                        scenario
                    );
                    std::process::exit(1);
                }
            }
        }

        Commands::RunAllScenarios => {
            let mut passed = 0;
            let mut failed = 0;

            for scenario in Scenario::all() {
                println!("Running '{}' scenario...", scenario.name);
                match run_scenario(&scenario).await {
                    Ok(true) => {
                        println!("  PASSED");
                        passed += 1;
                    }
                    Ok(false) => {
                        println!("  FAILED");
                        failed += 1;
                    }
                    Err(e) => {
                        println!("  FAILED ({})", e);
                        failed += 1;
                    }
                }
            }

            println!("\nResults: {} passed, {} failed", passed, failed);
            if failed > 0 {
                std::process::exit(1);
            }
        }

        Commands::Soak { tickets, ticks } => {
            run_soak(tickets, ticks).await?;
        }
    }

    Ok(())
}
