//! Main entry point for the Rallypoint matchmaking service
//!
//! This is the production entry point that initializes and runs the
//! complete matchmaking service with proper error handling, logging,
//! and graceful shutdown.

use anyhow::Result;
use clap::Parser;
use rallypoint::config::AppConfig;
use rallypoint::service::{ApiServer, ApiServerConfig, AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Rallypoint Matchmaking Service - Ticket-Based Game Session Allocation
#[derive(Parser)]
#[command(
    name = "rallypoint",
    version,
    about = "A matchmaking director service for ticket-based game session allocation",
    long_about = "Rallypoint is a Rust-based matchmaking service that accepts player tickets \
                 over HTTP, groups them into matches through operator-defined profiles and \
                 pools, and hands finished matches to a game-server allocator while clients \
                 poll for their assignment."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Perform health check and exit
    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// HTTP port override
    #[arg(long, value_name = "PORT", help = "Override HTTP server port")]
    http_port: Option<u16>,

    /// Profiles file override
    #[arg(
        long,
        value_name = "FILE",
        help = "Override match profiles file (TOML format)"
    )]
    profiles: Option<PathBuf>,

    /// Director tick interval override
    #[arg(
        long,
        value_name = "SECONDS",
        help = "Override director tick interval in seconds"
    )]
    tick_interval: Option<u64>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Perform health check and return appropriate exit code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = AppState::new(config).await?;
    let app_state = Arc::new(app_state);

    match HealthCheck::check(app_state).await {
        Ok(health) => {
            println!("Health Check: {}", health.status);
            println!("  Pending Tickets: {}", health.stats.pending_tickets);
            println!("  Reserved Tickets: {}", health.stats.reserved_tickets);
            println!("  Assigned Tickets: {}", health.stats.assigned_tickets);
            println!("  Matches Assigned: {}", health.stats.matches_assigned);
            println!("  Profiles: {}", health.stats.profiles);

            if health.status == HealthStatus::Unhealthy {
                std::process::exit(1);
            } else {
                std::process::exit(0);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Rallypoint Matchmaking Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   HTTP port: {}", config.service.http_port);
    info!(
        "   Director tick: {}s",
        config.director.tick_interval_seconds
    );
    info!(
        "   Reservation TTL: {}s",
        config.store.reservation_ttl_seconds
    );
    info!("   Fleet endpoints: {}", config.allocator.fleet.len());
    match &config.director.profiles_file {
        Some(path) => info!("   Profiles file: {}", path.display()),
        None => info!("   Profiles file: none (register via API)"),
    }
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    // Start with environment-based config
    let mut config = if let Some(config_path) = &args.config {
        info!("Loading configuration from: {}", config_path.display());
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    // Apply CLI overrides
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(http_port) = args.http_port {
        config.service.http_port = http_port;
    }

    if let Some(profiles) = &args.profiles {
        config.director.profiles_file = Some(profiles.clone());
    }

    if let Some(tick_interval) = args.tick_interval {
        config.director.tick_interval_seconds = tick_interval;
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration (CLI args can override environment/config file)
    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    // Initialize logging early (before any other operations)
    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    // Handle special modes
    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    // Display startup information
    display_startup_banner(&config);

    // Initialize application state
    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    // Start background services (director loop, sweep, metrics bridge)
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    // Start the HTTP API server
    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig {
            port: config.service.http_port,
            ..Default::default()
        },
        app_state.clone(),
    ));
    let api_task = {
        let api_server = api_server.clone();
        tokio::spawn(async move {
            if let Err(e) = api_server.start().await {
                error!("API server failed: {}", e);
            }
        })
    };

    info!("Rallypoint Matchmaking Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    // Wait for shutdown signal
    wait_for_shutdown_signal().await;

    // Begin graceful shutdown
    info!("Shutdown signal received, beginning graceful shutdown...");

    api_server.stop();

    let shutdown_timeout = config.shutdown_timeout();
    match tokio::time::timeout(shutdown_timeout, async {
        if let Err(e) = app_state.shutdown().await {
            warn!("Error during shutdown: {}", e);
        }
        let _ = api_task.await;
    })
    .await
    {
        Ok(()) => {
            info!("Graceful shutdown completed successfully");
        }
        Err(_) => {
            warn!("Shutdown timeout exceeded, forcing exit");
        }
    }

    info!("Rallypoint Matchmaking Service stopped");
    Ok(())
}
