//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the ticket store,
//! profile registry, match function, allocator and director together and
//! owns the background task lifecycle.

use crate::config::AppConfig;
use crate::director::{Director, ServerAllocator, StaticFleetAllocator};
use crate::metrics::MetricsCollector;
use crate::mmf::{FifoMatchFunction, MatchFunction};
use crate::profile::ProfileRegistry;
use crate::store::TicketStore;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core matchmaking components
    store: TicketStore,
    registry: ProfileRegistry,
    director: Director,

    /// Metrics collector shared with the HTTP layer
    metrics: Arc<MetricsCollector>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    /// Startup instant for uptime reporting
    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing rallypoint matchmaking service");
        info!(
            "Configuration: service={}, tick={}s, fleet={} endpoints",
            config.service.name,
            config.director.tick_interval_seconds,
            config.allocator.fleet.len()
        );

        let store = TicketStore::with_config(config.store_config());
        let registry = ProfileRegistry::new();

        if let Some(path) = &config.director.profiles_file {
            let loaded = registry.load_from_file(path).map_err(|e| {
                ServiceError::Configuration {
                    message: format!("Failed to load profiles: {}", e),
                }
            })?;
            info!("Preloaded {} match profiles", loaded);
        } else {
            warn!("No profiles file configured; register profiles via the API");
        }

        let allocator: Arc<dyn ServerAllocator> = Arc::new(
            StaticFleetAllocator::new(config.allocator.fleet.clone()).map_err(|e| {
                ServiceError::Configuration {
                    message: format!("Failed to build allocator: {}", e),
                }
            })?,
        );

        let match_function: Arc<dyn MatchFunction> = Arc::new(FifoMatchFunction::with_config(
            store.clone(),
            config.match_function_config(),
        ));

        let director = Director::new(
            store.clone(),
            registry.clone(),
            match_function,
            allocator,
            config.director_config(),
        );

        let metrics = Arc::new(MetricsCollector::new().map_err(|e| {
            ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            }
        })?);

        Ok(Self {
            config,
            store,
            registry,
            director,
            metrics,
            background_tasks: Mutex::new(Vec::new()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start all background services
    pub async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting rallypoint matchmaking service");

        *self.is_running.write().await = true;

        let mut tasks = self.background_tasks.lock().await;

        // Store sweep: TTL expiry and leaked-reservation recovery
        tasks.push(self.store.start_sweep_task(self.config.sweep_interval()));

        // Director scheduling loop
        tasks.push(self.director.start());

        // Metrics bridge
        tasks.push(self.start_metrics_task());

        info!("Rallypoint matchmaking service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of rallypoint service");

        *self.is_running.write().await = false;

        let mut tasks = self.background_tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }

        info!("Rallypoint service stopped");
        Ok(())
    }

    /// Spawn the task that bridges stats snapshots into Prometheus
    fn start_metrics_task(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let director = self.director.clone();
        let metrics = self.metrics.clone();
        let started_at = self.started_at;

        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(10));

            loop {
                ticker.tick().await;

                match store.stats() {
                    Ok(stats) => metrics.update_from_store_stats(&stats),
                    Err(e) => error!("Failed to read store stats for metrics: {}", e),
                }
                match director.stats() {
                    Ok(stats) => metrics.update_from_director_stats(&stats),
                    Err(e) => error!("Failed to read director stats for metrics: {}", e),
                }
                metrics
                    .service()
                    .uptime_seconds
                    .set(started_at.elapsed().as_secs() as i64);

                debug!("Metrics bridge updated");
            }
        })
    }

    /// Whether the service is accepting work
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Application configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Ticket store handle
    pub fn store(&self) -> &TicketStore {
        &self.store
    }

    /// Profile registry handle
    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }

    /// Director handle
    pub fn director(&self) -> &Director {
        &self.director
    }

    /// Metrics collector handle
    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }
}
