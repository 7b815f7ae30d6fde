//! Main application configuration
//!
//! This module defines the primary configuration structures for the
//! rallypoint matchmaking service, including environment variable loading,
//! TOML file loading and validation.

use crate::director::DirectorConfig;
use crate::mmf::MatchFunctionConfig;
use crate::store::TicketStoreConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub director: DirectorSettings,
    #[serde(default)]
    pub allocator: AllocatorSettings,
}

/// Service-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service name for logging and metrics
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Port for the HTTP API, health and metrics endpoints
    pub http_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

/// Ticket store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Maximum age of a Pending ticket in seconds
    pub pending_ttl_seconds: u64,
    /// Reservation hold time in seconds before the sweep reverts it
    pub reservation_ttl_seconds: u64,
    /// Grace period in seconds before an Assigned ticket is removed
    pub assignment_ttl_seconds: u64,
    /// Sweep task interval in seconds
    pub sweep_interval_seconds: u64,
}

/// Director settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorSettings {
    /// Seconds between cycle starts
    pub tick_interval_seconds: u64,
    /// Budget for draining one profile's proposal stream
    pub mmf_timeout_seconds: u64,
    /// Budget for a single allocator call
    pub allocation_timeout_seconds: u64,
    /// Hard wall-clock budget for one profile task within a tick
    pub profile_budget_seconds: u64,
    /// Reservation retries before a match function run gives up
    pub max_reserve_retries: u32,
    /// Optional TOML file of profiles to register at startup
    pub profiles_file: Option<PathBuf>,
}

/// Allocator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocatorSettings {
    /// Game server endpoints handed out round-robin
    pub fleet: Vec<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "rallypoint".to_string(),
            log_level: "info".to_string(),
            http_port: 8080,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            pending_ttl_seconds: 600,    // 10 minutes
            reservation_ttl_seconds: 30,
            assignment_ttl_seconds: 300, // 5 minutes
            sweep_interval_seconds: 10,
        }
    }
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 5,
            mmf_timeout_seconds: 10,
            allocation_timeout_seconds: 5,
            profile_budget_seconds: 30,
            max_reserve_retries: 3,
            profiles_file: None,
        }
    }
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            fleet: vec!["127.0.0.1:7777".to_string()],
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Service settings
        if let Ok(name) = env::var("SERVICE_NAME") {
            config.service.name = name;
        }
        if let Ok(log_level) = env::var("LOG_LEVEL") {
            config.service.log_level = log_level;
        }
        if let Ok(port) = env::var("HTTP_PORT") {
            config.service.http_port = port
                .parse()
                .map_err(|_| anyhow!("Invalid HTTP_PORT value: {}", port))?;
        }
        if let Ok(timeout) = env::var("SHUTDOWN_TIMEOUT_SECONDS") {
            config.service.shutdown_timeout_seconds = timeout
                .parse()
                .map_err(|_| anyhow!("Invalid SHUTDOWN_TIMEOUT_SECONDS value: {}", timeout))?;
        }

        // Store settings
        if let Ok(ttl) = env::var("PENDING_TTL_SECONDS") {
            config.store.pending_ttl_seconds = ttl
                .parse()
                .map_err(|_| anyhow!("Invalid PENDING_TTL_SECONDS value: {}", ttl))?;
        }
        if let Ok(ttl) = env::var("RESERVATION_TTL_SECONDS") {
            config.store.reservation_ttl_seconds = ttl
                .parse()
                .map_err(|_| anyhow!("Invalid RESERVATION_TTL_SECONDS value: {}", ttl))?;
        }
        if let Ok(ttl) = env::var("ASSIGNMENT_TTL_SECONDS") {
            config.store.assignment_ttl_seconds = ttl
                .parse()
                .map_err(|_| anyhow!("Invalid ASSIGNMENT_TTL_SECONDS value: {}", ttl))?;
        }
        if let Ok(secs) = env::var("SWEEP_INTERVAL_SECONDS") {
            config.store.sweep_interval_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid SWEEP_INTERVAL_SECONDS value: {}", secs))?;
        }

        // Director settings
        if let Ok(secs) = env::var("TICK_INTERVAL_SECONDS") {
            config.director.tick_interval_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid TICK_INTERVAL_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("MMF_TIMEOUT_SECONDS") {
            config.director.mmf_timeout_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid MMF_TIMEOUT_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("ALLOCATION_TIMEOUT_SECONDS") {
            config.director.allocation_timeout_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid ALLOCATION_TIMEOUT_SECONDS value: {}", secs))?;
        }
        if let Ok(secs) = env::var("PROFILE_BUDGET_SECONDS") {
            config.director.profile_budget_seconds = secs
                .parse()
                .map_err(|_| anyhow!("Invalid PROFILE_BUDGET_SECONDS value: {}", secs))?;
        }
        if let Ok(retries) = env::var("MAX_RESERVE_RETRIES") {
            config.director.max_reserve_retries = retries
                .parse()
                .map_err(|_| anyhow!("Invalid MAX_RESERVE_RETRIES value: {}", retries))?;
        }
        if let Ok(path) = env::var("PROFILES_FILE") {
            config.director.profiles_file = Some(PathBuf::from(path));
        }

        // Allocator settings
        if let Ok(fleet) = env::var("FLEET_ENDPOINTS") {
            config.allocator.fleet = fleet
                .split(',')
                .map(|endpoint| endpoint.trim().to_string())
                .filter(|endpoint| !endpoint.is_empty())
                .collect();
        }

        validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path.display(), e))?;

        validate_config(&config)?;
        Ok(config)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.service.shutdown_timeout_seconds)
    }

    /// Get sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.store.sweep_interval_seconds)
    }

    /// Ticket store configuration derived from these settings
    pub fn store_config(&self) -> TicketStoreConfig {
        TicketStoreConfig {
            pending_ttl_seconds: self.store.pending_ttl_seconds,
            reservation_ttl_seconds: self.store.reservation_ttl_seconds,
            assignment_ttl_seconds: self.store.assignment_ttl_seconds,
        }
    }

    /// Director configuration derived from these settings
    pub fn director_config(&self) -> DirectorConfig {
        DirectorConfig {
            tick_interval_seconds: self.director.tick_interval_seconds,
            mmf_timeout_seconds: self.director.mmf_timeout_seconds,
            allocation_timeout_seconds: self.director.allocation_timeout_seconds,
            profile_budget_seconds: self.director.profile_budget_seconds,
        }
    }

    /// Match function configuration derived from these settings
    pub fn match_function_config(&self) -> MatchFunctionConfig {
        MatchFunctionConfig {
            max_reserve_retries: self.director.max_reserve_retries,
            ..Default::default()
        }
    }
}

/// Validate configuration values
pub fn validate_config(config: &AppConfig) -> Result<()> {
    // Validate log level
    match config.service.log_level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => {}
        _ => return Err(anyhow!("Invalid log level: {}", config.service.log_level)),
    }

    // Validate ports
    if config.service.http_port == 0 {
        return Err(anyhow!("HTTP port cannot be 0"));
    }

    // Validate timeouts
    if config.service.shutdown_timeout_seconds == 0 {
        return Err(anyhow!("Shutdown timeout must be greater than 0"));
    }
    if config.director.tick_interval_seconds == 0 {
        return Err(anyhow!("Tick interval must be greater than 0"));
    }
    if config.director.mmf_timeout_seconds == 0 {
        return Err(anyhow!("Match function timeout must be greater than 0"));
    }
    if config.director.allocation_timeout_seconds == 0 {
        return Err(anyhow!("Allocation timeout must be greater than 0"));
    }
    if config.director.profile_budget_seconds < config.director.mmf_timeout_seconds {
        return Err(anyhow!(
            "Profile budget must not be smaller than the match function timeout"
        ));
    }

    // Validate store settings
    if config.store.pending_ttl_seconds == 0 {
        return Err(anyhow!("Pending TTL must be greater than 0"));
    }
    if config.store.reservation_ttl_seconds == 0 {
        return Err(anyhow!("Reservation TTL must be greater than 0"));
    }
    if config.store.sweep_interval_seconds == 0 {
        return Err(anyhow!("Sweep interval must be greater than 0"));
    }

    // Validate allocator settings
    if config.allocator.fleet.is_empty() {
        return Err(anyhow!("Allocator fleet cannot be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.service.name, "rallypoint");
        assert_eq!(config.director.tick_interval_seconds, 5);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.service.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.director.tick_interval_seconds = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.director.profile_budget_seconds = 1;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.allocator.fleet.clear();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_component_config_derivation() {
        let mut config = AppConfig::default();
        config.store.reservation_ttl_seconds = 42;
        config.director.max_reserve_retries = 7;

        assert_eq!(config.store_config().reservation_ttl_seconds, 42);
        assert_eq!(config.match_function_config().max_reserve_retries, 7);
        assert_eq!(config.director_config().tick_interval_seconds, 5);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join("rallypoint-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            r#"
[service]
name = "rallypoint-test"
log_level = "debug"
http_port = 9090
shutdown_timeout_seconds = 10

[allocator]
fleet = ["game-a:7777", "game-b:7777"]
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.service.name, "rallypoint-test");
        assert_eq!(config.service.http_port, 9090);
        assert_eq!(config.allocator.fleet.len(), 2);
        // Unspecified sections fall back to defaults
        assert_eq!(config.director.tick_interval_seconds, 5);
    }
}
