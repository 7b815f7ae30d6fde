//! Match profile registry with validated registration
//!
//! This module holds the declarative configuration the operator defines per
//! game mode, validates it at registration time so malformed filters never
//! reach the match loop, and supports preloading profiles from a TOML file.

use crate::error::{MatchmakingError, Result};
use crate::pool::Pool;
use crate::types::Extensions;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Well-known profile extension: players claimed from each pool per match
pub const EXT_PLAYERS_NEEDED_PER_POOL: &str = "players_needed_per_pool";

/// Well-known profile extension: game mode passed to the allocator
pub const EXT_GAME_MODE: &str = "game_mode";

/// A named set of pools plus game-mode parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchProfile {
    pub name: String,
    /// Ordered pool list; proposals concatenate claims in this order
    pub pools: Vec<Pool>,
    #[serde(default)]
    pub extensions: Extensions,
}

impl MatchProfile {
    /// Create a profile with no pools; add at least one before registering
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pools: Vec::new(),
            extensions: Extensions::new(),
        }
    }

    /// Append a pool
    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.pools.push(pool);
        self
    }

    /// Set how many players each pool must contribute per match
    pub fn with_players_needed(mut self, count: u64) -> Self {
        self.extensions.insert(
            EXT_PLAYERS_NEEDED_PER_POOL.to_string(),
            serde_json::json!(count),
        );
        self
    }

    /// Set the game mode announced to the allocator
    pub fn with_game_mode(mut self, mode: impl Into<String>) -> Self {
        self.extensions
            .insert(EXT_GAME_MODE.to_string(), serde_json::json!(mode.into()));
        self
    }

    /// Players claimed from each pool per match (defaults to 1)
    pub fn players_needed_per_pool(&self) -> usize {
        self.extensions
            .get(EXT_PLAYERS_NEEDED_PER_POOL)
            .and_then(|value| value.as_u64())
            .unwrap_or(1) as usize
    }

    /// Game mode announced to the allocator (defaults to the profile name)
    pub fn game_mode(&self) -> String {
        self.extensions
            .get(EXT_GAME_MODE)
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }

    /// Total players seated by one match of this profile
    pub fn players_per_match(&self) -> usize {
        self.players_needed_per_pool() * self.pools.len()
    }

    /// Validate the profile for registration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MatchmakingError::InvalidProfile {
                reason: "Profile name cannot be empty".to_string(),
            }
            .into());
        }

        if self.pools.is_empty() {
            return Err(MatchmakingError::InvalidProfile {
                reason: format!("Profile '{}' must define at least one pool", self.name),
            }
            .into());
        }

        let mut seen = HashSet::new();
        for pool in &self.pools {
            pool.validate()?;
            if !seen.insert(pool.name.as_str()) {
                return Err(MatchmakingError::InvalidProfile {
                    reason: format!(
                        "Profile '{}' has duplicate pool name '{}'",
                        self.name, pool.name
                    ),
                }
                .into());
            }
        }

        if let Some(value) = self.extensions.get(EXT_PLAYERS_NEEDED_PER_POOL) {
            match value.as_u64() {
                Some(count) if count > 0 => {}
                _ => {
                    return Err(MatchmakingError::InvalidProfile {
                        reason: format!(
                            "Profile '{}' has invalid {}: {}",
                            self.name, EXT_PLAYERS_NEEDED_PER_POOL, value
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

/// TOML file layout for operator-provided profiles
#[derive(Debug, Deserialize)]
struct ProfilesFile {
    #[serde(default)]
    profiles: Vec<MatchProfile>,
}

/// Registry of active match profiles
///
/// Registration validates; the director snapshots the active set each tick.
#[derive(Clone, Default)]
pub struct ProfileRegistry {
    profiles: Arc<RwLock<HashMap<String, MatchProfile>>>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a profile; rejects invalid definitions
    pub fn register(&self, profile: MatchProfile) -> Result<()> {
        profile.validate()?;

        let mut profiles = self.write_profiles()?;
        let replaced = profiles.insert(profile.name.clone(), profile.clone()).is_some();

        info!(
            "{} profile '{}' with {} pools, {} players per pool",
            if replaced { "Replaced" } else { "Registered" },
            profile.name,
            profile.pools.len(),
            profile.players_needed_per_pool()
        );
        Ok(())
    }

    /// Look up one profile by name
    pub fn get(&self, name: &str) -> Result<Option<MatchProfile>> {
        let profiles = self.read_profiles()?;
        Ok(profiles.get(name).cloned())
    }

    /// Snapshot of all active profiles, ordered by name
    pub fn list(&self) -> Result<Vec<MatchProfile>> {
        let profiles = self.read_profiles()?;
        let mut all: Vec<MatchProfile> = profiles.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    /// Remove a profile; returns whether it existed
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut profiles = self.write_profiles()?;
        Ok(profiles.remove(name).is_some())
    }

    /// Number of registered profiles
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_profiles()?.len())
    }

    /// Whether no profiles are registered
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read_profiles()?.is_empty())
    }

    /// Load and register every profile from a TOML file
    pub fn load_from_file(&self, path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MatchmakingError::ConfigurationError {
                message: format!("Failed to read profiles file {}: {}", path.display(), e),
            }
        })?;

        let file: ProfilesFile =
            toml::from_str(&contents).map_err(|e| MatchmakingError::ConfigurationError {
                message: format!("Failed to parse profiles file {}: {}", path.display(), e),
            })?;

        let count = file.profiles.len();
        for profile in file.profiles {
            self.register(profile)?;
        }

        info!("Loaded {} profiles from {}", count, path.display());
        Ok(count)
    }

    fn read_profiles(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, MatchProfile>>> {
        self.profiles.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire profile registry lock".to_string(),
            }
            .into()
        })
    }

    fn write_profiles(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, MatchProfile>>> {
        self.profiles.write().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire profile registry lock".to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn duel_profile() -> MatchProfile {
        MatchProfile::new("duel")
            .with_pool(Pool::new("duelists").with_tag("duel"))
            .with_players_needed(2)
    }

    #[test]
    fn test_register_and_get() {
        let registry = ProfileRegistry::new();
        registry.register(duel_profile()).unwrap();

        let fetched = registry.get("duel").unwrap().unwrap();
        assert_eq!(fetched.name, "duel");
        assert_eq!(fetched.players_needed_per_pool(), 2);
        assert!(registry.get("unknown").unwrap().is_none());
    }

    #[test]
    fn test_register_rejects_zero_pools() {
        let registry = ProfileRegistry::new();
        let err = registry.register(MatchProfile::new("empty"));
        assert!(err.is_err());
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_register_rejects_duplicate_pool_names() {
        let registry = ProfileRegistry::new();
        let profile = MatchProfile::new("twins")
            .with_pool(Pool::new("side"))
            .with_pool(Pool::new("side"));
        assert!(registry.register(profile).is_err());
    }

    #[test]
    fn test_register_rejects_zero_players_needed() {
        let registry = ProfileRegistry::new();
        let profile = MatchProfile::new("bad")
            .with_pool(Pool::new("everyone"))
            .with_players_needed(0);
        assert!(registry.register(profile).is_err());
    }

    #[test]
    fn test_register_rejects_invalid_pool_filter() {
        let registry = ProfileRegistry::new();
        let profile = MatchProfile::new("bad-range")
            .with_pool(Pool::new("skills").with_numeric_range("skill", 50.0, 10.0));
        assert!(registry.register(profile).is_err());
    }

    #[test]
    fn test_list_is_ordered_by_name() {
        let registry = ProfileRegistry::new();
        registry
            .register(MatchProfile::new("zeta").with_pool(Pool::new("p")))
            .unwrap();
        registry
            .register(MatchProfile::new("alpha").with_pool(Pool::new("p")))
            .unwrap();

        let names: Vec<String> = registry
            .list()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_defaults() {
        let profile = MatchProfile::new("casual").with_pool(Pool::new("everyone"));
        assert_eq!(profile.players_needed_per_pool(), 1);
        assert_eq!(profile.game_mode(), "casual");

        let moded = profile.with_game_mode("deathmatch");
        assert_eq!(moded.game_mode(), "deathmatch");
    }

    #[test]
    fn test_register_replaces_existing() {
        let registry = ProfileRegistry::new();
        registry.register(duel_profile()).unwrap();

        let updated = duel_profile().with_players_needed(4);
        registry.register(updated).unwrap();

        assert_eq!(registry.len().unwrap(), 1);
        let fetched = registry.get("duel").unwrap().unwrap();
        assert_eq!(fetched.players_needed_per_pool(), 4);
    }

    #[test]
    fn test_load_from_toml() {
        let registry = ProfileRegistry::new();
        let dir = std::env::temp_dir().join("rallypoint-profile-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("profiles.toml");
        std::fs::write(
            &path,
            r#"
[[profiles]]
name = "duel"

[[profiles.pools]]
name = "duelists"
tag_filters = ["duel"]

[profiles.extensions]
players_needed_per_pool = 2
"#,
        )
        .unwrap();

        let count = registry.load_from_file(&path).unwrap();
        assert_eq!(count, 1);
        let profile = registry.get("duel").unwrap().unwrap();
        assert_eq!(profile.players_needed_per_pool(), 2);
        assert_eq!(profile.pools[0].tag_filters, vec!["duel"]);
    }
}
