//! # Memory Configuration
//!
//! Key/value configuration collaborator consumed by the memory manager.
//!
//! The manager only needs a small surface: the id of the active memory
//! module and a few backend settings. Hosts pass a [`ConfigStore`]
//! explicitly; there is no process-wide configuration object.
//!
//! ## Keys
//!
//! | Key | Meaning | Default |
//! |-----|---------|---------|
//! | `memory.active_module` | id of the active backend | none (`stm_eth` for [`JsonConfigStore`]) |
//! | `memory.sql` | database URL for SQL-backed modules | none (`.mnemo/memory.db` for [`JsonConfigStore`]) |
//! | `stm.eth.turns` | ephemeral store max turns | 15 |
//! | `stm.eth.decay_minutes` | ephemeral store max age | 15 |

use crate::error::{MemoryError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const ACTIVE_MODULE_KEY: &str = "memory.active_module";
pub const DATABASE_URL_KEY: &str = "memory.sql";
pub const EPHEMERAL_TURNS_KEY: &str = "stm.eth.turns";
pub const EPHEMERAL_DECAY_KEY: &str = "stm.eth.decay_minutes";

/// Environment variable carrying the database URL
pub const DATABASE_URL_ENV: &str = "MEMORY_SQL";

/// Module activated by a fresh [`JsonConfigStore`]
pub const DEFAULT_ACTIVE_MODULE: &str = "stm_eth";

/// Database used by a fresh [`JsonConfigStore`]
pub const DEFAULT_DATABASE_URL: &str = "sqlite://.mnemo/memory.db";

const DEFAULT_MAX_TURNS: usize = 15;
const DEFAULT_MAX_AGE_MINUTES: i64 = 15;

/// Key/value configuration lookup
pub trait ConfigStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, persisting it if the store is durable
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Typed view over the memory keys of a [`ConfigStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySettings {
    /// Previously selected module id
    pub active_module: Option<String>,
    /// Database URL for SQL-backed modules
    pub database_url: Option<String>,
    /// Ephemeral store turn bound
    pub max_turns: usize,
    /// Ephemeral store age bound in minutes
    pub max_age_minutes: i64,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            active_module: None,
            database_url: None,
            max_turns: DEFAULT_MAX_TURNS,
            max_age_minutes: DEFAULT_MAX_AGE_MINUTES,
        }
    }
}

impl MemorySettings {
    /// Read settings from a config store, falling back to defaults for
    /// missing or malformed values
    pub fn from_config(config: &dyn ConfigStore) -> Self {
        let defaults = Self::default();
        Self {
            active_module: non_empty(config.get(ACTIVE_MODULE_KEY)),
            database_url: non_empty(config.get(DATABASE_URL_KEY)),
            max_turns: parse_or(config, EPHEMERAL_TURNS_KEY, defaults.max_turns, |&n| n > 0),
            max_age_minutes: parse_or(
                config,
                EPHEMERAL_DECAY_KEY,
                defaults.max_age_minutes,
                |&m| m > 0 && chrono::Duration::try_minutes(m).is_some(),
            ),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a numeric key; unparsable or out-of-range values warn and fall back
fn parse_or<T, F>(config: &dyn ConfigStore, key: &str, default: T, in_range: F) -> T
where
    T: std::str::FromStr,
    F: Fn(&T) -> bool,
{
    match config.get(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) if in_range(&value) => value,
            Ok(_) => {
                tracing::warn!("Ignoring out-of-range value '{}' for '{}', using default", raw, key);
                default
            }
            Err(_) => {
                tracing::warn!("Ignoring malformed value '{}' for '{}', using default", raw, key);
                default
            }
        },
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Non-durable config store, for tests and embedding hosts
#[derive(Debug, Default)]
pub struct InMemoryConfig {
    values: RwLock<BTreeMap<String, String>>,
}

impl InMemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(self, key: &str, value: &str) -> Self {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
        self
    }
}

impl ConfigStore for InMemoryConfig {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .map_err(MemoryError::lock)?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Config store persisted as a flat JSON object of dotted keys.
///
/// Environment overrides are layered on top at load time and are readable
/// through [`ConfigStore::get`], but they are never written back to the
/// file, so secrets such as database URLs stay out of it.
#[derive(Debug)]
pub struct JsonConfigStore {
    path: PathBuf,
    values: RwLock<BTreeMap<String, String>>,
    overrides: BTreeMap<String, String>,
}

impl JsonConfigStore {
    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        PathBuf::from(".mnemo/config.json")
    }

    /// Load from a path, applying `MEMORY_SQL` from the environment
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut overrides = BTreeMap::new();
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            overrides.insert(DATABASE_URL_KEY.to_string(), url);
        }
        Self::load_with_overrides(path, overrides)
    }

    /// Load from a path with explicit overrides
    pub fn load_with_overrides<P: AsRef<Path>>(
        path: P,
        overrides: BTreeMap<String, String>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut values = BTreeMap::new();
        values.insert(
            ACTIVE_MODULE_KEY.to_string(),
            DEFAULT_ACTIVE_MODULE.to_string(),
        );
        values.insert(DATABASE_URL_KEY.to_string(), DEFAULT_DATABASE_URL.to_string());

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let file_values: BTreeMap<String, serde_json::Value> =
                serde_json::from_str(&content).map_err(|e| {
                    MemoryError::Config(format!("invalid config file {:?}: {}", path, e))
                })?;
            for (key, value) in file_values {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                values.insert(key, value);
            }
            tracing::debug!("Loaded memory config from {:?}", path);
        }

        Ok(Self {
            path,
            values: RwLock::new(values),
            overrides,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(values)?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(key) {
            return Some(value.clone());
        }
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().map_err(MemoryError::lock)?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }
}
