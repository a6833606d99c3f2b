//! # Module Registry
//!
//! Static registration table of memory backends, validated once at startup.
//!
//! Each registration carries an id, an optional raw metadata block and a
//! constructor. Discovery checks every entry on its own; a bad entry becomes
//! a [`DiscoveryWarning`] and is left out, the rest still load.

use crate::config::{ConfigStore, MemorySettings, DATABASE_URL_KEY};
use crate::error::{MemoryError, Result};
use crate::memory::clock::{Clock, SystemClock};
use crate::memory::contract::MemoryModule;
use crate::memory::ephemeral::{self, EphemeralConfig, EphemeralStore};
use crate::memory::persistent::{self, PersistentStore};
use crate::memory::retrieval::{self, LoggingTopicSink, RetrievalStub, TopicSink};
use crate::memory::topic::store::{self as topic_store, TopicStore};
use crate::state::db::MemoryDb;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Builds a backend instance from shared context
pub type ModuleConstructor =
    Arc<dyn Fn(&ModuleContext) -> Result<Arc<dyn MemoryModule>> + Send + Sync>;

/// Declared module metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModuleMetadata {
    /// Metadata for a module that declared none
    fn bare(id: &str) -> Self {
        Self {
            name: id.to_string(),
            description: String::new(),
            version: None,
            capabilities: Vec::new(),
        }
    }
}

/// Everything a constructor may draw on
pub struct ModuleContext {
    pub settings: MemorySettings,
    pub clock: Arc<dyn Clock>,
    pub topic_sink: Arc<dyn TopicSink>,
    db: Mutex<Option<MemoryDb>>,
}

impl ModuleContext {
    pub fn new(settings: MemorySettings) -> Self {
        Self {
            settings,
            clock: Arc::new(SystemClock),
            topic_sink: Arc::new(LoggingTopicSink),
            db: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_topic_sink(mut self, sink: Arc<dyn TopicSink>) -> Self {
        self.topic_sink = sink;
        self
    }

    /// Database shared by all SQL-backed modules, opened on first use
    pub fn database(&self) -> Result<MemoryDb> {
        let mut slot = self.db.lock().map_err(MemoryError::lock)?;
        if let Some(db) = slot.as_ref() {
            return Ok(db.clone());
        }

        let url = self.settings.database_url.as_deref().ok_or_else(|| {
            MemoryError::Config(format!("'{}' is not configured", DATABASE_URL_KEY))
        })?;
        let db = MemoryDb::open(url)?;
        tracing::info!("Opened memory database at {}", url);
        *slot = Some(db.clone());
        Ok(db)
    }
}

/// One entry of the registration table
#[derive(Clone)]
pub struct ModuleRegistration {
    pub id: String,
    /// Raw metadata block; validated during discovery
    pub metadata: Option<serde_json::Value>,
    /// Config keys that must be present for the module to load
    pub requires: Vec<String>,
    pub constructor: ModuleConstructor,
}

impl ModuleRegistration {
    pub fn new<F>(id: &str, constructor: F) -> Self
    where
        F: Fn(&ModuleContext) -> Result<Arc<dyn MemoryModule>> + Send + Sync + 'static,
    {
        Self {
            id: id.to_string(),
            metadata: None,
            requires: Vec::new(),
            constructor: Arc::new(constructor),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn requires(mut self, key: &str) -> Self {
        self.requires.push(key.to_string());
        self
    }
}

/// A validated, loadable module
#[derive(Clone)]
pub struct ModuleDescriptor {
    pub id: String,
    pub metadata: ModuleMetadata,
    pub constructor: ModuleConstructor,
}

impl ModuleDescriptor {
    pub fn construct(&self, ctx: &ModuleContext) -> Result<Arc<dyn MemoryModule>> {
        (self.constructor)(ctx)
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.id)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Listing entry for hosts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleSummary {
    pub id: String,
    pub name: String,
    pub capabilities: Vec<String>,
}

/// Why a registration was left out
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiscoveryIssue {
    #[error("empty module id")]
    EmptyId,

    #[error("duplicate module id")]
    DuplicateId,

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("missing required config key '{0}'")]
    MissingConfig(String),
}

/// Non-fatal discovery failure for one module
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryWarning {
    pub id: String,
    pub issue: DiscoveryIssue,
}

impl fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module '{}' skipped: {}", self.id, self.issue)
    }
}

/// Read-only id → descriptor map
#[derive(Debug, Default)]
pub struct Registry {
    modules: BTreeMap<String, ModuleDescriptor>,
    warnings: Vec<DiscoveryWarning>,
}

impl Registry {
    /// Validate registrations against the config, keeping the good ones
    pub fn discover(registrations: Vec<ModuleRegistration>, config: &dyn ConfigStore) -> Self {
        let mut registry = Self::default();

        for registration in registrations {
            let id = registration.id.trim().to_string();
            match registry.validate(&id, &registration, config) {
                Ok(metadata) => {
                    tracing::debug!("Discovered memory module '{}' ({})", id, metadata.name);
                    registry.modules.insert(
                        id.clone(),
                        ModuleDescriptor {
                            id,
                            metadata,
                            constructor: registration.constructor,
                        },
                    );
                }
                Err(issue) => {
                    let warning = DiscoveryWarning { id, issue };
                    tracing::warn!("{}", warning);
                    registry.warnings.push(warning);
                }
            }
        }

        tracing::info!(
            "Memory module discovery: {} loaded, {} skipped",
            registry.modules.len(),
            registry.warnings.len()
        );
        registry
    }

    fn validate(
        &self,
        id: &str,
        registration: &ModuleRegistration,
        config: &dyn ConfigStore,
    ) -> std::result::Result<ModuleMetadata, DiscoveryIssue> {
        if id.is_empty() {
            return Err(DiscoveryIssue::EmptyId);
        }
        if self.modules.contains_key(id) {
            return Err(DiscoveryIssue::DuplicateId);
        }

        let metadata = match &registration.metadata {
            None => ModuleMetadata::bare(id),
            Some(raw) => serde_json::from_value::<ModuleMetadata>(raw.clone())
                .map_err(|e| DiscoveryIssue::MalformedMetadata(e.to_string()))?,
        };

        for key in &registration.requires {
            let present = config.get(key).is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(DiscoveryIssue::MissingConfig(key.clone()));
            }
        }

        Ok(metadata)
    }

    /// Discover the built-in backends
    pub fn builtin(config: &dyn ConfigStore) -> Self {
        Self::discover(builtin_registrations(), config)
    }

    pub fn get(&self, id: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.modules.contains_key(id)
    }

    /// Module ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.modules
            .values()
            .map(|d| ModuleSummary {
                id: d.id.clone(),
                name: d.metadata.name.clone(),
                capabilities: d.metadata.capabilities.clone(),
            })
            .collect()
    }

    pub fn warnings(&self) -> &[DiscoveryWarning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Registration table for every backend shipped with the crate
pub fn builtin_registrations() -> Vec<ModuleRegistration> {
    vec![
        ModuleRegistration::new(ephemeral::MODULE_ID, |ctx| {
            let store = EphemeralStore::new(EphemeralConfig::from(&ctx.settings), ctx.clock.clone());
            Ok(Arc::new(store) as Arc<dyn MemoryModule>)
        })
        .with_metadata(ephemeral::module_config()),
        ModuleRegistration::new(persistent::MODULE_ID, |ctx| {
            let store = PersistentStore::new(&ctx.database()?, ctx.clock.clone());
            Ok(Arc::new(store) as Arc<dyn MemoryModule>)
        })
        .with_metadata(persistent::module_config())
        .requires(DATABASE_URL_KEY),
        ModuleRegistration::new(topic_store::MODULE_ID, |ctx| {
            let store = TopicStore::new(&ctx.database()?, ctx.clock.clone(), ctx.topic_sink.clone());
            Ok(Arc::new(store) as Arc<dyn MemoryModule>)
        })
        .with_metadata(topic_store::module_config())
        .requires(DATABASE_URL_KEY),
        ModuleRegistration::new(retrieval::MODULE_ID, |_ctx| {
            Ok(Arc::new(RetrievalStub::new()) as Arc<dyn MemoryModule>)
        })
        .with_metadata(retrieval::module_config()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InMemoryConfig;
    use serde_json::json;

    fn sql_config() -> InMemoryConfig {
        InMemoryConfig::new().with(DATABASE_URL_KEY, ":memory:")
    }

    fn stub(id: &str) -> ModuleRegistration {
        ModuleRegistration::new(id, |_ctx| Ok(Arc::new(RetrievalStub::new()) as Arc<dyn MemoryModule>))
    }

    #[test]
    fn test_builtin_discovery() {
        let registry = Registry::builtin(&sql_config());

        assert_eq!(registry.ids(), vec!["rag_dummy", "stm_eth", "stm_prp", "utm_anyai"]);
        assert!(registry.warnings().is_empty());

        let summaries = registry.summaries();
        assert_eq!(summaries[1].name, "Ephemeral Memory");
        assert_eq!(summaries[2].name, "Perpetual Memory");
        assert_eq!(summaries[3].name, "Universal Topic Mapper");
        assert!(summaries[1].capabilities.contains(&"get_context_string".to_string()));
    }

    #[test]
    fn test_sql_modules_need_database_url() {
        let registry = Registry::builtin(&InMemoryConfig::new());

        assert_eq!(registry.ids(), vec!["rag_dummy", "stm_eth"]);
        assert_eq!(registry.warnings().len(), 2);
        assert!(registry.warnings().iter().all(|w| w.issue
            == DiscoveryIssue::MissingConfig(DATABASE_URL_KEY.to_string())));
    }

    #[test]
    fn test_bad_entries_are_isolated() {
        let registrations = vec![
            stub("good"),
            stub("  "),
            stub("good"),
            stub("broken").with_metadata(json!({ "description": "no name" })),
            stub("wrong_shape").with_metadata(json!("just a string")),
            stub("plain"),
        ];

        let registry = Registry::discover(registrations, &InMemoryConfig::new());

        assert_eq!(registry.ids(), vec!["good", "plain"]);
        let issues: Vec<_> = registry.warnings().iter().map(|w| &w.issue).collect();
        assert_eq!(issues[0], &DiscoveryIssue::EmptyId);
        assert_eq!(issues[1], &DiscoveryIssue::DuplicateId);
        assert!(matches!(issues[2], DiscoveryIssue::MalformedMetadata(_)));
        assert!(matches!(issues[3], DiscoveryIssue::MalformedMetadata(_)));

        // Missing metadata falls back to the id
        assert_eq!(registry.get("plain").unwrap().metadata.name, "plain");
    }

    #[test]
    fn test_warning_display() {
        let warning = DiscoveryWarning {
            id: "stm_prp".to_string(),
            issue: DiscoveryIssue::MissingConfig("memory.sql".to_string()),
        };
        assert_eq!(
            warning.to_string(),
            "module 'stm_prp' skipped: missing required config key 'memory.sql'"
        );
    }

    #[test]
    fn test_constructors_build_their_backend() {
        let registry = Registry::builtin(&sql_config());
        let ctx = ModuleContext::new(MemorySettings::from_config(&sql_config()));

        for id in registry.ids() {
            let module = registry.get(&id).unwrap().construct(&ctx).unwrap();
            assert_eq!(module.id(), id);
        }
    }

    #[test]
    fn test_sql_modules_share_one_database() {
        let ctx = ModuleContext::new(MemorySettings::from_config(&sql_config()));
        let a = ctx.database().unwrap();
        let b = ctx.database().unwrap();
        assert!(Arc::ptr_eq(&a.connection(), &b.connection()));
    }

    #[test]
    fn test_database_without_url_is_config_error() {
        let ctx = ModuleContext::new(MemorySettings::default());
        assert!(matches!(ctx.database(), Err(MemoryError::Config(_))));
    }
}
