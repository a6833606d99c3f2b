//! # Memory Manager
//!
//! Owns the registry, a lazily built cache of backend instances and the one
//! active backend that every contract call is delegated to.
//!
//! Switching modules only re-points the active reference. Instances stay in
//! the cache, so switching away and back returns the same instance with its
//! state intact.

use crate::config::{ConfigStore, MemorySettings, ACTIVE_MODULE_KEY};
use crate::error::{MemoryError, Result};
use crate::memory::contract::{ChatMessage, MemoryModule};
use crate::registry::{DiscoveryWarning, ModuleContext, ModuleSummary, Registry};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

struct ActiveModule {
    id: String,
    module: Arc<dyn MemoryModule>,
}

/// Entry point for hosts: selection plus delegation
pub struct MemoryManager {
    registry: Registry,
    context: ModuleContext,
    config: Arc<dyn ConfigStore>,
    instances: Mutex<HashMap<String, Arc<dyn MemoryModule>>>,
    active: RwLock<Option<ActiveModule>>,
}

impl MemoryManager {
    /// Discover the built-in backends and restore the configured selection
    pub fn new(config: Arc<dyn ConfigStore>) -> Self {
        let registry = Registry::builtin(config.as_ref());
        let context = ModuleContext::new(MemorySettings::from_config(config.as_ref()));
        Self::with_registry(registry, context, config)
    }

    /// Build from an explicit registry and context
    pub fn with_registry(
        registry: Registry,
        context: ModuleContext,
        config: Arc<dyn ConfigStore>,
    ) -> Self {
        let manager = Self {
            registry,
            context,
            config,
            instances: Mutex::new(HashMap::new()),
            active: RwLock::new(None),
        };

        if let Some(id) = manager.context.settings.active_module.clone() {
            match manager.activate(&id) {
                Ok(()) => tracing::info!("Restored active memory module '{}'", id),
                Err(e) => tracing::warn!(
                    "Configured memory module '{}' unavailable, starting with none: {}",
                    id,
                    e
                ),
            }
        }
        manager
    }

    /// Look up, construct-or-reuse and point at a module, without persisting
    fn activate(&self, id: &str) -> Result<()> {
        let module = self.instance(id)?;
        let mut active = self.active.write().map_err(MemoryError::lock)?;
        *active = Some(ActiveModule {
            id: id.to_string(),
            module,
        });
        Ok(())
    }

    /// Cached instance for `id`, constructing it on first use
    fn instance(&self, id: &str) -> Result<Arc<dyn MemoryModule>> {
        let descriptor = self
            .registry
            .get(id)
            .ok_or_else(|| MemoryError::ModuleNotFound(id.to_string()))?;

        let mut instances = self.instances.lock().map_err(MemoryError::lock)?;
        if let Some(module) = instances.get(id) {
            return Ok(Arc::clone(module));
        }

        let module = descriptor
            .construct(&self.context)
            .map_err(|e| MemoryError::ModuleInit {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!("Constructed memory module '{}'", id);
        instances.insert(id.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// Switch the active module and persist the choice.
    ///
    /// On any failure the previous active module stays in place.
    pub fn set_active_module(&self, id: &str) -> Result<()> {
        let module = self.instance(id).map_err(|e| {
            tracing::error!("Cannot activate memory module '{}': {}", id, e);
            e
        })?;

        // Held across persist and swap so the stored id matches the active one
        let mut active = self.active.write().map_err(MemoryError::lock)?;
        self.config.set(ACTIVE_MODULE_KEY, id).map_err(|e| {
            tracing::error!("Failed to persist active memory module '{}': {}", id, e);
            e
        })?;

        let previous = active.as_ref().map(|a| a.id.clone());
        *active = Some(ActiveModule {
            id: id.to_string(),
            module,
        });

        tracing::info!(
            "Active memory module: {} -> {}",
            previous.as_deref().unwrap_or("<none>"),
            id
        );
        Ok(())
    }

    /// Re-read the active module id from config and switch to it
    pub fn reload_from_config(&self) -> Result<()> {
        let Some(id) = self
            .config
            .get(ACTIVE_MODULE_KEY)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
        else {
            tracing::debug!("No active memory module configured, keeping current");
            return Ok(());
        };

        self.activate(&id)?;
        tracing::info!("Reloaded active memory module '{}' from config", id);
        Ok(())
    }

    pub fn get_active_module(&self) -> Result<Arc<dyn MemoryModule>> {
        let active = self.active.read().map_err(MemoryError::lock)?;
        active
            .as_ref()
            .map(|a| Arc::clone(&a.module))
            .ok_or(MemoryError::NoActiveModule)
    }

    pub fn active_module_id(&self) -> Option<String> {
        self.active.read().ok()?.as_ref().map(|a| a.id.clone())
    }

    /// Loadable modules, sorted by id
    pub fn list_modules(&self) -> Vec<ModuleSummary> {
        self.registry.summaries()
    }

    pub fn discovery_warnings(&self) -> &[DiscoveryWarning] {
        self.registry.warnings()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn delegate<T>(
        &self,
        operation: &str,
        session: &str,
        call: impl FnOnce(&dyn MemoryModule) -> Result<T>,
    ) -> Result<T> {
        let module = self.get_active_module()?;
        tracing::debug!("{} on '{}' via {}", operation, session, module.id());
        call(module.as_ref()).map_err(|e| {
            tracing::error!(
                "{} failed for '{}' in module {}: {}",
                operation,
                session,
                module.id(),
                e
            );
            e
        })
    }

    pub fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()> {
        self.delegate("add_message", session, |m| {
            m.add_message(role, content, session)
        })
    }

    pub fn get_messages(&self, session: &str) -> Result<Vec<ChatMessage>> {
        self.delegate("get_messages", session, |m| m.get_messages(session))
    }

    pub fn clear(&self, session: &str) -> Result<()> {
        self.delegate("clear", session, |m| m.clear(session))
    }

    pub fn get_context_string(&self, session: &str) -> Result<String> {
        self.delegate("get_context_string", session, |m| {
            m.get_context_string(session)
        })
    }
}
