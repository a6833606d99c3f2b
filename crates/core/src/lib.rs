//! # Mnemo Core
//!
//! Conversational memory for an LLM gateway: pluggable per-session history
//! backends behind one contract, selected and hot-swapped at runtime.
//!
//! ## Architecture
//!
//! - `memory/` - The contract and its backends (ephemeral, persistent, topic, retrieval stub)
//! - `registry` - Static registration table and per-module discovery
//! - `manager` - Active-module selection, instance cache and delegation
//! - `worker` - Async front that offloads manager calls to the blocking pool
//! - `state/` - SQLite database and schema migrations
//! - `config` - Key/value configuration collaborator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mnemo_core::{InMemoryConfig, MemoryManager};
//! use std::sync::Arc;
//!
//! let config = Arc::new(InMemoryConfig::new().with("memory.sql", ":memory:"));
//! let manager = MemoryManager::new(config);
//! manager.set_active_module("stm_eth")?;
//! manager.add_message("user", "hello", "session-1")?;
//! println!("{}", manager.get_context_string("session-1")?);
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod registry;
pub mod state;
pub mod worker;

pub use config::{ConfigStore, InMemoryConfig, JsonConfigStore, MemorySettings};
pub use error::{MemoryError, Result};
pub use manager::MemoryManager;
pub use memory::{ChatMessage, MemoryModule, DEFAULT_SESSION};
pub use registry::{
    builtin_registrations, DiscoveryIssue, DiscoveryWarning, ModuleContext, ModuleRegistration,
    ModuleSummary, Registry,
};
pub use worker::MemoryWorker;
