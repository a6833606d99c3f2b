//! # Errors
//!
//! Typed failures for the memory subsystem. Selection errors and storage
//! errors both surface here so the manager can decide whether to log,
//! retry or propagate.

use thiserror::Error;

/// Memory subsystem error
#[derive(Error, Debug)]
pub enum MemoryError {
    /// Unknown backend id at selection time
    #[error("memory module '{0}' not found")]
    ModuleNotFound(String),

    /// Manager used before any module was selected
    #[error("no active memory module")]
    NoActiveModule,

    /// Backend constructor failed while activating a module
    #[error("failed to initialize memory module '{id}': {reason}")]
    ModuleInit { id: String, reason: String },

    /// Database error inside a backend call
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    /// A mutex or rwlock was poisoned by a panicking holder
    #[error("lock error: {0}")]
    Lock(String),

    /// Configuration could not be read, parsed or written
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Downstream retrieval collaborator rejected the topics
    #[error("retrieval sink error: {0}")]
    Retrieval(String),

    /// Embedder failed for a topic
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Blocking worker task could not be scheduled or panicked
    #[error("worker error: {0}")]
    Worker(String),
}

impl MemoryError {
    /// Build a [`MemoryError::Lock`] from any poisoned guard error
    pub(crate) fn lock<E: std::fmt::Display>(err: E) -> Self {
        MemoryError::Lock(err.to_string())
    }

    /// Whether this error came from the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(self, MemoryError::Storage(_) | MemoryError::Lock(_))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MemoryError>;
