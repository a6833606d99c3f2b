//! # Memory Database
//!
//! SQLite database shared by the SQL-backed memory modules.
//! Holds the `messages` log and the `topics` knowledge table.

use crate::error::{MemoryError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// Where a database URL points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// Private in-process database
    InMemory,
    /// Database file on disk
    File(PathBuf),
}

impl DbLocation {
    /// Parse a database URL.
    ///
    /// Accepts `:memory:`, `sqlite::memory:`, `sqlite://path`, `sqlite:path`
    /// and bare filesystem paths. Other schemes are rejected.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(MemoryError::Config("database URL is empty".to_string()));
        }
        if url == ":memory:" || url == "sqlite::memory:" || url == "sqlite://:memory:" {
            return Ok(Self::InMemory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        if let Some(path) = url.strip_prefix("sqlite:") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        if url.contains("://") {
            return Err(MemoryError::Config(format!(
                "unsupported database URL '{}': only sqlite is available",
                url
            )));
        }
        Ok(Self::File(PathBuf::from(url)))
    }
}

/// Memory database with versioned schema
#[derive(Clone)]
pub struct MemoryDb {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryDb {
    /// Open the database a URL points at
    pub fn open(url: &str) -> Result<Self> {
        match DbLocation::parse(url)? {
            DbLocation::InMemory => Self::open_in_memory(),
            DbLocation::File(path) => Self::open_at(path),
        }
    }

    /// Open database at a specific path, creating parent directories
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// Open a private in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get a shared connection for use by the stores
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run schema migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(MemoryError::lock)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

        if current_version < 1 {
            Self::migrate_v1(&conn)?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [1],
            )?;
            tracing::info!("MemoryDb initialized with schema version {}", SCHEMA_VERSION);
        }

        Ok(())
    }

    /// Migration to version 1 - messages and topics
    fn migrate_v1(conn: &Connection) -> Result<()> {
        // Durable chat log
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Deduplicated topics, one row per topic per session
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                topic TEXT NOT NULL COLLATE NOCASE,
                datetime TEXT NOT NULL,
                turn_id INTEGER NOT NULL,
                embedding BLOB,
                synonym TEXT NOT NULL DEFAULT '[]',
                foreign_key TEXT NOT NULL,
                last_refactored TEXT,
                extra_metadata TEXT NOT NULL DEFAULT '{}',
                UNIQUE (foreign_key, topic)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, timestamp)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_topics_session ON topics(foreign_key, datetime)",
            [],
        )?;

        Ok(())
    }
}
