//! # Persistent Store
//!
//! Durable per-session message log in the `messages` table.
//!
//! Every call takes the connection lock for its whole duration. Writes run
//! inside a transaction; an uncommitted transaction rolls back when it is
//! dropped, so an early `?` return never leaves a half-applied write.

use super::clock::Clock;
use super::contract::{preview, ChatMessage, MemoryModule};
use crate::error::{MemoryError, Result};
use crate::state::db::MemoryDb;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub const MODULE_ID: &str = "stm_prp";

/// Declared metadata block for discovery
pub fn module_config() -> serde_json::Value {
    serde_json::json!({
        "name": "Perpetual Memory",
        "description": "Stores conversation history in a relational database.",
        "version": "1.0",
        "capabilities": ["add_message", "get_messages", "clear", "get_context_string"]
    })
}

/// A stored message row
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// SQLite-backed durable message log
pub struct PersistentStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl PersistentStore {
    /// Create from a shared MemoryDb connection
    pub fn new(db: &MemoryDb, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: db.connection(),
            clock,
        }
    }

    /// Full rows for a session, oldest first
    pub fn stored_messages(&self, session: &str) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().map_err(MemoryError::lock)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, session_id, role, content, timestamp
            FROM messages
            WHERE session_id = ?1
            ORDER BY timestamp ASC, id ASC
            "#,
        )?;

        let rows = stmt
            .query_map(params![session], |row| {
                let timestamp: String = row.get(4)?;
                Ok(StoredMessage {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    timestamp: parse_timestamp(&timestamp),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::error!("stm_prp: error retrieving messages for '{}': {}", session, e);
                e
            })?;

        tracing::debug!("stm_prp: retrieved {} messages for '{}'", rows.len(), session);
        Ok(rows)
    }

    /// Count of rows for a session
    pub fn count(&self, session: &str) -> Result<i64> {
        let conn = self.conn.lock().map_err(MemoryError::lock)?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            params![session],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl MemoryModule for PersistentStore {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()> {
        let mut conn = self.conn.lock().map_err(MemoryError::lock)?;
        let timestamp = format_timestamp(self.clock.now());

        let result = (|| -> Result<()> {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (session_id, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
                params![session, role, content, timestamp],
            )?;
            tx.commit()?;
            Ok(())
        })();

        match &result {
            Ok(()) => tracing::info!(
                "stm_prp: added message to '{}': role='{}', content='{}'",
                session,
                role,
                preview(content)
            ),
            Err(e) => tracing::error!("stm_prp: error adding message to '{}': {}", session, e),
        }
        result
    }

    fn get_messages(&self, session: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .stored_messages(session)?
            .into_iter()
            .map(|m| ChatMessage::new(m.role, m.content))
            .collect())
    }

    fn clear(&self, session: &str) -> Result<()> {
        let mut conn = self.conn.lock().map_err(MemoryError::lock)?;

        let result = (|| -> Result<usize> {
            let tx = conn.transaction()?;
            let deleted = tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session])?;
            tx.commit()?;
            Ok(deleted)
        })();

        match result {
            Ok(deleted) => {
                tracing::info!("stm_prp: cleared {} messages for '{}'", deleted, session);
                Ok(())
            }
            Err(e) => {
                tracing::error!("stm_prp: error clearing '{}': {}", session, e);
                Err(e)
            }
        }
    }
}

/// RFC3339 with fixed microsecond precision so text order equals time order
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::warn!("Unparseable timestamp '{}': {}", raw, e);
            DateTime::<Utc>::default()
        })
}
