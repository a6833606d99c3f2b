//! # Topic Store
//!
//! Deduplicating knowledge memory. Messages are not kept verbatim; each one
//! is run through extraction and synonym expansion, and every candidate is
//! upserted into the `topics` table in its own transaction:
//!
//! ```text
//! content -> TopicExtractor -> [candidate] -> SynonymGenerator -> upsert
//!                                                 |                 |
//!                                                 +--> TopicSink    +--> merge (existing topic
//!                                                                        or shared synonym)
//!                                                                        or insert
//! ```
//!
//! A merge grows the surviving row's synonym set, so any other row in the
//! session that now overlaps it is folded in within the same transaction.
//! No two rows of a session share a term afterwards.
//!
//! A failing candidate is rolled back and logged; it does not fail the call.

use super::extractor::{
    normalize_topic, KeywordExtractor, KeywordSynonyms, SynonymGenerator, TopicEmbedder,
    TopicExtractor,
};
use crate::error::{MemoryError, Result};
use crate::memory::clock::Clock;
use crate::memory::contract::{ChatMessage, MemoryModule};
use crate::memory::persistent::{format_timestamp, parse_timestamp};
use crate::memory::retrieval::TopicSink;
use crate::state::db::MemoryDb;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

pub const MODULE_ID: &str = "utm_anyai";

/// Declared metadata block for discovery
pub fn module_config() -> serde_json::Value {
    serde_json::json!({
        "name": "Universal Topic Mapper",
        "description": "Extracts topics from messages and merges them into deduplicated topic records.",
        "version": "1.0",
        "capabilities": ["add_message", "get_messages", "clear", "get_context_string"]
    })
}

/// A message entering the topic pipeline
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
    pub session: String,
    /// Defaults to the store clock
    pub timestamp: Option<DateTime<Utc>>,
    /// Allocated from the session's turn counter when absent
    pub turn_id: Option<i64>,
}

impl IncomingMessage {
    pub fn new(role: &str, content: &str, session: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            session: session.to_string(),
            timestamp: None,
            turn_id: None,
        }
    }

    pub fn with_turn_id(mut self, turn_id: i64) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }
}

/// Outcome of one pass through the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    /// Turn the message was recorded under; `None` when it was rejected
    pub turn_id: Option<i64>,
    /// Candidates stored as new topics
    pub inserted: Vec<String>,
    /// Existing topics that absorbed a candidate
    pub merged: Vec<String>,
    /// Rows folded into a merged topic and deleted
    pub absorbed: Vec<String>,
    /// Candidates whose transaction rolled back
    pub failed: Vec<String>,
    /// Topics and synonyms handed to the retrieval sink
    pub forwarded: Vec<String>,
}

/// A stored topic row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub id: i64,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub turn_id: i64,
    pub synonyms: Vec<String>,
    pub session: String,
    pub last_refactored: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<u8>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

enum Upsert {
    Inserted,
    Merged { topic: String, absorbed: Vec<String> },
}

/// Topic-extracting memory backend
pub struct TopicStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
    extractor: Box<dyn TopicExtractor>,
    synonyms: Box<dyn SynonymGenerator>,
    sink: Arc<dyn TopicSink>,
    turn_counters: Mutex<HashMap<String, i64>>,
}

impl TopicStore {
    /// Create with the keyword extractor and synonym generator
    pub fn new(db: &MemoryDb, clock: Arc<dyn Clock>, sink: Arc<dyn TopicSink>) -> Self {
        tracing::debug!("utm_anyai: module initialized");
        Self {
            conn: db.connection(),
            clock,
            extractor: Box::new(KeywordExtractor::default()),
            synonyms: Box::new(KeywordSynonyms::default()),
            sink,
            turn_counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn TopicExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_synonyms(mut self, synonyms: Box<dyn SynonymGenerator>) -> Self {
        self.synonyms = synonyms;
        self
    }

    /// Last turn id handed out for a session (0 if none)
    pub fn current_turn(&self, session: &str) -> Result<i64> {
        let counters = self.turn_counters.lock().map_err(MemoryError::lock)?;
        Ok(counters.get(session).copied().unwrap_or(0))
    }

    fn allocate_turn(&self, session: &str, supplied: Option<i64>) -> Result<i64> {
        let mut counters = self.turn_counters.lock().map_err(MemoryError::lock)?;
        let counter = counters.entry(session.to_string()).or_insert(0);
        match supplied {
            Some(turn_id) => {
                // Keep later allocations ahead of caller-chosen ids
                *counter = (*counter).max(turn_id);
                Ok(turn_id)
            }
            None => {
                *counter += 1;
                tracing::debug!("utm_anyai: turn {} for session '{}'", counter, session);
                Ok(*counter)
            }
        }
    }

    /// Run a message through extraction, expansion and upsert
    pub fn ingest(&self, message: IncomingMessage) -> Result<IngestReport> {
        if message.content.trim().is_empty() {
            tracing::warn!(
                "utm_anyai: empty message content for '{}', nothing to extract",
                message.session
            );
            return Ok(IngestReport::default());
        }

        let turn_id = self.allocate_turn(&message.session, message.turn_id)?;
        let timestamp = message.timestamp.unwrap_or_else(|| self.clock.now());

        let mut report = IngestReport {
            turn_id: Some(turn_id),
            ..Default::default()
        };
        let mut forward = BTreeSet::new();

        for raw in self.extractor.extract(&message.content) {
            let topic = normalize_topic(&raw);
            if topic.is_empty() {
                continue;
            }
            let synonyms = union_terms(&[topic.clone()], &self.synonyms.synonyms(&topic));
            forward.insert(topic.clone());
            forward.extend(synonyms.iter().cloned());

            match self.upsert(&topic, &synonyms, turn_id, timestamp, &message) {
                Ok(Upsert::Inserted) => {
                    tracing::info!("utm_anyai: inserted topic '{}'", topic);
                    report.inserted.push(topic);
                }
                Ok(Upsert::Merged {
                    topic: existing,
                    absorbed,
                }) => {
                    tracing::info!("utm_anyai: merged '{}' into topic '{}'", topic, existing);
                    if !absorbed.is_empty() {
                        tracing::info!(
                            "utm_anyai: folded {:?} into topic '{}'",
                            absorbed,
                            existing
                        );
                    }
                    report.merged.push(existing);
                    report.absorbed.extend(absorbed);
                }
                Err(e) => {
                    tracing::warn!("utm_anyai: storing topic '{}' failed, rolled back: {}", topic, e);
                    report.failed.push(topic);
                }
            }
        }

        if !forward.is_empty() {
            let topics: Vec<String> = forward.into_iter().collect();
            if let Err(e) = self.sink.receive_topics(&topics) {
                tracing::warn!("utm_anyai: {}", MemoryError::Retrieval(e.to_string()));
            }
            report.forwarded = topics;
        }

        Ok(report)
    }

    fn upsert(
        &self,
        topic: &str,
        synonyms: &[String],
        turn_id: i64,
        timestamp: DateTime<Utc>,
        message: &IncomingMessage,
    ) -> Result<Upsert> {
        let mut conn = self.conn.lock().map_err(MemoryError::lock)?;
        let tx = conn.transaction()?;
        let now = format_timestamp(self.clock.now());

        let outcome = match find_match(&tx, &message.session, topic, synonyms)? {
            Some((id, existing_topic, existing_synonyms)) => {
                let merged = union_terms(&existing_synonyms, synonyms);
                let (merged, absorbed) =
                    fold_overlapping(&tx, &message.session, id, &existing_topic, merged)?;
                tx.execute(
                    "UPDATE topics SET synonym = ?1, last_refactored = ?2 WHERE id = ?3",
                    params![serde_json::to_string(&merged)?, now, id],
                )?;
                Upsert::Merged {
                    topic: existing_topic,
                    absorbed,
                }
            }
            None => {
                let metadata = serde_json::json!({ "source_role": message.role });
                tx.execute(
                    r#"
                    INSERT INTO topics
                    (topic, datetime, turn_id, synonym, foreign_key, last_refactored, extra_metadata)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                    params![
                        topic,
                        format_timestamp(timestamp),
                        turn_id,
                        serde_json::to_string(synonyms)?,
                        message.session,
                        now,
                        metadata.to_string(),
                    ],
                )?;
                Upsert::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    /// Stored topics for a session, oldest first
    pub fn topics(&self, session: &str) -> Result<Vec<TopicRecord>> {
        let conn = self.conn.lock().map_err(MemoryError::lock)?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, topic, datetime, turn_id, embedding, synonym, foreign_key,
                   last_refactored, extra_metadata
            FROM topics
            WHERE foreign_key = ?1
            ORDER BY datetime ASC, id ASC
            "#,
        )?;

        let records = stmt
            .query_map(params![session], |row| {
                let datetime: String = row.get(2)?;
                let synonyms: String = row.get(5)?;
                let last_refactored: Option<String> = row.get(7)?;
                let metadata: String = row.get(8)?;
                Ok(TopicRecord {
                    id: row.get(0)?,
                    topic: row.get(1)?,
                    timestamp: parse_timestamp(&datetime),
                    turn_id: row.get(3)?,
                    embedding: row.get(4)?,
                    synonyms: parse_json_or_default(&synonyms),
                    session: row.get(6)?,
                    last_refactored: last_refactored.as_deref().map(parse_timestamp),
                    metadata: parse_json_or_default(&metadata),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Fill missing embeddings in one transaction. Any embedder failure
    /// rolls the whole pass back.
    pub fn populate_missing_embeddings(&self, embedder: &dyn TopicEmbedder) -> Result<usize> {
        let mut conn = self.conn.lock().map_err(MemoryError::lock)?;
        let tx = conn.transaction()?;

        let pending: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, topic FROM topics WHERE embedding IS NULL")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        for (id, topic) in &pending {
            let embedding = embedder
                .embed(topic)
                .map_err(|e| MemoryError::Embedding(format!("'{}': {}", topic, e)))?;
            tx.execute(
                "UPDATE topics SET embedding = ?1 WHERE id = ?2",
                params![embedding, id],
            )?;
        }

        tx.commit()?;
        tracing::info!("utm_anyai: populated {} missing embeddings", pending.len());
        Ok(pending.len())
    }
}

impl MemoryModule for TopicStore {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()> {
        self.ingest(IncomingMessage::new(role, content, session))?;
        Ok(())
    }

    fn get_messages(&self, session: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .topics(session)?
            .into_iter()
            .map(|record| {
                ChatMessage::new(
                    "system",
                    format!(
                        "Topic: {} (Synonyms: {})",
                        record.topic,
                        record.synonyms.join(", ")
                    ),
                )
            })
            .collect())
    }

    fn clear(&self, session: &str) -> Result<()> {
        let deleted = {
            let mut conn = self.conn.lock().map_err(MemoryError::lock)?;
            let tx = conn.transaction()?;
            let deleted = tx.execute("DELETE FROM topics WHERE foreign_key = ?1", params![session])?;
            tx.commit()?;
            deleted
        };

        self.turn_counters
            .lock()
            .map_err(MemoryError::lock)?
            .remove(session);

        tracing::info!("utm_anyai: cleared {} topics for '{}'", deleted, session);
        Ok(())
    }
}

/// First topic in the session equal to `topic` or sharing a synonym with it
fn find_match(
    tx: &Transaction<'_>,
    session: &str,
    topic: &str,
    synonyms: &[String],
) -> Result<Option<(i64, String, Vec<String>)>> {
    // Fast path on the unique (session, topic) key
    let exact: Option<(i64, String, String)> = tx
        .query_row(
            "SELECT id, topic, synonym FROM topics WHERE foreign_key = ?1 AND topic = ?2",
            params![session, topic],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    if let Some((id, existing, raw)) = exact {
        return Ok(Some((id, existing, serde_json::from_str(&raw)?)));
    }

    let wanted: BTreeSet<String> = synonyms.iter().map(|s| s.to_lowercase()).collect();
    for (id, existing, existing_synonyms) in session_rows(tx, session)? {
        let overlaps = existing.to_lowercase() == topic.to_lowercase()
            || existing_synonyms
                .iter()
                .any(|s| wanted.contains(&s.to_lowercase()));
        if overlaps {
            return Ok(Some((id, existing, existing_synonyms)));
        }
    }
    Ok(None)
}

/// Session rows as `(id, topic, synonyms)`, oldest first
fn session_rows(tx: &Transaction<'_>, session: &str) -> Result<Vec<(i64, String, Vec<String>)>> {
    let mut stmt = tx.prepare(
        "SELECT id, topic, synonym FROM topics WHERE foreign_key = ?1 ORDER BY datetime ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![session], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, topic, raw)| Ok((id, topic, serde_json::from_str(&raw)?)))
        .collect()
}

/// Delete every other session row whose topic or synonyms overlap `terms`,
/// pulling its terms into the survivor until nothing overlaps. Returns the
/// grown term set and the absorbed topic names.
fn fold_overlapping(
    tx: &Transaction<'_>,
    session: &str,
    survivor: i64,
    survivor_topic: &str,
    mut terms: Vec<String>,
) -> Result<(Vec<String>, Vec<String>)> {
    let mut absorbed = Vec::new();
    loop {
        let mut wanted: BTreeSet<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        wanted.insert(survivor_topic.to_lowercase());

        let overlapping: Vec<_> = session_rows(tx, session)?
            .into_iter()
            .filter(|(id, topic, synonyms)| {
                *id != survivor
                    && (wanted.contains(&topic.to_lowercase())
                        || synonyms.iter().any(|s| wanted.contains(&s.to_lowercase())))
            })
            .collect();
        if overlapping.is_empty() {
            return Ok((terms, absorbed));
        }

        for (id, topic, synonyms) in overlapping {
            terms = union_terms(&terms, &union_terms(&[topic.clone()], &synonyms));
            tx.execute("DELETE FROM topics WHERE id = ?1", params![id])?;
            absorbed.push(topic);
        }
    }
}

/// Case-insensitive union, first spelling wins, sorted for stable output
fn union_terms(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for term in existing.iter().chain(incoming) {
        let term = normalize_topic(term);
        if !term.is_empty() && seen.insert(term.to_lowercase()) {
            out.push(term);
        }
    }
    out.sort_by_key(|t| t.to_lowercase());
    out
}

fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_else(|e| {
        tracing::warn!("utm_anyai: unreadable JSON column '{}': {}", raw, e);
        T::default()
    })
}
