//! # Ephemeral Store
//!
//! In-process, per-session short-term memory bounded by both age and turn
//! count. Eviction runs on every write and every read (trim on access), so
//! there is no background sweeper.

use super::clock::Clock;
use super::contract::{preview, ChatMessage, MemoryModule};
use crate::config::MemorySettings;
use crate::error::{MemoryError, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

pub const MODULE_ID: &str = "stm_eth";

/// Declared metadata block for discovery
pub fn module_config() -> serde_json::Value {
    serde_json::json!({
        "name": "Ephemeral Memory",
        "description": "Short-term in-process history bounded by age and turn count.",
        "version": "1.0",
        "capabilities": ["add_message", "get_messages", "clear", "get_context_string"]
    })
}

/// Eviction bounds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EphemeralConfig {
    /// Keep at most this many of the most recent entries
    pub max_turns: usize,
    /// Drop entries older than this
    pub max_age: Duration,
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            max_turns: 15,
            max_age: Duration::minutes(15),
        }
    }
}

impl From<&MemorySettings> for EphemeralConfig {
    /// Non-positive or unrepresentable bounds keep the defaults
    fn from(settings: &MemorySettings) -> Self {
        let defaults = Self::default();
        let max_age = Some(settings.max_age_minutes)
            .filter(|&m| m > 0)
            .and_then(Duration::try_minutes)
            .unwrap_or(defaults.max_age);
        let max_turns = match settings.max_turns {
            0 => defaults.max_turns,
            n => n,
        };
        Self { max_turns, max_age }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    role: String,
    content: String,
    timestamp: DateTime<Utc>,
}

type SessionLog = Arc<Mutex<Vec<Entry>>>;

/// Time- and turn-bounded session memory
pub struct EphemeralStore {
    config: EphemeralConfig,
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<String, SessionLog>>,
}

impl EphemeralStore {
    pub fn new(config: EphemeralConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> EphemeralConfig {
        self.config
    }

    /// Number of sessions currently holding a log
    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    fn existing_log(&self, session: &str) -> Result<Option<SessionLog>> {
        let sessions = self.sessions.read().map_err(MemoryError::lock)?;
        Ok(sessions.get(session).cloned())
    }

    fn append(&self, log: &SessionLog, role: &str, content: &str) -> Result<usize> {
        let mut entries = log.lock().map_err(MemoryError::lock)?;
        let now = self.clock.now();
        entries.push(Entry {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: now,
        });
        Ok(self.trim(&mut entries, now))
    }

    /// Apply age then turn bounds, returning how many entries were dropped
    fn trim(&self, entries: &mut Vec<Entry>, now: DateTime<Utc>) -> usize {
        let before = entries.len();
        let max_age = self.config.max_age;
        entries.retain(|e| now - e.timestamp <= max_age);

        if entries.len() > self.config.max_turns {
            let excess = entries.len() - self.config.max_turns;
            entries.drain(..excess);
        }
        before - entries.len()
    }
}

impl MemoryModule for EphemeralStore {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()> {
        // The map guard is held through the push so `clear` cannot detach
        // the log in between
        let existing = {
            let sessions = self.sessions.read().map_err(MemoryError::lock)?;
            match sessions.get(session) {
                Some(log) => Some(self.append(log, role, content)?),
                None => None,
            }
        };
        let evicted = match existing {
            Some(evicted) => evicted,
            None => {
                let mut sessions = self.sessions.write().map_err(MemoryError::lock)?;
                let log = sessions.entry(session.to_string()).or_default();
                self.append(log, role, content)?
            }
        };

        tracing::debug!(
            "stm_eth: added {} message to '{}' ({}), {} evicted",
            role,
            session,
            preview(content),
            evicted
        );
        Ok(())
    }

    fn get_messages(&self, session: &str) -> Result<Vec<ChatMessage>> {
        let Some(log) = self.existing_log(session)? else {
            return Ok(Vec::new());
        };
        let mut entries = log.lock().map_err(MemoryError::lock)?;
        self.trim(&mut entries, self.clock.now());

        Ok(entries
            .iter()
            .map(|e| ChatMessage::new(e.role.clone(), e.content.clone()))
            .collect())
    }

    fn clear(&self, session: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(MemoryError::lock)?;
        if sessions.remove(session).is_some() {
            tracing::debug!("stm_eth: cleared session '{}'", session);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::clock::ManualClock;

    fn store(max_turns: usize, max_age_minutes: i64) -> (EphemeralStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = EphemeralConfig {
            max_turns,
            max_age: Duration::minutes(max_age_minutes),
        };
        (EphemeralStore::new(config, clock.clone()), clock)
    }

    fn contents(store: &EphemeralStore, session: &str) -> Vec<String> {
        store
            .get_messages(session)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    #[test]
    fn test_preserves_insertion_order() {
        let (store, _clock) = store(10, 15);
        store.add_message("user", "one", "s").unwrap();
        store.add_message("assistant", "two", "s").unwrap();
        store.add_message("user", "three", "s").unwrap();

        assert_eq!(contents(&store, "s"), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_turn_bound_keeps_most_recent() {
        let (store, _clock) = store(3, 15);
        for content in ["m1", "m2", "m3", "m4"] {
            store.add_message("user", content, "s").unwrap();
        }

        assert_eq!(contents(&store, "s"), vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn test_age_bound_evicts_on_read() {
        let (store, clock) = store(10, 15);
        store.add_message("user", "old", "s").unwrap();

        clock.advance(Duration::minutes(15) + Duration::seconds(1));
        assert!(store.get_messages("s").unwrap().is_empty());
    }

    #[test]
    fn test_age_boundary_is_inclusive() {
        let (store, clock) = store(10, 15);
        store.add_message("user", "edge", "s").unwrap();

        clock.advance(Duration::minutes(15));
        assert_eq!(contents(&store, "s"), vec!["edge"]);
    }

    #[test]
    fn test_age_eviction_on_write() {
        let (store, clock) = store(10, 15);
        store.add_message("user", "old", "s").unwrap();
        clock.advance(Duration::minutes(10));
        store.add_message("user", "mid", "s").unwrap();
        clock.advance(Duration::minutes(6));
        store.add_message("user", "new", "s").unwrap();

        assert_eq!(contents(&store, "s"), vec!["mid", "new"]);
    }

    #[test]
    fn test_clear_is_scoped_to_session() {
        let (store, _clock) = store(10, 15);
        store.add_message("user", "a1", "a").unwrap();
        store.add_message("user", "b1", "b").unwrap();

        store.clear("a").unwrap();
        assert!(store.get_messages("a").unwrap().is_empty());
        assert_eq!(contents(&store, "b"), vec!["b1"]);

        // Idempotent, including for sessions never seen
        store.clear("a").unwrap();
        store.clear("never-seen").unwrap();

        // Next write recreates the session from empty
        store.add_message("user", "a2", "a").unwrap();
        assert_eq!(contents(&store, "a"), vec!["a2"]);
    }

    #[test]
    fn test_unknown_session_is_empty() {
        let (store, _clock) = store(10, 15);
        assert!(store.get_messages("nobody").unwrap().is_empty());
        assert_eq!(store.get_context_string("nobody").unwrap(), "");
        // Reads do not create sessions
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn test_context_string() {
        let (store, _clock) = store(10, 15);
        store.add_message("user", "What is Rust?", "s").unwrap();
        store
            .add_message("assistant", "A systems language.", "s")
            .unwrap();

        assert_eq!(
            store.get_context_string("s").unwrap(),
            "user: What is Rust?\nassistant: A systems language."
        );
    }

    #[test]
    fn test_clear_races_with_writers() {
        let (store, _clock) = store(1000, 15);
        let store = Arc::new(store);

        let writers: Vec<_> = (0..4)
            .map(|n| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        store.add_message("user", &format!("{}-{}", n, i), "shared").unwrap();
                        store.add_message("user", &format!("{}-{}", n, i), "kept").unwrap();
                    }
                })
            })
            .collect();
        let clearer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    store.clear("shared").unwrap();
                }
            })
        };
        for handle in writers {
            handle.join().unwrap();
        }
        clearer.join().unwrap();

        assert_eq!(store.get_messages("kept").unwrap().len(), 800);

        // A write after the last clear is always visible
        store.add_message("user", "after", "shared").unwrap();
        assert_eq!(contents(&store, "shared").last().map(String::as_str), Some("after"));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = MemorySettings {
            max_turns: 4,
            max_age_minutes: 2,
            ..Default::default()
        };
        let config = EphemeralConfig::from(&settings);
        assert_eq!(config.max_turns, 4);
        assert_eq!(config.max_age, Duration::minutes(2));
    }

    #[test]
    fn test_config_from_unusable_settings_keeps_defaults() {
        for (max_turns, max_age_minutes) in [(0, -5), (0, 0), (0, i64::MAX)] {
            let settings = MemorySettings {
                max_turns,
                max_age_minutes,
                ..Default::default()
            };
            assert_eq!(EphemeralConfig::from(&settings), EphemeralConfig::default());
        }
    }
}
