//! # Memory Module Contract
//!
//! The capability set every memory backend implements. All operations are
//! keyed by an opaque session string and never leak state across keys.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Session used when the caller does not name one
pub const DEFAULT_SESSION: &str = "default";

/// One entry of a session's history as returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user", "assistant"/"model" or "system"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Capability interface of a memory backend
pub trait MemoryModule: Send + Sync {
    /// Registry id of the backend
    fn id(&self) -> &str;

    /// Append one message to the session (or route it through extraction)
    fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()>;

    /// Current, already-trimmed view of the session; empty for unknown sessions
    fn get_messages(&self, session: &str) -> Result<Vec<ChatMessage>>;

    /// Remove all state for the session. Idempotent.
    fn clear(&self, session: &str) -> Result<()>;

    /// Newline-joined `role: content` rendering of [`MemoryModule::get_messages`]
    fn get_context_string(&self, session: &str) -> Result<String> {
        Ok(render_context(&self.get_messages(session)?))
    }
}

/// Render messages as `role: content` lines
pub fn render_context(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Short preview of message content for log lines
pub(crate) fn preview(content: &str) -> String {
    const PREVIEW_CHARS: usize = 50;
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        let head: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_context() {
        let messages = vec![
            ChatMessage::new("user", "hello"),
            ChatMessage::new("assistant", "hi there"),
        ];
        assert_eq!(render_context(&messages), "user: hello\nassistant: hi there");
        assert_eq!(render_context(&[]), "");
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        let long = "é".repeat(60);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 53);
    }

    #[test]
    fn test_chat_message_serialization() {
        let json = serde_json::to_string(&ChatMessage::new("user", "hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
