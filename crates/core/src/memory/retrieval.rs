//! # Retrieval Hand-off
//!
//! Downstream collaborator that receives extracted topics, plus a stub
//! backend (`rag_dummy`) that satisfies the memory contract without
//! storing anything.

use super::contract::{preview, ChatMessage, MemoryModule};
use crate::error::Result;

pub const MODULE_ID: &str = "rag_dummy";

/// Declared metadata block for discovery
pub fn module_config() -> serde_json::Value {
    serde_json::json!({
        "name": "RAG Dummy Memory",
        "description": "Retrieval stub for testing; accepts messages and stores nothing.",
        "version": "1.0",
        "capabilities": ["add_message", "get_messages", "clear", "get_context_string"]
    })
}

/// Receives topics and synonyms produced by the topic store.
///
/// Called fire-and-forget: an error is logged by the caller and never
/// affects what was stored.
pub trait TopicSink: Send + Sync {
    fn receive_topics(&self, topics: &[String]) -> anyhow::Result<()>;
}

/// Default sink: logs what a retrieval engine would be handed
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingTopicSink;

impl TopicSink for LoggingTopicSink {
    fn receive_topics(&self, topics: &[String]) -> anyhow::Result<()> {
        tracing::info!("Retrieval sink received {} topics: {:?}", topics.len(), topics);
        Ok(())
    }
}

/// Memory backend that accepts writes and returns nothing
#[derive(Debug, Default)]
pub struct RetrievalStub;

impl RetrievalStub {
    pub fn new() -> Self {
        tracing::debug!("rag_dummy: module initialized");
        Self
    }
}

impl MemoryModule for RetrievalStub {
    fn id(&self) -> &str {
        MODULE_ID
    }

    fn add_message(&self, role: &str, content: &str, session: &str) -> Result<()> {
        tracing::debug!(
            "rag_dummy: ignoring {} message for '{}': {}",
            role,
            session,
            preview(content)
        );
        Ok(())
    }

    fn get_messages(&self, _session: &str) -> Result<Vec<ChatMessage>> {
        Ok(Vec::new())
    }

    fn clear(&self, _session: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_stores_nothing() {
        let stub = RetrievalStub::new();
        stub.add_message("user", "Hello, this is a test message.", "s")
            .unwrap();

        assert!(stub.get_messages("s").unwrap().is_empty());
        assert_eq!(stub.get_context_string("s").unwrap(), "");
        stub.clear("s").unwrap();
    }

    #[test]
    fn test_logging_sink_accepts_topics() {
        let topics = vec!["Memory Architecture".to_string(), "recall".to_string()];
        assert!(LoggingTopicSink.receive_topics(&topics).is_ok());
    }
}
