//! # Topic Memory
//!
//! Extraction-based backend (`utm_anyai`): messages become deduplicated
//! topic records instead of verbatim history.
//!
//! ```text
//! message → TopicExtractor → SynonymGenerator → TopicStore (upsert) → TopicSink
//! ```

pub mod extractor;
pub mod store;

pub use extractor::{
    normalize_topic, KeywordExtractor, KeywordRule, KeywordSynonyms, PlaceholderEmbedder,
    SynonymGenerator, TopicEmbedder, TopicExtractor, MAX_TOPICS_PER_MESSAGE,
};
pub use store::{IncomingMessage, IngestReport, TopicRecord, TopicStore};
