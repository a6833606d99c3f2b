//! Pluggable pieces of the topic pipeline: candidate extraction, synonym
//! expansion and embedding.
//!
//! The keyword implementations are placeholders with no accuracy contract.
//! They exist so the pipeline (extract -> expand -> dedup-upsert) is
//! exercised end to end; swap them through [`super::TopicStore::with_extractor`]
//! and [`super::TopicStore::with_synonyms`].

use regex::Regex;

/// Most topics taken from a single message by [`KeywordExtractor`]
pub const MAX_TOPICS_PER_MESSAGE: usize = 3;

const TOPIC_RULES: &[(&str, &[&str])] = &[
    ("memory", &["Memory Architecture"]),
    ("topic", &["Topic Extraction"]),
    ("database|sql", &["Database Management"]),
    ("module", &["Module Integration"]),
    ("alembic", &["Alembic Migrations"]),
    ("llm|model", &["Language Models"]),
    ("async", &["Asynchronous Operations"]),
];

const SYNONYM_RULES: &[(&str, &[&str])] = &[
    ("memory", &["recall", "storage"]),
    ("topic", &["subject", "theme"]),
    ("database", &["db", "data store"]),
];

/// Turns message content into candidate topic strings
pub trait TopicExtractor: Send + Sync {
    fn extract(&self, content: &str) -> Vec<String>;
}

/// Expands a topic into related terms
pub trait SynonymGenerator: Send + Sync {
    fn synonyms(&self, topic: &str) -> Vec<String>;
}

/// Produces an opaque embedding for a topic
pub trait TopicEmbedder: Send + Sync {
    fn embed(&self, topic: &str) -> anyhow::Result<Vec<u8>>;
}

/// Trim and collapse internal whitespace
pub fn normalize_topic(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A case-insensitive pattern mapped to an output value
#[derive(Debug, Clone)]
pub struct KeywordRule {
    pattern: Regex,
    output: Vec<String>,
}

impl KeywordRule {
    pub fn new(pattern: &str, output: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("(?i){}", pattern))?,
            output: output.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

fn build_rules(table: &[(&str, &[&str])]) -> Vec<KeywordRule> {
    table
        .iter()
        .filter_map(|(pattern, output)| match KeywordRule::new(pattern, output) {
            Ok(rule) => Some(rule),
            Err(e) => {
                tracing::warn!("Skipping keyword rule '{}': {}", pattern, e);
                None
            }
        })
        .collect()
}

// ============================================================================
// Keyword extractor
// ============================================================================

/// Rule-ordered keyword matcher, capped per message
#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    rules: Vec<KeywordRule>,
    limit: usize,
}

impl KeywordExtractor {
    pub fn new(rules: Vec<KeywordRule>, limit: usize) -> Self {
        Self { rules, limit }
    }
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new(build_rules(TOPIC_RULES), MAX_TOPICS_PER_MESSAGE)
    }
}

impl TopicExtractor for KeywordExtractor {
    fn extract(&self, content: &str) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.matches(content))
            .flat_map(|rule| rule.output.iter().cloned())
            .take(self.limit)
            .collect()
    }
}

// ============================================================================
// Keyword synonyms
// ============================================================================

/// Adds fixed related terms; the topic itself is always included
#[derive(Debug, Clone)]
pub struct KeywordSynonyms {
    rules: Vec<KeywordRule>,
}

impl KeywordSynonyms {
    pub fn new(rules: Vec<KeywordRule>) -> Self {
        Self { rules }
    }
}

impl Default for KeywordSynonyms {
    fn default() -> Self {
        Self::new(build_rules(SYNONYM_RULES))
    }
}

impl SynonymGenerator for KeywordSynonyms {
    fn synonyms(&self, topic: &str) -> Vec<String> {
        let mut out = vec![topic.to_string()];
        for rule in self.rules.iter().filter(|rule| rule.matches(topic)) {
            for term in &rule.output {
                if !out.contains(term) {
                    out.push(term.clone());
                }
            }
        }
        out
    }
}

// ============================================================================
// Placeholder embedder
// ============================================================================

/// Deterministic stand-in embedding derived from the topic text
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaceholderEmbedder;

impl TopicEmbedder for PlaceholderEmbedder {
    fn embed(&self, topic: &str) -> anyhow::Result<Vec<u8>> {
        Ok(format!("placeholder_embedding:{}", topic.to_lowercase()).into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_in_rule_order() {
        let extractor = KeywordExtractor::default();
        let topics = extractor.extract("How does the SQL layer store Memory?");
        assert_eq!(topics, vec!["Memory Architecture", "Database Management"]);
    }

    #[test]
    fn test_extraction_is_capped() {
        let extractor = KeywordExtractor::default();
        let topics = extractor
            .extract("memory topics in the database, one module per llm with async calls");
        assert_eq!(topics.len(), MAX_TOPICS_PER_MESSAGE);
        assert_eq!(
            topics,
            vec!["Memory Architecture", "Topic Extraction", "Database Management"]
        );
    }

    #[test]
    fn test_migration_rule_is_alembic_only() {
        let extractor = KeywordExtractor::default();
        assert_eq!(
            extractor.extract("run the Alembic upgrade"),
            vec!["Alembic Migrations"]
        );
        assert!(extractor.extract("plan the schema migration").is_empty());
    }

    #[test]
    fn test_no_keywords_no_topics() {
        assert!(KeywordExtractor::default().extract("hello there").is_empty());
    }

    #[test]
    fn test_synonyms_include_topic() {
        let generator = KeywordSynonyms::default();
        assert_eq!(
            generator.synonyms("Memory Architecture"),
            vec!["Memory Architecture", "recall", "storage"]
        );
        assert_eq!(
            generator.synonyms("Topic Extraction"),
            vec!["Topic Extraction", "subject", "theme"]
        );
        assert_eq!(generator.synonyms("Language Models"), vec!["Language Models"]);
    }

    #[test]
    fn test_normalize_topic() {
        assert_eq!(normalize_topic("  Memory \t  Architecture \n"), "Memory Architecture");
        assert_eq!(normalize_topic("   "), "");
    }

    #[test]
    fn test_custom_rules() {
        let rule = KeywordRule::new("rust|cargo", &["Rust Tooling"]).unwrap();
        let extractor = KeywordExtractor::new(vec![rule], 1);
        assert_eq!(extractor.extract("cargo build"), vec!["Rust Tooling"]);
        assert!(KeywordRule::new("(unclosed", &["x"]).is_err());
    }

    #[test]
    fn test_placeholder_embedding_is_deterministic() {
        let a = PlaceholderEmbedder.embed("Memory Architecture").unwrap();
        let b = PlaceholderEmbedder.embed("memory architecture").unwrap();
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
