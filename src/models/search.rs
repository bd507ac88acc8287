//! Search-related models for queries and results.

use serde::{Deserialize, Serialize};

use super::document::{DocumentId, Passage, citation_label};

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// A ranked index hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub passage: Passage,
    /// `1 / (1 + squared L2 distance)`; higher is better.
    pub score: f32,
    /// 1-based position in the result list.
    pub rank: u32,
}

/// A passage returned by the retrieval pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub content: String,
    pub source: DocumentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub chunk_id: String,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn citation(&self) -> String {
        citation_label(&self.source, self.page, self.section.as_deref())
    }
}

impl From<SearchResult> for RetrievedPassage {
    fn from(result: SearchResult) -> Self {
        let Passage {
            chunk_id,
            source,
            page,
            section,
            content,
            ..
        } = result.passage;
        Self {
            content,
            source,
            page,
            section,
            chunk_id,
            score: result.score,
        }
    }
}

/// Outcome of a full retrieval request.
///
/// The three cases are reported separately so callers never confuse
/// "empty corpus" with "nothing matched".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Retrieval {
    /// No index has been built or loaded.
    NothingIndexed,
    /// The corpus was searched but nothing usable was found.
    NoRelevantPassages,
    /// Context ready for the language model.
    Context {
        context: String,
        results: Vec<RetrievedPassage>,
    },
}

impl Retrieval {
    /// Text shown to end users for this outcome.
    pub fn user_message(&self) -> &str {
        match self {
            Retrieval::NothingIndexed => "Nothing has been indexed yet.",
            Retrieval::NoRelevantPassages => "No relevant information found.",
            Retrieval::Context { context, .. } => context,
        }
    }
}

/// Summary of the active index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub built: bool,
    pub passages: u64,
    pub documents: u64,
    pub dimension: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_retrieved_passage_from_result() {
        let passage = Passage::new("hours.txt", Some(1), None, 0, "Open at 8am.".to_string());
        let chunk_id = passage.chunk_id.clone();
        let retrieved = RetrievedPassage::from(SearchResult {
            passage,
            score: 0.75,
            rank: 1,
        });

        assert_eq!(retrieved.content, "Open at 8am.");
        assert_eq!(retrieved.source, "hours.txt");
        assert_eq!(retrieved.page, Some(1));
        assert_eq!(retrieved.chunk_id, chunk_id);
        assert_eq!(retrieved.score, 0.75);
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let empty = Retrieval::NothingIndexed.user_message().to_string();
        let none = Retrieval::NoRelevantPassages.user_message().to_string();
        assert_ne!(empty, none);
    }
}
