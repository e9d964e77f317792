pub mod arxiv;
pub mod http;
pub mod normalize;
pub mod pacing;
pub mod researchgate;
pub mod scholar;
pub mod semantic_scholar;
pub mod web_search;
pub mod wikipedia;

use std::fmt;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use thiserror::Error;

use self::pacing::Pacing;

/// Placeholder for any field a backend could not supply.
pub const NOT_AVAILABLE: &str = "N/A";

/// The three conceptual origins of results, independent of how many
/// physical backends serve each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LogicalSource {
    CitationIndex,
    OpenAccessIndex,
    Encyclopedia,
}

impl LogicalSource {
    /// Concatenation order used when merging results for display.
    pub const ALL: [LogicalSource; 3] = [
        LogicalSource::CitationIndex,
        LogicalSource::OpenAccessIndex,
        LogicalSource::Encyclopedia,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LogicalSource::CitationIndex => "citation_index",
            LogicalSource::OpenAccessIndex => "open_access_index",
            LogicalSource::Encyclopedia => "encyclopedia",
        }
    }

    /// Parse a source name, accepting the backend names users tend to type.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "citation_index" | "citationindex" | "scholar" | "google_scholar" => {
                Some(LogicalSource::CitationIndex)
            }
            "open_access_index" | "openaccessindex" | "open_access" | "researchgate"
            | "arxiv" => Some(LogicalSource::OpenAccessIndex),
            "encyclopedia" | "wikipedia" => Some(LogicalSource::Encyclopedia),
            _ => None,
        }
    }
}

impl fmt::Display for LogicalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Citation count as reported by a backend. Only used for ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Citations {
    Count(u32),
    NotAvailable,
}

impl Citations {
    /// Comparison value for ranking; the sentinel ranks as zero.
    pub fn rank(&self) -> u32 {
        match self {
            Citations::Count(n) => *n,
            Citations::NotAvailable => 0,
        }
    }
}

impl From<Option<u32>> for Citations {
    fn from(count: Option<u32>) -> Self {
        count.map(Citations::Count).unwrap_or(Citations::NotAvailable)
    }
}

impl Serialize for Citations {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Citations::Count(n) => serializer.serialize_u32(*n),
            Citations::NotAvailable => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

/// The normalized, source-agnostic result unit.
///
/// Built only through [`normalize::finish`], which guarantees a non-empty
/// title, an absolute URL and an abstract of at most 500 characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub title: String,
    pub authors: Vec<String>,
    pub year: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    #[serde(rename = "citationCount")]
    pub citations: Citations,
    pub url: String,
    pub venue: String,
    pub publisher: String,
    /// Physical backend that produced the record, e.g. "arXiv".
    pub backend: String,
    pub logical_source: LogicalSource,
}

/// Backend-specific payload, before normalization.
#[derive(Debug, Clone)]
pub enum RawResult {
    Scholar(scholar::ScholarHit),
    Arxiv(arxiv::ArxivEntry),
    SemanticScholar(serde_json::Value),
    Web(web_search::WebHit),
    Wikipedia(wikipedia::WikiPage),
}

impl RawResult {
    /// Normalize into a [`Record`] tagged with `source`, or `None` if the
    /// payload cannot produce a record the user can act on.
    pub fn normalize(self, source: LogicalSource) -> Option<Record> {
        match self {
            RawResult::Scholar(hit) => scholar::normalize(hit, source),
            RawResult::Arxiv(entry) => arxiv::normalize(entry, source),
            RawResult::SemanticScholar(value) => semantic_scholar::normalize(value, source),
            RawResult::Web(hit) => web_search::normalize(hit, source),
            RawResult::Wikipedia(page) => wikipedia::normalize(page, source),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected HTTP status: {0}")]
    Status(reqwest::StatusCode),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Outcome of one backend call. Errors never escape a backend; they are
/// folded into `RateLimited` or `Failed` after being logged.
#[derive(Debug)]
pub enum Fetch {
    Hits(Vec<RawResult>),
    Empty,
    RateLimited,
    Failed,
}

impl Fetch {
    pub fn into_results(self) -> Vec<RawResult> {
        match self {
            Fetch::Hits(results) => results,
            _ => Vec::new(),
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Shared request pacing for this backend, if it talks to a rate-limited system.
    fn pacing(&self) -> Option<&Pacing> {
        None
    }

    /// Issue one outbound request and return its raw payload items.
    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError>;

    /// Total wrapper around [`Backend::try_fetch`]: paces the call, logs
    /// failures and distinguishes rate limits from everything else.
    async fn fetch(&self, query: &str, limit: u32) -> Fetch {
        if let Some(pacing) = self.pacing() {
            pacing.acquire().await;
        }
        let outcome = self.try_fetch(query, limit).await;
        if let Some(pacing) = self.pacing() {
            pacing.settle().await;
        }

        match outcome {
            Ok(results) if results.is_empty() => {
                tracing::debug!(backend = self.name(), "no results");
                Fetch::Empty
            }
            Ok(results) => {
                tracing::debug!(backend = self.name(), count = results.len(), "results fetched");
                Fetch::Hits(results)
            }
            Err(SourceError::RateLimited(reason)) => {
                tracing::warn!(backend = self.name(), %reason, "rate limited");
                Fetch::RateLimited
            }
            Err(e) => {
                tracing::error!(backend = self.name(), error = %e, "backend failed");
                Fetch::Failed
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_citations_serialize_as_int_or_sentinel() {
        assert_eq!(serde_json::to_string(&Citations::Count(42)).unwrap(), "42");
        assert_eq!(serde_json::to_string(&Citations::NotAvailable).unwrap(), "\"N/A\"");
    }

    #[test]
    fn test_sentinel_ranks_as_zero() {
        assert_eq!(Citations::NotAvailable.rank(), 0);
        assert_eq!(Citations::Count(0).rank(), 0);
        assert_eq!(Citations::from(Some(7)).rank(), 7);
        assert_eq!(Citations::from(None), Citations::NotAvailable);
    }

    #[test]
    fn test_record_wire_shape() {
        let record = testing::scholar_hit("Deep Nets", Some(3))
            .normalize(LogicalSource::CitationIndex)
            .unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["citationCount"], 3);
        assert_eq!(json["logicalSource"], "citationIndex");
        assert!(json.get("abstract").is_some());
        assert!(json.get("abstract_text").is_none());
    }

    #[test]
    fn test_logical_source_names() {
        for source in LogicalSource::ALL {
            assert_eq!(LogicalSource::from_name(source.name()), Some(source));
        }
        assert_eq!(LogicalSource::from_name("Wikipedia"), Some(LogicalSource::Encyclopedia));
        assert_eq!(LogicalSource::from_name("researchgate"), Some(LogicalSource::OpenAccessIndex));
        assert_eq!(LogicalSource::from_name("youtube"), None);
    }

    #[tokio::test]
    async fn test_fetch_folds_errors() {
        use testing::{Behavior, MockBackend};

        let limited = MockBackend::new("limited", Behavior::RateLimit);
        assert!(matches!(limited.fetch("q", 5).await, Fetch::RateLimited));

        let broken = MockBackend::new("broken", Behavior::Fail);
        assert!(matches!(broken.fetch("q", 5).await, Fetch::Failed));

        let empty = MockBackend::new("empty", Behavior::Return(vec![]));
        assert!(matches!(empty.fetch("q", 5).await, Fetch::Empty));

        let found = MockBackend::new("found", Behavior::Return(vec![testing::web_hit("A paper title")]));
        assert_eq!(found.fetch("q", 5).await.into_results().len(), 1);
    }
}
