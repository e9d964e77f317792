use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::http::{check_status, ClientOptions, API_USER_AGENT};
use super::normalize::{finish, Fields};
use super::pacing::Pacing;
use super::{Backend, Citations, LogicalSource, RawResult, Record, SourceError};

const BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const ORIGIN: &str = "https://www.semanticscholar.org";
const LABEL: &str = "Semantic Scholar";
const FIELDS: &str = "title,authors,year,abstract,citationCount,url,venue,openAccessPdf";

/// Citation-graph API. Unauthenticated callers share a small global quota,
/// so HTTP 429 is routine and reported as a rate limit.
pub struct SemanticScholarBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    pacing: Pacing,
}

impl SemanticScholarBackend {
    pub fn new(opts: &ClientOptions, api_key: Option<String>) -> Result<Self, SourceError> {
        Ok(Self {
            client: opts.build(API_USER_AGENT)?,
            base_url: BASE_URL.to_string(),
            api_key,
            pacing: Pacing::new(Duration::from_secs(1), Duration::ZERO),
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    fn add_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("x-api-key", key),
            None => req,
        }
    }
}

/// Items stay untyped until normalization so one bad item cannot sink the batch.
#[derive(Deserialize)]
struct S2SearchResponse {
    data: Option<Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    title: Option<String>,
    authors: Option<Vec<S2Author>>,
    year: Option<u32>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    citation_count: Option<u32>,
    url: Option<String>,
    venue: Option<String>,
    open_access_pdf: Option<S2Pdf>,
}

#[derive(Deserialize)]
struct S2Author {
    name: Option<String>,
}

#[derive(Deserialize)]
struct S2Pdf {
    url: Option<String>,
}

#[async_trait]
impl Backend for SemanticScholarBackend {
    fn name(&self) -> &str {
        "semantic_scholar"
    }

    fn pacing(&self) -> Option<&Pacing> {
        Some(&self.pacing)
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        let limit = limit.min(100).to_string();
        let resp = self
            .add_auth(self.client.get(format!("{}/paper/search", self.base_url)).query(&[
                ("query", query),
                ("limit", limit.as_str()),
                ("fields", FIELDS),
            ]))
            .send()
            .await?;
        let body: S2SearchResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Semantic Scholar payload: {}", e)))?;
        Ok(body
            .data
            .unwrap_or_default()
            .into_iter()
            .map(RawResult::SemanticScholar)
            .collect())
    }
}

pub(crate) fn normalize(value: serde_json::Value, source: LogicalSource) -> Option<Record> {
    let paper: S2Paper = match serde_json::from_value(value) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed Semantic Scholar item");
            return None;
        }
    };
    let link = paper
        .url
        .filter(|u| !u.trim().is_empty())
        .or_else(|| paper.open_access_pdf.and_then(|pdf| pdf.url));
    let fields = Fields {
        title: paper.title,
        authors: paper
            .authors
            .unwrap_or_default()
            .into_iter()
            .filter_map(|a| a.name)
            .collect(),
        year: paper.year.map(|y| y.to_string()),
        abstract_text: paper.abstract_text,
        citations: Citations::from(paper.citation_count),
        link,
        venue: paper.venue,
        publisher: Some(LABEL.to_string()),
        ..Fields::new(LABEL, ORIGIN)
    };
    finish(fields, source)
}
