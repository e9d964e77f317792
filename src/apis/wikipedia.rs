use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::http::{check_status, ClientOptions, API_USER_AGENT};
use super::normalize::{finish, Fields};
use super::pacing::Pacing;
use super::{Backend, Citations, LogicalSource, RawResult, Record, SourceError};

const LABEL: &str = "Wikipedia";

/// A resolved article summary.
#[derive(Debug, Clone)]
pub struct WikiPage {
    pub title: String,
    pub extract: String,
    pub url: String,
}

/// Encyclopedia backend: MediaWiki title search followed by one REST
/// summary lookup per title.
pub struct WikipediaBackend {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
}

impl WikipediaBackend {
    pub fn new(opts: &ClientOptions, language: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: opts.build(API_USER_AGENT)?,
            base_url: format!("https://{}.wikipedia.org", language),
            pacing: Pacing::new(Duration::ZERO, Duration::from_millis(300)),
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

    fn api_url(&self) -> String {
        format!("{}/w/api.php", self.base_url)
    }

    async fn search_titles(&self, query: &str, limit: u32) -> Result<Vec<String>, SourceError> {
        let limit = limit.to_string();
        let resp = self
            .client
            .get(self.api_url())
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("srsearch", query),
                ("srlimit", limit.as_str()),
                ("srprop", ""),
                ("format", "json"),
            ])
            .send()
            .await?;
        let body: SearchResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Wikipedia search payload: {}", e)))?;
        Ok(body
            .query
            .map(|q| q.search.into_iter().map(|hit| hit.title).collect())
            .unwrap_or_default())
    }

    /// REST summary for a title; `None` when the page does not exist.
    async fn summary(&self, title: &str) -> Result<Option<Summary>, SourceError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| SourceError::Parse(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SourceError::Parse(format!("bad base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "rest_v1", "page", "summary", &title.replace(' ', "_")]);

        let resp = self.client.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let summary = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Wikipedia summary payload: {}", e)))?;
        Ok(Some(summary))
    }

    /// First article linked from a disambiguation page.
    async fn first_alternative(&self, title: &str) -> Result<Option<String>, SourceError> {
        let resp = self
            .client
            .get(self.api_url())
            .query(&[
                ("action", "query"),
                ("prop", "links"),
                ("titles", title),
                ("plnamespace", "0"),
                ("pllimit", "1"),
                ("redirects", "1"),
                ("format", "json"),
            ])
            .send()
            .await?;
        let body: LinksResponse = check_status(resp)?
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Wikipedia links payload: {}", e)))?;
        Ok(body
            .query
            .and_then(|q| q.pages.into_values().find_map(|p| p.links?.into_iter().next()))
            .map(|link| link.title))
    }

    /// Resolve one search title to a page. Disambiguation pages are
    /// replaced by their first alternative, re-queried once.
    async fn resolve(&self, title: &str) -> Result<Option<WikiPage>, SourceError> {
        let Some(summary) = self.summary(title).await? else {
            return Ok(None);
        };
        if !summary.is_disambiguation() {
            return Ok(summary.into_page());
        }

        let Some(alternative) = self.first_alternative(title).await? else {
            tracing::debug!(%title, "disambiguation page without alternatives");
            return Ok(None);
        };
        tracing::debug!(%title, %alternative, "resolving disambiguation");
        match self.summary(&alternative).await? {
            Some(s) if !s.is_disambiguation() => Ok(s.into_page()),
            _ => Ok(None),
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Deserialize)]
struct LinksResponse {
    query: Option<LinksQuery>,
}

#[derive(Deserialize)]
struct LinksQuery {
    pages: HashMap<String, LinksPage>,
}

#[derive(Deserialize)]
struct LinksPage {
    links: Option<Vec<PageLink>>,
}

#[derive(Deserialize)]
struct PageLink {
    title: String,
}

#[derive(Deserialize)]
struct Summary {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    extract: Option<String>,
    content_urls: Option<ContentUrls>,
}

#[derive(Deserialize)]
struct ContentUrls {
    desktop: Option<PageUrls>,
}

#[derive(Deserialize)]
struct PageUrls {
    page: Option<String>,
}

impl Summary {
    fn is_disambiguation(&self) -> bool {
        self.kind.as_deref() == Some("disambiguation")
    }

    fn into_page(self) -> Option<WikiPage> {
        Some(WikiPage {
            title: self.title?,
            extract: self.extract.unwrap_or_default(),
            url: self.content_urls?.desktop?.page?,
        })
    }
}

#[async_trait]
impl Backend for WikipediaBackend {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn pacing(&self) -> Option<&Pacing> {
        Some(&self.pacing)
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        let titles = self.search_titles(query, limit).await?;
        let mut pages = Vec::new();
        for title in titles.iter().take(limit as usize) {
            match self.resolve(title).await {
                Ok(Some(page)) => pages.push(RawResult::Wikipedia(page)),
                Ok(None) => {}
                Err(e) => tracing::warn!(%title, error = %e, "skipping Wikipedia page"),
            }
        }
        Ok(pages)
    }
}

pub(crate) fn normalize(page: WikiPage, source: LogicalSource) -> Option<Record> {
    let fields = Fields {
        title: Some(page.title),
        author_placeholder: "Wikipedia Contributors",
        abstract_text: Some(page.extract),
        citations: Citations::NotAvailable,
        link: Some(page.url),
        venue: Some(LABEL.to_string()),
        publisher: Some("Wikimedia Foundation".to_string()),
        ..Fields::new(LABEL, "https://en.wikipedia.org")
    };
    finish(fields, source)
}
