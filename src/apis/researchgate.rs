//! Direct ResearchGate publication search. Last resort of the open-access
//! chain: the site is behind aggressive bot protection and usually answers
//! 403, but when it does serve the page the publication anchors are usable.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};

use super::http::{browser_user_agent, check_status, ClientOptions};
use super::normalize::clean_text;
use super::pacing::Pacing;
use super::web_search::WebHit;
use super::{Backend, RawResult, SourceError};

const BASE_URL: &str = "https://www.researchgate.net";
const LABEL: &str = "ResearchGate";
/// Anchor texts shorter than this are navigation, not titles.
const MIN_TITLE_LEN: usize = 10;

pub struct ResearchGateBackend {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
}

impl ResearchGateBackend {
    pub fn new(opts: &ClientOptions) -> Result<Self, SourceError> {
        Ok(Self {
            client: opts.build(browser_user_agent())?,
            base_url: BASE_URL.to_string(),
            pacing: Pacing::new(Duration::ZERO, Duration::from_secs(1)),
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
}

#[async_trait]
impl Backend for ResearchGateBackend {
    fn name(&self) -> &str {
        "researchgate"
    }

    fn pacing(&self) -> Option<&Pacing> {
        Some(&self.pacing)
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        let resp = self
            .client
            .get(format!("{}/search/publication", self.base_url))
            .query(&[("q", query)])
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?;
        let html = check_status(resp)?.text().await?;
        let blurb = format!(
            "Research publication related to {}. Click to view full details on ResearchGate.",
            query
        );
        Ok(parse_publication_links(&html, limit as usize)?
            .into_iter()
            .map(|(title, href)| {
                RawResult::Web(WebHit {
                    title,
                    href,
                    snippet: blurb.clone(),
                    origin: self.base_url.clone(),
                    label: LABEL.to_string(),
                })
            })
            .collect())
    }
}

/// Collect `(title, href)` pairs from publication anchors. Hrefs are left
/// as found; relative ones are resolved against the origin at normalization.
fn parse_publication_links(html: &str, limit: usize) -> Result<Vec<(String, String)>, SourceError> {
    let document = Html::parse_document(html);
    let link_sel = Selector::parse("a[href*='/publication/']")
        .map_err(|e| SourceError::Parse(format!("invalid selector: {:?}", e)))?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for anchor in document.select(&link_sel) {
        let title = clean_text(&anchor.text().collect::<String>());
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if title.chars().count() < MIN_TITLE_LEN || !seen.insert(title.clone()) {
            continue;
        }
        links.push((title, href.to_string()));
        if links.len() >= limit {
            break;
        }
    }
    Ok(links)
}
