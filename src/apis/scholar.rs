use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};

use super::http::{browser_user_agent, check_status, ClientOptions};
use super::normalize::{clean_text, extract_year, finish, Fields};
use super::pacing::Pacing;
use super::{Backend, Citations, LogicalSource, RawResult, Record, SourceError};

const BASE_URL: &str = "https://scholar.google.com";
const LABEL: &str = "Google Scholar";
/// Scholar caps a result page at 20 hits.
const MAX_PAGE: u32 = 20;

/// One organic result from a Scholar result page.
#[derive(Debug, Clone)]
pub struct ScholarHit {
    pub title: String,
    pub link: Option<String>,
    /// The green "authors - venue, year - host" line.
    pub byline: String,
    pub snippet: String,
    pub cited_by: Option<u32>,
}

/// Citation index backend. Scholar has no public API; this scrapes the
/// result page and treats CAPTCHA interstitials as rate limiting.
pub struct ScholarBackend {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
}

impl ScholarBackend {
    pub fn new(opts: &ClientOptions) -> Result<Self, SourceError> {
        Ok(Self {
            client: opts.build(browser_user_agent())?,
            base_url: BASE_URL.to_string(),
            pacing: Pacing::new(Duration::from_secs(1), Duration::from_millis(500)),
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
impl Backend for ScholarBackend {
    fn name(&self) -> &str {
        "google_scholar"
    }

    fn pacing(&self) -> Option<&Pacing> {
        Some(&self.pacing)
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        let num = limit.min(MAX_PAGE).to_string();
        let resp = self
            .client
            .get(format!("{}/scholar", self.base_url))
            .query(&[("q", query), ("hl", "en"), ("num", num.as_str())])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;
        let resp = check_status(resp)?;
        if resp.url().path().starts_with("/sorry") {
            return Err(SourceError::RateLimited("redirected to CAPTCHA".into()));
        }
        let html = resp.text().await?;
        if is_captcha(&html) {
            return Err(SourceError::RateLimited("CAPTCHA page".into()));
        }
        Ok(parse_scholar_html(&html, limit as usize)?
            .into_iter()
            .map(RawResult::Scholar)
            .collect())
    }
}

fn is_captcha(html: &str) -> bool {
    html.contains("gs_captcha") || html.contains("unusual traffic from your computer")
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Parse(format!("invalid selector {}: {:?}", css, e)))
}

fn text_of(el: ElementRef<'_>) -> String {
    clean_text(&el.text().collect::<String>())
}

pub(crate) fn parse_scholar_html(html: &str, limit: usize) -> Result<Vec<ScholarHit>, SourceError> {
    let document = Html::parse_document(html);
    let result_sel = selector(".gs_r.gs_or.gs_scl")?;
    let title_sel = selector(".gs_rt")?;
    let link_sel = selector(".gs_rt a")?;
    let meta_sel = selector(".gs_a")?;
    let snippet_sel = selector(".gs_rs")?;
    let footer_link_sel = selector(".gs_fl a")?;

    let mut hits = Vec::new();
    for element in document.select(&result_sel).take(limit) {
        let anchor = element.select(&link_sel).next();
        // Prefer the anchor text; the heading also carries "[PDF]"-style tags.
        let title = anchor
            .map(text_of)
            .or_else(|| element.select(&title_sel).next().map(text_of))
            .unwrap_or_default();
        let link = anchor
            .and_then(|a| a.value().attr("href"))
            .map(|s| s.to_string());
        let byline = element.select(&meta_sel).next().map(text_of).unwrap_or_default();
        let snippet = element.select(&snippet_sel).next().map(text_of).unwrap_or_default();
        let cited_by = element
            .select(&footer_link_sel)
            .map(text_of)
            .find_map(|t| t.strip_prefix("Cited by ").and_then(|n| n.trim().parse().ok()));

        hits.push(ScholarHit {
            title,
            link,
            byline,
            snippet,
            cited_by,
        });
    }
    Ok(hits)
}

/// Split "A Author, B Author - Venue, 2019 - host.com" into its parts.
fn split_byline(byline: &str) -> (Vec<String>, Option<String>, Option<String>) {
    let mut parts = byline.split(" - ").map(str::trim);
    let authors = parts
        .next()
        .map(|a| {
            a.split(',')
                .map(|s| s.trim().trim_end_matches('-').trim().to_string())
                .collect()
        })
        .unwrap_or_default();
    let venue = parts.next().and_then(|v| {
        let name = match extract_year(v) {
            Some(year) => v.replace(&year, ""),
            None => v.to_string(),
        };
        let name = name.trim().trim_end_matches(',').trim().to_string();
        (!name.is_empty()).then_some(name)
    });
    let publisher = parts.next().map(str::to_string).filter(|p| !p.is_empty());
    (authors, venue, publisher)
}

pub(crate) fn normalize(hit: ScholarHit, source: LogicalSource) -> Option<Record> {
    let (authors, venue, publisher) = split_byline(&hit.byline);
    let fields = Fields {
        title: Some(hit.title),
        authors,
        year: Some(hit.byline),
        abstract_text: Some(hit.snippet),
        citations: Citations::from(hit.cited_by),
        link: hit.link,
        venue,
        publisher,
        ..Fields::new(LABEL, BASE_URL)
    };
    finish(fields, source)
}
