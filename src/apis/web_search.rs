//! General web search restricted to one site.
//!
//! Uses DuckDuckGo's HTML-only endpoint with a `site:` filter and keeps
//! only hits whose host belongs to the target domain. The most fragile
//! backend, so it sits last in its chain.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::http::{browser_user_agent, check_status, ClientOptions};
use super::normalize::{clean_text, extract_year, finish, Fields};
use super::pacing::Pacing;
use super::{Backend, Citations, LogicalSource, RawResult, Record, SourceError};

const BASE_URL: &str = "https://html.duckduckgo.com";

/// A title/link/snippet triple scraped from an HTML result list.
#[derive(Debug, Clone)]
pub struct WebHit {
    pub title: String,
    pub href: String,
    pub snippet: String,
    /// Origin used to resolve a relative `href`.
    pub origin: String,
    /// Display name of the site, e.g. "ResearchGate".
    pub label: String,
}

pub struct WebSearchBackend {
    client: reqwest::Client,
    base_url: String,
    domain: String,
    label: String,
    pacing: Pacing,
}

impl WebSearchBackend {
    pub fn new(opts: &ClientOptions, domain: &str, label: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: opts.build(browser_user_agent())?,
            base_url: BASE_URL.to_string(),
            domain: domain.to_string(),
            label: label.to_string(),
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

    fn origin(&self) -> String {
        format!("https://www.{}", self.domain)
    }
}

#[async_trait]
impl Backend for WebSearchBackend {
    fn name(&self) -> &str {
        "web_search"
    }

    fn pacing(&self) -> Option<&Pacing> {
        Some(&self.pacing)
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        let q = format!("site:{} {}", self.domain, query);
        let resp = self
            .client
            .get(format!("{}/html/", self.base_url))
            .query(&[("q", q.as_str())])
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?;
        // DuckDuckGo answers bot suspicion with 202 and a challenge page.
        if resp.status() == reqwest::StatusCode::ACCEPTED {
            return Err(SourceError::RateLimited("DuckDuckGo challenge page".into()));
        }
        let html = check_status(resp)?.text().await?;
        if html.contains("anomaly-modal") {
            return Err(SourceError::RateLimited("DuckDuckGo anomaly page".into()));
        }

        let origin = self.origin();
        Ok(parse_results(&html, &self.domain, limit as usize)?
            .into_iter()
            .map(|(title, href, snippet)| {
                RawResult::Web(WebHit {
                    title,
                    href,
                    snippet,
                    origin: origin.clone(),
                    label: self.label.clone(),
                })
            })
            .collect())
    }
}

/// Unwrap DuckDuckGo's `//duckduckgo.com/l/?uddg=<target>` redirect links.
fn extract_url(href: &str) -> Option<Url> {
    let full = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&full).ok()?;
    if parsed.host_str() == Some("duckduckgo.com") && parsed.path().starts_with("/l/") {
        let target = parsed
            .query_pairs()
            .find(|(key, _)| key == "uddg")
            .map(|(_, value)| value.into_owned())?;
        Url::parse(&target).ok()
    } else {
        Some(parsed)
    }
}

fn on_domain(url: &Url, domain: &str) -> bool {
    url.host_str()
        .map(|host| host == domain || host.ends_with(&format!(".{}", domain)))
        .unwrap_or(false)
}

fn parse_results(html: &str, domain: &str, limit: usize) -> Result<Vec<(String, String, String)>, SourceError> {
    let document = Html::parse_document(html);
    let result_sel = Selector::parse(".result:not(.result--ad)")
        .map_err(|e| SourceError::Parse(format!("invalid result selector: {:?}", e)))?;
    let title_sel = Selector::parse(".result__a")
        .map_err(|e| SourceError::Parse(format!("invalid title selector: {:?}", e)))?;
    let snippet_sel = Selector::parse(".result__snippet")
        .map_err(|e| SourceError::Parse(format!("invalid snippet selector: {:?}", e)))?;

    let mut results = Vec::new();
    for element in document.select(&result_sel) {
        let Some(anchor) = element.select(&title_sel).next() else {
            continue;
        };
        let title = clean_text(&anchor.text().collect::<String>());
        let Some(url) = anchor.value().attr("href").and_then(extract_url) else {
            continue;
        };
        if title.is_empty() || !on_domain(&url, domain) {
            continue;
        }
        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(|el| clean_text(&el.text().collect::<String>()))
            .unwrap_or_default();

        results.push((title, url.to_string(), snippet));
        if results.len() >= limit {
            break;
        }
    }
    Ok(results)
}

fn author_year_regex() -> &'static Regex {
    static AUTHOR_YEAR: OnceLock<Regex> = OnceLock::new();
    AUTHOR_YEAR.get_or_init(|| {
        Regex::new(r"([A-Z][a-z]+(?:\s+[A-Z][a-z]+)*),?\s+((?:19|20)\d{2})\b")
            .expect("author/year pattern is valid")
    })
}

/// Normalize a scraped hit. Snippets like "Jane Doe, 2021 ..." give up an
/// author and a year; otherwise only a year is looked for.
pub(crate) fn normalize(hit: WebHit, source: LogicalSource) -> Option<Record> {
    let (authors, year) = match author_year_regex().captures(&hit.snippet) {
        Some(caps) => (vec![caps[1].to_string()], Some(caps[2].to_string())),
        None => (Vec::new(), extract_year(&hit.snippet)),
    };
    let placeholder = format!("{} Author", hit.label);
    let fields = Fields {
        title: Some(hit.title),
        authors,
        author_placeholder: &placeholder,
        year,
        abstract_text: Some(hit.snippet),
        citations: Citations::NotAvailable,
        link: Some(hit.href),
        venue: Some(hit.label.clone()),
        publisher: Some(hit.label.clone()),
        ..Fields::new(&hit.label, &hit.origin)
    };
    finish(fields, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::Fetch;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_HTML: &str = r#"<html><body>
<div class="result results_links results_links_deep web-result">
  <h2 class="result__title"><a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.researchgate.net%2Fpublication%2F1_Neural_Nets&amp;rut=abc">Neural Nets for
    Everyone</a></h2>
  <a class="result__snippet">Jane Doe, 2021 - A gentle introduction to neural networks.</a>
</div>
<div class="result result--ad">
  <a class="result__a" href="https://ads.example.com/">Sponsored</a>
</div>
<div class="result results_links web-result">
  <a class="result__a" href="https://example.com/not-the-site">Off-site result</a>
  <a class="result__snippet">Nothing to see.</a>
</div>
<div class="result results_links web-result">
  <a class="result__a" href="https://researchgate.net/publication/2_Second">Second Paper</a>
  <a class="result__snippet">published in 2018 by somebody</a>
</div>
</body></html>"#;

    #[test]
    fn test_extract_url_unwraps_redirect() {
        let url = extract_url("//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=x").unwrap();
        assert_eq!(url.as_str(), "https://example.com/page");
        assert_eq!(extract_url("https://direct.com/").unwrap().as_str(), "https://direct.com/");
    }

    #[test]
    fn test_parse_filters_ads_and_other_domains() {
        let results = parse_results(SAMPLE_HTML, "researchgate.net", 10).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "Neural Nets for Everyone");
        assert_eq!(results[0].1, "https://www.researchgate.net/publication/1_Neural_Nets");
        assert_eq!(results[1].0, "Second Paper");
    }

    #[test]
    fn test_normalize_extracts_author_and_year() {
        let hit = WebHit {
            title: "Neural Nets".into(),
            href: "https://www.researchgate.net/publication/1".into(),
            snippet: "Jane Doe, 2021 - A gentle introduction.".into(),
            origin: "https://www.researchgate.net".into(),
            label: "ResearchGate".into(),
        };
        let record = normalize(hit, LogicalSource::OpenAccessIndex).unwrap();
        assert_eq!(record.authors, vec!["Jane Doe"]);
        assert_eq!(record.year, "2021");
        assert_eq!(record.venue, "ResearchGate");
        assert_eq!(record.backend, "ResearchGate");
    }

    #[test]
    fn test_normalize_placeholder_author() {
        let hit = WebHit {
            title: "Second Paper".into(),
            href: "/publication/2".into(),
            snippet: "published in 2018 by somebody".into(),
            origin: "https://www.researchgate.net".into(),
            label: "ResearchGate".into(),
        };
        let record = normalize(hit, LogicalSource::OpenAccessIndex).unwrap();
        assert_eq!(record.authors, vec!["ResearchGate Author"]);
        assert_eq!(record.year, "2018");
        assert_eq!(record.url, "https://www.researchgate.net/publication/2");
    }

    #[tokio::test]
    async fn test_fetch_with_site_filter() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .and(query_param("q", "site:researchgate.net neural nets"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SAMPLE_HTML))
            .expect(1)
            .mount(&server)
            .await;

        let backend = WebSearchBackend::new(&ClientOptions::new(Duration::from_secs(5)), "researchgate.net", "ResearchGate")
            .unwrap()
            .with_base_url(server.uri())
            .with_pacing(Pacing::none());
        assert_eq!(backend.fetch("neural nets", 5).await.into_results().len(), 2);
    }

    #[tokio::test]
    async fn test_challenge_is_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(202).set_body_string("<div class=\"anomaly-modal\"></div>"))
            .mount(&server)
            .await;

        let backend = WebSearchBackend::new(&ClientOptions::new(Duration::from_secs(5)), "researchgate.net", "ResearchGate")
            .unwrap()
            .with_base_url(server.uri())
            .with_pacing(Pacing::none());
        assert!(matches!(backend.fetch("q", 5).await, Fetch::RateLimited));
    }
}
