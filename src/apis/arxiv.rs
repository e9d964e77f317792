use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::http::{check_status, ClientOptions, API_USER_AGENT};
use super::normalize::{finish, Fields};
use super::pacing::Pacing;
use super::{Backend, Citations, LogicalSource, RawResult, Record, SourceError};

const BASE_URL: &str = "https://export.arxiv.org";
const ORIGIN: &str = "https://arxiv.org";
const LABEL: &str = "arXiv";

/// One `<entry>` of an arXiv Atom feed.
#[derive(Debug, Clone, Default)]
pub struct ArxivEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub authors: Vec<String>,
    pub published: String,
    pub abs_url: String,
    pub pdf_url: String,
    pub journal_ref: Option<String>,
}

/// Open-access preprint API, paginated by `start`/`max_results`.
pub struct ArxivBackend {
    client: reqwest::Client,
    base_url: String,
    pacing: Pacing,
}

impl ArxivBackend {
    pub fn new(opts: &ClientOptions) -> Result<Self, SourceError> {
        Ok(Self {
            client: opts.build(API_USER_AGENT)?,
            base_url: BASE_URL.to_string(),
            // arXiv asks for one request every three seconds.
            pacing: Pacing::new(Duration::from_secs(3), Duration::ZERO),
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
impl Backend for ArxivBackend {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn pacing(&self) -> Option<&Pacing> {
        Some(&self.pacing)
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        let search_query = format!("all:{}", query);
        let max_results = limit.to_string();
        let resp = self
            .client
            .get(format!("{}/api/query", self.base_url))
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await?;
        let xml = check_status(resp)?.text().await?;
        Ok(parse_atom_feed(&xml)?
            .into_iter()
            .map(RawResult::Arxiv)
            .collect())
    }
}

fn link_attrs(e: &BytesStart<'_>) -> (String, String) {
    let mut href = String::new();
    let mut title = String::new();
    for attr in e.attributes().flatten() {
        let val = String::from_utf8_lossy(&attr.value).to_string();
        match attr.key.as_ref() {
            b"href" => href = val,
            b"title" => title = val,
            _ => {}
        }
    }
    (href, title)
}

fn apply_link(entry: &mut ArxivEntry, e: &BytesStart<'_>) {
    let (href, title) = link_attrs(e);
    if title == "pdf" {
        entry.pdf_url = href;
    } else if entry.abs_url.is_empty() && href.contains("/abs/") {
        entry.abs_url = href;
    }
}

pub(crate) fn parse_atom_feed(xml: &str) -> Result<Vec<ArxivEntry>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<ArxivEntry> = None;
    let mut current_tag = String::new();
    let mut author_name = String::new();
    let mut in_author = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    current = Some(ArxivEntry::default());
                } else if let Some(entry) = current.as_mut() {
                    match tag.as_str() {
                        "author" => {
                            in_author = true;
                            author_name.clear();
                        }
                        "link" => apply_link(entry, &e),
                        _ => {}
                    }
                    current_tag = tag;
                }
            }
            Ok(Event::Empty(e)) => {
                if let Some(entry) = current.as_mut() {
                    if e.name().as_ref() == b"link" {
                        apply_link(entry, &e);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(entry) = current.as_mut() {
                    let text = e.unescape().unwrap_or_default().to_string();
                    match current_tag.as_str() {
                        "title" => entry.title.push_str(&text),
                        "summary" => entry.summary.push_str(&text),
                        "id" if entry.id.is_empty() => entry.id = text.trim().to_string(),
                        "published" => entry.published.push_str(&text),
                        "name" if in_author => author_name.push_str(&text),
                        "arxiv:journal_ref" => entry.journal_ref = Some(text.trim().to_string()),
                        _ => {}
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if tag == "entry" {
                    if let Some(entry) = current.take() {
                        // The API reports query errors as a pseudo-entry.
                        if !entry.id.contains("/api/errors") {
                            entries.push(entry);
                        }
                    }
                } else if tag == "author" && in_author {
                    in_author = false;
                    if let Some(entry) = current.as_mut() {
                        entry.authors.push(author_name.trim().to_string());
                    }
                }
                if tag == current_tag {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(SourceError::Parse(format!("XML parse error: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(entries)
}

pub(crate) fn normalize(entry: ArxivEntry, source: LogicalSource) -> Option<Record> {
    let link = [entry.abs_url, entry.id, entry.pdf_url]
        .into_iter()
        .find(|l| !l.trim().is_empty());
    let fields = Fields {
        title: Some(entry.title),
        authors: entry.authors,
        year: Some(entry.published),
        abstract_text: Some(entry.summary),
        citations: Citations::NotAvailable,
        link,
        venue: Some(entry.journal_ref.unwrap_or_else(|| LABEL.to_string())),
        publisher: Some(LABEL.to_string()),
        ..Fields::new(LABEL, ORIGIN)
    };
    finish(fields, source)
}
