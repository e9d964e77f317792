//! Field-level normalization shared by every backend.
//!
//! [`finish`] is the only constructor of [`Record`] and enforces its
//! invariants: non-empty title, absolute URL, bounded abstract, 4-digit or
//! sentinel year, at least one author.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use super::{Citations, LogicalSource, Record, NOT_AVAILABLE};

pub const ABSTRACT_LIMIT: usize = 500;
pub const AUTHOR_LIMIT: usize = 5;
/// Year extraction only looks at this many leading characters.
const YEAR_SCAN_LIMIT: usize = 256;
const NO_ABSTRACT: &str = "No abstract available";

fn year_regex() -> &'static Regex {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    YEAR.get_or_init(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("year pattern is valid"))
}

/// Collapse newlines and runs of whitespace into single spaces.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Clean and cut to at most [`ABSTRACT_LIMIT`] characters.
pub fn truncate_abstract(text: &str) -> String {
    let cleaned = clean_text(text);
    match cleaned.char_indices().nth(ABSTRACT_LIMIT) {
        Some((idx, _)) => cleaned[..idx].trim_end().to_string(),
        None => cleaned,
    }
}

/// First `19xx`/`20xx` token near the start of `text`.
pub fn extract_year(text: &str) -> Option<String> {
    let end = text
        .char_indices()
        .nth(YEAR_SCAN_LIMIT)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    year_regex()
        .find(&text[..end])
        .map(|m| m.as_str().to_string())
}

/// Keep at most [`AUTHOR_LIMIT`] non-empty names, or a single placeholder.
pub fn cap_authors<I>(names: I, placeholder: &str) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let authors: Vec<String> = names
        .into_iter()
        .map(|n| clean_text(&n))
        .filter(|n| !n.is_empty() && n != "…" && n != "...")
        .take(AUTHOR_LIMIT)
        .collect();
    if authors.is_empty() {
        vec![placeholder.to_string()]
    } else {
        authors
    }
}

/// Resolve `link` against `origin`. Only absolute http(s) URLs survive.
pub fn absolutize(origin: &str, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    let resolved = match Url::parse(link) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(origin).ok()?.join(link).ok()?,
        Err(_) => return None,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Raw field values gathered by a backend's normalization function.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub author_placeholder: &'a str,
    /// Free text that may contain a year.
    pub year: Option<String>,
    pub abstract_text: Option<String>,
    pub citations: Citations,
    /// Possibly relative link, resolved against `origin`.
    pub link: Option<String>,
    pub origin: &'a str,
    pub venue: Option<String>,
    pub publisher: Option<String>,
    pub backend: &'a str,
}

impl<'a> Fields<'a> {
    pub fn new(backend: &'a str, origin: &'a str) -> Self {
        Self {
            title: None,
            authors: Vec::new(),
            author_placeholder: "Unknown Author",
            year: None,
            abstract_text: None,
            citations: Citations::NotAvailable,
            link: None,
            origin,
            venue: None,
            publisher: None,
            backend,
        }
    }
}

fn or_sentinel(value: Option<String>) -> String {
    value
        .map(|v| clean_text(&v))
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Build a [`Record`], or `None` when it would carry no usable link.
pub fn finish(fields: Fields<'_>, source: LogicalSource) -> Option<Record> {
    let title = fields.title.as_deref().map(clean_text).unwrap_or_default();
    let Some(url) = fields
        .link
        .as_deref()
        .and_then(|link| absolutize(fields.origin, link))
    else {
        tracing::debug!(backend = fields.backend, %title, "dropping result without usable url");
        return None;
    };

    let abstract_text = fields
        .abstract_text
        .as_deref()
        .map(truncate_abstract)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| NO_ABSTRACT.to_string());

    Some(Record {
        title: if title.is_empty() { NOT_AVAILABLE.to_string() } else { title },
        authors: cap_authors(fields.authors, fields.author_placeholder),
        year: fields
            .year
            .as_deref()
            .and_then(extract_year)
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        abstract_text,
        citations: fields.citations,
        url,
        venue: or_sentinel(fields.venue),
        publisher: or_sentinel(fields.publisher),
        backend: fields.backend.to_string(),
        logical_source: source,
    })
}
