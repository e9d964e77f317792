use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::adapter::SourceAdapter;
use crate::apis::arxiv::ArxivBackend;
use crate::apis::http::ClientOptions;
use crate::apis::pacing::Pacing;
use crate::apis::researchgate::ResearchGateBackend;
use crate::apis::scholar::ScholarBackend;
use crate::apis::semantic_scholar::SemanticScholarBackend;
use crate::apis::web_search::WebSearchBackend;
use crate::apis::wikipedia::WikipediaBackend;
use crate::apis::{Backend, LogicalSource, SourceError};
use crate::chain::FallbackChain;
use crate::search::Aggregator;

/// Upper bound on results per source, whatever the caller asks for.
pub const MAX_RESULTS_CAP: u32 = 50;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout for JSON API backends.
    pub api_timeout: Duration,
    /// Timeout for HTML scraping backends.
    pub scrape_timeout: Duration,
    /// Overall budget for one multi-source search.
    pub deadline: Option<Duration>,
    pub max_results: u32,
    pub user_agent: Option<String>,
    pub wikipedia_lang: String,
    /// Apply per-backend request pacing.
    pub polite: bool,
    pub semantic_scholar_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(10),
            scrape_timeout: Duration::from_secs(15),
            deadline: Some(Duration::from_secs(30)),
            max_results: 10,
            user_agent: None,
            wikipedia_lang: "en".to_string(),
            polite: true,
            semantic_scholar_api_key: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let secs = |key: &str| -> Option<Duration> {
            let raw = var(key)?;
            match raw.parse::<u64>() {
                Ok(n) if n > 0 => Some(Duration::from_secs(n)),
                _ => {
                    tracing::warn!(%key, value = %raw, "ignoring invalid duration");
                    None
                }
            }
        };

        Self {
            api_timeout: secs("SCHOLARSPHERE_TIMEOUT_SECS").unwrap_or(defaults.api_timeout),
            scrape_timeout: secs("SCHOLARSPHERE_SCRAPE_TIMEOUT_SECS").unwrap_or(defaults.scrape_timeout),
            deadline: secs("SCHOLARSPHERE_DEADLINE_SECS").or(defaults.deadline),
            max_results: var("SCHOLARSPHERE_MAX_RESULTS")
                .and_then(|v| v.parse::<u32>().ok())
                .map(|n| n.clamp(1, MAX_RESULTS_CAP))
                .unwrap_or(defaults.max_results),
            user_agent: var("SCHOLARSPHERE_USER_AGENT"),
            wikipedia_lang: var("SCHOLARSPHERE_WIKIPEDIA_LANG")
                .map(|l| l.to_lowercase())
                .unwrap_or(defaults.wikipedia_lang),
            polite: var("SCHOLARSPHERE_POLITE").map(|v| v != "0").unwrap_or(defaults.polite),
            semantic_scholar_api_key: var("SEMANTIC_SCHOLAR_API_KEY"),
        }
    }

    fn client_options(&self, timeout: Duration) -> ClientOptions {
        ClientOptions {
            user_agent: self.user_agent.clone(),
            ..ClientOptions::new(timeout)
        }
    }

    /// Keep a backend's own pacing unless pacing is switched off.
    fn paced<B>(&self, backend: B, with_pacing: impl FnOnce(B, Pacing) -> B) -> B {
        if self.polite {
            backend
        } else {
            with_pacing(backend, Pacing::none())
        }
    }

    /// Wire every backend into its logical source.
    pub fn build_aggregator(&self) -> Result<Aggregator, SourceError> {
        let api = self.client_options(self.api_timeout);
        let scrape = self.client_options(self.scrape_timeout);

        let scholar = self.paced(ScholarBackend::new(&scrape)?, ScholarBackend::with_pacing);
        let open_access: Vec<Arc<dyn Backend>> = vec![
            Arc::new(self.paced(ArxivBackend::new(&api)?, ArxivBackend::with_pacing)),
            Arc::new(self.paced(
                SemanticScholarBackend::new(&api, self.semantic_scholar_api_key.clone())?,
                SemanticScholarBackend::with_pacing,
            )),
            Arc::new(self.paced(
                WebSearchBackend::new(&scrape, "researchgate.net", "ResearchGate")?,
                WebSearchBackend::with_pacing,
            )),
            Arc::new(self.paced(ResearchGateBackend::new(&scrape)?, ResearchGateBackend::with_pacing)),
        ];
        let wikipedia = self.paced(
            WikipediaBackend::new(&api, &self.wikipedia_lang)?,
            WikipediaBackend::with_pacing,
        );

        let aggregator = Aggregator::new(vec![
            SourceAdapter::CitationIndex(Arc::new(scholar)),
            SourceAdapter::OpenAccess(FallbackChain::new("open_access", open_access)),
            SourceAdapter::Encyclopedia(Arc::new(wikipedia)),
        ]);
        Ok(match self.deadline {
            Some(budget) => aggregator.with_budget(budget),
            None => aggregator,
        })
    }

    /// Return a description of each logical source and what serves it.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        let pacing = if self.polite { "" } else { "; pacing disabled" };
        vec![
            SourceStatus {
                name: LogicalSource::CitationIndex.name().into(),
                backends: vec!["google_scholar".into()],
                note: format!("HTML scrape, CAPTCHA-prone{}", pacing),
            },
            SourceStatus {
                name: LogicalSource::OpenAccessIndex.name().into(),
                backends: vec![
                    "arxiv".into(),
                    "semantic_scholar".into(),
                    "web_search".into(),
                    "researchgate".into(),
                ],
                note: format!(
                    "Fallback chain; Semantic Scholar {}{}",
                    if self.semantic_scholar_api_key.is_some() {
                        "API key set"
                    } else {
                        "without API key (shared rate limit)"
                    },
                    pacing
                ),
            },
            SourceStatus {
                name: LogicalSource::Encyclopedia.name().into(),
                backends: vec!["wikipedia".into()],
                note: format!("{}.wikipedia.org{}", self.wikipedia_lang, pacing),
            },
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub backends: Vec<String>,
    pub note: String,
}
