//! Shared HTTP client construction and response classification.

use std::time::Duration;

use rand::seq::SliceRandom;
use reqwest::StatusCode;

use super::SourceError;

pub const API_USER_AGENT: &str = "scholarsphere/0.1";

/// Browser User-Agent strings for HTML scraping backends. One is picked per
/// backend at construction time.
const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Per-backend client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub timeout: Duration,
    /// Overrides the backend's default agent when set.
    pub user_agent: Option<String>,
}

impl ClientOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: None,
        }
    }

    /// Build a client with a bounded timeout, falling back to `default_agent`.
    pub fn build(&self, default_agent: &str) -> Result<reqwest::Client, SourceError> {
        let agent = self.user_agent.as_deref().unwrap_or(default_agent);
        Ok(reqwest::Client::builder()
            .user_agent(agent)
            .timeout(self.timeout)
            .connect_timeout(self.timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?)
    }
}

pub fn browser_user_agent() -> &'static str {
    BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0])
}

/// Map rate-limit and non-success statuses to errors.
pub fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let host = resp.url().host_str().unwrap_or("?").to_string();
        return Err(SourceError::RateLimited(format!("HTTP {} from {}", status, host)));
    }
    if !status.is_success() {
        return Err(SourceError::Status(status));
    }
    Ok(resp)
}
