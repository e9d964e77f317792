use std::sync::Arc;

use async_trait::async_trait;

use crate::apis::{Backend, Fetch, RawResult, SourceError};

/// Progress of one query through a [`FallbackChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    NotStarted,
    /// Calling the backend at this position.
    Trying(usize),
    /// The backend at this position returned results.
    Succeeded(usize),
    Exhausted,
}

/// Ordered list of backends serving one logical source. The first backend
/// to return a non-empty list wins; later ones are never called.
pub struct FallbackChain {
    name: String,
    backends: Vec<Arc<dyn Backend>>,
}

impl FallbackChain {
    pub fn new(name: impl Into<String>, backends: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            name: name.into(),
            backends,
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    fn position(&self, index: usize) -> ChainState {
        if index < self.backends.len() {
            ChainState::Trying(index)
        } else {
            ChainState::Exhausted
        }
    }

    /// Walk the chain for one query, keeping the items `accept` maps to
    /// `Some`. A backend only wins if at least one of its items is kept;
    /// rate limits, failures and empty or unusable answers all advance to
    /// the next backend immediately.
    pub async fn run<T, F>(&self, query: &str, limit: u32, mut accept: F) -> (ChainState, Vec<T>)
    where
        F: FnMut(RawResult) -> Option<T>,
    {
        let mut state = ChainState::NotStarted;
        let mut results = Vec::new();
        loop {
            state = match state {
                ChainState::NotStarted => self.position(0),
                ChainState::Trying(i) => {
                    let backend = &self.backends[i];
                    match backend.fetch(query, limit).await {
                        Fetch::Hits(hits) => {
                            let fetched = hits.len();
                            results = hits.into_iter().filter_map(&mut accept).collect();
                            if results.is_empty() {
                                tracing::debug!(
                                    chain = %self.name,
                                    backend = backend.name(),
                                    fetched,
                                    "no usable results, falling back"
                                );
                                self.position(i + 1)
                            } else {
                                ChainState::Succeeded(i)
                            }
                        }
                        outcome => {
                            tracing::debug!(
                                chain = %self.name,
                                backend = backend.name(),
                                ?outcome,
                                "falling back"
                            );
                            self.position(i + 1)
                        }
                    }
                }
                ChainState::Succeeded(_) | ChainState::Exhausted => break,
            };
        }

        match state {
            ChainState::Succeeded(i) => tracing::debug!(
                chain = %self.name,
                backend = self.backends[i].name(),
                count = results.len(),
                "chain answered"
            ),
            _ => tracing::warn!(chain = %self.name, "all backends exhausted"),
        }
        (state, results)
    }
}

#[async_trait]
impl Backend for FallbackChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn try_fetch(&self, query: &str, limit: u32) -> Result<Vec<RawResult>, SourceError> {
        Ok(self.run(query, limit, Some).await.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::testing::{web_hit, Behavior, MockBackend};
    use crate::apis::LogicalSource;

    fn mock(name: &str, behavior: Behavior) -> Arc<MockBackend> {
        Arc::new(MockBackend::new(name, behavior))
    }

    fn chain(backends: &[&Arc<MockBackend>]) -> FallbackChain {
        FallbackChain::new(
            "open_access",
            backends.iter().map(|b| Arc::clone(*b) as Arc<dyn Backend>).collect(),
        )
    }

    fn chain_of_dead(dead: Arc<MockBackend>) -> FallbackChain {
        FallbackChain::new("dead_chain", vec![dead as Arc<dyn Backend>])
    }

    #[tokio::test]
    async fn test_first_non_empty_backend_wins() {
        let first = mock("first", Behavior::Return(vec![]));
        let second = mock("second", Behavior::Return(vec![web_hit("Paper One"), web_hit("Paper Two")]));
        let third = mock("third", Behavior::Return(vec![web_hit("Never Seen")]));

        let (state, results) = chain(&[&first, &second, &third]).run("q", 10, Some).await;
        assert_eq!(state, ChainState::Succeeded(1));
        assert_eq!(results.len(), 2);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(third.calls(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_advances_without_retry() {
        let limited = mock("limited", Behavior::RateLimit);
        let backup = mock("backup", Behavior::Return(vec![web_hit("Backup Paper")]));

        let (state, results) = chain(&[&limited, &backup]).run("q", 10, Some).await;
        assert_eq!(state, ChainState::Succeeded(1));
        assert_eq!(results.len(), 1);
        assert_eq!(limited.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_empty() {
        let broken = mock("broken", Behavior::Fail);
        let limited = mock("limited", Behavior::RateLimit);
        let empty = mock("empty", Behavior::Return(vec![]));

        let (state, results) = chain(&[&broken, &limited, &empty]).run("q", 10, Some).await;
        assert_eq!(state, ChainState::Exhausted);
        assert!(results.is_empty());
        assert_eq!(empty.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let (state, results) = FallbackChain::new("none", vec![]).run("q", 10, Some).await;
        assert_eq!(state, ChainState::Exhausted);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_unusable_results_advance_chain() {
        // A year range fails the typed decode, so the item normalizes to nothing.
        let bad = RawResult::SemanticScholar(serde_json::json!({
            "title": "Range Year",
            "year": "1999-2000",
            "url": "https://www.semanticscholar.org/paper/x"
        }));
        let first = mock("semantic_scholar", Behavior::Return(vec![bad]));
        let second = mock("web", Behavior::Return(vec![web_hit("Usable Paper")]));

        let (state, records) = chain(&[&first, &second])
            .run("q", 10, |item| item.normalize(LogicalSource::OpenAccessIndex))
            .await;
        assert_eq!(state, ChainState::Succeeded(1));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Usable Paper");
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_chain_is_a_backend() {
        let only = mock("only", Behavior::Return(vec![web_hit("Chained Paper")]));
        let chain = chain(&[&only]);
        assert_eq!(chain.name(), "open_access");
        assert_eq!(chain.backend_names(), vec!["only"]);
        assert!(matches!(chain.fetch("q", 10).await, Fetch::Hits(ref r) if r.len() == 1));

        let dead = mock("dead", Behavior::Fail);
        assert!(matches!(chain_of_dead(dead).fetch("q", 1).await, Fetch::Empty));
    }
}
