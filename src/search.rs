use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::adapter::SourceAdapter;
use crate::apis::{LogicalSource, Record};

/// Per-source result lists. Every key is always present, possibly empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceResults {
    pub citation_index: Vec<Record>,
    pub open_access_index: Vec<Record>,
    pub encyclopedia: Vec<Record>,
}

impl SourceResults {
    pub fn get(&self, source: LogicalSource) -> &[Record] {
        match source {
            LogicalSource::CitationIndex => &self.citation_index,
            LogicalSource::OpenAccessIndex => &self.open_access_index,
            LogicalSource::Encyclopedia => &self.encyclopedia,
        }
    }

    fn slot_mut(&mut self, source: LogicalSource) -> &mut Vec<Record> {
        match source {
            LogicalSource::CitationIndex => &mut self.citation_index,
            LogicalSource::OpenAccessIndex => &mut self.open_access_index,
            LogicalSource::Encyclopedia => &mut self.encyclopedia,
        }
    }

    /// Record count per source, in display order.
    pub fn counts(&self) -> [(LogicalSource, usize); 3] {
        LogicalSource::ALL.map(|source| (source, self.get(source).len()))
    }

    pub fn total(&self) -> usize {
        self.counts().iter().map(|(_, n)| n).sum()
    }
}

/// Fans one query out to every logical source concurrently.
#[derive(Clone)]
pub struct Aggregator {
    adapters: Vec<Arc<SourceAdapter>>,
    /// Wall-clock budget applied by [`Aggregator::search_all`].
    budget: Option<Duration>,
}

impl Aggregator {
    pub fn new(adapters: Vec<SourceAdapter>) -> Self {
        Self {
            adapters: adapters.into_iter().map(Arc::new).collect(),
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Logical sources served, with the backends behind each.
    pub fn describe(&self) -> Vec<(LogicalSource, Vec<String>)> {
        self.adapters
            .iter()
            .map(|a| (a.logical_source(), a.backend_names()))
            .collect()
    }

    /// Query all sources. Never fails: a source that errors, panics or
    /// misses the budget contributes an empty list.
    pub async fn search_all(&self, query: &str, per_source_limit: u32) -> SourceResults {
        match self.budget {
            Some(budget) => {
                self.search_all_with_deadline(query, per_source_limit, Instant::now() + budget)
                    .await
            }
            None => self.gather(query, per_source_limit, None).await,
        }
    }

    pub async fn search_all_with_deadline(
        &self,
        query: &str,
        per_source_limit: u32,
        deadline: Instant,
    ) -> SourceResults {
        self.gather(query, per_source_limit, Some(deadline)).await
    }

    /// Query a single logical source.
    pub async fn search_source(&self, source: LogicalSource, query: &str, limit: u32) -> Vec<Record> {
        if query.trim().is_empty() || limit == 0 {
            return Vec::new();
        }
        let Some(adapter) = self.adapters.iter().find(|a| a.logical_source() == source) else {
            tracing::warn!(%source, "source not configured");
            return Vec::new();
        };
        let deadline = self.budget.map(|b| Instant::now() + b);
        // The set aborts the task if this future is dropped.
        let mut tasks = JoinSet::new();
        tasks.spawn(search_within(Arc::clone(adapter), query.to_string(), limit, deadline));
        match tasks.join_next().await {
            Some(Ok(records)) => records,
            Some(Err(e)) => {
                tracing::error!(%source, error = %e, "source task failed");
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    async fn gather(&self, query: &str, limit: u32, deadline: Option<Instant>) -> SourceResults {
        let mut results = SourceResults::default();
        if query.trim().is_empty() || limit == 0 {
            tracing::debug!("blank query, nothing to search");
            return results;
        }

        // Dropping the set aborts every source still in flight.
        let mut tasks = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let query = query.to_string();
            tasks.spawn(async move {
                let source = adapter.logical_source();
                (source, search_within(adapter, query, limit, deadline).await)
            });
        }

        while let Some(outcome) = tasks.join_next().await {
            match outcome {
                Ok((source, records)) => results.slot_mut(source).extend(records),
                Err(e) => tracing::error!(error = %e, "source task failed"),
            }
        }

        tracing::info!(
            %query,
            citation_index = results.citation_index.len(),
            open_access_index = results.open_access_index.len(),
            encyclopedia = results.encyclopedia.len(),
            "search complete"
        );
        results
    }
}

/// Run one adapter query, giving up on it if the deadline passes first.
async fn search_within(
    adapter: Arc<SourceAdapter>,
    query: String,
    limit: u32,
    deadline: Option<Instant>,
) -> Vec<Record> {
    let source = adapter.logical_source();
    let search = adapter.search(&query, limit);
    match deadline {
        Some(at) => tokio::time::timeout_at(at, search).await.unwrap_or_else(|_| {
            tracing::warn!(%source, "deadline passed, source dropped");
            Vec::new()
        }),
        None => search.await,
    }
}

/// Flatten grouped results into one list ranked by citation count.
/// Ties keep source order (citation index, open access, encyclopedia).
pub fn merge_for_display(results: &SourceResults) -> Vec<Record> {
    let mut merged: Vec<Record> = LogicalSource::ALL
        .iter()
        .flat_map(|source| results.get(*source).iter().cloned())
        .collect();
    // sort_by_key is stable.
    merged.sort_by_key(|r| Reverse(r.citations.rank()));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::testing::{scholar_hit, web_hit, wiki_page, Behavior, MockBackend};
    use crate::apis::{Backend, Citations, RawResult};
    use crate::chain::FallbackChain;

    fn backend(behavior: Behavior) -> Arc<MockBackend> {
        Arc::new(MockBackend::new("mock", behavior))
    }

    fn aggregator(
        citation: &Arc<MockBackend>,
        open_access: &[&Arc<MockBackend>],
        encyclopedia: &Arc<MockBackend>,
    ) -> Aggregator {
        let chain = open_access
            .iter()
            .map(|b| Arc::clone(*b) as Arc<dyn Backend>)
            .collect();
        Aggregator::new(vec![
            SourceAdapter::CitationIndex(Arc::clone(citation) as Arc<dyn Backend>),
            SourceAdapter::OpenAccess(FallbackChain::new("open_access", chain)),
            SourceAdapter::Encyclopedia(Arc::clone(encyclopedia) as Arc<dyn Backend>),
        ])
    }

    fn record(raw: RawResult, source: LogicalSource) -> Record {
        raw.normalize(source).unwrap()
    }

    #[test]
    fn test_merge_ranks_by_citations() {
        let results = SourceResults {
            citation_index: vec![
                record(scholar_hit("Five", Some(5)), LogicalSource::CitationIndex),
                record(scholar_hit("Unknown", None), LogicalSource::CitationIndex),
                record(scholar_hit("Twenty", Some(20)), LogicalSource::CitationIndex),
            ],
            ..Default::default()
        };
        let ranked: Vec<Citations> = merge_for_display(&results).into_iter().map(|r| r.citations).collect();
        assert_eq!(
            ranked,
            vec![Citations::Count(20), Citations::Count(5), Citations::NotAvailable]
        );
    }

    #[test]
    fn test_merge_keeps_source_order_on_ties() {
        let results = SourceResults {
            citation_index: vec![record(scholar_hit("Cited zero", Some(0)), LogicalSource::CitationIndex)],
            open_access_index: vec![record(web_hit("Open paper"), LogicalSource::OpenAccessIndex)],
            encyclopedia: vec![record(wiki_page("Topic"), LogicalSource::Encyclopedia)],
        };
        let titles: Vec<String> = merge_for_display(&results).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["Cited zero", "Open paper", "Topic"]);
    }

    #[tokio::test]
    async fn test_search_all_end_to_end() {
        let citation = backend(Behavior::Return(vec![
            scholar_hit("Hundred", Some(100)),
            scholar_hit("Fifty", Some(50)),
            scholar_hit("Ten", Some(10)),
        ]));
        let arxiv = backend(Behavior::Return(vec![]));
        let s2 = backend(Behavior::Return(vec![web_hit("Open One"), web_hit("Open Two")]));
        let web = backend(Behavior::Return(vec![web_hit("Unused")]));
        let wiki = backend(Behavior::Return(vec![wiki_page("Encyclopedia Entry")]));

        let results = aggregator(&citation, &[&arxiv, &s2, &web], &wiki)
            .search_all("machine learning", 5)
            .await;
        assert_eq!(
            results.counts(),
            [
                (LogicalSource::CitationIndex, 3),
                (LogicalSource::OpenAccessIndex, 2),
                (LogicalSource::Encyclopedia, 1),
            ]
        );
        assert_eq!(results.total(), 6);
        assert_eq!(web.calls(), 0);

        let titles: Vec<String> = merge_for_display(&results).into_iter().map(|r| r.title).collect();
        assert_eq!(
            titles,
            vec!["Hundred", "Fifty", "Ten", "Open One", "Open Two", "Encyclopedia Entry"]
        );
    }

    #[tokio::test]
    async fn test_all_keys_present_when_everything_fails() {
        let citation = backend(Behavior::Fail);
        let oa = backend(Behavior::RateLimit);
        let wiki = backend(Behavior::Fail);

        let results = aggregator(&citation, &[&oa], &wiki).search_all("q", 10).await;
        assert_eq!(results.total(), 0);

        let json = serde_json::to_value(&results).unwrap();
        for key in ["citationIndex", "openAccessIndex", "encyclopedia"] {
            assert_eq!(json[key], serde_json::json!([]), "missing {}", key);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_drops_slow_source() {
        let citation = backend(Behavior::Hang);
        let oa = backend(Behavior::Return(vec![web_hit("Fast Paper")]));
        let wiki = backend(Behavior::Return(vec![wiki_page("Fast Topic")]));

        let deadline = Instant::now() + Duration::from_secs(5);
        let results = aggregator(&citation, &[&oa], &wiki)
            .search_all_with_deadline("q", 10, deadline)
            .await;
        assert!(results.citation_index.is_empty());
        assert_eq!(results.open_access_index.len(), 1);
        assert_eq!(results.encyclopedia.len(), 1);
        assert!(Instant::now() < deadline + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_applies_to_search_all() {
        let citation = backend(Behavior::Return(vec![scholar_hit("Quick", Some(1))]));
        let oa = backend(Behavior::Hang);
        let wiki = backend(Behavior::Hang);

        let results = aggregator(&citation, &[&oa], &wiki)
            .with_budget(Duration::from_secs(2))
            .search_all("q", 10)
            .await;
        assert_eq!(results.total(), 1);
    }

    #[tokio::test]
    async fn test_panicking_source_is_isolated() {
        let citation = backend(Behavior::Panic);
        let oa = backend(Behavior::Return(vec![web_hit("Survivor")]));
        let wiki = backend(Behavior::Return(vec![]));

        let results = aggregator(&citation, &[&oa], &wiki).search_all("q", 10).await;
        assert!(results.citation_index.is_empty());
        assert_eq!(results.open_access_index.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_search_aborts_sources() {
        let slow = || backend(Behavior::Delay(Duration::from_secs(10), vec![web_hit("Late Paper")]));
        let (citation, oa, wiki) = (slow(), slow(), slow());
        let agg = aggregator(&citation, &[&oa], &wiki);

        let abandoned = tokio::time::timeout(Duration::from_secs(1), agg.search_all("q", 5)).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        for b in [&citation, &oa, &wiki] {
            assert_eq!(b.calls(), 1);
            assert_eq!(b.completed(), 0);
        }
    }

    #[tokio::test]
    async fn test_blank_query_calls_nothing() {
        let citation = backend(Behavior::Return(vec![scholar_hit("Never", None)]));
        let oa = backend(Behavior::Return(vec![]));
        let wiki = backend(Behavior::Return(vec![]));

        let results = aggregator(&citation, &[&oa], &wiki).search_all("   ", 10).await;
        assert_eq!(results, SourceResults::default());
        assert_eq!(citation.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_single_source() {
        let citation = backend(Behavior::Return(vec![scholar_hit("Cited", Some(2))]));
        let oa = backend(Behavior::Return(vec![web_hit("Open")]));
        let wiki = backend(Behavior::Return(vec![wiki_page("Topic")]));

        let records = aggregator(&citation, &[&oa], &wiki)
            .search_source(LogicalSource::Encyclopedia, "topic", 10)
            .await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].logical_source, LogicalSource::Encyclopedia);
        assert_eq!(citation.calls(), 0);
        assert_eq!(oa.calls(), 0);
    }

    #[test]
    fn test_describe_lists_backends() {
        let a = backend(Behavior::Fail);
        let described = aggregator(&a, &[&a, &a], &a).describe();
        assert_eq!(described.len(), 3);
        assert_eq!(described[1].0, LogicalSource::OpenAccessIndex);
        assert_eq!(described[1].1.len(), 2);
    }
}
