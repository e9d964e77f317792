use std::sync::Arc;

use crate::apis::{Backend, LogicalSource, RawResult, Record};
use crate::chain::FallbackChain;

/// Binds one logical source to whatever serves it.
pub enum SourceAdapter {
    CitationIndex(Arc<dyn Backend>),
    OpenAccess(FallbackChain),
    Encyclopedia(Arc<dyn Backend>),
}

impl SourceAdapter {
    pub fn logical_source(&self) -> LogicalSource {
        match self {
            SourceAdapter::CitationIndex(_) => LogicalSource::CitationIndex,
            SourceAdapter::OpenAccess(_) => LogicalSource::OpenAccessIndex,
            SourceAdapter::Encyclopedia(_) => LogicalSource::Encyclopedia,
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        match self {
            SourceAdapter::CitationIndex(b) | SourceAdapter::Encyclopedia(b) => {
                vec![b.name().to_string()]
            }
            SourceAdapter::OpenAccess(chain) => chain.backend_names(),
        }
    }

    /// Query the source and return at most `limit` normalized records.
    /// Never fails; an unavailable source yields an empty list.
    pub async fn search(&self, query: &str, limit: u32) -> Vec<Record> {
        let source = self.logical_source();
        let normalize = |item: RawResult| item.normalize(source);

        let mut records = match self {
            SourceAdapter::CitationIndex(b) | SourceAdapter::Encyclopedia(b) => {
                let raw = b.fetch(query, limit).await.into_results();
                let fetched = raw.len();
                let records: Vec<Record> = raw.into_iter().filter_map(normalize).collect();
                if records.len() < fetched {
                    tracing::debug!(%source, dropped = fetched - records.len(), "dropped unusable results");
                }
                records
            }
            // The chain normalizes so that a backend with no usable items falls through.
            SourceAdapter::OpenAccess(chain) => chain.run(query, limit, normalize).await.1,
        };
        records.truncate(limit as usize);
        records
    }
}
