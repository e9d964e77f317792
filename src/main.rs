use std::sync::Arc;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters,
    model::*, tool, tool_handler, tool_router,
    transport::stdio, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

mod adapter;
mod apis;
mod chain;
mod config;
mod search;

use apis::LogicalSource;
use config::{Config, MAX_RESULTS_CAP};
use search::Aggregator;

// ── Parameter structs ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchAllParams {
    #[schemars(description = "Search query string")]
    query: String,
    #[schemars(description = "Maximum results per source (default 10, max 50)")]
    max_results: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchPapersParams {
    #[schemars(description = "Search query string")]
    query: String,
    #[schemars(description = "Restrict to one source: citation_index (scholar), open_access_index (arxiv, researchgate) or encyclopedia (wikipedia)")]
    source: Option<String>,
    #[schemars(description = "Maximum results per source (default 10, max 50)")]
    max_results: Option<u32>,
}

// ── Server ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct ScholarSphereServer {
    tool_router: ToolRouter<Self>,
    config: Arc<Config>,
    aggregator: Arc<Aggregator>,
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(format!("Serialization error: {}", e), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[tool_router]
impl ScholarSphereServer {
    pub fn create() -> anyhow::Result<Self> {
        let config = Config::from_env();
        let aggregator = config.build_aggregator()?;

        tracing::info!(
            "Initialized {} logical sources, deadline={:?}, polite={}",
            aggregator.describe().len(),
            config.deadline,
            config.polite
        );

        Ok(Self {
            tool_router: Self::tool_router(),
            config: Arc::new(config),
            aggregator: Arc::new(aggregator),
        })
    }

    fn limit(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.config.max_results).min(MAX_RESULTS_CAP)
    }

    #[tool(description = "List the logical sources, the backends behind each, and their status")]
    async fn list_sources(&self) -> Result<CallToolResult, McpError> {
        to_json(&self.config.source_status())
    }

    #[tool(description = "Search Google Scholar, open-access indexes and Wikipedia at once. Returns results grouped by source with per-source counts.")]
    async fn search_all(
        &self,
        Parameters(params): Parameters<SearchAllParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = self.limit(params.max_results);
        let results = self.aggregator.search_all(&params.query, limit).await;

        let counts: serde_json::Map<String, serde_json::Value> = results
            .counts()
            .iter()
            .map(|(source, n)| (source.name().to_string(), (*n).into()))
            .collect();
        to_json(&serde_json::json!({
            "query": params.query,
            "total": results.total(),
            "counts": counts,
            "results": results,
        }))
    }

    #[tool(description = "Search all sources (or one) and return a single list ranked by citation count")]
    async fn search_papers(
        &self,
        Parameters(params): Parameters<SearchPapersParams>,
    ) -> Result<CallToolResult, McpError> {
        let limit = self.limit(params.max_results);
        let records = match params.source.as_deref() {
            Some(name) => {
                let source = LogicalSource::from_name(name).ok_or_else(|| {
                    McpError::invalid_params(format!("Unknown source: {}", name), None)
                })?;
                let mut records = self.aggregator.search_source(source, &params.query, limit).await;
                records.sort_by_key(|r| std::cmp::Reverse(r.citations.rank()));
                records
            }
            None => {
                let results = self.aggregator.search_all(&params.query, limit).await;
                search::merge_for_display(&results)
            }
        };
        to_json(&records)
    }
}

#[tool_handler]
impl ServerHandler for ScholarSphereServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Federated academic search. Queries a citation index (Google Scholar), \
                 an open-access index (arXiv, Semantic Scholar, ResearchGate, tried in \
                 order) and an encyclopedia (Wikipedia) concurrently. A source that is \
                 down or rate limited returns an empty list instead of an error."
                    .into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting scholarsphere MCP server");

    let server = ScholarSphereServer::create()?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;

    Ok(())
}
