//! The source adapter contract (§6.1). Individual data-source adapters are
//! explicitly out of scope; this module defines the boundary the Source
//! Saturator and Source Registry program against.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::SourceCapability;

/// One result item returned by [`SourceAdapter::execute_search`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceResultItem {
    /// Result title.
    pub title: String,
    /// Canonical or source-provided URL, if any.
    pub url: Option<String>,
    /// Untruncated content or snippet. Adapters must never truncate this field.
    pub snippet_or_content: String,
    /// ISO date attached by the source, if any.
    pub date: Option<String>,
    /// Opaque raw API object for this item.
    #[serde(default)]
    pub metadata: Value,
}

/// The response an adapter returns from a single `execute_search` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// Id of the source that produced this response.
    pub source: String,
    /// Whether the call succeeded.
    pub success: bool,
    /// Result items, empty on failure.
    pub results: Vec<SourceResultItem>,
    /// Total results reported by the source (may exceed `results.len()`).
    pub total: u32,
    /// Error message, set when `success` is false.
    pub error: Option<String>,
    /// HTTP status code, if the failure (or success) came from an HTTP call.
    pub http_code: Option<u16>,
    /// Round-trip time of the call, in milliseconds.
    pub response_time_ms: u64,
}

/// Contract every heterogeneous data source adapter satisfies (§6.1).
///
/// Implementations are the out-of-scope "individual data-source adapters";
/// this crate only depends on the trait.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Static capability metadata advertised to the planner.
    fn metadata(&self) -> &SourceCapability;

    /// Optional short-circuit: does this source plausibly apply to `question`?
    /// The default implementation defers entirely to the action selector.
    async fn is_relevant(&self, _question: &str) -> bool {
        true
    }

    /// Generates a source-native query from a natural-language question and
    /// optional hints. Returns `None` when the source doesn't apply.
    async fn generate_query(
        &self,
        question: &str,
        hints: &Value,
    ) -> anyhow::Result<Option<String>>;

    /// Executes a search against the live source.
    async fn execute_search(
        &self,
        query_params: &str,
        api_key: Option<&str>,
        limit: u32,
    ) -> anyhow::Result<QueryResult>;
}
