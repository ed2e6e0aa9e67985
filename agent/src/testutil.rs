//! Deterministic test doubles for the out-of-scope collaborators
//! ([`SourceAdapter`], [`LlmClient`], [`TemplateRenderer`]). Used by this
//! crate's own unit tests and the scenario tests in `tests/`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use recon_core::model::SourceCapability;
use recon_core::prompt::{LlmClient, ModelRole, TemplateRenderer, TemporalContext, Usage};
use recon_core::source::{QueryResult, SourceAdapter};
use schemars::Schema;
use serde_json::Value;
use tokio::sync::Mutex;

/// A source adapter whose `execute_search` responses are scripted in advance,
/// one per call, in order. The last scripted response repeats once the queue
/// is drained.
pub struct ScriptedSource {
    capability: SourceCapability,
    responses: Mutex<VecDeque<QueryResult>>,
    last: Mutex<Option<QueryResult>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedSource {
    /// Creates a scripted source with the given id and canned responses.
    #[must_use]
    pub fn new(id: &str, responses: impl IntoIterator<Item = QueryResult>) -> Self {
        Self {
            capability: SourceCapability {
                id: id.to_string(),
                display_name: id.to_string(),
                category: "test".to_string(),
                description: "scripted test source".to_string(),
                requires_api_key: false,
                characteristics: HashMap::new(),
                query_strategies: Vec::new(),
                typical_result_count: 10,
                recommended_max_queries: 5,
            },
            responses: Mutex::new(responses.into_iter().collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn metadata(&self) -> &SourceCapability {
        &self.capability
    }

    async fn generate_query(
        &self,
        question: &str,
        _hints: &Value,
    ) -> anyhow::Result<Option<String>> {
        Ok(Some(question.to_string()))
    }

    async fn execute_search(
        &self,
        query_params: &str,
        _api_key: Option<&str>,
        _limit: u32,
    ) -> anyhow::Result<QueryResult> {
        self.calls.lock().await.push(query_params.to_string());
        let mut queue = self.responses.lock().await;
        if let Some(next) = queue.pop_front() {
            *self.last.lock().await = Some(next.clone());
            return Ok(next);
        }
        if let Some(last) = self.last.lock().await.clone() {
            return Ok(last);
        }
        Ok(QueryResult {
            source: self.capability.id.clone(),
            success: true,
            results: Vec::new(),
            total: 0,
            error: None,
            http_code: None,
            response_time_ms: 1,
        })
    }
}

/// Wraps a [`ScriptedSource`] in the `Arc<dyn SourceAdapter>` shape the
/// registry expects.
#[must_use]
pub fn mock_source(
    id: &str,
    responses: impl IntoIterator<Item = QueryResult>,
) -> Arc<dyn SourceAdapter> {
    Arc::new(ScriptedSource::new(id, responses))
}

/// A template renderer that just serializes the variables into the prompt
/// text. Good enough for deterministic tests that don't exercise real
/// template rendering.
pub struct StubRenderer;

#[async_trait]
impl TemplateRenderer for StubRenderer {
    async fn render(
        &self,
        template_name: &str,
        variables: &Value,
        temporal: &TemporalContext,
    ) -> anyhow::Result<String> {
        Ok(format!(
            "[{template_name} @ {}] {variables}",
            temporal.current_date
        ))
    }
}

/// An LLM client whose structured responses are scripted per [`ModelRole`],
/// consumed in order. Panics with a clear message if a role's queue is
/// exhausted, which surfaces test setup bugs immediately instead of hanging.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: Mutex<HashMap<ModelRole, VecDeque<Value>>>,
}

impl ScriptedLlm {
    /// Creates an LLM client with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `value` as the next response for `role`.
    pub fn push(&self, role: ModelRole, value: Value) {
        self.responses
            .try_lock()
            .expect("ScriptedLlm::push called concurrently with a pending complete()")
            .entry(role)
            .or_default()
            .push_back(value);
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(
        &self,
        role: ModelRole,
        _prompt: &str,
        _schema: &Schema,
    ) -> anyhow::Result<(Value, Usage)> {
        let mut responses = self.responses.lock().await;
        let queue = responses.entry(role).or_default();
        let value = queue.pop_front().ok_or_else(|| {
            anyhow::anyhow!("ScriptedLlm: no scripted response left for role {role:?}")
        })?;
        Ok((value, Usage::default()))
    }
}

impl std::fmt::Debug for ScriptedLlm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedLlm").finish_non_exhaustive()
    }
}
