//! Prompt Invoker (§4.4): renders a named template, calls the LLM under a
//! strict JSON schema and a hard timeout, and retries once on malformed
//! structured output (§7 local-recovery policy for `LLM_INVALID_OUTPUT`).

use std::sync::Arc;
use std::time::Duration;

use recon_core::AgentError;
use recon_core::prompt::{LlmClient, ModelRole, TemplateRenderer, TemporalContext, Usage};
use schemars::{JsonSchema, SchemaGenerator};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default hard timeout for a single LLM invocation (§4.4).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(180);

/// Wraps a [`TemplateRenderer`] and an [`LlmClient`] behind the strict
/// schema/timeout/retry contract the rest of the engine depends on.
#[derive(Clone)]
pub struct PromptInvoker {
    renderer: Arc<dyn TemplateRenderer>,
    llm: Arc<dyn LlmClient>,
    timeout: Duration,
    current_date: String,
}

impl std::fmt::Debug for PromptInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptInvoker")
            .field("timeout", &self.timeout)
            .field("current_date", &self.current_date)
            .finish_non_exhaustive()
    }
}

impl PromptInvoker {
    /// Creates an invoker with the default 180s timeout.
    #[must_use]
    pub fn new(
        renderer: Arc<dyn TemplateRenderer>,
        llm: Arc<dyn LlmClient>,
        current_date: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            llm,
            timeout: DEFAULT_TIMEOUT,
            current_date: current_date.into(),
        }
    }

    /// Overrides the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Renders `template_name` with `variables`, calls the LLM aliased by
    /// `role` under a schema derived from `T`, and parses the result.
    ///
    /// Retries once with a stricter reminder if the first response fails to
    /// validate against the schema (`LLM_INVALID_OUTPUT`, local recovery).
    pub async fn invoke<T>(
        &self,
        template_name: &str,
        mut variables: Value,
        role: ModelRole,
    ) -> Result<(T, Usage), AgentError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let temporal = TemporalContext {
            current_date: self.current_date.clone(),
        };
        let schema = SchemaGenerator::default().into_root_schema_for::<T>();

        let mut last_error = String::new();
        for attempt in 0..2 {
            if attempt == 1 {
                if let Some(obj) = variables.as_object_mut() {
                    obj.insert(
                        "_schema_reminder".into(),
                        Value::String(format!(
                            "Your previous response did not validate: {last_error}. \
                             Respond with JSON matching the schema exactly."
                        )),
                    );
                }
            }

            let prompt = self
                .renderer
                .render(template_name, &variables, &temporal)
                .await
                .map_err(|e| AgentError::Internal(format!("template render failed: {e}")))?;

            let call = self.llm.complete(role, &prompt, &schema);
            let outcome = tokio::time::timeout(self.timeout, call).await;

            let (value, usage) = match outcome {
                Err(_) => {
                    return Err(AgentError::PromptTimeout {
                        template: template_name.to_string(),
                        elapsed_ms: self.timeout.as_millis() as u64,
                    });
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    continue;
                }
                Ok(Ok(pair)) => pair,
            };

            match serde_json::from_value::<T>(value) {
                Ok(parsed) => return Ok((parsed, usage)),
                Err(e) => {
                    last_error = e.to_string();
                }
            }
        }

        Err(AgentError::InvalidLlmOutput {
            template: template_name.to_string(),
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptedLlm, StubRenderer};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Echo {
        value: String,
    }

    #[tokio::test]
    async fn invoke_parses_valid_response() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Scoping, serde_json::json!({"value": "ok"}));
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let (parsed, _usage): (Echo, Usage) = invoker
            .invoke("anything", serde_json::json!({}), ModelRole::Scoping)
            .await
            .unwrap();
        assert_eq!(parsed.value, "ok");
    }

    #[tokio::test]
    async fn invoke_retries_once_on_schema_mismatch_then_succeeds() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Scoping, serde_json::json!({"wrong": "shape"}));
        llm.push(ModelRole::Scoping, serde_json::json!({"value": "fixed"}));
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let (parsed, _): (Echo, Usage) = invoker
            .invoke("anything", serde_json::json!({}), ModelRole::Scoping)
            .await
            .unwrap();
        assert_eq!(parsed.value, "fixed");
    }

    #[tokio::test]
    async fn invoke_fails_after_exhausting_retry() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Scoping, serde_json::json!({"wrong": 1}));
        llm.push(ModelRole::Scoping, serde_json::json!({"wrong": 2}));
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let result: Result<(Echo, Usage), AgentError> = invoker
            .invoke("anything", serde_json::json!({}), ModelRole::Scoping)
            .await;
        assert!(matches!(result, Err(AgentError::InvalidLlmOutput { .. })));
    }
}
