//! The prompt template and LLM client contracts (§4.4, §6.2). Both the
//! renderer and the LLM client itself are external collaborators; this crate
//! only depends on their traits. The in-scope `PromptInvoker` that wraps them
//! with a JSON-schema contract, timeout, and retry lives in `recon-agent`.

use async_trait::async_trait;
use schemars::Schema;
use serde_json::Value;

/// Model alias selected per call site, resolved against `model_roles` (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    /// Action selection and decomposition.
    Scoping,
    /// Query generation and saturation decisions.
    Research,
    /// Evidence extraction and history summarization.
    Summarization,
    /// SYNTHESIZE action prose.
    Synthesis,
    /// ANALYZE action structured findings.
    Analysis,
}

impl ModelRole {
    /// Stable key used when looking up `model_roles` configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scoping => "scoping",
            Self::Research => "research",
            Self::Summarization => "summarization",
            Self::Synthesis => "synthesis",
            Self::Analysis => "analysis",
        }
    }
}

/// Current-date/time context injected into every rendered template so that
/// recency reasoning is consistent across calls (§6.2).
#[derive(Debug, Clone)]
pub struct TemporalContext {
    /// ISO-8601 date, e.g. `"2026-07-31"`.
    pub current_date: String,
}

/// Token/cost accounting for a single LLM call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    /// Input tokens consumed.
    pub prompt_tokens: u64,
    /// Output tokens produced.
    pub completion_tokens: u64,
    /// Estimated cost in USD, if the client can price it.
    pub cost_usd: f64,
}

impl Usage {
    /// Sums two usage records, as when accumulating across a run.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            cost_usd: self.cost_usd + other.cost_usd,
        }
    }
}

/// Renders a named template against a variable mapping and temporal context.
/// Out of scope: implementations own their own templating engine.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Renders `template_name` with `variables`, injecting `temporal` where the
    /// template requests it.
    async fn render(
        &self,
        template_name: &str,
        variables: &Value,
        temporal: &TemporalContext,
    ) -> anyhow::Result<String>;
}

/// A provider-agnostic LLM call: a rendered prompt in, a schema-constrained
/// JSON value and usage record out. Out of scope: implementations own the
/// actual provider integration.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Calls the model aliased by `role`, constraining its output to `schema`.
    async fn complete(
        &self,
        role: ModelRole,
        prompt: &str,
        schema: &Schema,
    ) -> anyhow::Result<(Value, Usage)>;
}
