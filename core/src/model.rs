//! Shared data model for the research agent: goals, evidence, errors, and the
//! structured LLM-facing types that flow between the [`crate::source`] and
//! [`crate::prompt`] contracts and the orchestration engine.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Immutable per-run knobs. Owned by the orchestrator; never mutated after a run starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// Maximum decomposition depth; the root goal is depth 0.
    pub max_depth: u32,
    /// Maximum number of goals (done + failed) the run may execute.
    pub max_goals: usize,
    /// Wall-clock budget for the whole run.
    pub max_time_seconds: u64,
    /// Per-source query ceiling. Missing entries fall back to `default_max_queries_per_source`.
    pub max_queries_per_source: HashMap<String, u32>,
    /// Fallback query ceiling for sources with no explicit entry.
    pub default_max_queries_per_source: u32,
    /// Wall-clock budget for a single (goal, source) saturation session.
    pub max_time_per_source_seconds: u64,
    /// Maximum reformulation attempts per (goal, source) session.
    pub max_reformulation_attempts: u32,
    /// Cooldown recorded against a source once it is rate-limited (informational; sources stay
    /// excluded for the rest of the run per invariant 7, the cooldown is not currently replayed).
    pub rate_limit_cooldown_seconds: u64,
    /// Run the saturation detector every N completed goals. Zero disables it.
    pub saturation_check_interval: u32,
    /// Minimum confidence (0-100) required to honor a SATURATED detector verdict.
    pub saturation_confidence_threshold: u8,
    /// Maximum goals dispatched concurrently within a dependency group.
    pub max_concurrent_tasks: usize,
}

impl Constraints {
    /// Returns the query ceiling configured for `source_id`.
    #[must_use]
    pub fn max_queries_for(&self, source_id: &str) -> u32 {
        self.max_queries_per_source
            .get(source_id)
            .copied()
            .unwrap_or(self.default_max_queries_per_source)
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_goals: 50,
            max_time_seconds: 600,
            max_queries_per_source: HashMap::new(),
            default_max_queries_per_source: 5,
            max_time_per_source_seconds: 120,
            max_reformulation_attempts: 2,
            rate_limit_cooldown_seconds: 300,
            saturation_check_interval: 3,
            saturation_confidence_threshold: 70,
            max_concurrent_tasks: 4,
        }
    }
}

/// Capability metadata a [`crate::source::SourceAdapter`] advertises to the planner.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SourceCapability {
    /// Stable source identifier, e.g. `"usaspending"`.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Coarse category used for prompting (government, social, web, legal, ...).
    pub category: String,
    /// Free-form description of what the source covers.
    pub description: String,
    /// Whether an API key is required to query this source.
    pub requires_api_key: bool,
    /// Free-form characteristics, e.g. `{"requires_formal_names": "true"}`.
    #[serde(default)]
    pub characteristics: HashMap<String, String>,
    /// Short strategies the query generator can lean on.
    #[serde(default)]
    pub query_strategies: Vec<String>,
    /// Typical result count per query, for prompting.
    pub typical_result_count: u32,
    /// Suggested maximum number of queries before diminishing returns.
    pub recommended_max_queries: u32,
}

/// Run-scoped state shared by every component. `GoalContext` is the home for
/// the mutable state called out by the concurrency model (§5): the global
/// evidence index, the rate-limit blocklist, and the event sink.
#[derive(Debug)]
pub struct GoalContext {
    /// The user's original research question, unchanged for the run.
    pub original_objective: String,
    /// Sources visible to the planner for this run (registry's enabled set).
    pub available_sources: Vec<SourceCapability>,
    /// Immutable run constraints.
    pub constraints: Constraints,
    /// When the run started.
    pub start_time: Instant,
    /// Sources excluded from further action selection for the rest of the run.
    pub rate_limited_sources: HashSet<String>,
}

impl GoalContext {
    /// Creates a new context for a run starting now.
    #[must_use]
    pub fn new(
        original_objective: impl Into<String>,
        available_sources: Vec<SourceCapability>,
        constraints: Constraints,
    ) -> Self {
        Self {
            original_objective: original_objective.into(),
            available_sources,
            constraints,
            start_time: Instant::now(),
            rate_limited_sources: HashSet::new(),
        }
    }

    /// Time elapsed since the run started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Whether the run's global time budget has elapsed (invariant 5).
    #[must_use]
    pub fn time_budget_exhausted(&self) -> bool {
        self.elapsed().as_secs() >= self.constraints.max_time_seconds
    }

    /// Marks `source_id` as rate-limited for the remainder of the run (invariant 7).
    pub fn rate_limit(&mut self, source_id: impl Into<String>) {
        self.rate_limited_sources.insert(source_id.into());
    }

    /// Whether `source_id` has been rate-limited this run.
    #[must_use]
    pub fn is_rate_limited(&self, source_id: &str) -> bool {
        self.rate_limited_sources.contains(source_id)
    }
}

/// Status of a [`Goal`] in the DAG. Transitions only move forward
/// (`pending -> in_progress -> {done, failed, skipped}`, invariant 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalStatus {
    /// Not yet started.
    Pending,
    /// Currently executing.
    InProgress,
    /// Finished successfully.
    Done,
    /// Finished with an unrecoverable error.
    Failed,
    /// Never executed (e.g. its only viable source was rate-limited).
    Skipped,
}

/// The five verbs the Action Selector can choose for a goal.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Split the goal into sub-goals via the Goal Decomposer.
    Decompose,
    /// Query a structured data source.
    ApiCall {
        /// Target source id.
        source_id: String,
    },
    /// Query a web search source. Scheduled identically to `ApiCall`, distinguished only
    /// for prompting.
    WebSearch {
        /// Target source id.
        source_id: String,
    },
    /// Analyze previously gathered evidence; no external I/O.
    Analyze {
        /// Raw evidence ids this action may read.
        evidence_ids: Vec<u64>,
    },
    /// Terminal action: synthesize a structured summary for the goal.
    Synthesize {
        /// Raw evidence ids this action may cite.
        evidence_ids: Vec<u64>,
    },
}

/// A node in the research DAG.
#[derive(Debug, Clone)]
pub struct Goal {
    /// Stable id, unique within the run.
    pub id: String,
    /// Natural-language description of what this goal must accomplish.
    pub description: String,
    /// Why this goal exists (decomposer's rationale, or "root" for the top goal).
    pub rationale: String,
    /// Depth in the DAG; the root goal is 0.
    pub depth: u32,
    /// Parent goal id, if any.
    pub parent_id: Option<String>,
    /// Ids of sibling goals this goal depends on (resolved during scheduling).
    pub dependencies: Vec<String>,
    /// 1 (highest) to 10 (lowest); default 5.
    pub priority: u8,
    /// Why the Manager assigned this priority.
    pub priority_reasoning: String,
    /// Estimated value of pursuing this goal, 0-100.
    pub estimated_value: u8,
    /// Estimated redundancy with already-gathered evidence, 0-100.
    pub estimated_redundancy: u8,
    /// Current lifecycle status.
    pub status: GoalStatus,
    /// The action chosen for this goal, once selected.
    pub action_taken: Option<Action>,
    /// Opaque textual result produced by executing the action.
    pub result: Option<String>,
    /// New (non-duplicate) raw results this goal contributed to the global index.
    pub results_new: u32,
    /// Accepted results that turned out to be duplicates of evidence already indexed.
    pub results_duplicate: u32,
    /// When execution of this goal began.
    pub started_at: Option<Instant>,
    /// When execution of this goal finished.
    pub finished_at: Option<Instant>,
}

impl Goal {
    /// Creates a new pending goal with default priority.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>, depth: u32) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            rationale: String::new(),
            depth,
            parent_id: None,
            dependencies: Vec::new(),
            priority: 5,
            priority_reasoning: String::new(),
            estimated_value: 50,
            estimated_redundancy: 0,
            status: GoalStatus::Pending,
            action_taken: None,
            result: None,
            results_new: 0,
            results_duplicate: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Structured, classified representation of a source-adapter failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ErrorCategory {
    /// 401/403 or an auth-shaped message.
    Authentication,
    /// 429 or a rate-limit-shaped message.
    RateLimit,
    /// 400/422 or a validation-shaped message.
    Validation,
    /// 404.
    NotFound,
    /// 5xx.
    ServerError,
    /// The call timed out.
    Timeout,
    /// Connection/DNS-level failure.
    Network,
    /// Didn't match any known pattern.
    Unknown,
}

/// The Error Classifier's output (§4.1). Pure and deterministic given its inputs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiError {
    /// HTTP status code, if the failure came from an HTTP call.
    pub http_code: Option<u16>,
    /// Classified category.
    pub category: ErrorCategory,
    /// Original message, preserved for logging.
    pub message: String,
    /// Whether retrying the same query may succeed (e.g. after a cooldown).
    pub is_retryable: bool,
    /// Whether rewording the query may succeed.
    pub is_reformulable: bool,
    /// Which source produced this error.
    pub source_id: String,
}

/// Immutable record of a single result fetched from a source. Once inserted into the
/// global evidence index, none of these fields may be mutated (invariant 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResult {
    /// Opaque API payload, preserved verbatim.
    pub api_response: serde_json::Value,
    /// Which source produced this result.
    pub source_id: String,
    /// The query parameters that produced this result.
    pub query_params: String,
    /// Unix timestamp (seconds) this result was fetched.
    pub fetched_at: u64,
    /// Round-trip time of the query, in milliseconds.
    pub response_time_ms: u64,
    /// Result title.
    pub title: String,
    /// Canonicalized URL, if the source provided one.
    pub url: Option<String>,
    /// Full untruncated content (invariant 3: never truncated by this crate).
    pub raw_content: String,
    /// ISO date the source itself attached to the record, if any.
    pub structured_date: Option<String>,
    /// Dates best-effort extracted from free text; absence is not an error (§9).
    pub content_dates: Vec<String>,
}

/// A goal-focused projection of a [`RawResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvidence {
    /// Id of the raw result this was derived from.
    pub raw_result_id: u64,
    /// Short extracted facts.
    pub extracted_facts: Vec<String>,
    /// Normalized entity names mentioned in the result.
    pub extracted_entities: Vec<String>,
    /// Dates found in the text, each with surrounding context.
    pub extracted_dates: Vec<(String, String)>,
    /// Relevance to the owning goal, 0.0-1.0.
    pub relevance_score: f32,
    /// Why the extractor scored it this way.
    pub relevance_reasoning: String,
    /// Short LLM-facing summary (kept well under full content length).
    pub summary: String,
    /// The goal this projection was produced for.
    pub goal_id: String,
    /// Model alias that produced the extraction.
    pub extracted_by_model: String,
}

/// One outbound query made during a saturation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryAttempt {
    /// 1-based position within the session.
    pub query_num: u32,
    /// The query actually sent.
    pub query: String,
    /// Why the generator chose this query.
    pub reasoning: String,
    /// Total results returned.
    pub results_total: u32,
    /// Results accepted by the filter.
    pub results_accepted: u32,
    /// Results rejected by the filter.
    pub results_rejected: u32,
    /// Accepted results that were already seen (de-dup).
    pub results_duplicate: u32,
    /// Recurring rejection themes surfaced by the filter.
    pub rejection_themes: Vec<String>,
    /// `results_accepted / results_total`, or 0.0 when nothing was returned.
    pub effectiveness: f32,
    /// Classified error, if the query failed outright.
    pub error: Option<ApiError>,
}

impl QueryAttempt {
    /// Effectiveness view used in the history summary fed back to the LLM (§4.5 step 1).
    #[must_use]
    pub fn summarize(&self) -> QueryAttemptSummary {
        QueryAttemptSummary {
            query: self.query.clone(),
            results_total: self.results_total,
            results_accepted: self.results_accepted,
            effectiveness: self.effectiveness,
            rejection_themes: self.rejection_themes.clone(),
        }
    }
}

/// Compact projection of a [`QueryAttempt`] used to avoid context bloat when
/// summarizing the last five attempts for the saturation prompt.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueryAttemptSummary {
    /// The query that was sent.
    pub query: String,
    /// Total results returned.
    pub results_total: u32,
    /// Results accepted.
    pub results_accepted: u32,
    /// Accepted / total.
    pub effectiveness: f32,
    /// Recurring rejection themes.
    pub rejection_themes: Vec<String>,
}

/// Expected value bucket attached to a [`SaturationDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedValue {
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
}

/// Continue-or-stop verdict the LLM renders each saturation loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SaturationDecision {
    /// Whether another query should be attempted.
    pub decision: SaturationVerdict,
    /// Why the LLM reached this verdict.
    pub reasoning: String,
    /// Confidence in the verdict, 0-100.
    pub confidence: u8,
    /// Confidence that relevant information still exists at this source, 0-100.
    pub existence_confidence: u8,
    /// Required when `decision == Continue`.
    pub next_query: Option<String>,
    /// Reasoning behind `next_query`.
    pub next_query_reasoning: String,
    /// Expected value of the next query.
    pub expected_value: ExpectedValue,
    /// Gaps the LLM believes remain.
    pub remaining_gaps: Vec<String>,
}

/// The two possible saturation verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaturationVerdict {
    /// Keep querying this source.
    Continue,
    /// The source is exhausted for this goal.
    Saturated,
}

/// Mutually exclusive reasons a saturation session exits (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaturationExitReason {
    /// The LLM judged the source exhausted.
    LlmSaturated,
    /// `max_queries_per_source` was reached.
    MaxQueriesReached,
    /// `max_time_per_source_seconds` elapsed.
    TimeLimitReached,
    /// The source returned a rate-limit error.
    RateLimited,
    /// A non-reformulable error ended the session.
    UnfixableError,
    /// The query generator proposed an empty query.
    EmptyQuerySuggestion,
    /// The query generator itself failed.
    QueryGenerationError,
}

/// Terminal classification of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// A global budget (`max_goals` or `max_time_seconds`) was hit.
    BudgetExhausted,
    /// The saturation detector declared the research complete.
    Saturated,
    /// The pending queue drained naturally.
    AllGoalsDone,
}
