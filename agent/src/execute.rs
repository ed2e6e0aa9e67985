//! Action Executor (§4.6): runs the Action Selector, then dispatches on the
//! five `Action` variants. `DECOMPOSE` only produces sub-goal specs — the
//! orchestrator, not this module, inserts them into the DAG.

use std::collections::HashSet;

use recon_core::event::EventRecord;
use recon_core::model::{Action, Goal, SourceCapability};
use recon_core::prompt::ModelRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classify::ClassifierConfig;
use crate::decompose::{self, SubGoalSpec};
use crate::invoker::PromptInvoker;
use crate::registry::SourceRegistry;
use crate::saturate::{self, SaturationOutcome};
use crate::state::RunState;

/// Upper bound on a SYNTHESIZE action's prose, enforced defensively in case
/// the LLM ignores the prompt's own limit.
const MAX_SYNTHESIS_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum ActionKind {
    Decompose,
    ApiCall,
    WebSearch,
    Analyze,
    Synthesize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct AssessmentResponse {
    action: ActionKind,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct Claim {
    text: String,
    #[serde(default)]
    supporting_raw_ids: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct AnalysisResponse {
    findings: Vec<String>,
    #[serde(default)]
    claims: Vec<Claim>,
    #[serde(default)]
    gaps: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SynthesisResponse {
    summary: String,
    #[serde(default)]
    references: Vec<String>,
}

/// What executing one goal's action produced.
#[derive(Debug)]
pub enum ExecutionResult {
    /// The selector chose `DECOMPOSE`; sub-goal specs for the orchestrator
    /// to schedule and insert.
    Decompose(Vec<SubGoalSpec>),
    /// The action ran to completion.
    Done {
        /// The action that was executed.
        action: Action,
        /// Opaque textual result for the goal record.
        summary: String,
        /// Raw ids newly inserted during this action, if any.
        new_raw_ids: Vec<u64>,
        /// Accepted results that turned out to be already in the index, if
        /// this was an I/O action (0 for ANALYZE/SYNTHESIZE).
        duplicate_count: u32,
    },
    /// No viable action could be satisfied (e.g. only source was rate-limited).
    Skipped {
        /// Why the goal was skipped.
        reason: String,
    },
}

/// Runs the Action Selector for `goal`, then dispatches (§4.6).
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    goal: &Goal,
    original_objective: &str,
    dependency_evidence_summaries: &[String],
    dependency_goal_ids: &[String],
    registry: &SourceRegistry,
    state: &RunState,
    invoker: &PromptInvoker,
    classifier: &ClassifierConfig,
    api_keys: &std::collections::HashMap<String, String>,
) -> ExecutionResult {
    let mut masked_sources: HashSet<String> = HashSet::new();

    for attempt in 0..2 {
        let assessment = match select_action(
            goal,
            original_objective,
            dependency_evidence_summaries,
            registry,
            state,
            invoker,
            &masked_sources,
        )
        .await
        {
            Some(a) => a,
            None => {
                return ExecutionResult::Skipped {
                    reason: "action selector failed or returned invalid output".to_string(),
                };
            }
        };

        match assessment.action {
            ActionKind::Decompose => {
                let available = {
                    let context = state.context.lock().await;
                    context.available_sources.clone()
                };
                let constraints = {
                    let context = state.context.lock().await;
                    context.constraints.clone()
                };
                let subs = decompose::decompose(
                    goal,
                    original_objective,
                    dependency_evidence_summaries,
                    &available,
                    &constraints,
                    dependency_goal_ids,
                    invoker,
                    state,
                )
                .await;
                return ExecutionResult::Decompose(subs);
            }
            ActionKind::ApiCall | ActionKind::WebSearch => {
                let Some(source_id) = assessment.source_id.clone() else {
                    return ExecutionResult::Skipped {
                        reason: "selector chose an I/O action without a source_id".to_string(),
                    };
                };

                let is_rate_limited = state.context.lock().await.is_rate_limited(&source_id);
                if is_rate_limited {
                    if attempt == 0 {
                        masked_sources.insert(source_id);
                        continue;
                    }
                    return ExecutionResult::Skipped {
                        reason: format!("source {source_id} is rate-limited for the rest of this run"),
                    };
                }

                let Some(registered) = registry.get(&source_id) else {
                    return ExecutionResult::Skipped {
                        reason: format!("unknown source {source_id}"),
                    };
                };

                let outcome = saturate::saturate(
                    &goal.id,
                    &goal.description,
                    &registered,
                    state,
                    invoker,
                    classifier,
                    api_keys.get(&source_id).map(String::as_str),
                )
                .await;

                let action = if matches!(assessment.action, ActionKind::ApiCall) {
                    Action::ApiCall { source_id: source_id.clone() }
                } else {
                    Action::WebSearch { source_id: source_id.clone() }
                };

                if !outcome.new_raw_ids.is_empty() {
                    let extractor = crate::evidence::LlmEvidenceExtractor::new(invoker);
                    let evidence = state.evidence.lock().await;
                    if let Ok(projected) = evidence
                        .project(&goal.id, &outcome.new_raw_ids, &extractor)
                        .await
                    {
                        state.record_processed(projected.len() as u64);
                    }
                }

                let duplicate_count = outcome.attempts.iter().map(|a| a.results_duplicate).sum();
                return ExecutionResult::Done {
                    action,
                    summary: summarize_saturation(&source_id, &outcome),
                    new_raw_ids: outcome.new_raw_ids,
                    duplicate_count,
                };
            }
            ActionKind::Analyze => {
                let evidence_ids = gather_evidence_ids(goal, dependency_goal_ids, state).await;
                let response =
                    run_analysis(goal, original_objective, dependency_evidence_summaries, &evidence_ids, invoker)
                        .await;

                let Some(response) = response else {
                    return ExecutionResult::Skipped {
                        reason: "analysis invocation failed".to_string(),
                    };
                };

                return ExecutionResult::Done {
                    action: Action::Analyze { evidence_ids },
                    summary: format_analysis(&response),
                    new_raw_ids: Vec::new(),
                    duplicate_count: 0,
                };
            }
            ActionKind::Synthesize => {
                let evidence_ids = gather_evidence_ids(goal, dependency_goal_ids, state).await;
                let response =
                    run_synthesis(goal, original_objective, dependency_evidence_summaries, &evidence_ids, invoker)
                        .await;

                let Some(mut response) = response else {
                    return ExecutionResult::Skipped {
                        reason: "synthesis invocation failed".to_string(),
                    };
                };
                if response.summary.chars().count() > MAX_SYNTHESIS_CHARS {
                    response.summary = response.summary.chars().take(MAX_SYNTHESIS_CHARS).collect();
                }

                return ExecutionResult::Done {
                    action: Action::Synthesize { evidence_ids },
                    summary: format_synthesis(&response),
                    new_raw_ids: Vec::new(),
                    duplicate_count: 0,
                };
            }
        }
    }

    ExecutionResult::Skipped {
        reason: "no satisfiable action after masking rate-limited source".to_string(),
    }
}

async fn select_action(
    goal: &Goal,
    original_objective: &str,
    dependency_evidence_summaries: &[String],
    registry: &SourceRegistry,
    state: &RunState,
    invoker: &PromptInvoker,
    masked_sources: &HashSet<String>,
) -> Option<AssessmentResponse> {
    let (available, remaining_time_seconds) = {
        let context = state.context.lock().await;
        let remaining = context
            .constraints
            .max_time_seconds
            .saturating_sub(context.elapsed().as_secs());
        let available: Vec<SourceCapability> = context
            .available_sources
            .iter()
            .filter(|c| !masked_sources.contains(&c.id) && !context.is_rate_limited(&c.id))
            .cloned()
            .collect();
        (available, remaining)
    };
    let _ = registry;

    let vars = json!({
        "goal": goal.description,
        "goal_id": goal.id,
        "depth": goal.depth,
        "original_objective": original_objective,
        "sibling_findings": dependency_evidence_summaries,
        "remaining_time_seconds": remaining_time_seconds,
        "available_sources": available,
    });

    let (response, usage) = invoker
        .invoke::<AssessmentResponse>("assessment", vars, ModelRole::Scoping)
        .await
        .ok()?;
    state.record_usage(usage).await;
    state.event_sink.emit(EventRecord::goal(
        "action_selected",
        &goal.id,
        json!({ "action": response.action, "source_id": response.source_id }),
    ));
    Some(response)
}

async fn gather_evidence_ids(
    goal: &Goal,
    dependency_goal_ids: &[String],
    state: &RunState,
) -> Vec<u64> {
    let evidence = state.evidence.lock().await;
    let mut ids: HashSet<u64> = evidence.raw_ids_for_goal(&goal.id);
    for dep_id in dependency_goal_ids {
        ids.extend(evidence.raw_ids_for_goal(dep_id));
    }
    let mut ids: Vec<u64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids
}

async fn run_analysis(
    goal: &Goal,
    original_objective: &str,
    sibling_findings: &[String],
    evidence_ids: &[u64],
    invoker: &PromptInvoker,
) -> Option<AnalysisResponse> {
    let vars = json!({
        "goal": goal.description,
        "goal_id": goal.id,
        "original_objective": original_objective,
        "evidence_ids": evidence_ids,
        "sibling_findings": sibling_findings,
    });
    invoker
        .invoke::<AnalysisResponse>("analysis", vars, ModelRole::Analysis)
        .await
        .ok()
        .map(|(response, _usage)| response)
}

async fn run_synthesis(
    goal: &Goal,
    original_objective: &str,
    sibling_findings: &[String],
    evidence_ids: &[u64],
    invoker: &PromptInvoker,
) -> Option<SynthesisResponse> {
    let vars = json!({
        "goal": goal.description,
        "goal_id": goal.id,
        "original_objective": original_objective,
        "evidence_ids": evidence_ids,
        "sibling_findings": sibling_findings,
        "max_chars": MAX_SYNTHESIS_CHARS,
    });
    invoker
        .invoke::<SynthesisResponse>("synthesis", vars, ModelRole::Synthesis)
        .await
        .ok()
        .map(|(response, _usage)| response)
}

fn summarize_saturation(source_id: &str, outcome: &SaturationOutcome) -> String {
    let accepted: u32 = outcome.attempts.iter().map(|a| a.results_accepted).sum();
    format!(
        "{source_id}: {} queries, {accepted} accepted results, exit={:?}",
        outcome.attempts.len(),
        outcome.exit_reason
    )
}

fn format_analysis(response: &AnalysisResponse) -> String {
    format!(
        "{} findings, {} claims, {} gaps identified",
        response.findings.len(),
        response.claims.len(),
        response.gaps.len()
    )
}

fn format_synthesis(response: &SynthesisResponse) -> String {
    response.summary.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use crate::testutil::{mock_source, ScriptedLlm, StubRenderer};
    use recon_core::event::NullEventSink;
    use recon_core::model::{Constraints, GoalContext};
    use recon_core::source::QueryResult;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn make_state(constraints: Constraints) -> RunState {
        RunState::new(
            GoalContext::new("objective", Vec::new(), constraints),
            Arc::new(NullEventSink),
        )
    }

    #[tokio::test]
    async fn rate_limited_source_is_masked_then_skipped() {
        let mut registry = SourceRegistry::new();
        registry.register(mock_source("gov", []));
        let state = make_state(Constraints::default());
        state.context.lock().await.rate_limit("gov");

        let goal = Goal::new("g1", "find contracts", 0);
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Scoping,
            json!({"action": "API_CALL", "source_id": "gov", "reasoning": "only source"}),
        );
        llm.push(
            ModelRole::Scoping,
            json!({"action": "API_CALL", "source_id": "gov", "reasoning": "still only source"}),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let result = execute(
            &goal,
            "objective",
            &[],
            &[],
            &registry,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            &HashMap::new(),
        )
        .await;

        assert!(matches!(result, ExecutionResult::Skipped { .. }));
    }

    #[tokio::test]
    async fn api_call_action_delegates_to_saturator() {
        let success = QueryResult {
            source: "gov".to_string(),
            success: true,
            results: vec![recon_core::source::SourceResultItem {
                title: "result".into(),
                url: Some("https://example.com/1".into()),
                snippet_or_content: "content".into(),
                date: None,
                metadata: json!({}),
            }],
            total: 1,
            error: None,
            http_code: None,
            response_time_ms: 1,
        };
        let mut registry = SourceRegistry::new();
        registry.register(mock_source("gov", [success]));
        let state = make_state(Constraints::default());

        let goal = Goal::new("g1", "find contracts", 0);
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Scoping,
            json!({"action": "API_CALL", "source_id": "gov", "reasoning": "best fit"}),
        );
        llm.push(ModelRole::Research, json!({"query": "contracts 2024"}));
        llm.push(
            ModelRole::Research,
            json!({"per_result": [{"index": 0, "decision": "ACCEPT", "relevance_score": 0.9, "reasoning": ""}]}),
        );
        llm.push(
            ModelRole::Research,
            json!({
                "decision": "SATURATED",
                "reasoning": "done",
                "confidence": 90,
                "existence_confidence": 10,
                "next_query": null,
                "next_query_reasoning": "",
                "expected_value": "low",
                "remaining_gaps": [],
            }),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let result = execute(
            &goal,
            "objective",
            &[],
            &[],
            &registry,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            &HashMap::new(),
        )
        .await;

        match result {
            ExecutionResult::Done { action, new_raw_ids, .. } => {
                assert!(matches!(action, Action::ApiCall { .. }));
                assert_eq!(new_raw_ids.len(), 1);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_decomposition_is_returned_as_is() {
        let registry = SourceRegistry::new();
        let mut constraints = Constraints::default();
        constraints.max_depth = 0;
        let state = make_state(constraints);

        let goal = Goal::new("g1", "too deep to decompose", 0);
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Scoping,
            json!({"action": "DECOMPOSE", "reasoning": "seems complex"}),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let result = execute(
            &goal,
            "objective",
            &[],
            &[],
            &registry,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            &HashMap::new(),
        )
        .await;

        match result {
            ExecutionResult::Decompose(subs) => assert!(subs.is_empty()),
            other => panic!("expected Decompose([]), got {other:?}"),
        }
    }
}
