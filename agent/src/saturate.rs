//! Source Saturator (§4.5): drives the per-(goal, source) query loop until the
//! source is judged exhausted, a hard limit is hit, or an unfixable error ends
//! the session. The single largest component; everything here maps directly
//! onto the ten numbered steps in §4.5.

use std::time::{Duration, Instant};

use recon_core::model::{
    ApiError, Constraints, ErrorCategory, QueryAttempt, SaturationExitReason, SaturationVerdict,
};
use recon_core::prompt::ModelRole;
use recon_core::source::SourceResultItem;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classify::{self, ClassifierConfig};
use crate::invoker::PromptInvoker;
use crate::registry::RegisteredSource;
use crate::state::RunState;

/// What generating the initial query for a session produced.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct InitialQueryResponse {
    /// The query to send. Empty means the generator had nothing useful to ask.
    query: String,
    /// Why this query was chosen.
    #[serde(default)]
    reasoning: String,
}

/// A replacement query offered after a reformulable error (§4.5 step 4).
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ReformulationResponse {
    /// The reworded query, or empty if no rewording seems viable.
    query: String,
    /// Why this rewording should avoid the prior error.
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum FilterDecision {
    Accept,
    Reject,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct PerResultDecision {
    /// Index into the result list this decision applies to.
    index: usize,
    decision: FilterDecision,
    /// 0.0-1.0.
    #[serde(default)]
    relevance_score: f32,
    #[serde(default)]
    reasoning: String,
}

/// The `result_filtering` template's response shape (§4.5 step 5).
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ResultFilterResponse {
    per_result: Vec<PerResultDecision>,
    #[serde(default)]
    rejection_themes: Vec<String>,
    #[serde(default)]
    information_gaps_identified: Vec<String>,
    #[serde(default)]
    key_insights: Vec<String>,
}

/// What a completed saturation session produced, handed back to the Action
/// Executor.
#[derive(Debug, Clone)]
pub struct SaturationOutcome {
    /// Why the session ended.
    pub exit_reason: SaturationExitReason,
    /// Every query attempted, in order.
    pub attempts: Vec<QueryAttempt>,
    /// Raw ids newly inserted into the global index during this session
    /// (already associated with the goal).
    pub new_raw_ids: Vec<u64>,
    /// Distinct rejection themes seen across all attempts.
    pub rejection_themes: Vec<String>,
    /// Information gaps surfaced by the filter and the saturation decision.
    pub remaining_gaps: Vec<String>,
}

/// Runs the saturation loop for `goal_id` against `source` until exhaustion
/// (§4.5).
#[allow(clippy::too_many_arguments)]
pub async fn saturate(
    goal_id: &str,
    objective: &str,
    source: &RegisteredSource,
    state: &RunState,
    invoker: &PromptInvoker,
    classifier: &ClassifierConfig,
    api_key: Option<&str>,
) -> SaturationOutcome {
    let source_id = source.capability.id.clone();
    let max_queries = {
        let context = state.context.lock().await;
        context.constraints.max_queries_for(&source_id)
    };
    let max_time = {
        let context = state.context.lock().await;
        Duration::from_secs(context.constraints.max_time_per_source_seconds)
    };
    let max_reformulations = {
        let context = state.context.lock().await;
        context.constraints.max_reformulation_attempts
    };

    let session_start = Instant::now();
    emit_event(
        state,
        "source_saturation_start",
        goal_id,
        json!({ "source_id": source_id }),
    )
    .await;

    let mut attempts: Vec<QueryAttempt> = Vec::new();
    let mut new_raw_ids: Vec<u64> = Vec::new();
    let mut rejection_themes: Vec<String> = Vec::new();
    let mut remaining_gaps: Vec<String> = Vec::new();
    let mut reformulation_attempts: u32 = 0;

    let mut next_query = match generate_initial_query(objective, &source_id, invoker).await {
        Ok(Some(query)) => query,
        Ok(None) => {
            return finish(
                state,
                goal_id,
                &source_id,
                SaturationExitReason::EmptyQuerySuggestion,
                attempts,
                new_raw_ids,
                rejection_themes,
                remaining_gaps,
            )
            .await;
        }
        Err(()) => {
            return finish(
                state,
                goal_id,
                &source_id,
                SaturationExitReason::QueryGenerationError,
                attempts,
                new_raw_ids,
                rejection_themes,
                remaining_gaps,
            )
            .await;
        }
    };

    loop {
        if attempts.len() as u32 >= max_queries {
            return finish(
                state,
                goal_id,
                &source_id,
                SaturationExitReason::MaxQueriesReached,
                attempts,
                new_raw_ids,
                rejection_themes,
                remaining_gaps,
            )
            .await;
        }
        if session_start.elapsed() >= max_time {
            return finish(
                state,
                goal_id,
                &source_id,
                SaturationExitReason::TimeLimitReached,
                attempts,
                new_raw_ids,
                rejection_themes,
                remaining_gaps,
            )
            .await;
        }

        let query_num = attempts.len() as u32 + 1;
        let result = source
            .adapter
            .execute_search(&next_query, api_key, source.capability.typical_result_count)
            .await;

        let query_result = match result {
            Ok(r) => r,
            Err(e) => {
                let api_error = classify::classify(classifier, &e.to_string(), None, &source_id);
                attempts.push(failed_attempt(query_num, &next_query, api_error.clone()));
                emit_query_attempt(state, goal_id, attempts.last().unwrap()).await;

                match handle_error(
                    &api_error,
                    &mut reformulation_attempts,
                    max_reformulations,
                    state,
                    goal_id,
                    objective,
                    &source_id,
                    invoker,
                )
                .await
                {
                    ErrorOutcome::Exit(reason) => {
                        return finish(
                            state,
                            goal_id,
                            &source_id,
                            reason,
                            attempts,
                            new_raw_ids,
                            rejection_themes,
                            remaining_gaps,
                        )
                        .await;
                    }
                    ErrorOutcome::Retry(query) => {
                        next_query = query;
                        continue;
                    }
                }
            }
        };

        if !query_result.success {
            let api_error = classify::classify(
                classifier,
                query_result.error.as_deref().unwrap_or("unknown failure"),
                query_result.http_code,
                &source_id,
            );
            attempts.push(failed_attempt(query_num, &next_query, api_error.clone()));
            emit_query_attempt(state, goal_id, attempts.last().unwrap()).await;

            match handle_error(
                &api_error,
                &mut reformulation_attempts,
                max_reformulations,
                state,
                goal_id,
                objective,
                &source_id,
                invoker,
            )
            .await
            {
                ErrorOutcome::Exit(reason) => {
                    return finish(
                        state,
                        goal_id,
                        &source_id,
                        reason,
                        attempts,
                        new_raw_ids,
                        rejection_themes,
                        remaining_gaps,
                    )
                    .await;
                }
                ErrorOutcome::Retry(query) => {
                    next_query = query;
                    continue;
                }
            }
        }

        let filter = filter_results(
            goal_id,
            objective,
            &next_query,
            &query_result.results,
            invoker,
        )
        .await;

        let (accepted, rejected, duplicate, inserted_ids, attempt_themes, gaps_found) = match filter
        {
            Ok(response) => {
                let themes = response.rejection_themes.clone();
                let gaps = response.information_gaps_identified.clone();
                let (accepted, rejected, duplicate, inserted) = apply_filter(
                    goal_id,
                    &source_id,
                    &next_query,
                    &query_result.results,
                    response,
                    state,
                )
                .await;
                (accepted, rejected, duplicate, inserted, themes, gaps)
            }
            Err(()) => (
                0,
                query_result.results.len() as u32,
                0,
                Vec::new(),
                Vec::new(),
                Vec::new(),
            ),
        };
        new_raw_ids.extend(inserted_ids);
        for theme in attempt_themes.iter().cloned() {
            if !rejection_themes.contains(&theme) {
                rejection_themes.push(theme);
            }
        }
        for gap in gaps_found {
            if !remaining_gaps.contains(&gap) {
                remaining_gaps.push(gap);
            }
        }

        let total = query_result.total.max(query_result.results.len() as u32);
        let effectiveness = if total == 0 {
            0.0
        } else {
            f32::from(accepted as u16) / f32::from(total as u16)
        };

        attempts.push(QueryAttempt {
            query_num,
            query: next_query.clone(),
            reasoning: String::new(),
            results_total: total,
            results_accepted: accepted,
            results_rejected: rejected,
            results_duplicate: duplicate,
            rejection_themes: attempt_themes,
            effectiveness,
            error: None,
        });
        emit_query_attempt(state, goal_id, attempts.last().unwrap()).await;

        let decision = match ask_saturation_decision(
            goal_id,
            objective,
            &source_id,
            &attempts,
            invoker,
        )
        .await
        {
            Ok(decision) => decision,
            Err(()) => {
                return finish(
                    state,
                    goal_id,
                    &source_id,
                    SaturationExitReason::QueryGenerationError,
                    attempts,
                    new_raw_ids,
                    rejection_themes,
                    remaining_gaps,
                )
                .await;
            }
        };
        for gap in &decision.remaining_gaps {
            if !remaining_gaps.contains(gap) {
                remaining_gaps.push(gap.clone());
            }
        }

        match decision.decision {
            SaturationVerdict::Saturated => {
                return finish(
                    state,
                    goal_id,
                    &source_id,
                    SaturationExitReason::LlmSaturated,
                    attempts,
                    new_raw_ids,
                    rejection_themes,
                    remaining_gaps,
                )
                .await;
            }
            SaturationVerdict::Continue => match decision.next_query {
                Some(query) if !query.trim().is_empty() => {
                    next_query = query;
                }
                _ => {
                    return finish(
                        state,
                        goal_id,
                        &source_id,
                        SaturationExitReason::EmptyQuerySuggestion,
                        attempts,
                        new_raw_ids,
                        rejection_themes,
                        remaining_gaps,
                    )
                    .await;
                }
            },
        }
    }
}

enum ErrorOutcome {
    Exit(SaturationExitReason),
    Retry(String),
}

#[allow(clippy::too_many_arguments)]
async fn handle_error(
    api_error: &ApiError,
    reformulation_attempts: &mut u32,
    max_reformulations: u32,
    state: &RunState,
    goal_id: &str,
    objective: &str,
    source_id: &str,
    invoker: &PromptInvoker,
) -> ErrorOutcome {
    if api_error.category == ErrorCategory::RateLimit {
        state.context.lock().await.rate_limit(source_id);
        return ErrorOutcome::Exit(SaturationExitReason::RateLimited);
    }
    if matches!(
        api_error.category,
        ErrorCategory::Authentication | ErrorCategory::NotFound
    ) {
        return ErrorOutcome::Exit(SaturationExitReason::UnfixableError);
    }
    if api_error.is_reformulable && *reformulation_attempts < max_reformulations {
        *reformulation_attempts += 1;
        match reformulate_query(goal_id, objective, source_id, api_error, invoker).await {
            Ok(Some(query)) => return ErrorOutcome::Retry(query),
            Ok(None) | Err(()) => return ErrorOutcome::Exit(SaturationExitReason::UnfixableError),
        }
    }
    ErrorOutcome::Exit(SaturationExitReason::UnfixableError)
}

fn failed_attempt(query_num: u32, query: &str, error: ApiError) -> QueryAttempt {
    QueryAttempt {
        query_num,
        query: query.to_string(),
        reasoning: String::new(),
        results_total: 0,
        results_accepted: 0,
        results_rejected: 0,
        results_duplicate: 0,
        rejection_themes: Vec::new(),
        effectiveness: 0.0,
        error: Some(error),
    }
}

async fn generate_initial_query(
    objective: &str,
    source_id: &str,
    invoker: &PromptInvoker,
) -> Result<Option<String>, ()> {
    let vars = json!({ "objective": objective, "source_id": source_id });
    match invoker
        .invoke::<InitialQueryResponse>("initial_query", vars, ModelRole::Research)
        .await
    {
        Ok((response, _usage)) if response.query.trim().is_empty() => Ok(None),
        Ok((response, _usage)) => Ok(Some(response.query)),
        Err(_) => Err(()),
    }
}

async fn reformulate_query(
    goal_id: &str,
    objective: &str,
    source_id: &str,
    error: &ApiError,
    invoker: &PromptInvoker,
) -> Result<Option<String>, ()> {
    let vars = json!({
        "goal_id": goal_id,
        "objective": objective,
        "source_id": source_id,
        "error_message": error.message,
        "error_category": error.category,
    });
    match invoker
        .invoke::<ReformulationResponse>("query_reformulation", vars, ModelRole::Research)
        .await
    {
        Ok((response, _usage)) if response.query.trim().is_empty() => Ok(None),
        Ok((response, _usage)) => Ok(Some(response.query)),
        Err(_) => Err(()),
    }
}

async fn filter_results(
    goal_id: &str,
    objective: &str,
    query: &str,
    results: &[SourceResultItem],
    invoker: &PromptInvoker,
) -> Result<ResultFilterResponse, ()> {
    if results.is_empty() {
        return Ok(ResultFilterResponse {
            per_result: Vec::new(),
            rejection_themes: Vec::new(),
            information_gaps_identified: Vec::new(),
            key_insights: Vec::new(),
        });
    }
    let vars = json!({
        "goal_id": goal_id,
        "objective": objective,
        "query": query,
        "results": results,
    });
    invoker
        .invoke::<ResultFilterResponse>("result_filtering", vars, ModelRole::Research)
        .await
        .map(|(response, _usage)| response)
        .map_err(|_| ())
}

async fn apply_filter(
    goal_id: &str,
    source_id: &str,
    query: &str,
    results: &[SourceResultItem],
    filter: ResultFilterResponse,
    state: &RunState,
) -> (u32, u32, u32, Vec<u64>) {
    let mut accepted = 0u32;
    let mut rejected = 0u32;
    let mut duplicate = 0u32;
    let mut inserted = Vec::new();

    let fetched_at = recon_core::event::EventRecord::run("_", serde_json::Value::Null).timestamp;

    let mut evidence = state.evidence.lock().await;
    for decision in &filter.per_result {
        let Some(item) = results.get(decision.index) else {
            continue;
        };
        if decision.decision != FilterDecision::Accept {
            rejected += 1;
            continue;
        }

        let raw = recon_core::model::RawResult {
            api_response: item.metadata.clone(),
            source_id: source_id.to_string(),
            query_params: query.to_string(),
            fetched_at,
            response_time_ms: 0,
            title: item.title.clone(),
            url: item.url.clone(),
            raw_content: item.snippet_or_content.clone(),
            structured_date: item.date.clone(),
            content_dates: Vec::new(),
        };

        let (id, was_new) = evidence.insert_raw(raw);
        evidence.associate(goal_id, id);
        accepted += 1;
        if was_new {
            inserted.push(id);
        } else {
            duplicate += 1;
        }
    }

    (accepted, rejected, duplicate, inserted)
}

async fn ask_saturation_decision(
    goal_id: &str,
    objective: &str,
    source_id: &str,
    attempts: &[QueryAttempt],
    invoker: &PromptInvoker,
) -> Result<recon_core::model::SaturationDecision, ()> {
    let history: Vec<_> = attempts.iter().rev().take(5).map(QueryAttempt::summarize).collect();
    let vars = json!({
        "goal_id": goal_id,
        "objective": objective,
        "source_id": source_id,
        "history": history,
    });
    invoker
        .invoke::<recon_core::model::SaturationDecision>(
            "source_saturation",
            vars,
            ModelRole::Research,
        )
        .await
        .map(|(decision, _usage)| decision)
        .map_err(|_| ())
}

async fn emit_event(state: &RunState, event_type: &str, goal_id: &str, data: serde_json::Value) {
    state
        .event_sink
        .emit(recon_core::event::EventRecord::goal(event_type, goal_id, data));
}

async fn emit_query_attempt(state: &RunState, goal_id: &str, attempt: &QueryAttempt) {
    let data = serde_json::to_value(attempt).unwrap_or(serde_json::Value::Null);
    emit_event(state, "query_attempt", goal_id, data).await;
}

#[allow(clippy::too_many_arguments)]
async fn finish(
    state: &RunState,
    goal_id: &str,
    source_id: &str,
    exit_reason: SaturationExitReason,
    attempts: Vec<QueryAttempt>,
    new_raw_ids: Vec<u64>,
    rejection_themes: Vec<String>,
    remaining_gaps: Vec<String>,
) -> SaturationOutcome {
    emit_event(
        state,
        "source_saturation_complete",
        goal_id,
        json!({
            "source_id": source_id,
            "exit_reason": format!("{exit_reason:?}"),
            "query_count": attempts.len(),
            "new_raw_count": new_raw_ids.len(),
        }),
    )
    .await;

    SaturationOutcome {
        exit_reason,
        attempts,
        new_raw_ids,
        rejection_themes,
        remaining_gaps,
    }
}

/// Query ceiling is never exceeded regardless of what the LLM proposes
/// (invariant 4).
#[must_use]
pub fn query_ceiling_respected(constraints: &Constraints, source_id: &str, attempts: usize) -> bool {
    attempts as u32 <= constraints.max_queries_for(source_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegisteredSource;
    use crate::testutil::{ScriptedLlm, StubRenderer};
    use recon_core::event::NullEventSink;
    use recon_core::model::{Constraints, ExpectedValue, GoalContext, SaturationDecision};
    use recon_core::source::QueryResult;
    use std::sync::Arc;

    fn make_source(
        id: &str,
        responses: impl IntoIterator<Item = QueryResult>,
    ) -> RegisteredSource {
        let adapter = crate::testutil::mock_source(id, responses);
        RegisteredSource {
            capability: adapter.metadata().clone(),
            adapter,
        }
    }

    fn make_state(constraints: Constraints) -> RunState {
        let context = GoalContext::new("test objective", Vec::new(), constraints);
        RunState::new(context, Arc::new(NullEventSink))
    }

    fn success_result(source: &str, n: usize) -> QueryResult {
        QueryResult {
            source: source.to_string(),
            success: true,
            results: (0..n)
                .map(|i| SourceResultItem {
                    title: format!("result {i}"),
                    url: Some(format!("https://example.com/{source}/{i}")),
                    snippet_or_content: format!("content {i}"),
                    date: None,
                    metadata: serde_json::json!({}),
                })
                .collect(),
            total: n as u32,
            error: None,
            http_code: None,
            response_time_ms: 5,
        }
    }

    fn accept_all(n: usize) -> ResultFilterResponse {
        ResultFilterResponse {
            per_result: (0..n)
                .map(|i| PerResultDecision {
                    index: i,
                    decision: FilterDecision::Accept,
                    relevance_score: 0.9,
                    reasoning: String::new(),
                })
                .collect(),
            rejection_themes: Vec::new(),
            information_gaps_identified: Vec::new(),
            key_insights: Vec::new(),
        }
    }

    fn saturated_decision() -> SaturationDecision {
        SaturationDecision {
            decision: SaturationVerdict::Saturated,
            reasoning: "no new terms left".into(),
            confidence: 90,
            existence_confidence: 10,
            next_query: None,
            next_query_reasoning: String::new(),
            expected_value: ExpectedValue::Low,
            remaining_gaps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn saturates_after_llm_declares_done_s2() {
        let source = make_source("gov", [success_result("gov", 2)]);
        let state = make_state(Constraints::default());
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Research,
            serde_json::json!({"query": "lockheed contracts"}),
        );
        llm.push(
            ModelRole::Research,
            serde_json::to_value(accept_all(2)).unwrap(),
        );
        llm.push(
            ModelRole::Research,
            serde_json::to_value(saturated_decision()).unwrap(),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let outcome = saturate(
            "goal-1",
            "find lockheed contracts",
            &source,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            None,
        )
        .await;

        assert_eq!(outcome.exit_reason, SaturationExitReason::LlmSaturated);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.new_raw_ids.len(), 2);
    }

    #[tokio::test]
    async fn rate_limit_error_marks_source_and_exits_s3() {
        let error_result = QueryResult {
            source: "gov".to_string(),
            success: false,
            results: Vec::new(),
            total: 0,
            error: Some("Too Many Requests".to_string()),
            http_code: Some(429),
            response_time_ms: 1,
        };
        let source = make_source("gov", [error_result]);
        let state = make_state(Constraints::default());
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Research, serde_json::json!({"query": "q1"}));
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let outcome = saturate(
            "goal-1",
            "objective",
            &source,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            None,
        )
        .await;

        assert_eq!(outcome.exit_reason, SaturationExitReason::RateLimited);
        assert!(state.context.lock().await.is_rate_limited("gov"));
    }

    #[tokio::test]
    async fn validation_error_reformulates_instead_of_exiting_s4() {
        let bad = QueryResult {
            source: "gov".to_string(),
            success: false,
            results: Vec::new(),
            total: 0,
            error: Some("keywords must be >= 3 chars".to_string()),
            http_code: Some(422),
            response_time_ms: 1,
        };
        let good = success_result("gov", 1);
        let source = make_source("gov", [bad, good]);
        let state = make_state(Constraints::default());
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Research, serde_json::json!({"query": "q"}));
        llm.push(
            ModelRole::Research,
            serde_json::json!({"query": "longer query"}),
        );
        llm.push(
            ModelRole::Research,
            serde_json::to_value(accept_all(1)).unwrap(),
        );
        llm.push(
            ModelRole::Research,
            serde_json::to_value(saturated_decision()).unwrap(),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let outcome = saturate(
            "goal-1",
            "objective",
            &source,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            None,
        )
        .await;

        assert_eq!(outcome.exit_reason, SaturationExitReason::LlmSaturated);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(outcome.attempts[0].error.is_some());
        assert_eq!(outcome.new_raw_ids.len(), 1);
    }

    #[tokio::test]
    async fn query_ceiling_is_never_exceeded_i4() {
        let mut constraints = Constraints::default();
        constraints.default_max_queries_per_source = 2;
        let responses = vec![success_result("gov", 1); 10];
        let source = make_source("gov", responses);
        let state = make_state(constraints);

        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Research, serde_json::json!({"query": "q0"}));
        for _ in 0..5 {
            llm.push(
                ModelRole::Research,
                serde_json::to_value(accept_all(1)).unwrap(),
            );
            llm.push(
                ModelRole::Research,
                serde_json::json!({
                    "decision": "CONTINUE",
                    "reasoning": "more to find",
                    "confidence": 50,
                    "existence_confidence": 50,
                    "next_query": "another query",
                    "next_query_reasoning": "",
                    "expected_value": "medium",
                    "remaining_gaps": [],
                }),
            );
        }
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let outcome = saturate(
            "goal-1",
            "objective",
            &source,
            &state,
            &invoker,
            &ClassifierConfig::default(),
            None,
        )
        .await;

        assert_eq!(outcome.exit_reason, SaturationExitReason::MaxQueriesReached);
        assert_eq!(outcome.attempts.len(), 2);
        assert!(query_ceiling_respected(
            &state.context.lock().await.constraints,
            "gov",
            outcome.attempts.len(),
        ));
    }
}
