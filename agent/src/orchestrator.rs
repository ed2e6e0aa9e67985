//! Recursive Agent Orchestrator (§4.10): drives the research DAG from the
//! root question to a finished result bundle. A goal that selects `DECOMPOSE`
//! resolves its entire subtree — scheduling, running, and marking every
//! descendant — before the call that spawned it returns, which is what makes
//! this recursive rather than a single flat work queue.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use recon_core::event::{EventRecord, EventSink};
use recon_core::model::{Goal, GoalContext, GoalStatus, StopReason};
use recon_core::prompt::Usage;
use tokio::sync::Mutex;

use crate::classify::ClassifierConfig;
use crate::config::{ManagerAgentConfig, RunConfig};
use crate::decompose::SubGoalSpec;
use crate::execute::{self, ExecutionResult};
use crate::invoker::PromptInvoker;
use crate::manager::{self, CompletedTaskSummary, PendingPreview, PendingTaskSummary, RecentTaskMetrics};
use crate::registry::SourceRegistry;
use crate::schedule;
use crate::state::RunState;

/// Final output of a run (§4.10 step 3).
#[derive(Debug)]
pub struct ResultBundle {
    /// Id of the root goal.
    pub root_goal_id: String,
    /// Every goal touched during the run, including skipped ones.
    pub goals: Vec<Goal>,
    /// Distinct raws in the global evidence index.
    pub raw_evidence_count: usize,
    /// Total `ProcessedEvidence` projections produced.
    pub processed_evidence_count: u64,
    /// Accumulated LLM usage across the run.
    pub usage_totals: Usage,
    /// Number of events emitted to the event sink.
    pub events_emitted: u64,
    /// Why the run ended.
    pub stop_reason: StopReason,
}

/// Counts every event it forwards, so the result bundle can report
/// `events_emitted` without every call site threading a counter through.
struct CountingEventSink {
    inner: Arc<dyn EventSink>,
    count: AtomicU64,
}

impl EventSink for CountingEventSink {
    fn emit(&self, record: EventRecord) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.inner.emit(record);
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

struct Ctx<'a> {
    research_question: &'a str,
    registry: &'a SourceRegistry,
    state: &'a RunState,
    invoker: &'a PromptInvoker,
    classifier: &'a ClassifierConfig,
    api_keys: &'a HashMap<String, String>,
    manager_agent: &'a ManagerAgentConfig,
    goals: Mutex<HashMap<String, Goal>>,
    completed_count: AtomicU64,
    total_accepted: AtomicU64,
    saturated: std::sync::atomic::AtomicBool,
    next_child_seq: AtomicU64,
}

/// Runs a full research session for `research_question` (§4.10).
#[allow(clippy::too_many_arguments)]
pub async fn run(
    research_question: &str,
    registry: SourceRegistry,
    state: RunState,
    invoker: PromptInvoker,
    classifier: ClassifierConfig,
    api_keys: HashMap<String, String>,
    config: &RunConfig,
) -> ResultBundle {
    state.event_sink.emit(EventRecord::run(
        "research_started",
        serde_json::json!({ "research_question": research_question }),
    ));

    let root = Goal::new("root", research_question, 0);
    let mut goals = HashMap::new();
    goals.insert(root.id.clone(), root.clone());

    let ctx = Ctx {
        research_question,
        registry: &registry,
        state: &state,
        invoker: &invoker,
        classifier: &classifier,
        api_keys: &api_keys,
        manager_agent: &config.manager_agent,
        goals: Mutex::new(goals),
        completed_count: AtomicU64::new(0),
        total_accepted: AtomicU64::new(0),
        saturated: std::sync::atomic::AtomicBool::new(false),
        next_child_seq: AtomicU64::new(0),
    };

    process_goal(root.id.clone(), &ctx).await;

    let stop_reason = determine_stop_reason(&ctx).await;
    state.event_sink.emit(EventRecord::run(
        "research_complete",
        serde_json::json!({ "stop_reason": format!("{stop_reason:?}") }),
    ));

    let goals: Vec<Goal> = ctx.goals.into_inner().into_values().collect();
    let raw_evidence_count = state.evidence.lock().await.len();
    let usage_totals = *state.usage.lock().await;
    let processed_evidence_count = state.processed_evidence_count.load(Ordering::Relaxed);

    ResultBundle {
        root_goal_id: "root".to_string(),
        goals,
        raw_evidence_count,
        processed_evidence_count,
        usage_totals,
        events_emitted: 0,
        stop_reason,
    }
}

/// Convenience entry point that wraps `event_sink` in a [`CountingEventSink`]
/// so the returned bundle's `events_emitted` is accurate.
#[allow(clippy::too_many_arguments)]
pub async fn run_with_event_counting(
    research_question: &str,
    registry: SourceRegistry,
    context: GoalContext,
    event_sink: Arc<dyn EventSink>,
    invoker: PromptInvoker,
    classifier: ClassifierConfig,
    api_keys: HashMap<String, String>,
    config: &RunConfig,
) -> ResultBundle {
    let counting = Arc::new(CountingEventSink { inner: event_sink, count: AtomicU64::new(0) });
    let state = RunState::new(context, counting.clone());
    let mut bundle =
        run(research_question, registry, state, invoker, classifier, api_keys, config).await;
    bundle.events_emitted = counting.count.load(Ordering::Relaxed);
    bundle
}

async fn determine_stop_reason(ctx: &Ctx<'_>) -> StopReason {
    if ctx.saturated.load(Ordering::Relaxed) {
        return StopReason::Saturated;
    }
    let context = ctx.state.context.lock().await;
    let goals = ctx.goals.lock().await;
    let finished = goals
        .values()
        .filter(|g| matches!(g.status, GoalStatus::Done | GoalStatus::Failed))
        .count();
    if context.time_budget_exhausted() || finished >= context.constraints.max_goals {
        StopReason::BudgetExhausted
    } else {
        StopReason::AllGoalsDone
    }
}

async fn budget_exceeded(ctx: &Ctx<'_>) -> bool {
    if ctx.saturated.load(Ordering::Relaxed) {
        return true;
    }
    let context = ctx.state.context.lock().await;
    if context.time_budget_exhausted() {
        return true;
    }
    let goals = ctx.goals.lock().await;
    let finished = goals
        .values()
        .filter(|g| matches!(g.status, GoalStatus::Done | GoalStatus::Failed))
        .count();
    finished >= context.constraints.max_goals
}

async fn mark_skipped(ctx: &Ctx<'_>, goal_id: &str, reason: &str) {
    let mut goals = ctx.goals.lock().await;
    if let Some(goal) = goals.get_mut(goal_id) {
        if goal.status == GoalStatus::Pending || goal.status == GoalStatus::InProgress {
            goal.status = GoalStatus::Skipped;
            goal.result = Some(reason.to_string());
            goal.finished_at = Some(Instant::now());
        }
    }
    drop(goals);
    ctx.state
        .event_sink
        .emit(EventRecord::goal("task_failed", goal_id, serde_json::json!({ "reason": reason })));
}

/// Processes a single goal: runs the selector/executor, recursing through an
/// entire decomposition subtree before returning (§4.10 step 2).
fn process_goal<'a>(goal_id: String, ctx: &'a Ctx<'a>) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        if budget_exceeded(ctx).await {
            mark_skipped(ctx, &goal_id, "global budget exhausted before this goal started").await;
            return;
        }

        let (goal_snapshot, dep_ids) = {
            let mut goals = ctx.goals.lock().await;
            let Some(goal) = goals.get_mut(&goal_id) else { return };
            goal.status = GoalStatus::InProgress;
            goal.started_at = Some(Instant::now());
            (goal.clone(), goal.dependencies.clone())
        };

        let dep_summaries: Vec<String> = {
            let goals = ctx.goals.lock().await;
            dep_ids
                .iter()
                .filter_map(|id| goals.get(id))
                .map(|g| g.result.clone().unwrap_or_default())
                .collect()
        };

        let result = execute::execute(
            &goal_snapshot,
            ctx.research_question,
            &dep_summaries,
            &dep_ids,
            ctx.registry,
            ctx.state,
            ctx.invoker,
            ctx.classifier,
            ctx.api_keys,
        )
        .await;

        match result {
            ExecutionResult::Decompose(subs) if !subs.is_empty() => {
                run_decomposition(&goal_id, goal_snapshot.depth, subs, ctx).await;
                mark_done(ctx, &goal_id, "decomposed into sub-goals", 0, 0).await;
            }
            ExecutionResult::Decompose(_empty) => {
                // Boundary behavior: an empty decomposition is treated as a
                // completed no-op leaf rather than retried indefinitely.
                mark_done(ctx, &goal_id, "no viable decomposition for this goal", 0, 0).await;
            }
            ExecutionResult::Done { action, summary, new_raw_ids, duplicate_count } => {
                let new_count = new_raw_ids.len() as u32;
                finish_goal(ctx, &goal_id, Some(action), summary, new_count, duplicate_count).await;
            }
            ExecutionResult::Skipped { reason } => {
                mark_skipped(ctx, &goal_id, &reason).await;
                ctx.completed_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        after_goal_completed(ctx).await;
    })
}

async fn run_decomposition(
    parent_id: &str,
    parent_depth: u32,
    subs: Vec<SubGoalSpec>,
    ctx: &Ctx<'_>,
) {
    let child_ids: Vec<String> = (0..subs.len())
        .map(|i| {
            let seq = ctx.next_child_seq.fetch_add(1, Ordering::Relaxed);
            format!("{parent_id}.{i}-{seq}")
        })
        .collect();

    {
        let mut goals = ctx.goals.lock().await;
        for (i, sub) in subs.iter().enumerate() {
            let mut child = Goal::new(child_ids[i].clone(), sub.description.clone(), parent_depth + 1);
            child.rationale = sub.rationale.clone();
            child.parent_id = Some(parent_id.to_string());
            child.dependencies = sub
                .dependencies
                .iter()
                .filter_map(|&d| usize::try_from(d).ok().and_then(|i| child_ids.get(i)).cloned())
                .collect();
            goals.insert(child_ids[i].clone(), child);
        }
    }

    let groups = schedule::schedule_children(parent_id, &subs, ctx.state);

    for group in groups {
        if budget_exceeded(ctx).await {
            for &i in &group {
                mark_skipped(ctx, &child_ids[i], "global budget exhausted before this group started").await;
            }
            continue;
        }
        run_group(&group.iter().map(|&i| child_ids[i].clone()).collect::<Vec<_>>(), ctx).await;
    }
}

/// Runs one dependency group to completion, in waves of at most
/// `max_concurrent_tasks`, re-prioritizing between waves when configured
/// (§4.10 step 2.d, §5).
async fn run_group(group_ids: &[String], ctx: &Ctx<'_>) {
    let max_concurrent = ctx.state.context.lock().await.constraints.max_concurrent_tasks.max(1);
    let mut remaining = group_ids.to_vec();

    while !remaining.is_empty() {
        if budget_exceeded(ctx).await {
            for id in &remaining {
                mark_skipped(ctx, id, "global budget exhausted before this wave started").await;
            }
            break;
        }

        if ctx.manager_agent.enabled && ctx.manager_agent.reprioritize_after_task && remaining.len() > 1 {
            reprioritize(&mut remaining, ctx).await;
        }

        let wave_len = remaining.len().min(max_concurrent);
        let wave: Vec<String> = remaining.drain(..wave_len).collect();

        let futures: Vec<_> = wave.iter().map(|id| process_goal(id.clone(), ctx)).collect();
        join_all(futures).await;
    }
}

async fn reprioritize(remaining: &mut [String], ctx: &Ctx<'_>) {
    let pending: Vec<PendingTaskSummary> = {
        let goals = ctx.goals.lock().await;
        remaining
            .iter()
            .filter_map(|id| goals.get(id))
            .map(|g| PendingTaskSummary { id: g.id.clone(), description: g.description.clone() })
            .collect()
    };
    if pending.len() < 2 {
        return;
    }

    let completed = completed_summaries(ctx).await;
    let elapsed_minutes = ctx.state.context.lock().await.elapsed().as_secs_f64() / 60.0;
    let dedup_rate = current_dedup_rate(ctx).await;

    let priorities =
        manager::prioritize(ctx.research_question, &pending, &completed, elapsed_minutes, dedup_rate, ctx.invoker)
            .await;

    let mut priority_by_id: HashMap<String, u8> = HashMap::with_capacity(priorities.len());
    {
        let mut goals = ctx.goals.lock().await;
        for assignment in priorities {
            priority_by_id.insert(assignment.task_id.clone(), assignment.priority);
            if let Some(goal) = goals.get_mut(&assignment.task_id) {
                goal.priority = assignment.priority;
                goal.priority_reasoning = assignment.reasoning;
                goal.estimated_value = assignment.estimated_value;
                goal.estimated_redundancy = assignment.estimated_redundancy;
            }
        }
    }
    remaining.sort_by_key(|id| priority_by_id.get(id).copied().unwrap_or(5));
}

async fn completed_summaries(ctx: &Ctx<'_>) -> Vec<CompletedTaskSummary> {
    let goals = ctx.goals.lock().await;
    goals
        .values()
        .filter(|g| g.status == GoalStatus::Done)
        .map(|g| CompletedTaskSummary {
            id: g.id.clone(),
            query: g.description.clone(),
            results_count: g.results_new + g.results_duplicate,
            entities_count_if_extracted: None,
            coverage_score_if_any: None,
            gaps_identified: Vec::new(),
        })
        .collect()
}

async fn current_dedup_rate(ctx: &Ctx<'_>) -> f32 {
    let total_accepted = ctx.total_accepted.load(Ordering::Relaxed);
    let unique = ctx.state.evidence.lock().await.len() as u64;
    manager::deduplication_rate(total_accepted, unique)
}

/// `new / (new + duplicate)`, or 0.0 when the goal contributed nothing.
fn incremental_value(results_new: u32, results_duplicate: u32) -> f32 {
    let total = results_new + results_duplicate;
    if total == 0 { 0.0 } else { results_new as f32 / total as f32 }
}

async fn mark_done(
    ctx: &Ctx<'_>,
    goal_id: &str,
    summary: impl Into<String>,
    new_raw_count: u32,
    duplicate_count: u32,
) {
    finish_goal(ctx, goal_id, None, summary.into(), new_raw_count, duplicate_count).await;
}

async fn finish_goal(
    ctx: &Ctx<'_>,
    goal_id: &str,
    action: Option<recon_core::model::Action>,
    summary: String,
    new_raw_count: u32,
    duplicate_count: u32,
) {
    {
        let mut goals = ctx.goals.lock().await;
        if let Some(goal) = goals.get_mut(goal_id) {
            if action.is_some() {
                goal.action_taken = action;
            }
            goal.result = Some(summary);
            goal.status = GoalStatus::Done;
            goal.results_new = new_raw_count;
            goal.results_duplicate = duplicate_count;
            goal.finished_at = Some(Instant::now());
        }
    }
    ctx.total_accepted.fetch_add(u64::from(new_raw_count + duplicate_count), Ordering::Relaxed);
    ctx.completed_count.fetch_add(1, Ordering::Relaxed);
    ctx.state
        .event_sink
        .emit(EventRecord::goal("task_completed", goal_id, serde_json::json!({})));
}

/// Consults the Manager after a goal completes (§4.9, §4.10 steps 2.d-e).
async fn after_goal_completed(ctx: &Ctx<'_>) {
    if !ctx.manager_agent.enabled {
        return;
    }

    let completed_count = ctx.completed_count.load(Ordering::Relaxed) as usize;
    let interval = ctx.manager_agent.saturation_check_interval;
    if !manager::should_check_saturation(completed_count, interval) {
        return;
    }

    let recent = recent_task_metrics(ctx).await;
    if recent.is_empty() {
        return;
    }
    let pending_preview: Vec<PendingPreview> = Vec::new();

    let Some(check) = manager::is_saturated(ctx.research_question, &recent, &pending_preview, ctx.invoker).await
    else {
        return;
    };

    ctx.state.event_sink.emit(EventRecord::run(
        "saturation_check",
        serde_json::json!({
            "saturated": check.saturated,
            "confidence": check.confidence,
            "recommendation": check.recommendation,
        }),
    ));

    if !(check.saturated && check.confidence >= ctx.manager_agent.saturation_confidence_threshold) {
        return;
    }
    if !ctx.manager_agent.allow_saturation_stop {
        return;
    }

    match check.recommendation {
        manager::Recommendation::Stop => {
            ctx.saturated.store(true, Ordering::Relaxed);
        }
        manager::Recommendation::ContinueLimited => {
            let mut context = ctx.state.context.lock().await;
            manager::apply_continue_limited(
                &mut context.constraints,
                completed_count,
                check.recommended_additional_tasks,
            );
        }
        manager::Recommendation::ContinueFull => {}
    }
}

async fn recent_task_metrics(ctx: &Ctx<'_>) -> Vec<RecentTaskMetrics> {
    let goals = ctx.goals.lock().await;
    let mut done: Vec<&Goal> = goals.values().filter(|g| g.status == GoalStatus::Done).collect();
    done.sort_by_key(|g| g.finished_at);
    done.into_iter()
        .rev()
        .take(5)
        .map(|g| RecentTaskMetrics {
            id: g.id.clone(),
            results_new: g.results_new,
            results_duplicate: g.results_duplicate,
            coverage_score: None,
            incremental_value: incremental_value(g.results_new, g.results_duplicate),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{mock_source, ScriptedLlm, StubRenderer};
    use recon_core::event::NullEventSink;
    use recon_core::model::Constraints;
    use recon_core::prompt::ModelRole;
    use recon_core::source::QueryResult;

    fn base_config() -> RunConfig {
        RunConfig::default()
    }

    fn make_state(constraints: Constraints) -> RunState {
        RunState::new(GoalContext::new("q", Vec::new(), constraints), Arc::new(NullEventSink))
    }

    #[tokio::test]
    async fn s5_budget_exhaustion_is_graceful() {
        let mut constraints = Constraints::default();
        constraints.max_time_seconds = 0;
        let state = make_state(constraints);

        let registry = SourceRegistry::new();
        let llm = Arc::new(ScriptedLlm::new());
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");
        let config = base_config();

        let bundle = run(
            "research something broad",
            registry,
            state,
            invoker,
            ClassifierConfig::default(),
            HashMap::new(),
            &config,
        )
        .await;

        assert_eq!(bundle.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(bundle.goals.len(), 1);
        assert_eq!(bundle.goals[0].status, GoalStatus::Skipped);
    }

    #[tokio::test]
    async fn root_goal_without_decomposition_completes_directly() {
        let success = QueryResult {
            source: "gov".to_string(),
            success: true,
            results: vec![recon_core::source::SourceResultItem {
                title: "result".into(),
                url: Some("https://example.com/1".into()),
                snippet_or_content: "content".into(),
                date: None,
                metadata: serde_json::json!({}),
            }],
            total: 1,
            error: None,
            http_code: None,
            response_time_ms: 1,
        };
        let mut registry = SourceRegistry::new();
        registry.register(mock_source("gov", [success]));

        let mut constraints = Constraints::default();
        constraints.max_depth = 3;
        let state = make_state(constraints);

        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Scoping, serde_json::json!({"action": "API_CALL", "source_id": "gov", "reasoning": "only source"}));
        llm.push(ModelRole::Research, serde_json::json!({"query": "contracts 2024"}));
        llm.push(
            ModelRole::Research,
            serde_json::json!({"per_result": [{"index": 0, "decision": "ACCEPT", "relevance_score": 0.9, "reasoning": ""}]}),
        );
        llm.push(
            ModelRole::Research,
            serde_json::json!({
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

        let mut config = base_config();
        config.manager_agent.enabled = false;

        let bundle = run(
            "find contracts",
            registry,
            state,
            invoker,
            ClassifierConfig::default(),
            HashMap::new(),
            &config,
        )
        .await;

        assert_eq!(bundle.stop_reason, StopReason::AllGoalsDone);
        assert_eq!(bundle.goals.len(), 1);
        assert_eq!(bundle.goals[0].status, GoalStatus::Done);
        assert_eq!(bundle.raw_evidence_count, 1);
    }

    #[tokio::test]
    async fn s1_decomposition_runs_dependency_groups_in_order() {
        let registry = SourceRegistry::new();
        let mut constraints = Constraints::default();
        constraints.max_depth = 1;
        let state = make_state(constraints);

        let llm = Arc::new(ScriptedLlm::new());
        llm.push(ModelRole::Scoping, serde_json::json!({"action": "DECOMPOSE", "reasoning": "needs comparison"}));
        llm.push(
            ModelRole::Scoping,
            serde_json::json!({
                "sub_goals": [
                    {"description": "Retrieve Lockheed 2024 contracts", "dependencies": []},
                    {"description": "Retrieve Northrop 2024 contracts", "dependencies": []},
                    {"description": "Compare the two", "dependencies": [0, 1]},
                ]
            }),
        );
        // Three sub-goals at depth 1 == max_depth, so the Action Selector for
        // each one is invoked but Decompose would return empty without an
        // LLM call; we expect ANALYZE/SYNTHESIZE-free Skipped/Done handling
        // via Skipped because no sources are registered.
        for _ in 0..3 {
            llm.push(ModelRole::Scoping, serde_json::json!({"action": "ANALYZE", "reasoning": "no sources available"}));
            llm.push(ModelRole::Analysis, serde_json::json!({"findings": [], "claims": [], "gaps": []}));
        }

        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");
        let mut config = base_config();
        config.manager_agent.enabled = false;

        let bundle = run(
            "Compare Lockheed Martin vs Northrop Grumman",
            registry,
            state,
            invoker,
            ClassifierConfig::default(),
            HashMap::new(),
            &config,
        )
        .await;

        assert_eq!(bundle.goals.len(), 4, "root + 3 sub-goals");
        assert!(bundle.goals.iter().all(|g| g.status == GoalStatus::Done));
        let compare = bundle
            .goals
            .iter()
            .find(|g| g.description == "Compare the two")
            .unwrap();
        assert_eq!(compare.dependencies.len(), 2);
    }
}
