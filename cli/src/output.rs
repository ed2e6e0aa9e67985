//! Renders a [`ResultBundle`] as JSON for the terminal. `Goal` carries
//! `Instant` timestamps that don't serialize on their own, so this is a thin
//! view rather than a derive on the core type.

use recon_agent::orchestrator::ResultBundle;
use recon_core::model::{Action, Goal, GoalStatus};
use recon_core::prompt::Usage;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Serialize)]
struct GoalView<'a> {
    id: &'a str,
    description: &'a str,
    rationale: &'a str,
    depth: u32,
    parent_id: Option<&'a str>,
    dependencies: &'a [String],
    priority: u8,
    priority_reasoning: &'a str,
    estimated_value: u8,
    estimated_redundancy: u8,
    status: GoalStatus,
    action_taken: Option<&'a Action>,
    result: Option<&'a str>,
    results_new: u32,
    results_duplicate: u32,
    started: bool,
    finished: bool,
}

impl<'a> From<&'a Goal> for GoalView<'a> {
    fn from(goal: &'a Goal) -> Self {
        Self {
            id: &goal.id,
            description: &goal.description,
            rationale: &goal.rationale,
            depth: goal.depth,
            parent_id: goal.parent_id.as_deref(),
            dependencies: &goal.dependencies,
            priority: goal.priority,
            priority_reasoning: &goal.priority_reasoning,
            estimated_value: goal.estimated_value,
            estimated_redundancy: goal.estimated_redundancy,
            status: goal.status,
            action_taken: goal.action_taken.as_ref(),
            result: goal.result.as_deref(),
            results_new: goal.results_new,
            results_duplicate: goal.results_duplicate,
            started: goal.started_at.is_some(),
            finished: goal.finished_at.is_some(),
        }
    }
}

fn usage_view(usage: Usage) -> Value {
    json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "cost_usd": usage.cost_usd,
    })
}

/// Builds the JSON value printed by the CLI for a finished run.
#[must_use]
pub fn bundle_to_json(bundle: &ResultBundle) -> Value {
    let goals: Vec<GoalView<'_>> = bundle.goals.iter().map(GoalView::from).collect();
    json!({
        "root_goal_id": bundle.root_goal_id,
        "goals": goals,
        "raw_evidence_count": bundle.raw_evidence_count,
        "processed_evidence_count": bundle.processed_evidence_count,
        "usage_totals": usage_view(bundle.usage_totals),
        "events_emitted": bundle.events_emitted,
        "stop_reason": bundle.stop_reason,
    })
}
