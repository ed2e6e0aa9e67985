//! Goal Decomposer (§4.7): splits a goal into 1-5 sub-goal specs, sanitizing
//! whatever dependency indices the LLM proposes before the scheduler sees them.

use recon_core::event::EventRecord;
use recon_core::model::{Constraints, Goal};
use recon_core::prompt::ModelRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::invoker::PromptInvoker;
use crate::state::RunState;

/// Coarse size estimate the LLM attaches to a sub-goal; informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedComplexity {
    /// Simple.
    Simple,
    /// Moderate.
    Moderate,
    /// Complex.
    Complex,
}

/// One proposed sub-goal, as returned by the `decomposition` template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubGoalSpec {
    /// Natural-language description of the sub-goal.
    pub description: String,
    /// Why this sub-goal exists.
    #[serde(default)]
    pub rationale: String,
    /// Informational sizing hint.
    #[serde(default = "default_complexity")]
    pub estimated_complexity: EstimatedComplexity,
    /// Indices into the returned list this sub-goal depends on. Sanitized
    /// by [`decompose`] before the scheduler ever sees the list.
    #[serde(default)]
    pub dependencies: Vec<i64>,
}

const fn default_complexity() -> EstimatedComplexity {
    EstimatedComplexity::Moderate
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct DecompositionResponse {
    sub_goals: Vec<SubGoalSpec>,
}

/// Splits `goal` into sub-goals, or returns an empty list when `goal` is
/// already at `max_depth` or the LLM declines to decompose (§4.7 step 1).
///
/// An empty return forces the Action Selector to pick a non-`DECOMPOSE`
/// action for `goal` on its next pass (a boundary behavior, not an error).
pub async fn decompose(
    goal: &Goal,
    original_objective: &str,
    sibling_summaries: &[String],
    available_sources: &[recon_core::model::SourceCapability],
    constraints: &Constraints,
    previously_completed_goals: &[String],
    invoker: &PromptInvoker,
    state: &RunState,
) -> Vec<SubGoalSpec> {
    if goal.depth >= constraints.max_depth {
        return Vec::new();
    }

    let vars = json!({
        "goal": goal.description,
        "goal_id": goal.id,
        "original_objective": original_objective,
        "sibling_summaries": sibling_summaries,
        "available_sources": available_sources,
        "previously_completed_goals": previously_completed_goals,
    });

    let response = match invoker
        .invoke::<DecompositionResponse>("decomposition", vars, ModelRole::Scoping)
        .await
    {
        Ok((response, _usage)) => response,
        Err(_) => return Vec::new(),
    };

    let raw_count = response.sub_goals.len();
    let sanitized = sanitize(response.sub_goals);

    state.event_sink.emit(EventRecord::goal(
        "llm_decomposition_response",
        &goal.id,
        json!({
            "raw_sub_goal_count": raw_count,
            "sub_goals": sanitized,
        }),
    ));

    sanitized
}

/// Coerces out-of-range or non-integer-looking dependency indices to an
/// empty list and drops self-references (§4.7 step 3).
fn sanitize(sub_goals: Vec<SubGoalSpec>) -> Vec<SubGoalSpec> {
    let len = sub_goals.len();
    sub_goals
        .into_iter()
        .enumerate()
        .map(|(i, mut spec)| {
            spec.dependencies.retain(|&dep| {
                dep >= 0 && (dep as usize) < len && dep as usize != i
            });
            spec.dependencies.sort_unstable();
            spec.dependencies.dedup();
            spec
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptedLlm, StubRenderer};
    use recon_core::event::NullEventSink;
    use recon_core::model::GoalContext;
    use std::sync::Arc;

    fn make_state() -> RunState {
        RunState::new(
            GoalContext::new("q", Vec::new(), Constraints::default()),
            Arc::new(NullEventSink),
        )
    }

    #[tokio::test]
    async fn depth_at_max_returns_empty_without_calling_llm() {
        let mut constraints = Constraints::default();
        constraints.max_depth = 1;
        let goal = Goal::new("g1", "deep goal", 1);
        let llm = Arc::new(ScriptedLlm::new());
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");
        let state = make_state();

        let subs = decompose(&goal, "objective", &[], &[], &constraints, &[], &invoker, &state).await;
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn sanitizes_out_of_range_and_self_referencing_dependencies() {
        let goal = Goal::new("root", "Compare A vs B", 0);
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Scoping,
            json!({
                "sub_goals": [
                    {"description": "Retrieve A", "dependencies": [5]},
                    {"description": "Retrieve B", "dependencies": [1]},
                    {"description": "Compare", "dependencies": [0, 1, 99]},
                ]
            }),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");
        let state = make_state();

        let subs = decompose(
            &goal,
            "objective",
            &[],
            &[],
            &Constraints::default(),
            &[],
            &invoker,
            &state,
        )
        .await;

        assert_eq!(subs.len(), 3);
        assert!(subs[0].dependencies.is_empty(), "out-of-range index dropped");
        assert!(subs[1].dependencies.is_empty(), "self-reference dropped");
        assert_eq!(subs[2].dependencies, vec![0, 1], "99 dropped, 0 and 1 kept");
    }

    #[tokio::test]
    async fn s1_dependency_respecting_decomposition() {
        let goal = Goal::new("root", "Compare Lockheed Martin vs Northrop Grumman", 0);
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Scoping,
            json!({
                "sub_goals": [
                    {"description": "Retrieve Lockheed 2024 contracts", "dependencies": []},
                    {"description": "Retrieve Northrop 2024 contracts", "dependencies": []},
                    {"description": "Compare the two", "dependencies": [0, 1]},
                ]
            }),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");
        let state = make_state();

        let subs = decompose(
            &goal,
            "objective",
            &[],
            &[],
            &Constraints::default(),
            &[],
            &invoker,
            &state,
        )
        .await;

        assert_eq!(subs.len(), 3);
        assert_eq!(subs[2].dependencies, vec![0, 1]);
    }
}
