//! Manager (§4.9): the Prioritizer and Saturation Detector that steer the
//! orchestrator between completed tasks.

use recon_core::model::Constraints;
use recon_core::prompt::ModelRole;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::invoker::PromptInvoker;

/// Compact view of a completed goal fed to the `task_prioritization` template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CompletedTaskSummary {
    /// Goal id.
    pub id: String,
    /// The query or description that was executed.
    pub query: String,
    /// Results gathered for this goal.
    pub results_count: u32,
    /// Entities extracted, if extraction ran.
    #[serde(default)]
    pub entities_count_if_extracted: Option<u32>,
    /// Coverage score, if a saturation decision produced one.
    #[serde(default)]
    pub coverage_score_if_any: Option<f32>,
    /// Gaps the LLM identified while processing this goal.
    #[serde(default)]
    pub gaps_identified: Vec<String>,
}

/// Compact view of a pending goal fed to the `task_prioritization` template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PendingTaskSummary {
    /// Goal id.
    pub id: String,
    /// Goal description.
    pub description: String,
}

/// One assigned priority from the `task_prioritization` response.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AssignedPriority {
    /// Goal id this assignment applies to.
    pub task_id: String,
    /// 1 (highest) to 10 (lowest).
    pub priority: u8,
    /// Estimated value of pursuing this goal, 0-100.
    pub estimated_value: u8,
    /// Estimated redundancy with already-gathered evidence, 0-100.
    pub estimated_redundancy: u8,
    /// Why the Manager assigned this priority.
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct PrioritizationResponse {
    priorities: Vec<AssignedPriority>,
    #[serde(default)]
    global_coverage_assessment: String,
}

/// Assigns priorities to `pending`. Handles the 0/1/N special cases before
/// ever calling the LLM (§4.9).
pub async fn prioritize(
    research_question: &str,
    pending: &[PendingTaskSummary],
    completed: &[CompletedTaskSummary],
    elapsed_minutes: f64,
    deduplication_rate: f32,
    invoker: &PromptInvoker,
) -> Vec<AssignedPriority> {
    match pending.len() {
        0 => Vec::new(),
        1 => vec![AssignedPriority {
            task_id: pending[0].id.clone(),
            priority: 1,
            estimated_value: 50,
            estimated_redundancy: 0,
            reasoning: "only pending goal".to_string(),
        }],
        _ => {
            let vars = json!({
                "research_question": research_question,
                "elapsed_minutes": elapsed_minutes,
                "completed_task_summaries": completed,
                "pending_task_summaries": pending,
                "global_coverage_summary": "",
                "deduplication_rate": deduplication_rate,
            });
            match invoker
                .invoke::<PrioritizationResponse>("task_prioritization", vars, ModelRole::Scoping)
                .await
            {
                Ok((response, _usage)) => response.priorities,
                Err(_) => pending
                    .iter()
                    .map(|p| AssignedPriority {
                        task_id: p.id.clone(),
                        priority: 5,
                        estimated_value: 50,
                        estimated_redundancy: 0,
                        reasoning: "prioritization unavailable; default priority".to_string(),
                    })
                    .collect(),
            }
        }
    }
}

/// Computes `1 - (unique raws / total raws fetched across all completed
/// goals)` (§4.9).
#[must_use]
pub fn deduplication_rate(total_raws_fetched: u64, unique_raws: u64) -> f32 {
    if total_raws_fetched == 0 {
        return 0.0;
    }
    1.0 - (unique_raws as f32 / total_raws_fetched as f32)
}

/// Per-goal metrics fed to the `saturation_detection` template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RecentTaskMetrics {
    /// Goal id.
    pub id: String,
    /// New (non-duplicate) results this goal contributed.
    pub results_new: u32,
    /// Duplicate results this goal encountered.
    pub results_duplicate: u32,
    /// Coverage score, if any.
    #[serde(default)]
    pub coverage_score: Option<f32>,
    /// `new / total`, or 0.0 when total is 0.
    pub incremental_value: f32,
}

/// Pending-goal preview fed to the `saturation_detection` template.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PendingPreview {
    /// Goal id.
    pub id: String,
    /// Priority assigned by the Prioritizer.
    pub priority: u8,
    /// Estimated value.
    pub estimated_value: u8,
    /// Estimated redundancy.
    pub estimated_redundancy: u8,
}

/// Recommended follow-up after a saturation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Stop enqueueing new goals.
    Stop,
    /// Continue, but cap the remaining goal budget.
    ContinueLimited,
    /// Continue without changing budgets.
    ContinueFull,
}

/// The `saturation_detection` template's response (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SaturationCheckResult {
    /// Whether the detector judges the research complete.
    pub saturated: bool,
    /// Confidence in the verdict, 0-100.
    pub confidence: u8,
    /// Why the detector reached this verdict.
    #[serde(default)]
    pub rationale: String,
    /// What the orchestrator should do next.
    pub recommendation: Recommendation,
    /// Additional tasks to allow when `recommendation == continue_limited`.
    #[serde(default)]
    pub recommended_additional_tasks: u32,
}

/// Whether the saturation detector should run at all, given how many goals
/// have completed and the configured interval (§4.9, boundary behavior:
/// `saturation_check_interval = 0` disables the detector).
#[must_use]
pub fn should_check_saturation(completed_count: usize, interval: u32) -> bool {
    if interval == 0 || completed_count < 3 {
        return false;
    }
    (completed_count as u32).is_multiple_of(interval)
}

/// Runs the Saturation Detector (§4.9). Only authoritative when
/// `saturated == true && confidence >= threshold`; callers should otherwise
/// treat the run as not-yet-saturated regardless of the raw response.
pub async fn is_saturated(
    research_question: &str,
    recent_tasks: &[RecentTaskMetrics],
    pending_preview: &[PendingPreview],
    invoker: &PromptInvoker,
) -> Option<SaturationCheckResult> {
    let vars = json!({
        "research_question": research_question,
        "recent_tasks": recent_tasks,
        "pending_preview": pending_preview,
    });
    invoker
        .invoke::<SaturationCheckResult>("saturation_detection", vars, ModelRole::Scoping)
        .await
        .ok()
        .map(|(result, _usage)| result)
}

/// Applies a `continue_limited` recommendation: lowers `max_goals` to
/// `min(max_goals, completed + k)` (§4.9).
pub fn apply_continue_limited(constraints: &mut Constraints, completed: usize, additional_tasks: u32) {
    let capped = completed as u64 + u64::from(additional_tasks);
    let capped = usize::try_from(capped).unwrap_or(usize::MAX);
    constraints.max_goals = constraints.max_goals.min(capped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{ScriptedLlm, StubRenderer};
    use std::sync::Arc;

    #[tokio::test]
    async fn zero_pending_is_a_no_op() {
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), Arc::new(ScriptedLlm::new()), "2026-07-31");
        let result = prioritize("q", &[], &[], 1.0, 0.0, &invoker).await;
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn single_pending_gets_priority_one_without_llm_call() {
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), Arc::new(ScriptedLlm::new()), "2026-07-31");
        let pending = vec![PendingTaskSummary {
            id: "g1".to_string(),
            description: "only goal".to_string(),
        }];
        let result = prioritize("q", &pending, &[], 1.0, 0.0, &invoker).await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].priority, 1);
    }

    #[test]
    fn saturation_check_interval_zero_disables_detector() {
        assert!(!should_check_saturation(3, 0));
        assert!(!should_check_saturation(30, 0));
    }

    #[test]
    fn saturation_check_requires_at_least_three_completed() {
        assert!(!should_check_saturation(2, 1));
        assert!(should_check_saturation(3, 1));
    }

    #[test]
    fn saturation_check_respects_interval() {
        assert!(!should_check_saturation(4, 3));
        assert!(should_check_saturation(6, 3));
    }

    #[tokio::test]
    async fn s6_saturation_detector_signals_stop() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push(
            ModelRole::Scoping,
            serde_json::json!({
                "saturated": true,
                "confidence": 90,
                "rationale": "diminishing returns",
                "recommendation": "stop",
                "recommended_additional_tasks": 0,
            }),
        );
        let invoker = PromptInvoker::new(Arc::new(StubRenderer), llm, "2026-07-31");

        let recent = vec![
            RecentTaskMetrics { id: "g1".into(), results_new: 10, results_duplicate: 0, coverage_score: None, incremental_value: 1.0 },
            RecentTaskMetrics { id: "g2".into(), results_new: 9, results_duplicate: 1, coverage_score: None, incremental_value: 0.9 },
            RecentTaskMetrics { id: "g3".into(), results_new: 1, results_duplicate: 9, coverage_score: None, incremental_value: 0.1 },
        ];

        let result = is_saturated("q", &recent, &[], &invoker).await.unwrap();
        assert!(result.saturated);
        assert!(result.confidence >= 70);
        assert_eq!(result.recommendation, Recommendation::Stop);
    }

    #[test]
    fn continue_limited_lowers_max_goals() {
        let mut constraints = Constraints::default();
        constraints.max_goals = 50;
        apply_continue_limited(&mut constraints, 10, 3);
        assert_eq!(constraints.max_goals, 13);
    }

    #[test]
    fn deduplication_rate_is_one_minus_unique_over_total() {
        assert!((deduplication_rate(10, 4) - 0.6).abs() < f32::EPSILON);
        assert_eq!(deduplication_rate(0, 0), 0.0);
    }
}
