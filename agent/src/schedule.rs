//! DAG Scheduler (§4.8): groups sub-goals into topologically-ordered batches
//! that can run concurrently, collapsing unresolvable cycles into a single
//! final group rather than deadlocking.

use recon_core::event::EventRecord;

use crate::decompose::SubGoalSpec;
use crate::state::RunState;

/// Schedules `subs` into dependency-respecting execution groups (§4.8).
///
/// Returns indices into `subs`, grouped so that every index in group `k`
/// depends only on indices in groups `0..k`. A cycle among the remaining
/// nodes collapses them into one final group (§9: "an intentional safety
/// valve against LLM-declared nonsense").
pub fn schedule_children(parent_goal_id: &str, subs: &[SubGoalSpec], state: &RunState) -> Vec<Vec<usize>> {
    let n = subs.len();
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut satisfied = vec![false; n];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut cycle_detected = false;

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<usize>, Vec<usize>) = remaining.iter().partition(|&&i| {
            subs[i]
                .dependencies
                .iter()
                .all(|&dep| satisfied[dep as usize])
        });

        if ready.is_empty() {
            cycle_detected = true;
            groups.push(remaining.clone());
            break;
        }

        for &i in &ready {
            satisfied[i] = true;
        }
        groups.push(ready);
        remaining = blocked;
    }

    let group_sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
    state.event_sink.emit(EventRecord::goal(
        "dependency_groups_execution",
        parent_goal_id,
        serde_json::json!({
            "groups": groups,
            "group_sizes": group_sizes,
            "cycle_collapsed": cycle_detected,
        }),
    ));

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::EstimatedComplexity;
    use recon_core::event::NullEventSink;
    use std::sync::Arc;

    fn spec(description: &str, deps: &[i64]) -> SubGoalSpec {
        SubGoalSpec {
            description: description.to_string(),
            rationale: String::new(),
            estimated_complexity: EstimatedComplexity::Moderate,
            dependencies: deps.to_vec(),
        }
    }

    fn make_state() -> RunState {
        RunState::new(
            recon_core::model::GoalContext::new(
                "q",
                Vec::new(),
                recon_core::model::Constraints::default(),
            ),
            Arc::new(NullEventSink),
        )
    }

    #[test]
    fn s1_two_independent_then_one_dependent() {
        let subs = vec![
            spec("Retrieve Lockheed 2024 contracts", &[]),
            spec("Retrieve Northrop 2024 contracts", &[]),
            spec("Compare the two", &[0, 1]),
        ];
        let state = make_state();
        let groups = schedule_children("root", &subs, &state);

        assert_eq!(groups.len(), 2);
        let mut group0 = groups[0].clone();
        group0.sort_unstable();
        assert_eq!(group0, vec![0, 1]);
        assert_eq!(groups[1], vec![2]);
    }

    #[test]
    fn independent_nodes_all_land_in_group_zero() {
        let subs = vec![spec("a", &[]), spec("b", &[]), spec("c", &[])];
        let state = make_state();
        let groups = schedule_children("root", &subs, &state);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn cycle_collapses_to_single_group_no_deadlock() {
        let subs = vec![spec("a", &[1]), spec("b", &[0])];
        let state = make_state();
        let groups = schedule_children("root", &subs, &state);
        assert_eq!(groups.len(), 1);
        let mut only = groups[0].clone();
        only.sort_unstable();
        assert_eq!(only, vec![0, 1]);
    }

    #[test]
    fn linear_chain_produces_one_group_per_node() {
        let subs = vec![spec("a", &[]), spec("b", &[0]), spec("c", &[1])];
        let state = make_state();
        let groups = schedule_children("root", &subs, &state);
        assert_eq!(groups, vec![vec![0], vec![1], vec![2]]);
    }
}
