//! Build state decision rules.
//!
//! `decide_next_state` is deliberately pure: given the same committed
//! state and the same attempt rows, every concurrent evaluator computes
//! the same answer, which is what makes redundant re-evaluation harmless.

use drydock_state::{AttemptState, BuildState};

use crate::aggregation::{classified_as, passed, PartHistory};

/// Outcome of one state evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// State as read before evaluating.
    pub previous: BuildState,
    /// State the rules decided on.
    pub next: BuildState,
    /// Whether *this* evaluation committed the write. False when the
    /// state was already `next`, when a concurrent evaluator won the
    /// commit, or when there was nothing to evaluate.
    pub committed: bool,
}

impl StateTransition {
    /// An evaluation that changed nothing.
    pub fn unchanged(state: BuildState) -> Self {
        Self {
            previous: state,
            next: state,
            committed: false,
        }
    }

    /// True when this caller moved the build into a terminal state, i.e.
    /// it owns the completion side effects.
    pub fn newly_terminal(&self) -> bool {
        self.committed && self.next.is_terminal()
    }
}

/// Compute the next build state from the current committed state and the
/// parts' attempt histories. Returns `None` when the build has no parts
/// (nothing to aggregate yet).
///
/// Rules, first match wins:
/// 1. `aborted` stays `aborted` — abort absorbs even late part results.
/// 2. every part passed -> `succeeded`.
/// 3. any errored part -> `errored`, even while others still run.
/// 4. passed and failed cover every part -> `failed`.
/// 5. otherwise `running` while nothing has failed, `doomed` once
///    something has (predicted to fail, but kept running so the
///    remaining parts still surface errors).
pub fn decide_next_state(current: BuildState, histories: &[PartHistory]) -> Option<BuildState> {
    if histories.is_empty() {
        return None;
    }

    let passed_count = passed(histories).len();
    let errored_count = classified_as(histories, &[AttemptState::Errored]).len();
    let failed_count = classified_as(histories, &[AttemptState::Failed]).len();
    let total = histories.len();

    let next = if current == BuildState::Aborted {
        BuildState::Aborted
    } else if passed_count == total {
        BuildState::Succeeded
    } else if errored_count > 0 {
        BuildState::Errored
    } else if passed_count + failed_count == total {
        BuildState::Failed
    } else if failed_count == 0 {
        BuildState::Running
    } else {
        BuildState::Doomed
    };

    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::group_attempts;
    use chrono::Utc;
    use drydock_state::{AttemptId, AttemptRecord, BuildId, PartId, PartRecord};

    fn histories(entries: Vec<(&str, Vec<(u64, AttemptState)>)>) -> Vec<PartHistory> {
        let parts = entries
            .iter()
            .map(|(name, _)| PartRecord {
                part_id: PartId(name.to_string()),
                build_id: BuildId("build".to_string()),
                kind: "spec".to_string(),
                paths: vec![],
                queue: "ci".to_string(),
                retries: 0,
                options: serde_json::json!({}),
                created_at: Utc::now(),
            })
            .collect();
        let attempts = entries
            .iter()
            .flat_map(|(name, attempts)| {
                attempts.iter().map(|(id, state)| AttemptRecord {
                    attempt_id: AttemptId(*id),
                    part_id: PartId(name.to_string()),
                    build_id: BuildId("build".to_string()),
                    state: *state,
                    created_at: Utc::now(),
                    started_at: None,
                    finished_at: None,
                })
            })
            .collect();
        group_attempts(parts, attempts)
    }

    #[test]
    fn no_parts_is_a_no_op() {
        assert_eq!(decide_next_state(BuildState::Running, &[]), None);
    }

    #[test]
    fn all_passed_succeeds_even_after_retries() {
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Failed), (3, AttemptState::Passed)]),
            ("b", vec![(2, AttemptState::Passed)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Succeeded)
        );
    }

    #[test]
    fn abort_is_absorbing() {
        // Even a fully passed part set cannot revive an aborted build.
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Passed)]),
            ("b", vec![(2, AttemptState::Passed)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Aborted, &hs),
            Some(BuildState::Aborted)
        );
    }

    #[test]
    fn errored_part_dominates_passes() {
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Passed)]),
            ("b", vec![(2, AttemptState::Errored)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Errored)
        );
    }

    #[test]
    fn errored_part_dominates_while_others_run() {
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Errored)]),
            ("b", vec![(2, AttemptState::Running)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Errored)
        );
    }

    #[test]
    fn fully_resolved_with_failures_fails() {
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Passed)]),
            ("b", vec![(2, AttemptState::Failed)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Failed)
        );
    }

    #[test]
    fn outstanding_parts_without_failures_keep_running() {
        // Part a passed, part b has no attempts yet.
        let hs = histories(vec![("a", vec![(1, AttemptState::Passed)]), ("b", vec![])]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Running)
        );
    }

    #[test]
    fn failure_with_outstanding_parts_dooms() {
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Failed)]),
            ("b", vec![(2, AttemptState::Runnable)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Doomed)
        );
    }

    #[test]
    fn sticky_pass_feeds_the_state_machine() {
        // Part a passed once; a stray re-enqueue later failed. The pass
        // holds and the build still succeeds.
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Passed), (5, AttemptState::Failed)]),
            ("b", vec![(2, AttemptState::Passed)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Doomed, &hs),
            Some(BuildState::Succeeded)
        );
    }

    #[test]
    fn aborted_last_attempts_keep_the_build_unresolved() {
        // A part whose latest attempt was aborted is neither passed nor
        // failed; with no failures recorded the build reads as running.
        let hs = histories(vec![
            ("a", vec![(1, AttemptState::Aborted)]),
            ("b", vec![(2, AttemptState::Passed)]),
        ]);
        assert_eq!(
            decide_next_state(BuildState::Running, &hs),
            Some(BuildState::Running)
        );
    }

    #[test]
    fn transition_helpers() {
        let t = StateTransition {
            previous: BuildState::Running,
            next: BuildState::Failed,
            committed: true,
        };
        assert!(t.newly_terminal());

        let lost_race = StateTransition {
            previous: BuildState::Running,
            next: BuildState::Failed,
            committed: false,
        };
        assert!(!lost_race.newly_terminal());

        let still_running = StateTransition::unchanged(BuildState::Running);
        assert!(!still_running.newly_terminal());
    }
}
