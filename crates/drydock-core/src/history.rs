//! Attempt history classification.
//!
//! A part's effective status is a pure function of its attempt log, never
//! a stored field: the log is the single source of truth.

use drydock_state::{AttemptRecord, AttemptState};

/// Current status of a part given its attempt history.
///
/// Returns `None` when the part has no attempts yet. Otherwise: if any
/// attempt ever passed, the part is permanently `Passed` (a pass is
/// sticky; retries exist to overturn a failure, not to contest a proven
/// pass). Failing that, the state of the attempt with the greatest id
/// wins. Wall-clock completion order is never consulted: a late-returning
/// early retry must not look newer than the attempt that superseded it.
pub fn part_status(attempts: &[AttemptRecord]) -> Option<AttemptState> {
    if attempts.iter().any(|a| a.state == AttemptState::Passed) {
        return Some(AttemptState::Passed);
    }
    attempts
        .iter()
        .max_by_key(|a| a.attempt_id)
        .map(|a| a.state)
}
