//! Part aggregation queries.
//!
//! Derives, from the attempt histories of a build's parts, the sets the
//! state machine reduces over. Classifications are mutually exclusive
//! within one evaluation: a part with a passed attempt never appears in
//! any other set.

use chrono::{DateTime, Utc};
use drydock_state::{AttemptRecord, AttemptState, PartRecord};

use crate::history::part_status;

/// A part together with its attempt log, ordered by attempt id.
#[derive(Debug, Clone)]
pub struct PartHistory {
    pub part: PartRecord,
    pub attempts: Vec<AttemptRecord>,
}

impl PartHistory {
    /// Effective status of this part (sticky pass, then latest attempt).
    pub fn status(&self) -> Option<AttemptState> {
        part_status(&self.attempts)
    }
}

/// Group a build's attempts under their owning parts.
///
/// Attempts are sorted by id within each part; attempts for unknown parts
/// are dropped (they belong to a different build).
pub fn group_attempts(parts: Vec<PartRecord>, attempts: Vec<AttemptRecord>) -> Vec<PartHistory> {
    let mut histories: Vec<PartHistory> = parts
        .into_iter()
        .map(|part| PartHistory {
            part,
            attempts: Vec::new(),
        })
        .collect();

    for attempt in attempts {
        if let Some(history) = histories
            .iter_mut()
            .find(|h| h.part.part_id == attempt.part_id)
        {
            history.attempts.push(attempt);
        }
    }

    for history in &mut histories {
        history.attempts.sort_by_key(|a| a.attempt_id);
    }
    histories
}

/// Parts with at least one passed attempt.
pub fn passed(histories: &[PartHistory]) -> Vec<&PartHistory> {
    histories
        .iter()
        .filter(|h| h.status() == Some(AttemptState::Passed))
        .collect()
}

/// Parts with no passed attempt whose last-attempt state is in `states`.
pub fn classified_as<'a>(
    histories: &'a [PartHistory],
    states: &[AttemptState],
) -> Vec<&'a PartHistory> {
    histories
        .iter()
        .filter(|h| match h.status() {
            // Passed takes precedence over every other classification.
            Some(AttemptState::Passed) | None => false,
            Some(status) => states.contains(&status),
        })
        .collect()
}

/// True iff at least one attempt exists and every attempt ever recorded
/// passed, i.e. no part ever needed a retry.
pub fn all_passed_on_first_try(histories: &[PartHistory]) -> bool {
    let mut seen_any = false;
    for history in histories {
        for attempt in &history.attempts {
            if attempt.state != AttemptState::Passed {
                return false;
            }
            seen_any = true;
        }
    }
    seen_any
}

/// Max completion timestamp across all attempts of all parts.
///
/// A late out-of-order attempt can push this past the moment the build
/// actually resolved; that imprecision is accepted.
pub fn finished_at(histories: &[PartHistory]) -> Option<DateTime<Utc>> {
    histories
        .iter()
        .flat_map(|h| h.attempts.iter())
        .filter_map(|a| a.finished_at)
        .max()
}
