//! External status vocabularies.
//!
//! The mappings here are owned by the core and reproduced exactly by the
//! external renderers/posters; both are total over the build state set.

use drydock_state::BuildState;
use serde::{Deserialize, Serialize};

/// Three-way badge classification consumed by the badge renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    Green,
    Red,
    Blue,
}

impl BadgeColor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Red => "red",
            Self::Blue => "blue",
        }
    }
}

/// Badge color for a build state: green for a success, red for anything
/// failing or predicted to fail (`doomed` included), blue while in flight.
pub fn badge_color(state: BuildState) -> BadgeColor {
    match state {
        BuildState::Succeeded => BadgeColor::Green,
        BuildState::Failed | BuildState::Errored | BuildState::Aborted | BuildState::Doomed => {
            BadgeColor::Red
        }
        BuildState::WaitingForSync
        | BuildState::Partitioning
        | BuildState::Runnable
        | BuildState::Running => BadgeColor::Blue,
    }
}

/// Commit-status vocabulary understood by the code host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitStatusState {
    Pending,
    Success,
    Failure,
}

impl CommitStatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Commit status for a build state. `doomed` already reports "failure"
/// to the code host even though the build is still running.
pub fn commit_status(state: BuildState) -> CommitStatusState {
    match state {
        BuildState::Succeeded => CommitStatusState::Success,
        BuildState::Failed | BuildState::Errored | BuildState::Aborted | BuildState::Doomed => {
            CommitStatusState::Failure
        }
        BuildState::WaitingForSync
        | BuildState::Partitioning
        | BuildState::Runnable
        | BuildState::Running => CommitStatusState::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [BuildState; 9] = [
        BuildState::WaitingForSync,
        BuildState::Partitioning,
        BuildState::Runnable,
        BuildState::Running,
        BuildState::Doomed,
        BuildState::Failed,
        BuildState::Succeeded,
        BuildState::Errored,
        BuildState::Aborted,
    ];

    #[test]
    fn badge_mapping_matches_the_contract() {
        for state in ALL_STATES {
            let expected = match state {
                BuildState::Succeeded => BadgeColor::Green,
                BuildState::Failed
                | BuildState::Errored
                | BuildState::Aborted
                | BuildState::Doomed => BadgeColor::Red,
                _ => BadgeColor::Blue,
            };
            assert_eq!(badge_color(state), expected, "state {state}");
        }
    }

    #[test]
    fn commit_status_mapping_matches_the_contract() {
        assert_eq!(
            commit_status(BuildState::Succeeded),
            CommitStatusState::Success
        );
        for state in [
            BuildState::Failed,
            BuildState::Errored,
            BuildState::Aborted,
            BuildState::Doomed,
        ] {
            assert_eq!(commit_status(state), CommitStatusState::Failure);
        }
        for state in [
            BuildState::WaitingForSync,
            BuildState::Partitioning,
            BuildState::Runnable,
            BuildState::Running,
        ] {
            assert_eq!(commit_status(state), CommitStatusState::Pending);
        }
    }

    #[test]
    fn doomed_reports_failure_while_in_progress() {
        assert!(BuildState::Doomed.in_progress());
        assert_eq!(badge_color(BuildState::Doomed), BadgeColor::Red);
        assert_eq!(commit_status(BuildState::Doomed), CommitStatusState::Failure);
    }

    #[test]
    fn vocabulary_symbols() {
        assert_eq!(BadgeColor::Green.as_str(), "green");
        assert_eq!(CommitStatusState::Pending.as_str(), "pending");
        assert_eq!(
            serde_json::to_string(&CommitStatusState::Failure).unwrap(),
            "\"failure\""
        );
    }
}
