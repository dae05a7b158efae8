//! Collaborator interfaces for the systems this core orchestrates but
//! does not implement: attempt execution, merge/promotion, email, and
//! commit-status delivery.
//!
//! All traits are async and backend-agnostic. Recording fakes for tests
//! live in the `testing` module.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use drydock_state::{BuildRecord, CommitRef, PartRecord};

use crate::config::{MergeBackend, RepositoryConfig};
use crate::error::CollaboratorError;
use crate::status::CommitStatusState;

/// Creates and dispatches attempts for parts.
///
/// Used by partitioning for the initial attempt per part; part-level
/// retry policy lives behind the same interface.
#[async_trait]
pub trait AttemptScheduler: Send + Sync {
    async fn schedule_attempt(&self, part: &PartRecord) -> Result<(), CollaboratorError>;
}

/// Merge/promotion capability for one code-host back end.
///
/// One implementation exists per supported back end; the right one is
/// selected from the repository configuration at construction time.
#[async_trait]
pub trait MergeStrategy: Send + Sync {
    /// Advance the promotion ref to this commit.
    async fn promote(
        &self,
        commit_ref: &CommitRef,
        config: &RepositoryConfig,
    ) -> Result<(), CollaboratorError>;

    /// Merge the build's branch into its target.
    async fn merge_ref(&self, build: &BuildRecord) -> Result<(), CollaboratorError>;

    /// Run the repository's post-success script, returning captured output.
    async fn run_success_script(
        &self,
        config: &RepositoryConfig,
        commit_ref: &CommitRef,
        branch: &str,
    ) -> Result<Vec<u8>, CollaboratorError>;

    /// Attach a note to a commit on the code host.
    async fn add_note(
        &self,
        commit_ref: &CommitRef,
        label: &str,
        note: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Build outcome email delivery.
#[async_trait]
pub trait BuildNotifier: Send + Sync {
    async fn send_build_failure_email(&self, build: &BuildRecord) -> Result<(), CollaboratorError>;
    async fn send_build_success_email(&self, build: &BuildRecord) -> Result<(), CollaboratorError>;
}

/// Posts the build's mapped status to the code host. Fire-many: called on
/// every re-evaluation, not just transitions.
#[async_trait]
pub trait CommitStatusPoster: Send + Sync {
    async fn post_status(
        &self,
        build: &BuildRecord,
        status: CommitStatusState,
    ) -> Result<(), CollaboratorError>;
}

/// Registry of merge strategies keyed by back end.
#[derive(Default)]
pub struct MergeStrategyRegistry {
    backends: HashMap<MergeBackend, Arc<dyn MergeStrategy>>,
}

impl MergeStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the implementation for a back end.
    pub fn register(mut self, backend: MergeBackend, strategy: Arc<dyn MergeStrategy>) -> Self {
        self.backends.insert(backend, strategy);
        self
    }

    /// Select the strategy for a repository's configured back end.
    pub fn strategy_for(&self, config: &RepositoryConfig) -> Option<Arc<dyn MergeStrategy>> {
        self.backends.get(&config.backend).map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMergeStrategy;

    #[test]
    fn registry_selects_by_configured_backend() {
        let github: Arc<dyn MergeStrategy> = Arc::new(RecordingMergeStrategy::new());
        let registry = MergeStrategyRegistry::new().register(MergeBackend::GitHub, github);

        let config = RepositoryConfig::new(MergeBackend::GitHub, "refs/heads/green");
        assert!(registry.strategy_for(&config).is_some());

        let other = RepositoryConfig::new(MergeBackend::Stash, "refs/heads/green");
        assert!(registry.strategy_for(&other).is_none());
    }
}
