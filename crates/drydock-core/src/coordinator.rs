//! Build coordination: state re-evaluation, partitioning, abort, and the
//! exactly-once completion actions.
//!
//! Many worker processes call `update_state_from_parts` independently,
//! once per attempt completion, with no central serialization.
//! Correctness comes from two storage primitives instead of mutual
//! exclusion:
//! - the state commit is a compare-and-set against the state as read, so
//!   concurrent evaluators converge on the same pure decision and at most
//!   one of them owns any given transition;
//! - each one-shot side effect claims its flag with a conditional write
//!   before acting, so N racers produce exactly one action.

use std::sync::Arc;

use tracing::{debug, info, warn};

use drydock_state::{
    BuildId, BuildRecord, BuildState, BuildStore, OneShotFlag, PartRecord, PartSpec,
};

use crate::aggregation::group_attempts;
use crate::collaborators::{AttemptScheduler, BuildNotifier, CommitStatusPoster, MergeStrategy};
use crate::config::RepositoryConfig;
use crate::error::CoreResult;
use crate::evaluator::{decide_next_state, StateTransition};
use crate::status::commit_status;

/// Label under which success-script output is attached to a build.
const SUCCESS_SCRIPT_LOG: &str = "success_script";

/// Orchestrates one repository's builds against the store and the
/// external collaborators.
///
/// The merge strategy is selected for the repository's configured back
/// end at construction time (see `MergeStrategyRegistry`).
pub struct BuildCoordinator {
    store: Arc<dyn BuildStore>,
    repository: RepositoryConfig,
    scheduler: Arc<dyn AttemptScheduler>,
    merge_strategy: Arc<dyn MergeStrategy>,
    notifier: Arc<dyn BuildNotifier>,
    status_poster: Arc<dyn CommitStatusPoster>,
}

impl BuildCoordinator {
    pub fn new(
        store: Arc<dyn BuildStore>,
        repository: RepositoryConfig,
        scheduler: Arc<dyn AttemptScheduler>,
        merge_strategy: Arc<dyn MergeStrategy>,
        notifier: Arc<dyn BuildNotifier>,
        status_poster: Arc<dyn CommitStatusPoster>,
    ) -> Self {
        Self {
            store,
            repository,
            scheduler,
            merge_strategy,
            notifier,
            status_poster,
        }
    }

    /// Re-derive the build state from its parts' attempt histories and
    /// commit it if it changed.
    ///
    /// Called concurrently from many workers; every call also posts the
    /// current commit status (fire-many). Completion actions run only in
    /// the call that committed the transition into a terminal state.
    pub async fn update_state_from_parts(&self, build_id: &BuildId) -> CoreResult<StateTransition> {
        let build = self.store.get_build(build_id).await?;

        let parts = self.store.parts_for_build(build_id).await?;
        if parts.is_empty() {
            // Nothing to aggregate yet.
            return Ok(StateTransition::unchanged(build.state));
        }

        let attempts = self.store.attempts_for_build(build_id).await?;
        let histories = group_attempts(parts, attempts);

        let next = match decide_next_state(build.state, &histories) {
            Some(next) => next,
            None => return Ok(StateTransition::unchanged(build.state)),
        };

        let committed = if next != build.state {
            // Conditional on the state as read: a concurrent evaluator
            // that won the race leaves this a harmless no-op.
            self.store
                .compare_and_set_state(build_id, build.state, next)
                .await?
        } else {
            false
        };

        let transition = StateTransition {
            previous: build.state,
            next,
            committed,
        };

        if committed {
            info!(build_id = %build_id, from = %transition.previous, to = %transition.next, "build state committed");
        } else {
            debug!(build_id = %build_id, state = %next, "build state unchanged");
        }

        let current = self.store.get_build(build_id).await?;
        if transition.newly_terminal() {
            self.on_completion(&current).await?;
        }

        self.status_poster
            .post_status(&current, commit_status(current.state))
            .await?;

        Ok(transition)
    }

    /// Claim a fresh build for partitioning.
    ///
    /// Compare-and-set from `waiting_for_sync`, so of several partitioner
    /// workers picking up the same build exactly one proceeds.
    pub async fn begin_partitioning(&self, build_id: &BuildId) -> CoreResult<bool> {
        let claimed = self
            .store
            .compare_and_set_state(
                build_id,
                BuildState::WaitingForSync,
                BuildState::Partitioning,
            )
            .await?;
        if !claimed {
            debug!(build_id = %build_id, "partitioning already claimed");
        }
        Ok(claimed)
    }

    /// Split the build into parts and schedule their first attempts.
    ///
    /// The `runnable` state and the part rows commit in one storage
    /// transaction; attempt scheduling happens after it, so a transient
    /// scheduling fault cannot roll back the partition record.
    pub async fn partition(
        &self,
        build_id: &BuildId,
        specs: Vec<PartSpec>,
    ) -> CoreResult<Vec<PartRecord>> {
        let parts = self.store.partition(build_id, specs).await?;
        info!(build_id = %build_id, parts = parts.len(), "build partitioned");

        for part in &parts {
            self.scheduler.schedule_attempt(part).await?;
        }
        Ok(parts)
    }

    /// Abort the build and preempt all work that has not started yet.
    ///
    /// The state write is unconditional; the sweep only touches attempts
    /// still `runnable`, so an attempt that completed between the two
    /// steps keeps its real terminal state. Returns the number of
    /// attempts preempted.
    pub async fn abort(&self, build_id: &BuildId) -> CoreResult<u64> {
        self.store.force_state(build_id, BuildState::Aborted).await?;
        let swept = self.store.abort_runnable_attempts(build_id).await?;
        info!(build_id = %build_id, swept, "build aborted");
        Ok(swept)
    }

    /// Transition `runnable` or `partitioning` builds to `running`.
    ///
    /// A no-op from any other state: a stale trigger must not un-doom or
    /// un-finish a build. Returns whether this call made the transition.
    pub async fn mark_running(&self, build_id: &BuildId) -> CoreResult<bool> {
        for from in [BuildState::Runnable, BuildState::Partitioning] {
            if self
                .store
                .compare_and_set_state(build_id, from, BuildState::Running)
                .await?
            {
                return Ok(true);
            }
        }
        debug!(build_id = %build_id, "mark_running ignored (stale trigger)");
        Ok(false)
    }

    // -- completion actions --------------------------------------------------

    async fn on_completion(&self, build: &BuildRecord) -> CoreResult<()> {
        match build.state {
            BuildState::Succeeded => self.on_success(build).await,
            BuildState::Failed | BuildState::Errored | BuildState::Aborted => {
                self.on_failure(build).await
            }
            _ => Ok(()),
        }
    }

    async fn on_success(&self, build: &BuildRecord) -> CoreResult<()> {
        // Merge-on-success is independent of promotion and idempotent at
        // the collaborator, so it carries no guard of its own.
        if build.merge_on_success && self.repository.allows_merge_on_success {
            self.merge_strategy.merge_ref(build).await?;
            info!(build_id = %build.build_id, "merge-on-success triggered");
        }

        self.promote(build).await?;

        if self.repository.email_on_success && !build.primary_target {
            if self
                .store
                .claim_flag(&build.build_id, OneShotFlag::SuccessEmailSent)
                .await?
            {
                self.notifier.send_build_success_email(build).await?;
                info!(build_id = %build.build_id, "success email sent");
            }
        }
        Ok(())
    }

    async fn on_failure(&self, build: &BuildRecord) -> CoreResult<()> {
        if self.repository.email_on_failure && !build.primary_target {
            if self
                .store
                .claim_flag(&build.build_id, OneShotFlag::FailureEmailSent)
                .await?
            {
                self.notifier.send_build_failure_email(build).await?;
                info!(build_id = %build.build_id, "failure email sent");
            }
        }
        Ok(())
    }

    /// Promote the commit exactly once, running the repository's
    /// post-success script (if any) and attaching its output.
    ///
    /// The flag is claimed before the collaborator calls: if one of them
    /// fails afterwards the claim stays, the error propagates, and the
    /// gap is operational alerting's to catch rather than retried here.
    async fn promote(&self, build: &BuildRecord) -> CoreResult<()> {
        if !self
            .store
            .claim_flag(&build.build_id, OneShotFlag::Promoted)
            .await?
        {
            debug!(build_id = %build.build_id, "promotion already claimed");
            return Ok(());
        }

        self.merge_strategy
            .promote(&build.commit_ref, &self.repository)
            .await?;
        self.merge_strategy
            .add_note(
                &build.commit_ref,
                "promoted",
                &format!("promoted to {} by build {}", self.repository.promotion_ref, build.build_id),
            )
            .await?;
        info!(build_id = %build.build_id, commit_ref = %build.commit_ref.short(), "commit promoted");

        if self.repository.success_script.is_some() {
            let output = self
                .merge_strategy
                .run_success_script(&self.repository, &build.commit_ref, &build.branch)
                .await?;
            self.store
                .attach_log(&build.build_id, SUCCESS_SCRIPT_LOG, &output)
                .await?;
            info!(build_id = %build.build_id, bytes = output.len(), "success script output attached");
        }
        Ok(())
    }

    /// Record opaque failure context on the build.
    pub async fn record_error_details(
        &self,
        build_id: &BuildId,
        details: serde_json::Value,
    ) -> CoreResult<()> {
        warn!(build_id = %build_id, "recording error details");
        self.store.set_error_details(build_id, details).await?;
        Ok(())
    }
}
