//! End-to-end coordinator tests against the in-memory store and
//! recording collaborators: state reduction scenarios, exactly-once
//! completion actions, partitioning, and abort.

use std::sync::Arc;

use drydock_core::testing::{
    RecordingMergeStrategy, RecordingNotifier, RecordingScheduler, RecordingStatusPoster,
};
use drydock_core::{
    AttemptState, BuildCoordinator, BuildRecord, BuildState, BuildStore, CommitRef,
    CommitStatusState, CoreError, MergeBackend, NewBuild, OneShotFlag, PartRecord, PartSpec,
    RepositoryConfig,
};
use drydock_state::fakes::MemoryBuildStore;

struct Harness {
    store: Arc<MemoryBuildStore>,
    scheduler: Arc<RecordingScheduler>,
    merge: Arc<RecordingMergeStrategy>,
    notifier: Arc<RecordingNotifier>,
    poster: Arc<RecordingStatusPoster>,
    coordinator: Arc<BuildCoordinator>,
}

fn harness(repository: RepositoryConfig) -> Harness {
    let store = Arc::new(MemoryBuildStore::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    let merge = Arc::new(RecordingMergeStrategy::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let poster = Arc::new(RecordingStatusPoster::new());

    let coordinator = Arc::new(BuildCoordinator::new(
        store.clone(),
        repository,
        scheduler.clone(),
        merge.clone(),
        notifier.clone(),
        poster.clone(),
    ));

    Harness {
        store,
        scheduler,
        merge,
        notifier,
        poster,
        coordinator,
    }
}

fn default_repository() -> RepositoryConfig {
    RepositoryConfig::new(MergeBackend::GitHub, "refs/heads/green")
        .with_success_script("script/ci_success")
        .with_emails(true, true)
}

fn part_spec(kind: &str) -> PartSpec {
    PartSpec {
        kind: kind.to_string(),
        paths: vec!["spec".to_string()],
        queue: "ci".to_string(),
        retries: 2,
        options: serde_json::json!({}),
    }
}

impl Harness {
    async fn create_build(&self, fill: char) -> BuildRecord {
        self.store
            .create_build(NewBuild {
                project: "web".to_string(),
                commit_ref: CommitRef::try_from(fill.to_string().repeat(40)).unwrap(),
                branch: "feature/shard".to_string(),
                queue: "ci".to_string(),
                primary_target: false,
                merge_on_success: false,
            })
            .await
            .unwrap()
    }

    async fn create_primary_build(&self, fill: char) -> BuildRecord {
        self.store
            .create_build(NewBuild {
                project: "web".to_string(),
                commit_ref: CommitRef::try_from(fill.to_string().repeat(40)).unwrap(),
                branch: "main".to_string(),
                queue: "ci".to_string(),
                primary_target: true,
                merge_on_success: false,
            })
            .await
            .unwrap()
    }

    async fn partition_two(&self, build: &BuildRecord) -> Vec<PartRecord> {
        self.coordinator
            .partition(&build.build_id, vec![part_spec("spec"), part_spec("cucumber")])
            .await
            .unwrap()
    }

    /// Run one fresh attempt for a part straight to a terminal state.
    async fn complete_attempt(&self, part: &PartRecord, state: AttemptState) {
        let attempt = self.store.create_attempt(&part.part_id).await.unwrap();
        self.store.start_attempt(attempt.attempt_id).await.unwrap();
        self.store
            .finish_attempt(attempt.attempt_id, state)
            .await
            .unwrap();
    }
}

// ===========================================================================
// Partitioning
// ===========================================================================

#[tokio::test]
async fn partition_schedules_one_attempt_per_part() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;

    let parts = h.partition_two(&build).await;

    assert_eq!(parts.len(), 2);
    let scheduled = h.scheduler.scheduled();
    assert_eq!(scheduled.len(), 2);
    assert!(parts.iter().all(|p| scheduled.contains(&p.part_id)));

    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::Runnable);
}

#[tokio::test]
async fn begin_partitioning_claims_fresh_builds_once() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;

    assert!(h
        .coordinator
        .begin_partitioning(&build.build_id)
        .await
        .unwrap());
    // A second partitioner loses the claim.
    assert!(!h
        .coordinator
        .begin_partitioning(&build.build_id)
        .await
        .unwrap());

    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::Partitioning);
}

#[tokio::test]
async fn scheduling_failure_leaves_partition_record_durable() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    h.scheduler.set_failing(true);

    let result = h
        .coordinator
        .partition(&build.build_id, vec![part_spec("spec")])
        .await;
    assert!(matches!(result, Err(CoreError::Collaborator(_))));

    // The partition itself committed before scheduling was attempted.
    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::Runnable);
    assert_eq!(h.store.parts_for_build(&build.build_id).await.unwrap().len(), 1);
}

// ===========================================================================
// State reduction scenarios
// ===========================================================================

#[tokio::test]
async fn build_without_parts_is_a_no_op() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(t.previous, BuildState::WaitingForSync);
    assert_eq!(t.next, BuildState::WaitingForSync);
    assert!(!t.committed);
    assert!(h.poster.posted().is_empty());
}

#[tokio::test]
async fn passed_part_with_pending_sibling_keeps_running() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    // parts[1] has no attempts yet.

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(t.next, BuildState::Running);
    assert!(t.committed);
    assert_eq!(
        h.poster.posted(),
        vec![(build.build_id.0.clone(), CommitStatusState::Pending)]
    );
}

#[tokio::test]
async fn resolved_build_with_a_failure_fails() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Failed).await;

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(t.next, BuildState::Failed);
    assert!(t.newly_terminal());
    assert_eq!(h.notifier.failure_emails().len(), 1);
    assert_eq!(
        h.poster.posted().last().unwrap().1,
        CommitStatusState::Failure
    );
}

#[tokio::test]
async fn errored_part_dominates_even_when_siblings_passed() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Errored).await;

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(t.next, BuildState::Errored);
    assert_eq!(h.notifier.failure_emails().len(), 1);
}

#[tokio::test]
async fn failed_part_with_outstanding_work_dooms_the_build() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Failed).await;
    // parts[1] has a pending attempt.
    h.store.create_attempt(&parts[1].part_id).await.unwrap();

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(t.next, BuildState::Doomed);
    assert!(!t.newly_terminal());
    // Doomed is early signal: the code host already sees "failure", but
    // no completion action fires yet.
    assert_eq!(
        h.poster.posted().last().unwrap().1,
        CommitStatusState::Failure
    );
    assert!(h.notifier.failure_emails().is_empty());
}

#[tokio::test]
async fn doomed_build_resolves_to_failed_once_parts_finish() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Failed).await;
    let pending = h.store.create_attempt(&parts[1].part_id).await.unwrap();
    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();
    assert_eq!(t.next, BuildState::Doomed);

    h.store.start_attempt(pending.attempt_id).await.unwrap();
    h.store
        .finish_attempt(pending.attempt_id, AttemptState::Passed)
        .await
        .unwrap();

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();
    assert_eq!(t.previous, BuildState::Doomed);
    assert_eq!(t.next, BuildState::Failed);
    assert!(t.newly_terminal());
}

#[tokio::test]
async fn retry_pass_overrides_earlier_failure() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    // First attempt of part 0 fails, its retry passes.
    h.complete_attempt(&parts[0], AttemptState::Failed).await;
    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Passed).await;

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(t.next, BuildState::Succeeded);
}

// ===========================================================================
// Completion actions
// ===========================================================================

#[tokio::test]
async fn success_promotes_and_notifies_exactly_once() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Passed).await;

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();
    assert_eq!(t.next, BuildState::Succeeded);
    assert!(t.newly_terminal());

    assert_eq!(h.merge.promotions(), vec![build.commit_ref.as_str().to_string()]);
    assert_eq!(h.merge.scripts_run().len(), 1);
    assert_eq!(h.merge.notes().len(), 1);
    assert_eq!(h.notifier.success_emails().len(), 1);
    // Merge-on-success was not requested.
    assert!(h.merge.merges().is_empty());

    let logs = h.store.logs_for_build(&build.build_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].label, "success_script");
    assert_eq!(logs[0].content, b"script ok");

    // A later re-evaluation is a no-op for every one-shot action but
    // still posts the status.
    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();
    assert!(!t.committed);
    assert_eq!(h.merge.promotions().len(), 1);
    assert_eq!(h.merge.scripts_run().len(), 1);
    assert_eq!(h.notifier.success_emails().len(), 1);
    assert_eq!(h.store.logs_for_build(&build.build_id).await.unwrap().len(), 1);
    assert_eq!(h.poster.posted().len(), 2);
    assert_eq!(
        h.poster.posted().last().unwrap().1,
        CommitStatusState::Success
    );
}

#[tokio::test]
async fn concurrent_evaluations_fire_actions_once() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Passed).await;

    let evaluations: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            let build_id = build.build_id.clone();
            tokio::spawn(async move { coordinator.update_state_from_parts(&build_id).await })
        })
        .collect();

    let results = futures::future::join_all(evaluations).await;
    let committed = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|t| t.committed)
        .count();
    assert_eq!(committed, 1);

    assert_eq!(h.merge.promotions().len(), 1);
    assert_eq!(h.merge.scripts_run().len(), 1);
    assert_eq!(h.notifier.success_emails().len(), 1);
    assert_eq!(h.store.logs_for_build(&build.build_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn merge_on_success_triggers_when_build_and_repository_agree() {
    let h = harness(default_repository().with_merge_on_success(true));
    let build = h
        .store
        .create_build(NewBuild {
            project: "web".to_string(),
            commit_ref: CommitRef::try_from("d".repeat(40)).unwrap(),
            branch: "feature/merge-me".to_string(),
            queue: "ci".to_string(),
            primary_target: false,
            merge_on_success: true,
        })
        .await
        .unwrap();
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Passed).await;

    h.coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert_eq!(h.merge.merges(), vec![build.build_id.0.clone()]);
    // Promotion still ran independently.
    assert_eq!(h.merge.promotions().len(), 1);
}

#[tokio::test]
async fn primary_target_suppresses_emails() {
    let h = harness(default_repository());
    let build = h.create_primary_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Failed).await;

    h.coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();

    assert!(h.notifier.failure_emails().is_empty());
    assert!(h.notifier.success_emails().is_empty());
}

#[tokio::test]
async fn collaborator_failure_after_claim_propagates() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    h.complete_attempt(&parts[0], AttemptState::Passed).await;
    h.complete_attempt(&parts[1], AttemptState::Passed).await;
    h.merge.set_failing(true);

    let result = h.coordinator.update_state_from_parts(&build.build_id).await;
    assert!(matches!(result, Err(CoreError::Collaborator(_))));

    // The guard stays claimed: the gap surfaces to alerting instead of
    // being silently retried into a double promotion.
    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert!(reread.flag(OneShotFlag::Promoted));
    assert!(h.merge.promotions().is_empty());

    h.merge.set_failing(false);
    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();
    assert!(!t.committed);
    assert!(h.merge.promotions().is_empty());
}

// ===========================================================================
// Abort control
// ===========================================================================

#[tokio::test]
async fn abort_preempts_only_unstarted_attempts() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    let pending = h.store.create_attempt(&parts[0].part_id).await.unwrap();
    let running = h.store.create_attempt(&parts[1].part_id).await.unwrap();
    h.store.start_attempt(running.attempt_id).await.unwrap();

    let swept = h.coordinator.abort(&build.build_id).await.unwrap();
    assert_eq!(swept, 1);

    let attempts = h.store.attempts_for_build(&build.build_id).await.unwrap();
    let state_of = |id| attempts.iter().find(|a| a.attempt_id == id).unwrap().state;
    assert_eq!(state_of(pending.attempt_id), AttemptState::Aborted);
    assert_eq!(state_of(running.attempt_id), AttemptState::Running);

    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::Aborted);
}

#[tokio::test]
async fn abort_is_absorbing_against_late_results() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    let parts = h.partition_two(&build).await;

    // Attempts complete after the abort: the in-flight one passed, the
    // other part's retry passed too.
    let running = h.store.create_attempt(&parts[0].part_id).await.unwrap();
    h.store.start_attempt(running.attempt_id).await.unwrap();

    h.coordinator.abort(&build.build_id).await.unwrap();

    h.store
        .finish_attempt(running.attempt_id, AttemptState::Passed)
        .await
        .unwrap();
    h.complete_attempt(&parts[1], AttemptState::Passed).await;

    let t = h
        .coordinator
        .update_state_from_parts(&build.build_id)
        .await
        .unwrap();
    assert_eq!(t.previous, BuildState::Aborted);
    assert_eq!(t.next, BuildState::Aborted);
    assert!(!t.committed);
    // No success actions for an aborted build.
    assert!(h.merge.promotions().is_empty());
}

// ===========================================================================
// mark_running
// ===========================================================================

#[tokio::test]
async fn mark_running_moves_runnable_builds_only() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;
    h.partition_two(&build).await;

    assert!(h.coordinator.mark_running(&build.build_id).await.unwrap());
    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::Running);

    // Stale trigger after the fact: silently ignored.
    h.store
        .force_state(&build.build_id, BuildState::Failed)
        .await
        .unwrap();
    assert!(!h.coordinator.mark_running(&build.build_id).await.unwrap());
    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.state, BuildState::Failed);
}

// ===========================================================================
// Error details
// ===========================================================================

#[tokio::test]
async fn error_details_are_preserved_opaquely() {
    let h = harness(default_repository());
    let build = h.create_build('a').await;

    let details = serde_json::json!({"phase": "partition", "attempts": [1, 2]});
    h.coordinator
        .record_error_details(&build.build_id, details.clone())
        .await
        .unwrap();

    let reread = h.store.get_build(&build.build_id).await.unwrap();
    assert_eq!(reread.error_details, details);
}
