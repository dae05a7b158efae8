//! In-memory fake for the build store (testing only)
//!
//! Provides `MemoryBuildStore`, which satisfies the full `BuildStore`
//! contract without any external dependencies. Every method takes the one
//! interior lock, so the conditional writes (state commit, flag claim,
//! abort sweep) are atomic exactly like their backend counterparts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Inner {
    builds: HashMap<String, BuildRecord>,
    parts: HashMap<String, PartRecord>,
    // BTreeMap keeps attempts ordered by id for free.
    attempts: BTreeMap<u64, AttemptRecord>,
    logs: Vec<BuildLogRecord>,
    next_attempt_id: u64,
}

/// In-memory build store backed by hash maps behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryBuildStore {
    inner: Mutex<Inner>,
}

impl MemoryBuildStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildStore for MemoryBuildStore {
    async fn create_build(&self, new_build: NewBuild) -> StorageResult<BuildRecord> {
        if new_build.project.trim().is_empty() {
            return Err(StorageError::MissingProject);
        }

        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.builds.values().any(|b| {
            b.project == new_build.project && b.commit_ref == new_build.commit_ref
        });
        if duplicate {
            return Err(StorageError::DuplicateCommitRef {
                project: new_build.project,
                commit_ref: new_build.commit_ref.as_str().to_string(),
            });
        }

        let now = Utc::now();
        let record = BuildRecord {
            build_id: BuildId::new(),
            project: new_build.project,
            commit_ref: new_build.commit_ref,
            branch: new_build.branch,
            queue: new_build.queue,
            primary_target: new_build.primary_target,
            merge_on_success: new_build.merge_on_success,
            state: BuildState::WaitingForSync,
            promoted: false,
            build_failure_email_sent: false,
            build_success_email_sent: false,
            error_details: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        };
        inner
            .builds
            .insert(record.build_id.0.clone(), record.clone());
        Ok(record)
    }

    async fn get_build(&self, build_id: &BuildId) -> StorageResult<BuildRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .builds
            .get(&build_id.0)
            .cloned()
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })
    }

    async fn builds_for_project(&self, project: &str) -> StorageResult<Vec<BuildRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut builds: Vec<BuildRecord> = inner
            .builds
            .values()
            .filter(|b| b.project == project)
            .cloned()
            .collect();
        builds.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(builds)
    }

    async fn compare_and_set_state(
        &self,
        build_id: &BuildId,
        from: BuildState,
        to: BuildState,
    ) -> StorageResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let build = inner
            .builds
            .get_mut(&build_id.0)
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })?;
        if build.state != from {
            return Ok(false);
        }
        build.state = to;
        build.updated_at = Utc::now();
        Ok(true)
    }

    async fn force_state(&self, build_id: &BuildId, to: BuildState) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let build = inner
            .builds
            .get_mut(&build_id.0)
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })?;
        build.state = to;
        build.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_flag(&self, build_id: &BuildId, flag: OneShotFlag) -> StorageResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let build = inner
            .builds
            .get_mut(&build_id.0)
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })?;
        let slot = match flag {
            OneShotFlag::Promoted => &mut build.promoted,
            OneShotFlag::FailureEmailSent => &mut build.build_failure_email_sent,
            OneShotFlag::SuccessEmailSent => &mut build.build_success_email_sent,
        };
        if *slot {
            return Ok(false);
        }
        *slot = true;
        build.updated_at = Utc::now();
        Ok(true)
    }

    async fn partition(
        &self,
        build_id: &BuildId,
        specs: Vec<PartSpec>,
    ) -> StorageResult<Vec<PartRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let build = inner
            .builds
            .get_mut(&build_id.0)
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })?;
        build.state = BuildState::Runnable;
        build.updated_at = Utc::now();

        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let part = PartRecord {
                part_id: PartId::new(),
                build_id: build_id.clone(),
                kind: spec.kind,
                paths: spec.paths,
                queue: spec.queue,
                retries: spec.retries,
                options: spec.options,
                created_at: Utc::now(),
            };
            inner.parts.insert(part.part_id.0.clone(), part.clone());
            created.push(part);
        }
        Ok(created)
    }

    async fn parts_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<PartRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut parts: Vec<PartRecord> = inner
            .parts
            .values()
            .filter(|p| p.build_id == *build_id)
            .cloned()
            .collect();
        parts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(parts)
    }

    async fn create_attempt(&self, part_id: &PartId) -> StorageResult<AttemptRecord> {
        let mut inner = self.inner.lock().unwrap();
        let build_id = inner
            .parts
            .get(&part_id.0)
            .map(|p| p.build_id.clone())
            .ok_or_else(|| StorageError::PartNotFound {
                part_id: part_id.0.clone(),
            })?;

        inner.next_attempt_id += 1;
        let attempt = AttemptRecord {
            attempt_id: AttemptId(inner.next_attempt_id),
            part_id: part_id.clone(),
            build_id,
            state: AttemptState::Runnable,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        inner
            .attempts
            .insert(attempt.attempt_id.0, attempt.clone());
        Ok(attempt)
    }

    async fn start_attempt(&self, attempt_id: AttemptId) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner
            .attempts
            .get_mut(&attempt_id.0)
            .ok_or(StorageError::AttemptNotFound {
                attempt_id: attempt_id.0,
            })?;
        if attempt.state != AttemptState::Runnable {
            return Err(StorageError::InvalidAttemptState {
                attempt_id: attempt_id.0,
                state: attempt.state.to_string(),
                expected: "runnable".to_string(),
            });
        }
        attempt.state = AttemptState::Running;
        attempt.started_at = Some(Utc::now());
        Ok(())
    }

    async fn finish_attempt(
        &self,
        attempt_id: AttemptId,
        state: AttemptState,
    ) -> StorageResult<AttemptRecord> {
        let mut inner = self.inner.lock().unwrap();
        let attempt = inner
            .attempts
            .get_mut(&attempt_id.0)
            .ok_or(StorageError::AttemptNotFound {
                attempt_id: attempt_id.0,
            })?;
        if attempt.state.is_terminal() {
            return Err(StorageError::InvalidAttemptState {
                attempt_id: attempt_id.0,
                state: attempt.state.to_string(),
                expected: "runnable or running".to_string(),
            });
        }
        attempt.state = state;
        attempt.finished_at = Some(Utc::now());
        Ok(attempt.clone())
    }

    async fn attempts_for_part(&self, part_id: &PartId) -> StorageResult<Vec<AttemptRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .attempts
            .values()
            .filter(|a| a.part_id == *part_id)
            .cloned()
            .collect())
    }

    async fn attempts_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<AttemptRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .attempts
            .values()
            .filter(|a| a.build_id == *build_id)
            .cloned()
            .collect())
    }

    async fn abort_runnable_attempts(&self, build_id: &BuildId) -> StorageResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        let mut swept = 0;
        for attempt in inner.attempts.values_mut() {
            if attempt.build_id == *build_id && attempt.state == AttemptState::Runnable {
                attempt.state = AttemptState::Aborted;
                attempt.finished_at = Some(now);
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn attach_log(
        &self,
        build_id: &BuildId,
        label: &str,
        content: &[u8],
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.builds.contains_key(&build_id.0) {
            return Err(StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            });
        }
        inner.logs.push(BuildLogRecord {
            build_id: build_id.clone(),
            label: label.to_string(),
            content: content.to_vec(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn logs_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<BuildLogRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .logs
            .iter()
            .filter(|l| l.build_id == *build_id)
            .cloned()
            .collect())
    }

    async fn set_error_details(
        &self,
        build_id: &BuildId,
        details: serde_json::Value,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let build = inner
            .builds
            .get_mut(&build_id.0)
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })?;
        build.error_details = details;
        build.updated_at = Utc::now();
        Ok(())
    }
}
