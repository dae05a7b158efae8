//! Recording collaborator fakes (testing only)
//!
//! Each fake logs the calls it receives behind a mutex so tests can
//! assert exactly-once behavior, and can be switched into a failing mode
//! to exercise collaborator-failure propagation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use drydock_state::{BuildRecord, CommitRef, PartId, PartRecord};

use crate::collaborators::{AttemptScheduler, BuildNotifier, CommitStatusPoster, MergeStrategy};
use crate::config::RepositoryConfig;
use crate::error::CollaboratorError;
use crate::status::CommitStatusState;

fn maybe_fail(failing: &AtomicBool, service: &str) -> Result<(), CollaboratorError> {
    if failing.load(Ordering::SeqCst) {
        Err(CollaboratorError::new(service, "injected failure"))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingScheduler
// ---------------------------------------------------------------------------

/// Records scheduled parts instead of dispatching work.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<PartId>>,
    failing: AtomicBool,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Parts scheduled so far, in call order.
    pub fn scheduled(&self) -> Vec<PartId> {
        self.scheduled.lock().unwrap().clone()
    }
}

#[async_trait]
impl AttemptScheduler for RecordingScheduler {
    async fn schedule_attempt(&self, part: &PartRecord) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "scheduler")?;
        self.scheduled.lock().unwrap().push(part.part_id.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingMergeStrategy
// ---------------------------------------------------------------------------

/// Records merge/promotion calls and returns canned script output.
#[derive(Debug)]
pub struct RecordingMergeStrategy {
    promotions: Mutex<Vec<String>>,
    merges: Mutex<Vec<String>>,
    scripts: Mutex<Vec<String>>,
    notes: Mutex<Vec<(String, String, String)>>,
    script_output: Vec<u8>,
    failing: AtomicBool,
}

impl Default for RecordingMergeStrategy {
    fn default() -> Self {
        Self {
            promotions: Mutex::new(Vec::new()),
            merges: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            notes: Mutex::new(Vec::new()),
            script_output: b"script ok".to_vec(),
            failing: AtomicBool::new(false),
        }
    }
}

impl RecordingMergeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom canned success-script output.
    pub fn with_script_output(mut self, output: &[u8]) -> Self {
        self.script_output = output.to_vec();
        self
    }

    /// Make subsequent calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn promotions(&self) -> Vec<String> {
        self.promotions.lock().unwrap().clone()
    }

    pub fn merges(&self) -> Vec<String> {
        self.merges.lock().unwrap().clone()
    }

    pub fn scripts_run(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<(String, String, String)> {
        self.notes.lock().unwrap().clone()
    }
}

#[async_trait]
impl MergeStrategy for RecordingMergeStrategy {
    async fn promote(
        &self,
        commit_ref: &CommitRef,
        _config: &RepositoryConfig,
    ) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "merge strategy")?;
        self.promotions
            .lock()
            .unwrap()
            .push(commit_ref.as_str().to_string());
        Ok(())
    }

    async fn merge_ref(&self, build: &BuildRecord) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "merge strategy")?;
        self.merges.lock().unwrap().push(build.build_id.0.clone());
        Ok(())
    }

    async fn run_success_script(
        &self,
        _config: &RepositoryConfig,
        commit_ref: &CommitRef,
        _branch: &str,
    ) -> Result<Vec<u8>, CollaboratorError> {
        maybe_fail(&self.failing, "merge strategy")?;
        self.scripts
            .lock()
            .unwrap()
            .push(commit_ref.as_str().to_string());
        Ok(self.script_output.clone())
    }

    async fn add_note(
        &self,
        commit_ref: &CommitRef,
        label: &str,
        note: &str,
    ) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "merge strategy")?;
        self.notes.lock().unwrap().push((
            commit_ref.as_str().to_string(),
            label.to_string(),
            note.to_string(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

/// Records build emails instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    failure_emails: Mutex<Vec<String>>,
    success_emails: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn failure_emails(&self) -> Vec<String> {
        self.failure_emails.lock().unwrap().clone()
    }

    pub fn success_emails(&self) -> Vec<String> {
        self.success_emails.lock().unwrap().clone()
    }
}

#[async_trait]
impl BuildNotifier for RecordingNotifier {
    async fn send_build_failure_email(&self, build: &BuildRecord) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "notifier")?;
        self.failure_emails
            .lock()
            .unwrap()
            .push(build.build_id.0.clone());
        Ok(())
    }

    async fn send_build_success_email(&self, build: &BuildRecord) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "notifier")?;
        self.success_emails
            .lock()
            .unwrap()
            .push(build.build_id.0.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingStatusPoster
// ---------------------------------------------------------------------------

/// Records every posted commit status.
#[derive(Debug, Default)]
pub struct RecordingStatusPoster {
    posted: Mutex<Vec<(String, CommitStatusState)>>,
    failing: AtomicBool,
}

impl RecordingStatusPoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent calls fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Posted `(build_id, status)` pairs, in call order.
    pub fn posted(&self) -> Vec<(String, CommitStatusState)> {
        self.posted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitStatusPoster for RecordingStatusPoster {
    async fn post_status(
        &self,
        build: &BuildRecord,
        status: CommitStatusState,
    ) -> Result<(), CollaboratorError> {
        maybe_fail(&self.failing, "status poster")?;
        self.posted
            .lock()
            .unwrap()
            .push((build.build_id.0.clone(), status));
        Ok(())
    }
}
