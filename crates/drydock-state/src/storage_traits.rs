//! Storage trait definitions for Drydock
//!
//! `BuildStore` is the single persistence abstraction the orchestration
//! engine runs against. It owns the three conditional-write primitives
//! correctness depends on:
//! - compare-and-set build state commits (concurrent evaluators converge),
//! - one-shot flag claims (exactly-once side effects),
//! - the bulk `runnable -> aborted` attempt sweep.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module; the production backend lives in
//! `surreal_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Unique identifier for a build
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub String);

impl BuildId {
    /// Generate a new random BuildId
    pub fn new() -> Self {
        BuildId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a part
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartId(pub String);

impl PartId {
    /// Generate a new random PartId
    pub fn new() -> Self {
        PartId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for PartId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-allocated attempt identifier.
///
/// Monotonically increasing across the store. This is the only ordering
/// signal for attempts: "latest attempt" means greatest `AttemptId`, never
/// most recent wall-clock timestamp (a late-returning early retry must not
/// look newer than the attempt that superseded it).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct AttemptId(pub u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CommitRef
// ---------------------------------------------------------------------------

/// Commit reference (40-char lowercase hex SHA).
///
/// The inner field is private to guarantee the string is always a valid
/// full-length hex ref produced via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitRef(String);

impl CommitRef {
    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 10 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..10.min(self.0.len())]
    }
}

impl TryFrom<String> for CommitRef {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidCommitRef { commit_ref: s });
        }
        Ok(CommitRef(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Lifecycle state of a build.
///
/// Serialized symbols are part of the external contract and must not
/// change. `Doomed` is in-progress and failure-adjacent at the same time:
/// at least one part has already failed while others are still
/// outstanding, so the build is predicted to fail but keeps running to let
/// the remaining parts surface errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    WaitingForSync,
    Partitioning,
    Runnable,
    Running,
    Doomed,
    Failed,
    Succeeded,
    Errored,
    Aborted,
}

impl BuildState {
    /// True when the state is absorbing: no re-evaluation moves past it.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Failed | Self::Succeeded | Self::Errored | Self::Aborted
        )
    }

    /// True for any non-terminal state, `Doomed` included.
    pub fn in_progress(self) -> bool {
        !self.is_terminal()
    }

    /// States that record or predict a failing outcome. `Doomed` belongs
    /// here while still being in-progress.
    pub fn failure_adjacent(self) -> bool {
        matches!(
            self,
            Self::Doomed | Self::Failed | Self::Errored | Self::Aborted
        )
    }

    /// The exact persisted symbol for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WaitingForSync => "waiting_for_sync",
            Self::Partitioning => "partitioning",
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Doomed => "doomed",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BuildState {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting_for_sync" => Ok(Self::WaitingForSync),
            "partitioning" => Ok(Self::Partitioning),
            "runnable" => Ok(Self::Runnable),
            "running" => Ok(Self::Running),
            "doomed" => Ok(Self::Doomed),
            "failed" => Ok(Self::Failed),
            "succeeded" => Ok(Self::Succeeded),
            "errored" => Ok(Self::Errored),
            "aborted" => Ok(Self::Aborted),
            other => Err(StorageError::Backend(format!(
                "unknown build state: {other}"
            ))),
        }
    }
}

/// Execution state of a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Runnable,
    Running,
    Passed,
    Failed,
    Errored,
    Aborted,
}

impl AttemptState {
    /// True when the attempt can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Errored | Self::Aborted
        )
    }

    /// The exact persisted symbol for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for AttemptState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AttemptState {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "runnable" => Ok(Self::Runnable),
            "running" => Ok(Self::Running),
            "passed" => Ok(Self::Passed),
            "failed" => Ok(Self::Failed),
            "errored" => Ok(Self::Errored),
            "aborted" => Ok(Self::Aborted),
            other => Err(StorageError::Backend(format!(
                "unknown attempt state: {other}"
            ))),
        }
    }
}

/// One-shot guard flags on a build.
///
/// Each flag moves false -> true at most once and is never reset. Claiming
/// a flag is a conditional write: under N concurrent claimants exactly one
/// observes the transition and owns the guarded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OneShotFlag {
    Promoted,
    FailureEmailSent,
    SuccessEmailSent,
}

impl OneShotFlag {
    /// Persisted column name for this flag.
    pub fn column(self) -> &'static str {
        match self {
            Self::Promoted => "promoted",
            Self::FailureEmailSent => "build_failure_email_sent",
            Self::SuccessEmailSent => "build_success_email_sent",
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Fields required to create a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBuild {
    /// Owning project name.
    pub project: String,
    /// Commit this build runs against. Unique per project.
    pub commit_ref: CommitRef,
    /// Source branch.
    pub branch: String,
    /// Queue designation.
    pub queue: String,
    /// Whether this build belongs to the project tracking the primary
    /// integration branch (suppresses success/failure email).
    pub primary_target: bool,
    /// Whether this build requests merge-on-success.
    pub merge_on_success: bool,
}

/// One logical CI run for a specific commit reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRecord {
    pub build_id: BuildId,
    pub project: String,
    pub commit_ref: CommitRef,
    pub branch: String,
    pub queue: String,
    pub primary_target: bool,
    pub merge_on_success: bool,
    pub state: BuildState,
    pub promoted: bool,
    pub build_failure_email_sent: bool,
    pub build_success_email_sent: bool,
    /// Open key-value structure, preserved opaquely.
    pub error_details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BuildRecord {
    /// Current value of a one-shot flag.
    pub fn flag(&self, flag: OneShotFlag) -> bool {
        match flag {
            OneShotFlag::Promoted => self.promoted,
            OneShotFlag::FailureEmailSent => self.build_failure_email_sent,
            OneShotFlag::SuccessEmailSent => self.build_success_email_sent,
        }
    }
}

/// Declarative definition for one part, supplied at partition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartSpec {
    /// Category of work (e.g. "spec", "cucumber", "lint").
    pub kind: String,
    /// Target paths this part covers.
    pub paths: Vec<String>,
    /// Queue designation for the part's attempts.
    pub queue: String,
    /// Configured retry budget.
    pub retries: u32,
    /// Free-form options, preserved opaquely.
    pub options: serde_json::Value,
}

/// One independently schedulable unit of work belonging to a build.
///
/// A part has no stored state; its effective status is derived from its
/// attempt log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_id: PartId,
    pub build_id: BuildId,
    pub kind: String,
    pub paths: Vec<String>,
    pub queue: String,
    pub retries: u32,
    pub options: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// One execution record of a part, possibly one of several retries.
///
/// Attempts are append-only: they are never deleted, and mutation only
/// records the start and the terminal state plus completion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: AttemptId,
    pub part_id: PartId,
    pub build_id: BuildId,
    pub state: AttemptState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Captured output attached to a build (e.g. success-script output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildLogRecord {
    pub build_id: BuildId,
    pub label: String,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// BuildStore
// ---------------------------------------------------------------------------

/// Build/part/attempt persistence.
///
/// Guarantees:
/// - `create_build` is all-or-nothing: validation failures and duplicate
///   `(project, commit_ref)` pairs persist nothing.
/// - `partition` atomically commits the `runnable` state together with the
///   created parts.
/// - `compare_and_set_state` and `claim_flag` are single atomic
///   conditional writes; the returned bool reports whether *this* caller
///   changed the row.
/// - `abort_runnable_attempts` only touches attempts still `runnable` at
///   sweep time; attempts that moved on keep their real state.
/// - Attempt ids are allocated monotonically increasing.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Create a build in `waiting_for_sync` with all one-shot flags unset.
    async fn create_build(&self, new_build: NewBuild) -> StorageResult<BuildRecord>;

    /// Retrieve a build by id.
    async fn get_build(&self, build_id: &BuildId) -> StorageResult<BuildRecord>;

    /// List builds for a project, newest first.
    async fn builds_for_project(&self, project: &str) -> StorageResult<Vec<BuildRecord>>;

    /// Commit `to` only if the stored state still equals `from`.
    /// Returns true iff this call changed the row.
    async fn compare_and_set_state(
        &self,
        build_id: &BuildId,
        from: BuildState,
        to: BuildState,
    ) -> StorageResult<bool>;

    /// Unconditionally set the build state (abort path).
    async fn force_state(&self, build_id: &BuildId, to: BuildState) -> StorageResult<()>;

    /// Claim a one-shot flag: set it true only where currently false.
    /// Returns true iff this call performed the transition.
    async fn claim_flag(&self, build_id: &BuildId, flag: OneShotFlag) -> StorageResult<bool>;

    /// In one transaction, set the build `runnable` and create one part
    /// per spec. Returns the created parts.
    async fn partition(
        &self,
        build_id: &BuildId,
        specs: Vec<PartSpec>,
    ) -> StorageResult<Vec<PartRecord>>;

    /// All parts of a build.
    async fn parts_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<PartRecord>>;

    /// Append a new `runnable` attempt for a part.
    async fn create_attempt(&self, part_id: &PartId) -> StorageResult<AttemptRecord>;

    /// Record that an attempt started executing (`runnable` -> `running`).
    async fn start_attempt(&self, attempt_id: AttemptId) -> StorageResult<()>;

    /// Record an attempt's terminal state and completion time.
    async fn finish_attempt(
        &self,
        attempt_id: AttemptId,
        state: AttemptState,
    ) -> StorageResult<AttemptRecord>;

    /// All attempts of a part, ordered by attempt id.
    async fn attempts_for_part(&self, part_id: &PartId) -> StorageResult<Vec<AttemptRecord>>;

    /// All attempts across all parts of a build, ordered by attempt id.
    async fn attempts_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<AttemptRecord>>;

    /// Bulk-transition every attempt of the build still `runnable` to
    /// `aborted`. Returns the number of attempts swept.
    async fn abort_runnable_attempts(&self, build_id: &BuildId) -> StorageResult<u64>;

    /// Attach captured output to a build under a label.
    async fn attach_log(
        &self,
        build_id: &BuildId,
        label: &str,
        content: &[u8],
    ) -> StorageResult<()>;

    /// Logs attached to a build, oldest first.
    async fn logs_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<BuildLogRecord>>;

    /// Replace the build's opaque error details.
    async fn set_error_details(
        &self,
        build_id: &BuildId,
        details: serde_json::Value,
    ) -> StorageResult<()>;
}
