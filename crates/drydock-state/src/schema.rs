//! Schema definitions for Drydock SurrealDB tables
//!
//! Tables:
//! - builds: one row per logical CI build (state + one-shot flags)
//! - parts: independently schedulable units belonging to a build
//! - attempts: append-only execution records per part
//! - build_logs: captured output attached to builds
//! - counters: monotonic attempt id allocation
//!
//! Rows keep state columns as plain strings; conversion to the typed enums
//! happens at the `surreal_store` boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::{
    AttemptId, AttemptRecord, AttemptState, BuildId, BuildLogRecord, BuildRecord, BuildState,
    CommitRef, NewBuild, PartId, PartRecord, PartSpec,
};
use crate::StorageError;

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

// ---------------------------------------------------------------------------
// builds
// ---------------------------------------------------------------------------

/// Build row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub build_id: String,
    pub project: String,
    pub commit_ref: String,
    pub branch: String,
    pub queue: String,
    pub primary_target: bool,
    pub merge_on_success: bool,
    /// Build state symbol (see `BuildState::as_str`)
    pub state: String,
    pub promoted: bool,
    pub build_failure_email_sent: bool,
    pub build_success_email_sent: bool,
    pub error_details: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl BuildRow {
    /// Create a fresh row for a new build in `waiting_for_sync`.
    pub fn new(new_build: NewBuild) -> Self {
        let now = Utc::now();
        BuildRow {
            id: None,
            build_id: BuildId::new().0,
            project: new_build.project,
            commit_ref: new_build.commit_ref.as_str().to_string(),
            branch: new_build.branch,
            queue: new_build.queue,
            primary_target: new_build.primary_target,
            merge_on_success: new_build.merge_on_success,
            state: BuildState::WaitingForSync.as_str().to_string(),
            promoted: false,
            build_failure_email_sent: false,
            build_success_email_sent: false,
            error_details: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    /// Convert a DB row into the trait-level record.
    pub fn into_record(self) -> Result<BuildRecord, StorageError> {
        let state: BuildState = self.state.parse()?;
        Ok(BuildRecord {
            build_id: BuildId(self.build_id),
            project: self.project,
            commit_ref: CommitRef::try_from(self.commit_ref)?,
            branch: self.branch,
            queue: self.queue,
            primary_target: self.primary_target,
            merge_on_success: self.merge_on_success,
            state,
            promoted: self.promoted,
            build_failure_email_sent: self.build_failure_email_sent,
            build_success_email_sent: self.build_success_email_sent,
            error_details: self.error_details,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// parts
// ---------------------------------------------------------------------------

/// Part row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub part_id: String,
    pub build_id: String,
    pub kind: String,
    pub paths: Vec<String>,
    pub queue: String,
    pub retries: u32,
    pub options: serde_json::Value,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl PartRow {
    /// Create a part row from a spec.
    pub fn new(build_id: &BuildId, spec: PartSpec) -> Self {
        PartRow {
            id: None,
            part_id: PartId::new().0,
            build_id: build_id.0.clone(),
            kind: spec.kind,
            paths: spec.paths,
            queue: spec.queue,
            retries: spec.retries,
            options: spec.options,
            created_at: Utc::now(),
        }
    }

    /// Convert a DB row into the trait-level record.
    pub fn into_record(self) -> PartRecord {
        PartRecord {
            part_id: PartId(self.part_id),
            build_id: BuildId(self.build_id),
            kind: self.kind,
            paths: self.paths,
            queue: self.queue,
            retries: self.retries,
            options: self.options,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// attempts
// ---------------------------------------------------------------------------

/// Attempt row stored in SurrealDB.
///
/// `build_id` is denormalized so the abort sweep and whole-build
/// aggregation reads are single queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub attempt_id: u64,
    pub part_id: String,
    pub build_id: String,
    /// Attempt state symbol (see `AttemptState::as_str`)
    pub state: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl AttemptRow {
    /// Create a fresh `runnable` attempt row.
    pub fn new(attempt_id: u64, part_id: &PartId, build_id: &BuildId) -> Self {
        AttemptRow {
            id: None,
            attempt_id,
            part_id: part_id.0.clone(),
            build_id: build_id.0.clone(),
            state: AttemptState::Runnable.as_str().to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Convert a DB row into the trait-level record.
    pub fn into_record(self) -> Result<AttemptRecord, StorageError> {
        let state: AttemptState = self.state.parse()?;
        Ok(AttemptRecord {
            attempt_id: AttemptId(self.attempt_id),
            part_id: PartId(self.part_id),
            build_id: BuildId(self.build_id),
            state,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}

// ---------------------------------------------------------------------------
// build_logs
// ---------------------------------------------------------------------------

/// Build log row stored in SurrealDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogRow {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub build_id: String,
    pub label: String,
    pub content: Vec<u8>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl BuildLogRow {
    /// Create a log row.
    pub fn new(build_id: &BuildId, label: &str, content: &[u8]) -> Self {
        BuildLogRow {
            id: None,
            build_id: build_id.0.clone(),
            label: label.to_string(),
            content: content.to_vec(),
            created_at: Utc::now(),
        }
    }

    /// Convert a DB row into the trait-level record.
    pub fn into_record(self) -> BuildLogRecord {
        BuildLogRecord {
            build_id: BuildId(self.build_id),
            label: self.label,
            content: self.content,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// counters
// ---------------------------------------------------------------------------

/// Counter row backing monotonic attempt id allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterRow {
    pub value: u64,
}
