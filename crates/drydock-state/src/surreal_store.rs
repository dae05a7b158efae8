//! SurrealDB-backed BuildStore implementation
//!
//! Uses the `schema` row types for persistence, converting to/from
//! `storage_traits` types at the boundary. The conditional writes lean on
//! single-statement `UPDATE ... WHERE ... RETURN AFTER` queries: the
//! statement is atomic, and the returned row count tells the caller
//! whether it performed the transition.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{AttemptRow, BuildLogRow, BuildRow, CounterRow, PartRow};
use crate::storage_traits::{
    AttemptId, AttemptRecord, AttemptState, BuildId, BuildLogRecord, BuildRecord, BuildState,
    BuildStore, NewBuild, OneShotFlag, PartId, PartRecord, PartSpec, StorageResult,
};

/// Configuration for a SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g. "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "drydock")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "drydock")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace =
            std::env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "drydock".to_string());
        let database = std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "main".to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// SurrealDB-backed implementation of [`BuildStore`].
#[derive(Clone)]
pub struct SurrealBuildStore {
    db: Surreal<Any>,
}

impl SurrealBuildStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `drydock/main`, and runs `init_schema`.
    pub async fn in_memory() -> Result<Self, StateError> {
        Self::connect("mem://").await
    }

    /// Connect to the given SurrealDB URL and initialize the schema.
    #[instrument]
    pub async fn connect(url: &str) -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {url}: {e}")))?;

        db.use_ns("drydock")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealBuildStore connected ({url})");
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// If the cloud env chain is set, connects to SurrealDB Cloud; else if
    /// SURREALDB_URL is set, connects there; else falls back to local
    /// surrealkv persistence under `.drydock/db`.
    #[instrument(skip_all)]
    pub async fn from_env() -> Result<Self, StateError> {
        if let Ok(config) = CloudConfig::from_env() {
            let db = surrealdb::engine::any::connect(&config.endpoint)
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;

            if config.is_root {
                db.signin(Root {
                    username: &config.username,
                    password: &config.password,
                })
                .await
                .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
            } else {
                db.signin(Database {
                    namespace: &config.namespace,
                    database: &config.database,
                    username: &config.username,
                    password: &config.password,
                })
                .await
                .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
            }

            db.use_ns(&config.namespace)
                .use_db(&config.database)
                .await
                .map_err(|e| StateError::Connection(e.to_string()))?;

            migrations::init_schema(&db).await?;
            info!("SurrealBuildStore connected (cloud)");
            return Ok(Self { db });
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return Self::connect(&url).await;
        }

        let path = ".drydock/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!("Failed to create database directory {path}: {e}"))
        })?;
        let url = format!("surrealkv://{path}");
        info!("No cloud config or SURREALDB_URL found, using local persistence: {url}");
        Self::connect(&url).await
    }

    // -- private helpers -----------------------------------------------------

    /// Fetch a build row by id, or BuildNotFound.
    async fn fetch_build(&self, build_id: &BuildId) -> StorageResult<BuildRow> {
        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM builds WHERE build_id = $bid")
            .bind(("bid", bid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<BuildRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::BuildNotFound {
                build_id: build_id.0.clone(),
            })
    }

    /// Fetch an attempt row by id, or AttemptNotFound.
    async fn fetch_attempt(&self, attempt_id: AttemptId) -> StorageResult<AttemptRow> {
        let mut res = self
            .db
            .query("SELECT * FROM attempts WHERE attempt_id = $aid")
            .bind(("aid", attempt_id.0))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AttemptRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .ok_or(StorageError::AttemptNotFound {
                attempt_id: attempt_id.0,
            })
    }

    /// Allocate the next monotonic attempt id.
    async fn next_attempt_id(&self) -> StorageResult<u64> {
        let mut res = self
            .db
            .query("UPDATE counters:attempts SET value += 1 RETURN AFTER")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<CounterRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter()
            .next()
            .map(|c| c.value)
            .ok_or_else(|| StorageError::Backend("attempt counter missing".to_string()))
    }
}

#[async_trait]
impl BuildStore for SurrealBuildStore {
    #[instrument(skip(self, new_build), fields(project = %new_build.project, commit_ref = %new_build.commit_ref.short()))]
    async fn create_build(&self, new_build: NewBuild) -> StorageResult<BuildRecord> {
        if new_build.project.trim().is_empty() {
            return Err(StorageError::MissingProject);
        }

        let row = BuildRow::new(new_build);
        debug!(build_id = %row.build_id, "creating build");

        let created: Option<BuildRow> = self
            .db
            .create("builds")
            .content(row.clone())
            .await
            .map_err(|e| {
                let msg = e.to_string();
                // The unique (project, commit_ref) index rejects duplicates.
                if msg.contains("idx_build_project_commit_ref") {
                    StorageError::DuplicateCommitRef {
                        project: row.project.clone(),
                        commit_ref: row.commit_ref.clone(),
                    }
                } else {
                    StorageError::Backend(msg)
                }
            })?;

        created
            .ok_or_else(|| StorageError::Backend("build row was not created".to_string()))?
            .into_record()
    }

    async fn get_build(&self, build_id: &BuildId) -> StorageResult<BuildRecord> {
        self.fetch_build(build_id).await?.into_record()
    }

    async fn builds_for_project(&self, project: &str) -> StorageResult<Vec<BuildRecord>> {
        let project_owned = project.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM builds WHERE project = $project ORDER BY created_at DESC")
            .bind(("project", project_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<BuildRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(BuildRow::into_record).collect()
    }

    #[instrument(skip(self), fields(build_id = %build_id))]
    async fn compare_and_set_state(
        &self,
        build_id: &BuildId,
        from: BuildState,
        to: BuildState,
    ) -> StorageResult<bool> {
        self.fetch_build(build_id).await?;

        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query(
                "UPDATE builds SET state = $to, updated_at = time::now() \
                 WHERE build_id = $bid AND state = $from RETURN AFTER",
            )
            .bind(("bid", bid))
            .bind(("from", from.as_str()))
            .bind(("to", to.as_str()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<BuildRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let changed = !rows.is_empty();
        debug!(from = %from, to = %to, changed, "state compare-and-set");
        Ok(changed)
    }

    #[instrument(skip(self), fields(build_id = %build_id))]
    async fn force_state(&self, build_id: &BuildId, to: BuildState) -> StorageResult<()> {
        self.fetch_build(build_id).await?;

        let bid = build_id.0.clone();
        self.db
            .query(
                "UPDATE builds SET state = $to, updated_at = time::now() \
                 WHERE build_id = $bid",
            )
            .bind(("bid", bid))
            .bind(("to", to.as_str()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip(self), fields(build_id = %build_id, flag = flag.column()))]
    async fn claim_flag(&self, build_id: &BuildId, flag: OneShotFlag) -> StorageResult<bool> {
        self.fetch_build(build_id).await?;

        // The column name comes from the OneShotFlag enum, never from
        // caller input, so interpolating it is safe.
        let column = flag.column();
        let sql = format!(
            "UPDATE builds SET {column} = true, updated_at = time::now() \
             WHERE build_id = $bid AND {column} = false RETURN AFTER"
        );

        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query(sql)
            .bind(("bid", bid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<BuildRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let claimed = !rows.is_empty();
        debug!(claimed, "one-shot flag claim");
        Ok(claimed)
    }

    #[instrument(skip(self, specs), fields(build_id = %build_id, parts = specs.len()))]
    async fn partition(
        &self,
        build_id: &BuildId,
        specs: Vec<PartSpec>,
    ) -> StorageResult<Vec<PartRecord>> {
        self.fetch_build(build_id).await?;

        let rows: Vec<PartRow> = specs
            .into_iter()
            .map(|spec| PartRow::new(build_id, spec))
            .collect();

        // One transaction: the runnable state and the created parts
        // become visible together or not at all.
        let bid = build_id.0.clone();
        self.db
            .query(
                "BEGIN TRANSACTION; \
                 UPDATE builds SET state = $state, updated_at = time::now() \
                 WHERE build_id = $bid; \
                 INSERT INTO parts $parts; \
                 COMMIT TRANSACTION;",
            )
            .bind(("bid", bid))
            .bind(("state", BuildState::Runnable.as_str()))
            .bind(("parts", rows.clone()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        info!(count = rows.len(), "build partitioned");
        Ok(rows.into_iter().map(PartRow::into_record).collect())
    }

    async fn parts_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<PartRecord>> {
        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM parts WHERE build_id = $bid ORDER BY created_at ASC")
            .bind(("bid", bid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<PartRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(PartRow::into_record).collect())
    }

    #[instrument(skip(self), fields(part_id = %part_id))]
    async fn create_attempt(&self, part_id: &PartId) -> StorageResult<AttemptRecord> {
        let pid = part_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM parts WHERE part_id = $pid")
            .bind(("pid", pid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let parts: Vec<PartRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let part = parts
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::PartNotFound {
                part_id: part_id.0.clone(),
            })?;

        let next_id = self.next_attempt_id().await?;
        let row = AttemptRow::new(next_id, part_id, &BuildId(part.build_id));

        let created: Option<AttemptRow> = self
            .db
            .create("attempts")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        created
            .ok_or_else(|| StorageError::Backend("attempt row was not created".to_string()))?
            .into_record()
    }

    async fn start_attempt(&self, attempt_id: AttemptId) -> StorageResult<()> {
        let mut res = self
            .db
            .query(
                "UPDATE attempts SET state = 'running', started_at = time::now() \
                 WHERE attempt_id = $aid AND state = 'runnable' RETURN AFTER",
            )
            .bind(("aid", attempt_id.0))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AttemptRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        if rows.is_empty() {
            // Distinguish a missing attempt from a state conflict.
            let row = self.fetch_attempt(attempt_id).await?;
            return Err(StorageError::InvalidAttemptState {
                attempt_id: attempt_id.0,
                state: row.state,
                expected: "runnable".to_string(),
            });
        }
        Ok(())
    }

    async fn finish_attempt(
        &self,
        attempt_id: AttemptId,
        state: AttemptState,
    ) -> StorageResult<AttemptRecord> {
        let mut res = self
            .db
            .query(
                "UPDATE attempts SET state = $state, finished_at = time::now() \
                 WHERE attempt_id = $aid AND state IN ['runnable', 'running'] RETURN AFTER",
            )
            .bind(("aid", attempt_id.0))
            .bind(("state", state.as_str()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AttemptRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => row.into_record(),
            None => {
                let row = self.fetch_attempt(attempt_id).await?;
                Err(StorageError::InvalidAttemptState {
                    attempt_id: attempt_id.0,
                    state: row.state,
                    expected: "runnable or running".to_string(),
                })
            }
        }
    }

    async fn attempts_for_part(&self, part_id: &PartId) -> StorageResult<Vec<AttemptRecord>> {
        let pid = part_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM attempts WHERE part_id = $pid ORDER BY attempt_id ASC")
            .bind(("pid", pid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AttemptRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(AttemptRow::into_record).collect()
    }

    async fn attempts_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<AttemptRecord>> {
        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM attempts WHERE build_id = $bid ORDER BY attempt_id ASC")
            .bind(("bid", bid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AttemptRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(AttemptRow::into_record).collect()
    }

    #[instrument(skip(self), fields(build_id = %build_id))]
    async fn abort_runnable_attempts(&self, build_id: &BuildId) -> StorageResult<u64> {
        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query(
                "UPDATE attempts SET state = 'aborted', finished_at = time::now() \
                 WHERE build_id = $bid AND state = 'runnable' RETURN AFTER",
            )
            .bind(("bid", bid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<AttemptRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let swept = rows.len() as u64;
        info!(swept, "aborted runnable attempts");
        Ok(swept)
    }

    async fn attach_log(
        &self,
        build_id: &BuildId,
        label: &str,
        content: &[u8],
    ) -> StorageResult<()> {
        self.fetch_build(build_id).await?;

        let row = BuildLogRow::new(build_id, label, content);
        let _created: Option<BuildLogRow> = self
            .db
            .create("build_logs")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn logs_for_build(&self, build_id: &BuildId) -> StorageResult<Vec<BuildLogRecord>> {
        let bid = build_id.0.clone();
        let mut res = self
            .db
            .query("SELECT * FROM build_logs WHERE build_id = $bid ORDER BY created_at ASC")
            .bind(("bid", bid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<BuildLogRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().map(BuildLogRow::into_record).collect())
    }

    async fn set_error_details(
        &self,
        build_id: &BuildId,
        details: serde_json::Value,
    ) -> StorageResult<()> {
        self.fetch_build(build_id).await?;

        let bid = build_id.0.clone();
        self.db
            .query(
                "UPDATE builds SET error_details = $details, updated_at = time::now() \
                 WHERE build_id = $bid",
            )
            .bind(("bid", bid))
            .bind(("details", details))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(())
    }
}
