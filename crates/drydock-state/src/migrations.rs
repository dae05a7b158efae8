//! SurrealDB schema migrations and initialization
//!
//! Sets up all Drydock tables with constraints and indexes. Safe to call
//! multiple times (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;
use crate::schema::CounterRow;

/// Initialize all Drydock tables in SurrealDB
///
/// This should be called once on first connection.
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), StateError> {
    info!("Initializing Drydock SurrealDB schema");

    init_builds_table(db).await?;
    init_parts_table(db).await?;
    init_attempts_table(db).await?;
    init_build_logs_table(db).await?;
    init_attempt_counter(db).await?;

    info!("Drydock schema initialization complete");
    Ok(())
}

/// Initialize `builds` table with constraints and indexes
///
/// Constraints:
/// - `build_id` is unique
/// - `(project, commit_ref)` is unique: one build per commit per project
/// - `state` holds one of the nine build state symbols (app-enforced)
/// - the one-shot flags only ever move false -> true (app-enforced via
///   conditional updates)
async fn init_builds_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing builds table");

    let sql = r#"
        DEFINE TABLE builds
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        -- Ensure build_id is unique
        DEFINE INDEX idx_build_id ON TABLE builds COLUMNS build_id UNIQUE;

        -- One build per commit per project
        DEFINE INDEX idx_build_project_commit_ref ON TABLE builds COLUMNS project, commit_ref UNIQUE;

        -- Index project for per-project listings
        DEFINE INDEX idx_build_project ON TABLE builds COLUMNS project;

        -- Index state for dashboard/queue queries
        DEFINE INDEX idx_build_state ON TABLE builds COLUMNS state;

        -- Index created_at for time-range queries
        DEFINE INDEX idx_build_created_at ON TABLE builds COLUMNS created_at;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ builds table initialized");
    Ok(())
}

/// Initialize `parts` table with constraints and indexes
async fn init_parts_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing parts table");

    let sql = r#"
        DEFINE TABLE parts
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX idx_part_id ON TABLE parts COLUMNS part_id UNIQUE;

        -- Index build_id for whole-build part reads
        DEFINE INDEX idx_part_build_id ON TABLE parts COLUMNS build_id;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ parts table initialized");
    Ok(())
}

/// Initialize `attempts` table with constraints and indexes
///
/// Constraints:
/// - `attempt_id` is unique and monotonically increasing (allocated from
///   the counters table)
/// - rows are never deleted; only state/started_at/finished_at mutate
async fn init_attempts_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing attempts table");

    let sql = r#"
        DEFINE TABLE attempts
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX idx_attempt_id ON TABLE attempts COLUMNS attempt_id UNIQUE;

        -- Index part_id for per-part history reads
        DEFINE INDEX idx_attempt_part_id ON TABLE attempts COLUMNS part_id;

        -- Index build_id for whole-build aggregation and the abort sweep
        DEFINE INDEX idx_attempt_build_id ON TABLE attempts COLUMNS build_id;

        -- Composite index (build_id, state) for the runnable sweep
        DEFINE INDEX idx_attempt_build_id_state ON TABLE attempts COLUMNS build_id, state;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ attempts table initialized");
    Ok(())
}

/// Initialize `build_logs` table
async fn init_build_logs_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing build_logs table");

    let sql = r#"
        DEFINE TABLE build_logs
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX idx_build_log_build_id ON TABLE build_logs COLUMNS build_id;
    "#;

    db.query(sql)
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    info!("✓ build_logs table initialized");
    Ok(())
}

/// Seed the attempt id counter record if it does not exist yet.
async fn init_attempt_counter(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("Initializing attempt counter");

    let existing: Option<CounterRow> = db
        .select(("counters", "attempts"))
        .await
        .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

    if existing.is_none() {
        let _created: Option<CounterRow> = db
            .create(("counters", "attempts"))
            .content(CounterRow { value: 0 })
            .await
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    }

    info!("✓ attempt counter initialized");
    Ok(())
}
