//! Error types for drydock-state

use thiserror::Error;

/// Errors surfaced through the `BuildStore` trait.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Commit ref is not a 40-char hex SHA
    #[error("invalid commit ref: {commit_ref}")]
    InvalidCommitRef { commit_ref: String },

    /// Build created without an owning project
    #[error("build is missing an owning project")]
    MissingProject,

    /// A build for this (project, commit ref) pair already exists
    #[error("duplicate build for project {project} at {commit_ref}")]
    DuplicateCommitRef { project: String, commit_ref: String },

    /// Build not found
    #[error("build not found: {build_id}")]
    BuildNotFound { build_id: String },

    /// Part not found
    #[error("part not found: {part_id}")]
    PartNotFound { part_id: String },

    /// Attempt not found
    #[error("attempt not found: {attempt_id}")]
    AttemptNotFound { attempt_id: u64 },

    /// Attempt is not in the state the operation requires
    #[error("attempt {attempt_id} is {state}, expected {expected}")]
    InvalidAttemptState {
        attempt_id: u64,
        state: String,
        expected: String,
    },

    /// Backend storage error
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors that can occur in the SurrealDB persistence layer
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}
