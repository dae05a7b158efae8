//! Error taxonomy for the orchestration engine.

use drydock_state::StorageError;
use thiserror::Error;

/// Failure reported by an external collaborator (scheduler, merge
/// strategy, notifier, status poster).
///
/// A collaborator failure after a one-shot guard has been claimed must
/// reach the caller: the flag stays claimed, the action did not happen,
/// and operational alerting owns the gap. This core never auto-retries a
/// claimed action.
#[derive(Debug, Error)]
#[error("{service} failed: {message}")]
pub struct CollaboratorError {
    /// Which collaborator failed (e.g. "scheduler", "merge strategy").
    pub service: String,
    /// Backend-provided description.
    pub message: String,
}

impl CollaboratorError {
    pub fn new(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Drydock orchestration errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// Result type for orchestration operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
