//! Repository-level configuration consumed by the orchestration engine.
//!
//! Configuration storage itself is an external concern; these are the
//! resolved values the engine needs at evaluation time.

use serde::{Deserialize, Serialize};

/// Which code-host back end handles merge/promotion for a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeBackend {
    GitHub,
    Stash,
}

/// Resolved repository configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Back end selected for merge/promotion operations.
    pub backend: MergeBackend,
    /// Ref the promotion collaborator advances on success.
    pub promotion_ref: String,
    /// Whether the repository permits merge-on-success at all.
    pub allows_merge_on_success: bool,
    /// Shell command run once after a successful build, if any.
    pub success_script: Option<String>,
    /// Whether failed builds should email their authors.
    pub email_on_failure: bool,
    /// Whether successful builds should email their authors.
    pub email_on_success: bool,
}

impl RepositoryConfig {
    pub fn new(backend: MergeBackend, promotion_ref: impl Into<String>) -> Self {
        Self {
            backend,
            promotion_ref: promotion_ref.into(),
            allows_merge_on_success: false,
            success_script: None,
            email_on_failure: true,
            email_on_success: false,
        }
    }

    /// Permit merge-on-success for builds that request it.
    pub fn with_merge_on_success(mut self, allowed: bool) -> Self {
        self.allows_merge_on_success = allowed;
        self
    }

    /// Set the post-success script.
    pub fn with_success_script(mut self, script: impl Into<String>) -> Self {
        self.success_script = Some(script.into());
        self
    }

    /// Configure email notifications.
    pub fn with_emails(mut self, on_failure: bool, on_success: bool) -> Self {
        self.email_on_failure = on_failure;
        self.email_on_success = on_success;
        self
    }
}
