//! Drydock-State: persistence layer for Drydock builds
//!
//! Stores builds, their parts, and each part's append-only attempt log,
//! and exposes the conditional-write primitives the orchestration engine
//! relies on: compare-and-set state commits, one-shot flag claims, and the
//! bulk `runnable -> aborted` sweep.
//!
//! ## Key Components
//!
//! - `BuildStore`: the backend-agnostic storage trait
//! - `MemoryBuildStore`: in-memory fake for tests
//! - `SurrealBuildStore`: SurrealDB-backed production implementation

mod error;
pub mod fakes;
mod migrations;
pub mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    AttemptId, AttemptRecord, AttemptState, BuildId, BuildLogRecord, BuildRecord, BuildState,
    BuildStore, CommitRef, NewBuild, OneShotFlag, PartId, PartRecord, PartSpec, StorageResult,
};
pub use surreal_store::{CloudConfig, SurrealBuildStore};

/// Result type for drydock-state operations
pub type Result<T> = std::result::Result<T, StateError>;
