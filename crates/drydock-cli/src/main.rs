//! Drydock CLI - operational surface for the build orchestration core
//!
//! ## Commands
//!
//! - `create`: Register a build for a commit
//! - `show`: Show a build's state, mapped status, and derived timing
//! - `parts`: List a build's parts with their derived statuses
//! - `partition`: Split a build into parts and schedule first attempts
//! - `reevaluate`: Re-derive the build state from its parts' attempts
//! - `abort`: Abort a build and preempt unstarted attempts
//! - `badge`: Print the badge color for a build
//!
//! Collaborator integrations (executor queue, code host, email) are wired
//! by the deployment; this binary announces their invocations through
//! tracing so the engine can be driven end-to-end from a shell.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, Level};

use drydock_core::{
    all_passed_on_first_try, badge_color, commit_status, finished_at, group_attempts,
    AttemptScheduler, BuildCoordinator, BuildId, BuildNotifier, BuildRecord, BuildStore,
    CollaboratorError, CommitRef, CommitStatusPoster, CommitStatusState, MergeBackend,
    MergeStrategy, NewBuild, PartRecord, PartSpec, RepositoryConfig,
};
use drydock_state::SurrealBuildStore;

#[derive(Parser)]
#[command(name = "drydock")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Distributed CI build orchestration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a build for a commit
    Create {
        /// Owning project name
        #[arg(short, long)]
        project: String,

        /// Full 40-char commit SHA
        #[arg(short, long)]
        commit: String,

        /// Source branch
        #[arg(short, long, default_value = "main")]
        branch: String,

        /// Queue designation
        #[arg(short, long, default_value = "ci")]
        queue: String,

        /// Mark as the primary integration target (suppresses emails)
        #[arg(long)]
        primary: bool,

        /// Request merge-on-success
        #[arg(long)]
        merge_on_success: bool,
    },

    /// Show a build's state and derived details
    Show {
        /// Build ID
        build: String,
    },

    /// List a build's parts with derived statuses
    Parts {
        /// Build ID
        build: String,
    },

    /// Partition a build into parts and schedule first attempts
    Partition {
        /// Build ID
        build: String,

        /// Part kinds to create (one part per kind)
        #[arg(short, long, required = true)]
        kind: Vec<String>,
    },

    /// Re-derive the build state from its parts' attempt histories
    Reevaluate {
        /// Build ID
        build: String,
    },

    /// Abort a build and preempt attempts that have not started
    Abort {
        /// Build ID
        build: String,
    },

    /// Print the badge color for a build
    Badge {
        /// Build ID
        build: String,
    },
}

// ---------------------------------------------------------------------------
// Tracing-backed collaborators
//
// The queue, code host, and mailer are deployment concerns; these stand-ins
// announce each dispatch so the engine's behavior is observable.
// ---------------------------------------------------------------------------

struct TracingScheduler;

#[async_trait]
impl AttemptScheduler for TracingScheduler {
    async fn schedule_attempt(&self, part: &PartRecord) -> Result<(), CollaboratorError> {
        info!(part_id = %part.part_id, queue = %part.queue, "attempt dispatch requested");
        Ok(())
    }
}

struct TracingMergeStrategy;

#[async_trait]
impl MergeStrategy for TracingMergeStrategy {
    async fn promote(
        &self,
        commit_ref: &CommitRef,
        config: &RepositoryConfig,
    ) -> Result<(), CollaboratorError> {
        info!(commit_ref = %commit_ref.short(), promotion_ref = %config.promotion_ref, "promotion requested");
        Ok(())
    }

    async fn merge_ref(&self, build: &BuildRecord) -> Result<(), CollaboratorError> {
        info!(build_id = %build.build_id, branch = %build.branch, "merge requested");
        Ok(())
    }

    async fn run_success_script(
        &self,
        config: &RepositoryConfig,
        commit_ref: &CommitRef,
        branch: &str,
    ) -> Result<Vec<u8>, CollaboratorError> {
        info!(commit_ref = %commit_ref.short(), branch, script = ?config.success_script, "success script requested");
        Ok(Vec::new())
    }

    async fn add_note(
        &self,
        commit_ref: &CommitRef,
        label: &str,
        note: &str,
    ) -> Result<(), CollaboratorError> {
        info!(commit_ref = %commit_ref.short(), label, note, "note requested");
        Ok(())
    }
}

struct TracingNotifier;

#[async_trait]
impl BuildNotifier for TracingNotifier {
    async fn send_build_failure_email(&self, build: &BuildRecord) -> Result<(), CollaboratorError> {
        info!(build_id = %build.build_id, "failure email requested");
        Ok(())
    }

    async fn send_build_success_email(&self, build: &BuildRecord) -> Result<(), CollaboratorError> {
        info!(build_id = %build.build_id, "success email requested");
        Ok(())
    }
}

struct TracingStatusPoster;

#[async_trait]
impl CommitStatusPoster for TracingStatusPoster {
    async fn post_status(
        &self,
        build: &BuildRecord,
        status: CommitStatusState,
    ) -> Result<(), CollaboratorError> {
        info!(build_id = %build.build_id, status = status.as_str(), "commit status posted");
        Ok(())
    }
}

fn coordinator(store: Arc<SurrealBuildStore>) -> BuildCoordinator {
    // Repository configuration storage is external; the CLI operates with
    // the default GitHub-backed configuration.
    let repository = RepositoryConfig::new(MergeBackend::GitHub, "refs/heads/green");
    BuildCoordinator::new(
        store,
        repository,
        Arc::new(TracingScheduler),
        Arc::new(TracingMergeStrategy),
        Arc::new(TracingNotifier),
        Arc::new(TracingStatusPoster),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store = Arc::new(
        SurrealBuildStore::from_env()
            .await
            .context("failed to connect to the build store")?,
    );

    match cli.command {
        Commands::Create {
            project,
            commit,
            branch,
            queue,
            primary,
            merge_on_success,
        } => {
            let commit_ref = CommitRef::try_from(commit).context("invalid commit ref")?;
            let build = store
                .create_build(NewBuild {
                    project,
                    commit_ref,
                    branch,
                    queue,
                    primary_target: primary,
                    merge_on_success,
                })
                .await?;
            println!("{}", build.build_id);
        }

        Commands::Show { build } => {
            let build_id = BuildId(build);
            let build = store.get_build(&build_id).await?;
            let parts = store.parts_for_build(&build_id).await?;
            let attempts = store.attempts_for_build(&build_id).await?;
            let histories = group_attempts(parts, attempts);

            println!("build:      {}", build.build_id);
            println!("project:    {}", build.project);
            println!("commit:     {}", build.commit_ref);
            println!("branch:     {}", build.branch);
            println!("state:      {}", build.state);
            println!("status:     {}", commit_status(build.state).as_str());
            println!("badge:      {}", badge_color(build.state).as_str());
            println!("promoted:   {}", build.promoted);
            println!("first try:  {}", all_passed_on_first_try(&histories));
            match finished_at(&histories) {
                Some(at) => println!("finished:   {at}"),
                None => println!("finished:   -"),
            }
        }

        Commands::Parts { build } => {
            let build_id = BuildId(build);
            let parts = store.parts_for_build(&build_id).await?;
            let attempts = store.attempts_for_build(&build_id).await?;
            let histories = group_attempts(parts, attempts);

            for history in &histories {
                let status = history
                    .status()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "pending".to_string());
                println!(
                    "{}  {}  attempts={}  {}",
                    history.part.part_id,
                    history.part.kind,
                    history.attempts.len(),
                    status
                );
            }
        }

        Commands::Partition { build, kind } => {
            let build_id = BuildId(build);
            let specs = kind
                .into_iter()
                .map(|kind| PartSpec {
                    kind,
                    paths: Vec::new(),
                    queue: "ci".to_string(),
                    retries: 0,
                    options: serde_json::json!({}),
                })
                .collect();
            let parts = coordinator(store.clone()).partition(&build_id, specs).await?;
            for part in parts {
                println!("{}  {}", part.part_id, part.kind);
            }
        }

        Commands::Reevaluate { build } => {
            let build_id = BuildId(build);
            let transition = coordinator(store.clone())
                .update_state_from_parts(&build_id)
                .await?;
            println!(
                "{} -> {}{}",
                transition.previous,
                transition.next,
                if transition.committed { "" } else { " (no change)" }
            );
        }

        Commands::Abort { build } => {
            let build_id = BuildId(build);
            let swept = coordinator(store.clone()).abort(&build_id).await?;
            println!("aborted, {swept} attempt(s) preempted");
        }

        Commands::Badge { build } => {
            let build_id = BuildId(build);
            let build = store.get_build(&build_id).await?;
            println!("{}", badge_color(build.state).as_str());
        }
    }

    Ok(())
}
