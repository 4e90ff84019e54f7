//! Repo Mechanic: guarded application of machine-generated unified diffs
//!
//! Diffs proposed by an automated agent are applied to a working tree only
//! after a policy guard accepts them, with a textual fallback when the native
//! patch tool cannot apply them, and a whole-tree checkpoint that is restored
//! when the project's checks get worse.
//!
//! # Architecture
//!
//! - [`diff`] scans unified diffs for paths, size and single-line replacements
//! - [`guard`] accepts or rejects a diff against a [`PolicyConfig`]
//! - [`apply`] runs native apply, verifies it, and falls back to [`edit`]s
//! - [`snapshot`] takes the pre-batch checkpoint and rolls back on regression
//! - [`pipeline`] strings one batch together, recording every step to an
//!   [`AuditSink`]
//!
//! # Safety
//!
//! - Rejected and dry-run diffs never touch the filesystem
//! - Fallback edits verify their before-text and write atomically
//! - Fallback targets are confined to the workspace, outside `.git/`
//!
//! # Example
//!
//! ```no_run
//! use repo_mechanic::{load_policy, PatchApplier};
//! use std::path::Path;
//!
//! let root = Path::new(".");
//! let policy = load_policy(root)?;
//! let applier = PatchApplier::new(&policy);
//!
//! let diff = std::fs::read_to_string("fix.diff")?;
//! let result = applier.apply(&diff, root, false)?;
//! println!("{result}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod apply;
pub mod checks;
pub mod config;
pub mod diff;
pub mod edit;
pub mod guard;
pub mod pipeline;
pub mod receipts;
pub mod safety;
pub mod snapshot;

// Re-exports
pub use apply::{
    ApplyError, ApplyPath, GitApply, NativeApply, NativeApplyError, PatchApplier, PatchResult,
    PatchStatus,
};
pub use checks::{CheckError, CheckReport, CheckRunner, CommandCheckRunner, Failure, NoChecks};
pub use config::{load_from_path, load_from_str, load_policy, ConfigError, PolicyConfig};
pub use diff::{affected_paths, count_changed_lines, extract_replacements, Replacement};
pub use edit::{Edit, EditError};
pub use guard::{is_path_allowed, validate, GuardVerdict};
pub use pipeline::{run_batch, PipelineError, RunOptions, RunReport, StepOutcome};
pub use receipts::{latest_run, AuditSink, CheckPhase, Event, MemorySink, ReceiptRun};
pub use safety::{SafetyError, WorkspaceGuard};
pub use snapshot::{
    Checkpoint, Checkpointer, GitCheckpointer, RevertController, RevertDecision, SnapshotId,
    VcsError,
};
