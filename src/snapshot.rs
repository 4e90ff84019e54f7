//! Pre-batch checkpoints and regression rollback.
//!
//! The protocol has two phases around a batch of applies:
//!
//! 1. [`RevertController::begin`] records a checkpoint of the whole tree
//!    (best effort; without one the batch runs unprotected)
//! 2. [`RevertController::settle`] compares failure counts and restores the
//!    checkpoint on regression, discarding every change made since
//!
//! A [`Checkpoint`] is consumed by `settle`, so it can be restored at most once.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

const SNAPSHOT_MESSAGE: &str = "chore(mechanic): pre-patch snapshot";

/// Opaque checkpoint identifier (a commit id for [`GitCheckpointer`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum VcsError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` printed no commit id")]
    EmptyOutput { command: String },
}

/// Versioning mechanism underneath the checkpoint protocol.
pub trait Checkpointer {
    /// Record the current working tree and return an id to restore it.
    fn snapshot(&self, root: &Path) -> Result<SnapshotId, VcsError>;

    /// Put the working tree back to `snapshot`, discarding later changes.
    fn restore(&self, snapshot: &SnapshotId, root: &Path) -> Result<(), VcsError>;
}

/// Git-backed checkpoints: commit everything, later `reset --hard` and `clean`.
///
/// Paths registered with [`GitCheckpointer::excluding`] are neither committed
/// nor cleaned, so files written during the batch (receipts) survive a restore.
#[derive(Debug, Clone)]
pub struct GitCheckpointer {
    program: String,
    excluded: Vec<String>,
}

impl GitCheckpointer {
    pub fn new() -> Self {
        Self::with_program("git")
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            excluded: Vec::new(),
        }
    }

    /// Leave `path` (relative to the root) out of snapshots and restores.
    pub fn excluding(mut self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().replace('\\', "/");
        let path = path.trim_matches('/');
        if !path.is_empty() {
            self.excluded.push(path.to_string());
        }
        self
    }

    /// `-- . :(exclude)<path>...`, scoping a command to the root.
    fn pathspec(&self) -> Vec<String> {
        let mut spec = vec!["--".to_string(), ".".to_string()];
        spec.extend(self.excluded.iter().map(|p| format!(":(exclude){p}")));
        spec
    }

    fn run<S: AsRef<str>>(&self, root: &Path, args: &[S]) -> Result<String, VcsError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let command = format!("{} {}", self.program, args.join(" "));
        log::debug!("running {command} in {}", root.display());

        let output = Command::new(&self.program)
            .current_dir(root)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| VcsError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(VcsError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for GitCheckpointer {
    fn default() -> Self {
        Self::new()
    }
}

impl Checkpointer for GitCheckpointer {
    fn snapshot(&self, root: &Path) -> Result<SnapshotId, VcsError> {
        let mut add = vec!["add".to_string(), "-A".to_string()];
        add.extend(self.pathspec());
        self.run(root, &add)?;
        // Identity is pinned so the checkpoint works without user git config.
        self.run(
            root,
            &[
                "-c",
                "user.name=repo-mechanic",
                "-c",
                "user.email=repo-mechanic@localhost",
                "commit",
                "--allow-empty",
                "--no-verify",
                "-q",
                "-m",
                SNAPSHOT_MESSAGE,
            ],
        )?;
        let sha = self.run(root, &["rev-parse", "HEAD"])?;
        if sha.is_empty() {
            return Err(VcsError::EmptyOutput {
                command: format!("{} rev-parse HEAD", self.program),
            });
        }
        Ok(SnapshotId(sha))
    }

    /// Everything untracked after the reset was created after the snapshot,
    /// since the snapshot staged the whole tree. Ignored files are kept.
    fn restore(&self, snapshot: &SnapshotId, root: &Path) -> Result<(), VcsError> {
        self.run(root, &["reset", "--hard", "-q", snapshot.as_str()])?;
        let mut clean = vec!["clean".to_string(), "-fd".to_string(), "-q".to_string()];
        clean.extend(self.pathspec());
        self.run(root, &clean)?;
        Ok(())
    }
}

/// A checkpoint taken for one batch. Not `Clone`: it is settled once.
#[derive(Debug, PartialEq, Eq)]
pub struct Checkpoint {
    id: SnapshotId,
}

impl Checkpoint {
    pub fn id(&self) -> &SnapshotId {
        &self.id
    }
}

/// What `settle` decided and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevertDecision {
    /// No checkpoint was taken, so nothing could be restored
    Unprotected,
    /// Failure count did not grow; batch changes stay
    Kept { snapshot: SnapshotId },
    /// Failure count grew and a restore was attempted
    Reverted {
        snapshot: SnapshotId,
        ok: bool,
        error: Option<String>,
    },
}

/// Drives the checkpoint protocol for one working tree.
#[derive(Debug, Clone)]
pub struct RevertController<'a, K> {
    checkpointer: &'a K,
    root: PathBuf,
}

impl<'a, K: Checkpointer> RevertController<'a, K> {
    pub fn new(checkpointer: &'a K, root: impl Into<PathBuf>) -> Self {
        Self {
            checkpointer,
            root: root.into(),
        }
    }

    /// Take the pre-batch checkpoint. Failure only forfeits rollback.
    pub fn begin(&self) -> Option<Checkpoint> {
        match self.checkpointer.snapshot(&self.root) {
            Ok(id) => {
                log::debug!("pre-batch snapshot {id}");
                Some(Checkpoint { id })
            }
            Err(e) => {
                log::warn!("no pre-batch snapshot, batch runs without rollback: {e}");
                None
            }
        }
    }

    /// Restore the checkpoint if `after` failures exceed `before`.
    pub fn settle(
        &self,
        checkpoint: Option<Checkpoint>,
        before: usize,
        after: usize,
    ) -> RevertDecision {
        let Some(Checkpoint { id }) = checkpoint else {
            return RevertDecision::Unprotected;
        };

        if after <= before {
            return RevertDecision::Kept { snapshot: id };
        }

        log::warn!("failures went from {before} to {after}, restoring snapshot {id}");
        match self.checkpointer.restore(&id, &self.root) {
            Ok(()) => RevertDecision::Reverted {
                snapshot: id,
                ok: true,
                error: None,
            },
            Err(e) => RevertDecision::Reverted {
                snapshot: id,
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }
}
