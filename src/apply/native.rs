//! Native structural apply through `git apply`.

use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Why a native apply did not go through.
///
/// This is an ordinary outcome: the applier reports it as a reason and
/// falls back to textual substitution.
#[derive(Error, Debug)]
pub enum NativeApplyError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} apply rejected the patch ({status}): {stderr}")]
    Rejected {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Applies a patch file to a working tree as a whole.
///
/// Implementations must either apply every hunk or leave the tree untouched.
pub trait NativeApply {
    fn apply(&self, patch_file: &Path, root: &Path) -> Result<(), NativeApplyError>;
}

/// `git apply`, tolerant of whitespace-only mismatches.
///
/// Works in plain directories too: outside a repository `git apply`
/// behaves like `patch -p1`.
#[derive(Debug, Clone)]
pub struct GitApply {
    program: String,
}

impl GitApply {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
        }
    }

    /// Use a specific git executable.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for GitApply {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeApply for GitApply {
    fn apply(&self, patch_file: &Path, root: &Path) -> Result<(), NativeApplyError> {
        let output = Command::new(&self.program)
            .current_dir(root)
            .args(["apply", "--ignore-whitespace", "--whitespace=nowarn"])
            .arg(patch_file)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| NativeApplyError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(NativeApplyError::Rejected {
            program: self.program.clone(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
