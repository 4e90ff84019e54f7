//! Guarded patch application.
//!
//! One diff goes through, in order:
//!
//! 1. the policy guard (rejection leaves the tree untouched)
//! 2. dry-run short circuit
//! 3. native apply of the whole diff, verified by before/after fingerprints
//! 4. textual fallback, when the native step fails or changes nothing
//!
//! The fallback is best effort: once reached, the result is `ok` and every
//! replacement that could not be applied shows up in `reasons`.

pub mod fallback;
pub mod native;
pub mod verify;

pub use fallback::FallbackOutcome;
pub use native::{GitApply, NativeApply, NativeApplyError};
pub use verify::{FileState, TreeSnapshot};

use crate::config::PolicyConfig;
use crate::diff::extract_replacements;
use crate::edit::EditError;
use crate::guard;
use crate::safety::{SafetyError, WorkspaceGuard};
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which stage produced a [`PatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ApplyPath {
    /// Guard rejected the diff; nothing was touched
    Rejected,
    /// Guard passed; nothing was touched
    DryRun,
    /// Native apply changed the tree
    Native,
    /// Textual fallback ran
    Fallback { attempted: usize, applied: usize },
}

/// How a caller should read a [`PatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStatus {
    /// `ok` with no reasons
    Clean,
    /// `ok`, but some part of the diff did not land
    WithCaveats,
    /// Rejected before any change was made
    Rejected,
}

/// Result of one apply attempt. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[must_use = "PatchResult should be checked: ok and reasons are both significant"]
pub struct PatchResult {
    pub ok: bool,
    pub changed_lines: usize,
    pub files: Vec<String>,
    pub reasons: Vec<String>,
    pub via: ApplyPath,
}

impl PatchResult {
    pub fn status(&self) -> PatchStatus {
        match (self.ok, self.reasons.is_empty()) {
            (false, _) => PatchStatus::Rejected,
            (true, true) => PatchStatus::Clean,
            (true, false) => PatchStatus::WithCaveats,
        }
    }
}

impl fmt::Display for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let files = self.files.join(", ");
        match self.status() {
            PatchStatus::Clean => write!(f, "applied to {} ({} lines)", files, self.changed_lines),
            PatchStatus::WithCaveats => write!(
                f,
                "applied to {} with caveats: {}",
                files,
                self.reasons.join("; ")
            ),
            PatchStatus::Rejected => write!(f, "rejected: {}", self.reasons.join("; ")),
        }
    }
}

/// Environment failures. Ordinary failures are reasons, not errors.
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("failed to write temporary patch file in {root}: {source}")]
    TempPatch {
        root: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to remove temporary patch file: {0}")]
    TempCleanup(std::io::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid workspace root: {0}")]
    Workspace(#[from] SafetyError),

    #[error("edit error: {0}")]
    Edit(#[from] EditError),
}

const NO_OBSERVABLE_CHANGE: &str = "native apply produced no observable change";

/// Applies diffs to a working tree under a fixed policy.
#[derive(Debug, Clone)]
pub struct PatchApplier<'a, N = GitApply> {
    policy: &'a PolicyConfig,
    native: N,
}

impl<'a> PatchApplier<'a, GitApply> {
    pub fn new(policy: &'a PolicyConfig) -> Self {
        Self::with_native(policy, GitApply::new())
    }
}

impl<'a, N: NativeApply> PatchApplier<'a, N> {
    pub fn with_native(policy: &'a PolicyConfig, native: N) -> Self {
        Self { policy, native }
    }

    pub fn policy(&self) -> &PolicyConfig {
        self.policy
    }

    /// Apply one diff to the tree at `root`.
    ///
    /// Returns `Err` only for environment failures; rejections, misses and
    /// native-apply failures are reported through [`PatchResult::reasons`].
    pub fn apply(&self, diff: &str, root: &Path, dry_run: bool) -> Result<PatchResult, ApplyError> {
        let verdict = guard::validate(diff, self.policy);
        if !verdict.ok {
            log::debug!("guard rejected diff: {}", verdict.reasons.join("; "));
            return Ok(PatchResult {
                ok: false,
                changed_lines: verdict.changed_lines,
                files: verdict.files,
                reasons: verdict.reasons,
                via: ApplyPath::Rejected,
            });
        }

        if dry_run {
            return Ok(PatchResult {
                ok: true,
                changed_lines: verdict.changed_lines,
                files: verdict.files,
                reasons: Vec::new(),
                via: ApplyPath::DryRun,
            });
        }

        let before = TreeSnapshot::capture(root, &verdict.files).map_err(|source| ApplyError::Io {
            path: root.to_path_buf(),
            source,
        })?;

        let native_reason = match self.run_native(diff, root)? {
            Ok(()) => {
                let changed = before.changed_files(root).map_err(|source| ApplyError::Io {
                    path: root.to_path_buf(),
                    source,
                })?;
                if !changed.is_empty() {
                    log::debug!("native apply changed {}", changed.join(", "));
                    return Ok(PatchResult {
                        ok: true,
                        changed_lines: verdict.changed_lines,
                        files: verdict.files,
                        reasons: Vec::new(),
                        via: ApplyPath::Native,
                    });
                }
                NO_OBSERVABLE_CHANGE.to_string()
            }
            Err(e) => e.to_string(),
        };
        log::warn!("falling back to textual substitution: {native_reason}");

        let workspace = WorkspaceGuard::new(root)?;
        let replacements = extract_replacements(diff);
        let outcome = fallback::apply_replacements(&replacements, &workspace)?;
        if outcome.attempted == 0 {
            log::warn!(
                "no single-line replacements in diff for {}; tree left unchanged",
                verdict.files.join(", ")
            );
        }

        let mut reasons = Vec::with_capacity(outcome.reasons.len() + 1);
        reasons.push(native_reason);
        reasons.extend(outcome.reasons);

        Ok(PatchResult {
            ok: true,
            changed_lines: verdict.changed_lines,
            files: verdict.files,
            reasons,
            via: ApplyPath::Fallback {
                attempted: outcome.attempted,
                applied: outcome.applied,
            },
        })
    }

    /// Run the native step against a temporary patch file inside `root`.
    ///
    /// The outer `Result` is the environment, the inner one the native verdict.
    /// The patch file is deleted on every path: explicitly here, or by
    /// `NamedTempFile`'s drop on early return.
    fn run_native(
        &self,
        diff: &str,
        root: &Path,
    ) -> Result<Result<(), NativeApplyError>, ApplyError> {
        let temp_patch_err = |source| ApplyError::TempPatch {
            root: root.to_path_buf(),
            source,
        };

        let mut patch_file = tempfile::Builder::new()
            .prefix(".mechanic-")
            .suffix(".patch")
            .tempfile_in(root)
            .map_err(temp_patch_err)?;
        patch_file
            .write_all(diff.as_bytes())
            .map_err(temp_patch_err)?;
        if !diff.ends_with('\n') {
            // git apply treats a missing final newline as a corrupt patch
            patch_file.write_all(b"\n").map_err(temp_patch_err)?;
        }
        patch_file.flush().map_err(temp_patch_err)?;

        let verdict = self.native.apply(patch_file.path(), root);
        patch_file.close().map_err(ApplyError::TempCleanup)?;
        Ok(verdict)
    }
}
