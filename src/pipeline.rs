//! One guarded batch run.
//!
//! Checks before, checkpoint, apply each diff in order, checks after, then
//! keep or roll back. A failing diff never stops the batch; only the step
//! limit does.

use crate::apply::{NativeApply, PatchApplier, PatchResult};
use crate::checks::{CheckError, CheckReport, CheckRunner};
use crate::receipts::{AuditSink, CheckPhase, Event};
use crate::snapshot::{Checkpointer, RevertController, RevertDecision};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{phase:?} checks failed to run: {source}")]
    Checks {
        phase: CheckPhase,
        source: CheckError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Apply at most this many diffs
    pub max_steps: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_steps: 10,
        }
    }
}

/// Per-diff outcome: a result, or the environment error that stopped it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied(PatchResult),
    Errored(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub before: CheckReport,
    pub after: CheckReport,
    pub steps: Vec<StepOutcome>,
    /// Files of every `ok` result, sorted and deduplicated
    pub applied_files: Vec<String>,
    /// `None` in dry-run mode
    pub revert: Option<RevertDecision>,
}

impl RunReport {
    pub fn rejected(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, StepOutcome::Applied(r) if !r.ok))
            .count()
    }

    pub fn errored(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, StepOutcome::Errored(_)))
            .count()
    }
}

fn run_checks<C: CheckRunner, S: AuditSink>(
    checks: &C,
    root: &Path,
    phase: CheckPhase,
    sink: &mut S,
) -> Result<CheckReport, PipelineError> {
    let report = match checks.run(root) {
        Ok(report) => report,
        Err(source) => {
            sink.record(Event::Error {
                index: None,
                message: format!("{phase:?} checks failed to run: {source}"),
            });
            return Err(PipelineError::Checks { phase, source });
        }
    };
    sink.record(Event::Checks {
        phase,
        code: report.code,
        failures: report.failure_count(),
    });
    Ok(report)
}

/// Run one batch of diffs against `root`.
pub fn run_batch<N, C, K, S>(
    root: &Path,
    diffs: &[String],
    options: &RunOptions,
    applier: &PatchApplier<'_, N>,
    checks: &C,
    checkpointer: &K,
    sink: &mut S,
) -> Result<RunReport, PipelineError>
where
    N: NativeApply,
    C: CheckRunner,
    K: Checkpointer,
    S: AuditSink,
{
    let before = run_checks(checks, root, CheckPhase::Before, sink)?;

    let controller = RevertController::new(checkpointer, root);
    let checkpoint = if options.dry_run {
        None
    } else {
        controller.begin()
    };

    let mut steps = Vec::new();
    let mut applied_files: Vec<String> = Vec::new();

    for (index, diff) in diffs.iter().take(options.max_steps).enumerate() {
        match applier.apply(diff, root, options.dry_run) {
            Ok(result) => {
                sink.record(Event::Patch {
                    index,
                    ok: result.ok,
                    files: result.files.clone(),
                    lines: result.changed_lines,
                    dry_run: options.dry_run,
                    reasons: result.reasons.clone(),
                    via: result.via,
                    diff: diff.clone(),
                });
                if result.ok {
                    applied_files.extend(result.files.iter().cloned());
                }
                steps.push(StepOutcome::Applied(result));
            }
            Err(e) => {
                log::error!("diff {index} hit an environment failure: {e}");
                sink.record(Event::Error {
                    index: Some(index),
                    message: e.to_string(),
                });
                steps.push(StepOutcome::Errored(e.to_string()));
            }
        }
    }
    if diffs.len() > options.max_steps {
        log::debug!(
            "step limit {} reached, {} diffs not attempted",
            options.max_steps,
            diffs.len() - options.max_steps
        );
    }

    applied_files.sort();
    applied_files.dedup();

    let after = run_checks(checks, root, CheckPhase::After, sink)?;

    let revert = if options.dry_run {
        None
    } else {
        let decision =
            controller.settle(checkpoint, before.failure_count(), after.failure_count());
        if let RevertDecision::Reverted {
            snapshot,
            ok,
            error,
        } = &decision
        {
            sink.record(Event::Revert {
                snapshot: snapshot.clone(),
                ok: *ok,
                error: error.clone(),
            });
        }
        Some(decision)
    };

    Ok(RunReport {
        before,
        after,
        steps,
        applied_files,
        revert,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::NativeApplyError;
    use crate::checks::Failure;
    use crate::config::PolicyConfig;
    use crate::receipts::MemorySink;
    use crate::snapshot::{SnapshotId, VcsError};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    struct FailingNative;

    impl NativeApply for FailingNative {
        fn apply(&self, _: &Path, _: &Path) -> Result<(), NativeApplyError> {
            Err(NativeApplyError::Rejected {
                program: "fake".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "nope".to_string(),
            })
        }
    }

    /// Hands out failure counts in order.
    struct ScriptedChecks {
        counts: RefCell<VecDeque<usize>>,
    }

    impl ScriptedChecks {
        fn new(counts: &[usize]) -> Self {
            Self {
                counts: RefCell::new(counts.iter().copied().collect()),
            }
        }
    }

    impl CheckRunner for ScriptedChecks {
        fn run(&self, _root: &Path) -> Result<CheckReport, CheckError> {
            let n = self.counts.borrow_mut().pop_front().unwrap_or(0);
            Ok(CheckReport {
                code: Some(if n == 0 { 0 } else { 1 }),
                failures: (0..n)
                    .map(|i| Failure {
                        file: "tests/test_x.py".to_string(),
                        line: i as u32 + 1,
                        message: "AssertionError".to_string(),
                    })
                    .collect(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingCheckpointer {
        snapshots: Cell<usize>,
        restored: RefCell<Vec<SnapshotId>>,
    }

    impl Checkpointer for RecordingCheckpointer {
        fn snapshot(&self, _root: &Path) -> Result<SnapshotId, VcsError> {
            self.snapshots.set(self.snapshots.get() + 1);
            Ok(SnapshotId::new("snap-1"))
        }

        fn restore(&self, snapshot: &SnapshotId, _root: &Path) -> Result<(), VcsError> {
            self.restored.borrow_mut().push(snapshot.clone());
            Ok(())
        }
    }

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/a.py"), "x = 1\n").unwrap();
        dir
    }

    fn diffs() -> Vec<String> {
        vec![
            "--- a/other/x.py\n+++ b/other/x.py\n@@ -1 +1 @@\n-a\n+b\n".to_string(),
            "--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1 @@\n-x = 1\n+x = 2\n".to_string(),
        ]
    }

    #[test]
    fn test_regression_triggers_revert_event() {
        let dir = workspace();
        let policy = PolicyConfig::default();
        let applier = PatchApplier::with_native(&policy, FailingNative);
        let checks = ScriptedChecks::new(&[1, 3]);
        let checkpointer = RecordingCheckpointer::default();
        let mut sink = MemorySink::default();
        let options = RunOptions {
            dry_run: false,
            max_steps: 10,
        };

        let report = run_batch(
            dir.path(),
            &diffs(),
            &options,
            &applier,
            &checks,
            &checkpointer,
            &mut sink,
        )
        .unwrap();

        assert_eq!(report.rejected(), 1);
        assert_eq!(report.applied_files, vec!["src/a.py"]);
        assert_eq!(*checkpointer.restored.borrow(), vec![SnapshotId::new("snap-1")]);
        assert!(matches!(
            report.revert,
            Some(RevertDecision::Reverted { ok: true, .. })
        ));
        assert!(sink.events.contains(&Event::Revert {
            snapshot: SnapshotId::new("snap-1"),
            ok: true,
            error: None,
        }));
    }

    #[test]
    fn test_rejected_diff_does_not_stop_batch() {
        let dir = workspace();
        let policy = PolicyConfig::default();
        let applier = PatchApplier::with_native(&policy, FailingNative);
        let checkpointer = RecordingCheckpointer::default();
        let mut sink = MemorySink::default();
        let options = RunOptions {
            dry_run: false,
            max_steps: 10,
        };

        let report = run_batch(
            dir.path(),
            &diffs(),
            &options,
            &applier,
            &ScriptedChecks::new(&[2, 2]),
            &checkpointer,
            &mut sink,
        )
        .unwrap();

        assert_eq!(report.steps.len(), 2);
        assert!(matches!(report.revert, Some(RevertDecision::Kept { .. })));
        assert!(checkpointer.restored.borrow().is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.py")).unwrap(),
            "x = 2\n"
        );

        let kinds: Vec<&str> = sink
            .events
            .iter()
            .map(|e| match e {
                Event::Checks { .. } => "checks",
                Event::Patch { .. } => "patch",
                Event::Revert { .. } => "revert",
                Event::Error { .. } => "error",
                Event::Meta { .. } => "meta",
            })
            .collect();
        assert_eq!(kinds, vec!["checks", "patch", "patch", "checks"]);
    }

    #[test]
    fn test_dry_run_skips_checkpoint_and_files() {
        let dir = workspace();
        let policy = PolicyConfig::default();
        let applier = PatchApplier::with_native(&policy, FailingNative);
        let checkpointer = RecordingCheckpointer::default();
        let mut sink = MemorySink::default();

        let report = run_batch(
            dir.path(),
            &diffs(),
            &RunOptions::default(),
            &applier,
            &ScriptedChecks::new(&[0, 5]),
            &checkpointer,
            &mut sink,
        )
        .unwrap();

        assert_eq!(checkpointer.snapshots.get(), 0);
        assert!(report.revert.is_none());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("src/a.py")).unwrap(),
            "x = 1\n"
        );
    }

    #[test]
    fn test_step_limit() {
        let dir = workspace();
        let policy = PolicyConfig::default();
        let applier = PatchApplier::with_native(&policy, FailingNative);
        let mut sink = MemorySink::default();
        let options = RunOptions {
            dry_run: true,
            max_steps: 1,
        };

        let report = run_batch(
            dir.path(),
            &diffs(),
            &options,
            &applier,
            &ScriptedChecks::new(&[]),
            &RecordingCheckpointer::default(),
            &mut sink,
        )
        .unwrap();

        assert_eq!(report.steps.len(), 1);
    }

    #[test]
    fn test_environment_error_recorded_and_batch_continues() {
        let dir = workspace();
        let missing_root = dir.path().join("gone");
        let policy = PolicyConfig::default();
        let applier = PatchApplier::with_native(&policy, FailingNative);
        let mut sink = MemorySink::default();
        let options = RunOptions {
            dry_run: false,
            max_steps: 10,
        };

        let report = run_batch(
            &missing_root,
            &diffs(),
            &options,
            &applier,
            &ScriptedChecks::new(&[]),
            &RecordingCheckpointer::default(),
            &mut sink,
        )
        .unwrap();

        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.rejected(), 1);
        assert_eq!(report.errored(), 1);
        assert!(sink
            .events
            .iter()
            .any(|e| matches!(e, Event::Error { index: Some(1), .. })));
    }
}
