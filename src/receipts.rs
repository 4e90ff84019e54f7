//! Audit sink and on-disk receipts.
//!
//! Every apply attempt, check run and revert is recorded as an [`Event`].
//! [`ReceiptRun`] writes them as JSON lines under a per-run directory;
//! recording never fails the run, write errors are only remembered.

use crate::apply::ApplyPath;
use crate::snapshot::SnapshotId;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const STEPS_FILE: &str = "steps.jsonl";
pub const SUMMARY_FILE: &str = "summary.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckPhase {
    Before,
    After,
}

/// One structured audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Meta {
        command: String,
        timestamp: String,
        path: String,
        dry_run: bool,
        max_steps: usize,
    },
    Checks {
        phase: CheckPhase,
        code: Option<i32>,
        failures: usize,
    },
    Patch {
        index: usize,
        ok: bool,
        files: Vec<String>,
        lines: usize,
        dry_run: bool,
        reasons: Vec<String>,
        via: ApplyPath,
        diff: String,
    },
    Revert {
        snapshot: SnapshotId,
        ok: bool,
        error: Option<String>,
    },
    Error {
        index: Option<usize>,
        message: String,
    },
}

/// Receives audit events. Implementations must not fail the caller.
pub trait AuditSink {
    fn record(&mut self, event: Event);
}

/// Keeps events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl AuditSink for MemorySink {
    fn record(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// One run's receipts directory: `steps.jsonl` plus `summary.md`.
#[derive(Debug)]
pub struct ReceiptRun {
    run_dir: PathBuf,
    steps_path: PathBuf,
    summary_path: PathBuf,
    last_error: Option<String>,
}

impl ReceiptRun {
    /// Create `<receipts_root>/<UTC timestamp>/`, adding a numeric suffix if
    /// a run already claimed this second.
    pub fn start(receipts_root: impl AsRef<Path>) -> std::io::Result<Self> {
        let receipts_root = receipts_root.as_ref();
        fs::create_dir_all(receipts_root)?;

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut run_dir = receipts_root.join(&stamp);
        let mut attempt = 1;
        loop {
            match fs::create_dir(&run_dir) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    run_dir = receipts_root.join(format!("{stamp}_{attempt}"));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self {
            steps_path: run_dir.join(STEPS_FILE),
            summary_path: run_dir.join(SUMMARY_FILE),
            run_dir,
            last_error: None,
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn steps_path(&self) -> &Path {
        &self.steps_path
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }

    /// Most recent write failure, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn append_event(&self, event: &Event) -> Result<(), String> {
        let line = serde_json::to_string(event).map_err(|e| e.to_string())?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.steps_path)
            .map_err(|e| e.to_string())?;
        writeln!(file, "{line}").map_err(|e| e.to_string())
    }

    /// Write `summary.md` as a title and one bullet per line.
    pub fn write_summary<I, S>(&mut self, title: &str, lines: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut body = format!("# {title}\n\n");
        for line in lines {
            body.push_str("- ");
            body.push_str(line.as_ref());
            body.push('\n');
        }
        match fs::write(&self.summary_path, body) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("failed to write {}: {e}", self.summary_path.display());
                self.last_error = Some(e.to_string());
                false
            }
        }
    }
}

impl AuditSink for ReceiptRun {
    fn record(&mut self, event: Event) {
        if let Err(e) = self.append_event(&event) {
            log::warn!("failed to record receipt in {}: {e}", self.steps_path.display());
            self.last_error = Some(e);
        }
    }
}

/// Newest run directory under `receipts_root`, by name.
pub fn latest_run(receipts_root: impl AsRef<Path>) -> Option<PathBuf> {
    WalkDir::new(receipts_root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .last()
}
