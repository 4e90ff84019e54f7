//! Check runner: the before/after failure-count signal.
//!
//! The pipeline only ever compares two integers, so any tool can sit behind
//! [`CheckRunner`]. [`CommandCheckRunner`] covers test runners that print
//! `path:line:` locations followed by a message line (pytest `-q` does).

use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use thiserror::Error;

static LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>[^:\n]+):(?P<line>\d+):(?:\s+in\s+.*)?")
        .expect("location pattern is a valid regex")
});

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("check command is empty")]
    EmptyCommand,

    #[error("failed to spawn check command {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}

/// One failure location reported by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub file: String,
    pub line: u32,
    pub message: String,
}

/// Outcome of one check run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
    pub failures: Vec<Failure>,
}

impl CheckReport {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

pub trait CheckRunner {
    fn run(&self, root: &Path) -> Result<CheckReport, CheckError>;
}

/// Reports zero failures without running anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoChecks;

impl CheckRunner for NoChecks {
    fn run(&self, _root: &Path) -> Result<CheckReport, CheckError> {
        Ok(CheckReport {
            code: Some(0),
            failures: Vec::new(),
        })
    }
}

/// Runs an external command in the root and parses its output for failures.
#[derive(Debug, Clone)]
pub struct CommandCheckRunner {
    program: String,
    args: Vec<String>,
}

impl CommandCheckRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a whitespace-separated command line such as `pytest -q`.
    pub fn from_command_line(command: &str) -> Result<Self, CheckError> {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next().ok_or(CheckError::EmptyCommand)?;
        Ok(Self::new(program, words.collect()))
    }
}

impl CheckRunner for CommandCheckRunner {
    fn run(&self, root: &Path) -> Result<CheckReport, CheckError> {
        log::debug!("running check {} {}", self.program, self.args.join(" "));
        let output = Command::new(&self.program)
            .current_dir(root)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| CheckError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CheckReport {
            code: output.status.code(),
            failures: parse_failures(&text),
        })
    }
}

/// Pair each `path:line:` location with the next non-blank line.
pub fn parse_failures(output: &str) -> Vec<Failure> {
    let mut failures = Vec::new();
    let mut pending: Option<(String, u32)> = None;

    for raw in output.lines() {
        let line = raw.trim();
        if let Some(caps) = LOCATION_RE.captures(line) {
            let parsed = caps["line"].parse::<u32>().ok();
            pending = parsed.map(|n| (caps["file"].to_string(), n));
            continue;
        }
        if line.is_empty() {
            continue;
        }
        if let Some((file, line_no)) = pending.take() {
            failures.push(Failure {
                file,
                line: line_no,
                message: line.to_string(),
            });
        }
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    const PYTEST_OUTPUT: &str = "\
F.F                                                                      [100%]
=================================== FAILURES ===================================
___________________________________ test_div ___________________________________

    def test_div():
>       assert div(4, 2) == 2
E       assert 8 == 2

tests/test_calc.py:8: AssertionError
E       assert 8 == 2
___________________________________ test_sub ___________________________________
tests/test_calc.py:12: in test_sub

    ZeroDivisionError: division by zero
=========================== short test summary info ============================
FAILED tests/test_calc.py::test_div - assert 8 == 2
2 failed, 1 passed in 0.03s
";

    #[test]
    fn test_parse_pytest_failures() {
        let failures = parse_failures(PYTEST_OUTPUT);
        assert_eq!(
            failures,
            vec![
                Failure {
                    file: "tests/test_calc.py".to_string(),
                    line: 8,
                    message: "E       assert 8 == 2".to_string(),
                },
                Failure {
                    file: "tests/test_calc.py".to_string(),
                    line: 12,
                    message: "ZeroDivisionError: division by zero".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_clean_output() {
        assert!(parse_failures("3 passed in 0.01s\n").is_empty());
        assert!(parse_failures("").is_empty());
    }

    #[test]
    fn test_location_without_message_is_dropped() {
        assert!(parse_failures("src/a.py:3:\n\n").is_empty());
    }

    #[test]
    fn test_from_command_line() {
        let runner = CommandCheckRunner::from_command_line("pytest -q -x").unwrap();
        assert_eq!(runner.program, "pytest");
        assert_eq!(runner.args, vec!["-q", "-x"]);

        assert!(matches!(
            CommandCheckRunner::from_command_line("   "),
            Err(CheckError::EmptyCommand)
        ));
    }

    #[test]
    fn test_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CommandCheckRunner::new("definitely-not-a-real-test-runner", vec![]);
        assert!(matches!(runner.run(dir.path()), Err(CheckError::Spawn { .. })));
    }

    #[test]
    fn test_no_checks() {
        let report = NoChecks.run(Path::new(".")).unwrap();
        assert_eq!(report.failure_count(), 0);
    }
}
