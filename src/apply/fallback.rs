//! Last-resort textual substitution.
//!
//! Each [`Replacement`] is tried on its own against the current file text.
//! Nothing here aborts the batch on a miss: missing files, unmatched
//! patterns and unsafe paths become reasons and the next replacement runs.

use super::ApplyError;
use crate::diff::Replacement;
use crate::edit::Edit;
use crate::safety::{SafetyError, WorkspaceGuard};
use std::fs;

const LINE_ENDINGS: [&str; 2] = ["\n", "\r\n"];

/// What the fallback managed to do for one diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub attempted: usize,
    pub applied: usize,
    pub reasons: Vec<String>,
}

/// Search patterns for one replacement, most specific first.
///
/// With context: `context\nold` then its CRLF twin. Always last: bare `old`.
/// Every pattern only matches whole lines.
fn candidate_patterns(replacement: &Replacement) -> Vec<(String, String)> {
    let mut patterns = Vec::with_capacity(3);
    if let Some(context) = &replacement.context {
        for eol in LINE_ENDINGS {
            patterns.push((
                format!("{context}{eol}{}", replacement.old_line),
                format!("{context}{eol}{}", replacement.new_line),
            ));
        }
    }
    patterns.push((replacement.old_line.clone(), replacement.new_line.clone()));
    patterns
}

/// Apply replacements in order, each against the file as it is now.
pub fn apply_replacements(
    replacements: &[Replacement],
    workspace: &WorkspaceGuard,
) -> Result<FallbackOutcome, ApplyError> {
    let mut outcome = FallbackOutcome::default();

    for replacement in replacements {
        outcome.attempted += 1;
        let file = replacement.file.as_str();

        let path = match workspace.resolve(file) {
            Ok(path) => path,
            Err(SafetyError::Canonicalize(source)) => {
                return Err(ApplyError::Io {
                    path: workspace.workspace_root().join(file),
                    source,
                });
            }
            Err(SafetyError::ForbiddenPath { .. }) => {
                outcome.reasons.push(format!("forbidden path: {file}"));
                continue;
            }
            Err(_) => {
                outcome.reasons.push(format!("path escapes workspace: {file}"));
                continue;
            }
        };

        if !path.is_file() {
            outcome.reasons.push(format!("missing file: {file}"));
            continue;
        }

        let bytes = fs::read(&path).map_err(|source| ApplyError::Io {
            path: path.clone(),
            source,
        })?;
        let Ok(content) = String::from_utf8(bytes) else {
            outcome.reasons.push(format!("not valid UTF-8: {file}"));
            continue;
        };

        let edit = candidate_patterns(replacement)
            .into_iter()
            .find_map(|(needle, text)| Edit::first_whole_line(&path, &content, &needle, text));

        match edit {
            Some(edit) => {
                edit.apply()?;
                outcome.applied += 1;
                log::debug!("fallback replaced a line in {file}");
            }
            None => outcome.reasons.push(format!("pattern not found in {file}")),
        }
    }

    Ok(outcome)
}
