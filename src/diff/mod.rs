//! Unified-diff scanning.
//!
//! Diffs are never fully parsed: every operation here is a line-prefix scan,
//! so malformed input degrades to "no paths" or "no replacements" instead of
//! failing. Three views are extracted:
//!
//! - [`affected_paths`]: the files a diff claims to touch
//! - [`count_changed_lines`]: the size of the change, for the line budget
//! - [`extract_replacements`]: single-line edits usable by the textual fallback

mod scanner;

pub use scanner::{extract_replacements, Replacement};

pub(crate) const OLD_FILE_PREFIX: &str = "--- ";
pub(crate) const NEW_FILE_PREFIX: &str = "+++ ";
pub(crate) const HUNK_HEADER_PREFIX: &str = "@@";
pub(crate) const DIFF_PREAMBLE_PREFIX: &str = "diff ";
pub(crate) const INDEX_PREAMBLE_PREFIX: &str = "index ";

/// Marks the missing side of a file creation or deletion.
pub const DEV_NULL: &str = "/dev/null";

/// Normalize a path as it appears in a diff or policy check.
///
/// Backslashes become forward slashes and any leading `./` is dropped.
pub fn normalize_path(path: &str) -> String {
    let mut norm = path.replace('\\', "/");
    while let Some(rest) = norm.strip_prefix("./") {
        norm = rest.to_string();
    }
    norm
}

/// Extract the path named by a `--- ` or `+++ ` file header.
///
/// Returns `None` for lines that are not file headers or carry no path.
/// The `a/`/`b/` prefix and any tab-separated timestamp are stripped.
/// `/dev/null` is returned as-is; callers decide what it means.
pub(crate) fn header_path(line: &str) -> Option<String> {
    let rest = line
        .strip_prefix(OLD_FILE_PREFIX)
        .or_else(|| line.strip_prefix(NEW_FILE_PREFIX))?;
    let raw = rest.split('\t').next().unwrap_or("").trim();
    if raw.is_empty() {
        return None;
    }
    let norm = normalize_path(raw);
    let stripped = norm
        .strip_prefix("a/")
        .or_else(|| norm.strip_prefix("b/"))
        .unwrap_or(&norm);
    Some(stripped.to_string())
}

/// Collect the files touched by a diff, in discovery order, without duplicates.
///
/// Both the source and destination header contribute; `/dev/null` never does.
pub fn affected_paths(diff: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for line in diff.lines() {
        let Some(path) = header_path(line) else {
            continue;
        };
        if path == DEV_NULL || paths.contains(&path) {
            continue;
        }
        paths.push(path);
    }
    paths
}

fn is_metadata_line(line: &str) -> bool {
    line.starts_with(DIFF_PREAMBLE_PREFIX)
        || line.starts_with(INDEX_PREAMBLE_PREFIX)
        || line.starts_with(HUNK_HEADER_PREFIX)
        || line.starts_with(NEW_FILE_PREFIX)
        || line.starts_with(OLD_FILE_PREFIX)
}

/// Count added and removed lines, ignoring diff metadata.
///
/// Hunk headers are not parsed, so the count does not depend on them being
/// well-formed. A one-line change (one removal, one addition) costs 2.
pub fn count_changed_lines(diff: &str) -> usize {
    diff.lines()
        .filter(|line| !is_metadata_line(line))
        .filter(|line| line.starts_with('+') || line.starts_with('-'))
        .count()
}
