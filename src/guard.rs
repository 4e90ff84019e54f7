//! Policy guard: decides whether a diff may be applied at all.
//!
//! Evaluation is pure. Every rule runs on every diff and all violations are
//! reported together, so a rejected diff carries the full list of reasons.

use crate::config::PolicyConfig;
use crate::diff::{affected_paths, count_changed_lines, normalize_path};

/// Outcome of evaluating a diff against the policy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "GuardVerdict should be checked before applying"]
pub struct GuardVerdict {
    pub ok: bool,
    pub reasons: Vec<String>,
    /// Affected paths, in discovery order
    pub files: Vec<String>,
    pub changed_lines: usize,
}

/// Check a single path against the allowlist.
pub fn is_path_allowed(path: &str, policy: &PolicyConfig) -> bool {
    let norm = normalize_path(path);
    policy
        .allowlist_prefixes
        .iter()
        .any(|prefix| norm.starts_with(prefix.as_str()))
}

/// Evaluate a diff against the policy.
pub fn validate(diff: &str, policy: &PolicyConfig) -> GuardVerdict {
    let mut reasons = Vec::new();
    let files = affected_paths(diff);

    if files.is_empty() {
        reasons.push("no affected paths detected".to_string());
    }

    let disallowed: Vec<&str> = files
        .iter()
        .filter(|path| !is_path_allowed(path, policy))
        .map(String::as_str)
        .collect();
    if !disallowed.is_empty() {
        reasons.push(format!("paths not allowed: {}", disallowed.join(", ")));
    }

    let changed_lines = count_changed_lines(diff);
    if changed_lines > policy.max_patch_lines {
        reasons.push(format!(
            "changed lines {} exceeds max {}",
            changed_lines, policy.max_patch_lines
        ));
    }

    GuardVerdict {
        ok: reasons.is_empty(),
        reasons,
        files,
        changed_lines,
    }
}
