use serde::Deserialize;
use std::fmt;

/// Path prefixes an automated patch may touch when no policy file says otherwise.
pub const DEFAULT_ALLOWLIST_PREFIXES: [&str; 3] = ["src/", "tests/", "fixtures/"];

/// Largest diff, in added plus removed lines, accepted by default.
pub const DEFAULT_MAX_PATCH_LINES: usize = 200;

/// Guard policy for one process run.
///
/// Built once at startup and handed to the guard and applier by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    pub allowlist_prefixes: Vec<String>,
    pub max_patch_lines: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowlist_prefixes: DEFAULT_ALLOWLIST_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_patch_lines: DEFAULT_MAX_PATCH_LINES,
        }
    }
}

/// On-disk shape of `repo-mechanic.toml`. Unknown tables are ignored.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PolicyFile {
    #[serde(default)]
    pub allowlist: AllowlistSection,
    #[serde(default)]
    pub guards: GuardsSection,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AllowlistSection {
    #[serde(default)]
    pub prefixes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct GuardsSection {
    #[serde(default)]
    pub max_patch_lines: Option<usize>,
}

impl PolicyFile {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if let Some(prefixes) = &self.allowlist.prefixes {
            for (index, prefix) in prefixes.iter().enumerate() {
                if prefix.trim().is_empty() {
                    issues.push(ValidationIssue::BlankPrefix { index });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// Resolve into a policy. An empty prefix list or a zero line budget
    /// falls back to the default for that field.
    pub fn into_policy(self) -> PolicyConfig {
        let defaults = PolicyConfig::default();
        let allowlist_prefixes = match self.allowlist.prefixes {
            Some(prefixes) if !prefixes.is_empty() => prefixes,
            _ => defaults.allowlist_prefixes,
        };
        let max_patch_lines = match self.guards.max_patch_lines {
            Some(n) if n > 0 => n,
            _ => defaults.max_patch_lines,
        };
        PolicyConfig {
            allowlist_prefixes,
            max_patch_lines,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    BlankPrefix { index: usize },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::BlankPrefix { index } => {
                write!(f, "allowlist.prefixes[{index}] is blank")
            }
        }
    }
}
