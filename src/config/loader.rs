use crate::config::schema::{PolicyConfig, PolicyFile, ValidationError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the target root.
pub const POLICY_FILE_NAME: &str = "repo-mechanic.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read policy from {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse policy TOML{}: {source}", origin(.path))]
    Toml {
        path: Option<PathBuf>,
        source: toml_edit::de::Error,
    },

    #[error("invalid policy{}: {source}", origin(.path))]
    Validation {
        path: Option<PathBuf>,
        source: ValidationError,
    },
}

/// ` (<path>)` when the error is tied to a file.
fn origin(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

impl ConfigError {
    /// Attach the file a string-level error came from.
    fn with_path(self, path: &Path) -> Self {
        let path = Some(path.to_path_buf());
        match self {
            ConfigError::Toml { path: None, source } => ConfigError::Toml { path, source },
            ConfigError::Validation { path: None, source } => {
                ConfigError::Validation { path, source }
            }
            other => other,
        }
    }
}

pub fn load_from_str(input: &str) -> Result<PolicyConfig, ConfigError> {
    let file: PolicyFile = toml_edit::de::from_str(input)
        .map_err(|source| ConfigError::Toml { path: None, source })?;
    file.validate()
        .map_err(|source| ConfigError::Validation { path: None, source })?;
    Ok(file.into_policy())
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<PolicyConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_from_str(&contents).map_err(|error| error.with_path(path))
}

/// Load `repo-mechanic.toml` from `root`, or the defaults when it does not exist.
pub fn load_policy(root: impl AsRef<Path>) -> Result<PolicyConfig, ConfigError> {
    let path = root.as_ref().join(POLICY_FILE_NAME);
    if !path.is_file() {
        log::debug!("no {} in {}, using default policy", POLICY_FILE_NAME, root.as_ref().display());
        return Ok(PolicyConfig::default());
    }
    load_from_path(&path)
}
