pub mod loader;
pub mod schema;

pub use loader::{load_from_path, load_from_str, load_policy, ConfigError, POLICY_FILE_NAME};
pub use schema::{
    PolicyConfig, PolicyFile, ValidationError, ValidationIssue, DEFAULT_ALLOWLIST_PREFIXES,
    DEFAULT_MAX_PATCH_LINES,
};
