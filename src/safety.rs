use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Keeps textual edits inside the working tree being patched.
///
/// Diff paths are untrusted: `src/../../etc/passwd` passes a prefix
/// allowlist, so every write target is resolved through this guard first.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    /// Canonical path to the working tree root
    workspace_root: PathBuf,
    /// Directories under the root that are never edited
    forbidden_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("path escapes workspace: {path} (workspace: {workspace})")]
    OutsideWorkspace { path: PathBuf, workspace: PathBuf },

    #[error("path is in forbidden directory: {path} (forbidden: {forbidden})")]
    ForbiddenPath { path: PathBuf, forbidden: PathBuf },

    #[error("absolute path not allowed: {0}")]
    AbsolutePath(PathBuf),

    #[error("failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl WorkspaceGuard {
    /// Create a guard for the given root, which must exist.
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let workspace_root = workspace_root.as_ref().canonicalize()?;
        let forbidden_paths = vec![workspace_root.join(".git")];
        Ok(Self {
            workspace_root,
            forbidden_paths,
        })
    }

    /// Map a workspace-relative path to an absolute one inside the root.
    ///
    /// The target does not have to exist. `..` components are resolved
    /// lexically; existing targets are also canonicalized so a symlink
    /// pointing out of the tree is caught.
    pub fn resolve(&self, relative: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let relative = relative.as_ref();
        let mut resolved = self.workspace_root.clone();

        for component in relative.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if resolved == self.workspace_root || !resolved.pop() {
                        return Err(SafetyError::OutsideWorkspace {
                            path: relative.to_path_buf(),
                            workspace: self.workspace_root.clone(),
                        });
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SafetyError::AbsolutePath(relative.to_path_buf()));
                }
            }
        }

        if resolved.exists() {
            let canonical = resolved.canonicalize()?;
            self.check_canonical(&canonical)?;
            return Ok(canonical);
        }

        self.check_canonical(&resolved)?;
        Ok(resolved)
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.workspace_root) {
            return Err(SafetyError::OutsideWorkspace {
                path: canonical.to_path_buf(),
                workspace: self.workspace_root.clone(),
            });
        }

        for forbidden in &self.forbidden_paths {
            if canonical.starts_with(forbidden) {
                return Err(SafetyError::ForbiddenPath {
                    path: canonical.to_path_buf(),
                    forbidden: forbidden.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = WorkspaceGuard::new(temp_dir.path()).unwrap();

        fs::create_dir_all(temp_dir.path().join("src")).unwrap();
        fs::write(temp_dir.path().join("src/main.py"), b"").unwrap();

        let resolved = guard.resolve("src/main.py").unwrap();
        assert!(resolved.starts_with(guard.workspace_root()));
        assert!(resolved.ends_with("src/main.py"));
    }

    #[test]
    fn test_resolve_missing_file_inside() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = WorkspaceGuard::new(temp_dir.path()).unwrap();

        let resolved = guard.resolve("src/not_there.py").unwrap();
        assert_eq!(resolved, guard.workspace_root().join("src/not_there.py"));
    }

    #[test]
    fn test_resolve_parent_escape() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = WorkspaceGuard::new(temp_dir.path()).unwrap();

        let result = guard.resolve("src/../../outside.py");
        assert!(matches!(result, Err(SafetyError::OutsideWorkspace { .. })));

        let inner = guard.resolve("src/../tests/x.py").unwrap();
        assert_eq!(inner, guard.workspace_root().join("tests/x.py"));
    }

    #[test]
    fn test_resolve_absolute_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = WorkspaceGuard::new(temp_dir.path()).unwrap();

        let absolute = temp_dir.path().join("src/a.py");
        let result = guard.resolve(&absolute);
        assert!(matches!(result, Err(SafetyError::AbsolutePath(_))));
    }

    #[test]
    fn test_resolve_git_dir_forbidden() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
        fs::write(temp_dir.path().join(".git/config"), b"").unwrap();
        let guard = WorkspaceGuard::new(temp_dir.path()).unwrap();

        let result = guard.resolve(".git/config");
        assert!(matches!(result, Err(SafetyError::ForbiddenPath { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let workspace = temp_dir.path().join("workspace");
        fs::create_dir_all(workspace.join("src")).unwrap();

        let outside = temp_dir.path().join("outside.py");
        fs::write(&outside, b"").unwrap();
        symlink(&outside, workspace.join("src/escape.py")).unwrap();

        let guard = WorkspaceGuard::new(&workspace).unwrap();
        let result = guard.resolve("src/escape.py");
        assert!(matches!(result, Err(SafetyError::OutsideWorkspace { .. })));
    }
}
