//! Before/after fingerprints used to confirm an apply changed something.

use std::fs;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// Content fingerprint of one file: `None` when the file is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileState(Option<u64>);

impl FileState {
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(Self(Some(xxh3_64(&bytes)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self(None)),
            Err(e) => Err(e),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }
}

/// Fingerprints of every affected file, taken before a native apply.
#[derive(Debug, Clone)]
pub struct TreeSnapshot {
    entries: Vec<(String, FileState)>,
}

impl TreeSnapshot {
    /// Capture the current state of `files` (workspace-relative) under `root`.
    pub fn capture(root: &Path, files: &[String]) -> std::io::Result<Self> {
        let entries = files
            .iter()
            .map(|file| Ok((file.clone(), FileState::capture(&root.join(file))?)))
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Files whose content differs from this snapshot now.
    pub fn changed_files(&self, root: &Path) -> std::io::Result<Vec<String>> {
        let mut changed = Vec::new();
        for (file, before) in &self.entries {
            if FileState::capture(&root.join(file))? != *before {
                changed.push(file.clone());
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_modification_creation_and_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.py"), "x = 1\n").unwrap();
        fs::write(root.join("src/gone.py"), "bye\n").unwrap();

        let files = vec![
            "src/a.py".to_string(),
            "src/new.py".to_string(),
            "src/gone.py".to_string(),
            "src/same.py".to_string(),
        ];
        let snapshot = TreeSnapshot::capture(root, &files).unwrap();
        assert!(snapshot.changed_files(root).unwrap().is_empty());

        fs::write(root.join("src/a.py"), "x = 2\n").unwrap();
        fs::write(root.join("src/new.py"), "hi\n").unwrap();
        fs::remove_file(root.join("src/gone.py")).unwrap();

        assert_eq!(
            snapshot.changed_files(root).unwrap(),
            vec!["src/a.py", "src/new.py", "src/gone.py"]
        );
    }

    #[test]
    fn test_rewrite_with_same_content_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), "same").unwrap();
        let snapshot = TreeSnapshot::capture(dir.path(), &["f.txt".to_string()]).unwrap();

        fs::write(dir.path().join("f.txt"), "same").unwrap();
        assert!(snapshot.changed_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_absent_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileState::capture(&dir.path().join("nope")).unwrap().is_absent());
    }
}
