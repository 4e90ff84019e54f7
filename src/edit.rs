use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A verified byte-span substitution in one file.
///
/// The fallback path turns every matched pattern into one of these. The
/// span is re-checked against the file on disk right before writing, so a
/// file that changed between matching and writing is left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Edit does nothing until apply() is called"]
pub struct Edit {
    /// Absolute path of the file to edit
    pub file: PathBuf,
    /// Starting byte offset (inclusive)
    pub byte_start: usize,
    /// Ending byte offset (exclusive)
    pub byte_end: usize,
    /// Text expected at [byte_start, byte_end) before the edit
    pub expected_before: String,
    /// Text to put at [byte_start, byte_end)
    pub new_text: String,
}

#[derive(Error, Debug)]
pub enum EditError {
    #[error("before-text verification failed at {file}:{byte_start}")]
    BeforeTextMismatch {
        file: PathBuf,
        byte_start: usize,
        expected: String,
        found: String,
    },

    #[error("invalid byte range: [{byte_start}, {byte_end}) in file of length {file_len}")]
    InvalidByteRange {
        byte_start: usize,
        byte_end: usize,
        file_len: usize,
    },

    #[error("file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("edit would create malformed UTF-8 in {0}")]
    InvalidUtf8Edit(PathBuf),
}

impl Edit {
    /// Build an edit replacing the first whole-line occurrence of `needle`.
    ///
    /// A match must start at the beginning of the content or right after a
    /// `\n`, and end at the end of the content or right before `\n` or
    /// `\r\n`. A multi-line `needle` therefore matches a run of whole lines.
    /// Returns `None` when no such occurrence exists.
    pub fn first_whole_line(
        file: impl Into<PathBuf>,
        content: &str,
        needle: &str,
        replacement: impl Into<String>,
    ) -> Option<Self> {
        let first_char_len = needle.chars().next()?.len_utf8();
        let mut from = 0;
        while let Some(offset) = content[from..].find(needle) {
            let byte_start = from + offset;
            let byte_end = byte_start + needle.len();
            let before = &content[..byte_start];
            let after = &content[byte_end..];
            let starts_line = before.is_empty() || before.ends_with('\n');
            let ends_line = after.is_empty() || after.starts_with('\n') || after.starts_with("\r\n");
            if starts_line && ends_line {
                return Some(Self {
                    file: file.into(),
                    byte_start,
                    byte_end,
                    expected_before: needle.to_string(),
                    new_text: replacement.into(),
                });
            }
            from = byte_start + first_char_len;
        }
        None
    }

    /// Apply this edit to in-memory content.
    pub fn apply_to(&self, content: &[u8]) -> Result<Vec<u8>, EditError> {
        if self.byte_start > self.byte_end || self.byte_end > content.len() {
            return Err(EditError::InvalidByteRange {
                byte_start: self.byte_start,
                byte_end: self.byte_end,
                file_len: content.len(),
            });
        }

        let current = &content[self.byte_start..self.byte_end];
        if current != self.expected_before.as_bytes() {
            return Err(EditError::BeforeTextMismatch {
                file: self.file.clone(),
                byte_start: self.byte_start,
                expected: self.expected_before.clone(),
                found: String::from_utf8_lossy(current).into_owned(),
            });
        }

        let mut updated = Vec::with_capacity(
            content.len() - (self.byte_end - self.byte_start) + self.new_text.len(),
        );
        updated.extend_from_slice(&content[..self.byte_start]);
        updated.extend_from_slice(self.new_text.as_bytes());
        updated.extend_from_slice(&content[self.byte_end..]);

        std::str::from_utf8(&updated)
            .map_err(|_| EditError::InvalidUtf8Edit(self.file.clone()))?;
        Ok(updated)
    }

    /// Apply this edit to the file on disk atomically.
    pub fn apply(&self) -> Result<(), EditError> {
        let original = fs::read(&self.file).map_err(|source| EditError::Io {
            path: self.file.clone(),
            source,
        })?;
        let updated = self.apply_to(&original)?;

        atomic_write(&self.file, &updated).map_err(|source| EditError::Io {
            path: self.file.clone(),
            source,
        })?;

        // Tools that cache on mtime must see the change even within one tick.
        filetime::set_file_mtime(&self.file, filetime::FileTime::now()).map_err(|source| {
            EditError::Io {
                path: self.file.clone(),
                source,
            }
        })?;

        Ok(())
    }
}

/// Write through a sibling tempfile, fsync, then rename over `path`.
///
/// The original file's permissions are carried over to the replacement.
fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no parent directory",
        )
    })?;

    let permissions = fs::metadata(path)?.permissions();
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    fs::set_permissions(temp.path(), permissions)?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
