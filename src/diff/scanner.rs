use super::{
    header_path, DEV_NULL, DIFF_PREAMBLE_PREFIX, HUNK_HEADER_PREFIX, INDEX_PREAMBLE_PREFIX,
    NEW_FILE_PREFIX, OLD_FILE_PREFIX,
};

/// A single-line edit recovered from a diff, used by the textual fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// Normalized path of the file the edit targets
    pub file: String,
    /// Nearest unchanged line preceding the edit within the same hunk
    pub context: Option<String>,
    /// Line text to find (without the `-` marker)
    pub old_line: String,
    /// Line text to put in its place (without the `+` marker)
    pub new_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    /// Outside any file block
    Idle,
    /// After a file header, before the first hunk
    InFile { file: String },
    /// Inside a hunk body
    InHunk { file: String },
}

impl ScanState {
    fn file(&self) -> Option<&str> {
        match self {
            ScanState::Idle => None,
            ScanState::InFile { file } | ScanState::InHunk { file } => Some(file),
        }
    }
}

struct Scanner {
    state: ScanState,
    last_context: Option<String>,
    pending_old: Option<String>,
    pending_new: Option<String>,
    found: Vec<Replacement>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: ScanState::Idle,
            last_context: None,
            pending_old: None,
            pending_new: None,
            found: Vec::new(),
        }
    }

    fn reset_hunk_registers(&mut self) {
        self.last_context = None;
        self.pending_old = None;
        self.pending_new = None;
    }

    fn feed(&mut self, line: &str) {
        if line.starts_with(DIFF_PREAMBLE_PREFIX) {
            self.state = ScanState::Idle;
            self.reset_hunk_registers();
        } else if line.starts_with(OLD_FILE_PREFIX) || line.starts_with(NEW_FILE_PREFIX) {
            self.on_file_header(line);
        } else if line.starts_with(HUNK_HEADER_PREFIX) {
            self.reset_hunk_registers();
            if let Some(file) = self.state.file() {
                self.state = ScanState::InHunk {
                    file: file.to_string(),
                };
            }
        } else if line.starts_with(INDEX_PREAMBLE_PREFIX) {
            // preamble, carries nothing we use
        } else if matches!(self.state, ScanState::InHunk { .. }) {
            self.on_hunk_line(line);
        }
    }

    fn on_file_header(&mut self, line: &str) {
        self.reset_hunk_registers();
        let path = header_path(line).filter(|p| p != DEV_NULL);
        let is_destination = line.starts_with(NEW_FILE_PREFIX);

        self.state = match (path, is_destination) {
            (Some(file), _) => ScanState::InFile { file },
            // `+++ /dev/null` is a deletion: stay on the source file.
            (None, true) => match self.state.file() {
                Some(file) => ScanState::InFile {
                    file: file.to_string(),
                },
                None => ScanState::Idle,
            },
            (None, false) => ScanState::Idle,
        };
    }

    fn on_hunk_line(&mut self, line: &str) {
        if let Some(removed) = line.strip_prefix('-') {
            self.pending_old = Some(removed.to_string());
        } else if let Some(added) = line.strip_prefix('+') {
            self.pending_new = Some(added.to_string());
        } else if line.starts_with('\\') {
            // "\ No newline at end of file"
            return;
        } else {
            let context = line.strip_prefix(' ').unwrap_or(line);
            self.last_context = Some(context.to_string());
            return;
        }
        self.try_pair();
    }

    fn try_pair(&mut self) {
        let Some(file) = self.state.file() else {
            return;
        };
        if self.pending_old.is_none() || self.pending_new.is_none() {
            return;
        }
        let old_line = self.pending_old.take().unwrap_or_default();
        let new_line = self.pending_new.take().unwrap_or_default();
        self.found.push(Replacement {
            file: file.to_string(),
            context: self.last_context.clone(),
            old_line,
            new_line,
        });
    }
}

/// Recover single-line-for-single-line edits from a diff.
///
/// Each removed line paired with an added line in the same hunk yields one
/// [`Replacement`], keyed to the last context line seen before the pair
/// completed. Context never crosses a hunk or file header. Insertions,
/// deletions and multi-line rewrites are dropped: the fallback only does
/// single-line text substitution.
pub fn extract_replacements(diff: &str) -> Vec<Replacement> {
    let mut scanner = Scanner::new();
    for line in diff.lines() {
        scanner.feed(line);
    }
    scanner.found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(file: &str, context: Option<&str>, old: &str, new: &str) -> Replacement {
        Replacement {
            file: file.to_string(),
            context: context.map(str::to_string),
            old_line: old.to_string(),
            new_line: new.to_string(),
        }
    }

    #[test]
    fn test_single_replacement_with_context() {
        let diff = "--- a/src/calc.py
+++ b/src/calc.py
@@ -1,4 +1,4 @@
 def div(a, b):
-    return a * b
+    return a / b

 x = 1";
        assert_eq!(
            extract_replacements(diff),
            vec![rep(
                "src/calc.py",
                Some("def div(a, b):"),
                "    return a * b",
                "    return a / b"
            )]
        );
    }

    #[test]
    fn test_replacement_without_context() {
        let diff = "--- a/src/a.py\n+++ b/src/a.py\n@@ -1,3 +1,3 @@\n-x = 1\n+x = 2\n y = 3\n";
        assert_eq!(
            extract_replacements(diff),
            vec![rep("src/a.py", None, "x = 1", "x = 2")]
        );
    }

    #[test]
    fn test_multiple_pairs_track_context() {
        let diff = "--- a/src/a.py
+++ b/src/a.py
@@ -1,6 +1,6 @@
 first
-a = 1
+a = 2
 second
-b = 1
+b = 2";
        assert_eq!(
            extract_replacements(diff),
            vec![
                rep("src/a.py", Some("first"), "a = 1", "a = 2"),
                rep("src/a.py", Some("second"), "b = 1", "b = 2"),
            ]
        );
    }

    #[test]
    fn test_context_does_not_cross_hunks() {
        let diff = "--- a/src/a.py
+++ b/src/a.py
@@ -1,2 +1,2 @@
 first
@@ -10,2 +10,2 @@
-a = 1
+a = 2";
        assert_eq!(
            extract_replacements(diff),
            vec![rep("src/a.py", None, "a = 1", "a = 2")]
        );
    }

    #[test]
    fn test_context_does_not_cross_files() {
        let diff = "--- a/src/a.py
+++ b/src/a.py
@@ -1,2 +1,2 @@
 shared
--- a/src/b.py
+++ b/src/b.py
@@ -1,1 +1,1 @@
-b = 1
+b = 2";
        assert_eq!(
            extract_replacements(diff),
            vec![rep("src/b.py", None, "b = 1", "b = 2")]
        );
    }

    #[test]
    fn test_pure_insertion_and_deletion_yield_nothing() {
        let insert = "--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1,2 @@\n ctx\n+added\n";
        assert!(extract_replacements(insert).is_empty());

        let delete = "--- a/src/a.py\n+++ b/src/a.py\n@@ -1,2 +1 @@\n ctx\n-gone\n";
        assert!(extract_replacements(delete).is_empty());
    }

    #[test]
    fn test_unmatched_lines_are_dropped() {
        let diff = "--- a/src/a.py\n+++ b/src/a.py\n@@ -1 +1,2 @@\n-old\n+new\n+extra\n";
        assert_eq!(
            extract_replacements(diff),
            vec![rep("src/a.py", None, "old", "new")]
        );
    }

    #[test]
    fn test_new_file_uses_destination() {
        let diff = "--- /dev/null\n+++ b/src/new.py\n@@ -0,0 +1 @@\n+print()\n";
        assert!(extract_replacements(diff).is_empty());
    }

    #[test]
    fn test_lines_before_hunk_are_ignored() {
        let diff = "--- a/src/a.py\n+++ b/src/a.py\n-x\n+y\n";
        assert!(extract_replacements(diff).is_empty());
    }

    #[test]
    fn test_no_newline_marker_is_not_context() {
        let diff = "--- a/src/a.py
+++ b/src/a.py
@@ -1,2 +1,2 @@
 keep
-tail
\\ No newline at end of file
+TAIL
\\ No newline at end of file";
        assert_eq!(
            extract_replacements(diff),
            vec![rep("src/a.py", Some("keep"), "tail", "TAIL")]
        );
    }

    #[test]
    fn test_git_preamble_resets_state() {
        let diff = "diff --git a/src/a.py b/src/a.py
--- a/src/a.py
+++ b/src/a.py
@@ -1 +1 @@
 ctx
-a
diff --git a/src/b.py b/src/b.py
+b";
        assert!(extract_replacements(diff).is_empty());
    }
}
