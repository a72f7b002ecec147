//! Architectural Enforcement
//!
//! Source scanning shared by the workspace policy tests:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//!
//! Production code is every line of `mesh/*/src` above the file's
//! `#[cfg(test)]` module, with `//` comments stripped.

use std::fs;
use std::path::{Path, PathBuf};

/// Source roots checked by the policy tests, relative to the workspace root
pub const PRODUCTION_ROOTS: [&str; 2] = ["mesh/core/src", "mesh/daemon/src"];

/// Workspace root, resolved from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
}

/// One production source file
#[derive(Debug)]
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Production lines, comments stripped, test module removed
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Parse file content into production lines
    #[must_use]
    pub fn from_content(path: PathBuf, content: &str) -> Self {
        let lines = content
            .lines()
            .take_while(|line| line.trim() != "#[cfg(test)]")
            .map(|line| strip_comment(line).to_string())
            .collect();
        Self { path, lines }
    }

    /// Format a violation at a zero-based line index
    #[must_use]
    pub fn violation(&self, idx: usize, what: &str) -> String {
        format!(
            "{}:{} - {}: {}",
            self.path.display(),
            idx + 1,
            what,
            self.lines[idx].trim()
        )
    }

    /// Whether the function enclosing line `idx` is `async`
    ///
    /// Returns `None` outside any function.
    #[must_use]
    pub fn enclosing_fn_is_async(&self, idx: usize) -> Option<bool> {
        self.lines[..=idx]
            .iter()
            .rev()
            .find_map(|line| fn_signature(line))
    }
}

/// Every production file under [`PRODUCTION_ROOTS`]
///
/// # Panics
///
/// Panics if no source root exists, which means the workspace root was not
/// resolved correctly.
#[must_use]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();
    let mut roots_found = 0;

    for dir in PRODUCTION_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        roots_found += 1;

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        {
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(SourceFile::from_content(relative, &content));
        }
    }

    assert!(
        roots_found > 0,
        "no production source roots found under {}",
        root.display()
    );
    files
}

fn strip_comment(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// `Some(is_async)` when the line declares a function
fn fn_signature(line: &str) -> Option<bool> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .strip_prefix("pub(crate) ")
        .or_else(|| trimmed.strip_prefix("pub(super) "))
        .or_else(|| trimmed.strip_prefix("pub "))
        .unwrap_or(trimmed);

    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(code: &str) -> SourceFile {
        SourceFile::from_content(PathBuf::from("mesh/core/src/example.rs"), code)
    }

    #[test]
    fn test_test_module_is_excluded() {
        let file = source("fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n");
        assert_eq!(file.lines, vec!["fn a() {}"]);
    }

    #[test]
    fn test_comments_are_stripped() {
        let file = source("let x = 1; // tokio::time::sleep(d)\n");
        assert_eq!(file.lines[0], "let x = 1; ");
    }

    #[test]
    fn test_enclosing_fn_detection() {
        let file = source(
            "pub async fn load() {\n    read();\n}\npub(crate) fn parse() {\n    read();\n}\n",
        );
        assert_eq!(file.enclosing_fn_is_async(1), Some(true));
        assert_eq!(file.enclosing_fn_is_async(4), Some(false));
        assert_eq!(source("use std::fs;\n").enclosing_fn_is_async(0), None);
    }
}
