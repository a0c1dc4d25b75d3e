//! Architectural Enforcement Integration Tests
//!
//! Source scanning helpers shared by the tests in `tests/`, which enforce
//! rules on the production code of the tutor crates:
//! - No sleeping; wait on I/O or timeouts instead
//! - No blocking I/O inside async functions
//! - No `unwrap()` / `expect()` / `panic!` outside tests
//!
//! The scanners are line based and deliberately simple: everything from the
//! first `#[cfg(test)]` in a file onwards counts as test code.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["tutor/core/src", "tutor/cli/src"];

/// Workspace root, derived from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// A Rust source file loaded for scanning
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Raw lines
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Load a file, returning `None` if it cannot be read
    pub fn load(root: &Path, path: &Path) -> Option<Self> {
        let content = fs::read_to_string(path).ok()?;
        let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        Some(Self::from_source(relative, &content))
    }

    /// Build from in-memory text
    pub fn from_source(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Number of lines before the test module starts
    pub fn production_len(&self) -> usize {
        self.lines
            .iter()
            .position(|line| line.trim_start().starts_with("#[cfg(test)]"))
            .unwrap_or(self.lines.len())
    }

    /// `(index, code)` for each production line, comments stripped
    pub fn production_code(&self) -> impl Iterator<Item = (usize, &str)> {
        self.lines[..self.production_len()]
            .iter()
            .enumerate()
            .map(|(idx, line)| (idx, code_part(line)))
    }

    /// Kind of the function enclosing line `idx`
    pub fn enclosing_fn(&self, idx: usize) -> Option<FnKind> {
        enclosing_fn(&self.lines, idx)
    }

    /// Record a violation at line `idx`
    pub fn violation(&self, idx: usize) -> Violation {
        Violation {
            path: self.path.clone(),
            line: idx + 1,
            text: self.lines[idx].trim().to_string(),
        }
    }
}

/// Load every `.rs` file under the production directories
pub fn production_files() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "production directory missing: {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                if let Some(file) = SourceFile::load(&root, entry.path()) {
                    files.push(file);
                }
            }
        }
    }

    files
}

/// Line with any `//` comment removed
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether a function is async
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    /// `async fn`
    Async,
    /// Plain `fn`
    Sync,
}

/// Scan backwards from `idx` for the nearest function signature
///
/// Stops at `mod` and `impl` boundaries.
pub fn enclosing_fn(lines: &[String], idx: usize) -> Option<FnKind> {
    for line in lines[..=idx.min(lines.len().saturating_sub(1))].iter().rev() {
        let signature = strip_qualifiers(code_part(line).trim());

        if signature.starts_with("async fn ") {
            return Some(FnKind::Async);
        }
        if signature.starts_with("fn ") {
            return Some(FnKind::Sync);
        }
        if signature.starts_with("mod ") || signature.starts_with("impl ") || signature.starts_with("impl<") {
            return None;
        }
    }
    None
}

fn strip_qualifiers(mut line: &str) -> &str {
    loop {
        let stripped = ["pub(crate) ", "pub(super) ", "pub ", "const ", "unsafe "]
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix));
        match stripped {
            Some(rest) => line = rest.trim_start(),
            None => return line,
        }
    }
}

/// A rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File relative to the workspace root
    pub path: PathBuf,
    /// One-based line number
    pub line: usize,
    /// Offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Print violations with guidance and fail the test
pub fn report(title: &str, violations: &[Violation], guidance: &[&str]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {title}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    if !guidance.is_empty() {
        eprintln!();
        for line in guidance {
            eprintln!("  {line}");
        }
    }

    panic!(
        "\nFound {} violation(s) in production code.\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(source: &str) -> Vec<String> {
        source.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // note"), "let x = 1; ");
        assert_eq!(code_part("/// docs"), "");
    }

    #[test]
    fn test_enclosing_async_fn() {
        let src = lines("impl Foo {\n    pub async fn run(&self) {\n        work();\n    }\n}");
        assert_eq!(enclosing_fn(&src, 2), Some(FnKind::Async));
    }

    #[test]
    fn test_enclosing_sync_fn_with_visibility() {
        let src = lines("pub(crate) fn load() {\n    read();\n}");
        assert_eq!(enclosing_fn(&src, 1), Some(FnKind::Sync));
    }

    #[test]
    fn test_impl_boundary_stops_scan() {
        let src = lines("async fn a() {}\nimpl Foo {\n    const X: u8 = 1;\n}");
        assert_eq!(enclosing_fn(&src, 2), None);
    }

    #[test]
    fn test_production_code_stops_at_test_module() {
        let file = SourceFile::from_source(
            "x.rs",
            "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}",
        );
        assert_eq!(file.production_len(), 2);
        assert_eq!(file.production_code().count(), 2);
    }

    #[test]
    fn test_violation_display() {
        let file = SourceFile::from_source("src/lib.rs", "fn a() {\n    x.unwrap();\n}");
        assert_eq!(file.violation(1).to_string(), "src/lib.rs:2 - x.unwrap();");
    }
}
