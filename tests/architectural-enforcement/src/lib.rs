//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No blocking sleeps in production code
//! - No blocking I/O inside async functions
//! - The relay core stays free of server and UI crates
//!
//! The helpers here scan source text; they are deliberately line-based and
//! only understand the code shapes this workspace actually uses.

use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["relay/core/src", "relay/daemon/src", "cluster/src"];

/// A rule violation at a specific line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the violation is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What rule was broken
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Workspace root, located from this crate's manifest directory
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// All `.rs` files under `dir`, sorted
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Production lines of a source file as `(index, code)`
///
/// Stops at the first `#[cfg(test)]`, drops doc and line comments, and
/// strips trailing `//` comments.
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line);
        out.push((idx, code));
    }
    out
}

/// `Some(is_async)` if `line` opens a function
pub fn fn_signature(line: &str) -> Option<bool> {
    let mut rest = line.trim_start();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    if rest.starts_with("async fn ") {
        Some(true)
    } else if rest.starts_with("fn ") || rest.starts_with("const fn ") {
        Some(false)
    } else {
        None
    }
}

/// Whether the function enclosing `lines[idx]` is async
pub fn in_async_fn(lines: &[&str], idx: usize) -> bool {
    lines[..=idx]
        .iter()
        .rev()
        .find_map(|line| fn_signature(line))
        .unwrap_or(false)
}

/// Whether `lines[idx]` sits in a reopen/backoff context
///
/// Backoff sleeps are the one acceptable production sleep.
pub fn in_backoff_context(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(12);
    lines[start..=idx].iter().any(|line| {
        let lower = line.to_lowercase();
        lower.contains("delay_for")
            || lower.contains("backoff")
            || lower.contains("reopen")
            || lower.contains("retry")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature_detection() {
        assert_eq!(fn_signature("    pub async fn run("), Some(true));
        assert_eq!(fn_signature("async fn drive_viewer("), Some(true));
        assert_eq!(fn_signature("pub(crate) fn helper() {"), Some(false));
        assert_eq!(fn_signature("fn main() -> Result<()> {"), Some(false));
        assert_eq!(fn_signature("    let f = async move {"), None);
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let src = "fn a() {}\n// comment\n#[cfg(test)]\nmod tests { fn b() {} }\n";
        let lines = production_lines(src);
        assert_eq!(lines, vec![(0, "fn a() {}")]);
    }

    #[test]
    fn test_enclosing_async_fn() {
        let lines = vec![
            "fn load() {",
            "    std::fs::read(p);",
            "}",
            "async fn serve() {",
            "    std::fs::read(p);",
            "}",
        ];
        assert!(!in_async_fn(&lines, 1));
        assert!(in_async_fn(&lines, 4));
    }

    #[test]
    fn test_backoff_context() {
        let lines = vec![
            "async fn reopen_source() {",
            "    let delay = policy.delay_for(failures);",
            "    tokio::time::sleep(delay).await;",
        ];
        assert!(in_backoff_context(&lines, 2));
        assert!(!in_backoff_context(&["async fn poll() {", "    sleep(x);"], 1));
    }

    #[test]
    fn test_workspace_root_has_production_dirs() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).is_dir(), "missing {dir}");
        }
    }
}
