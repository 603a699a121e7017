//! Architectural Enforcement Integration Tests
//!
//! Source scans that keep the async crates honest:
//! - No sleeping outside the few places that pace or bound real work
//! - No blocking I/O or executor blocking inside async code
//!
//! The scanner here is shared by the test files under `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["conductor/core/src", "conductor/daemon/src"];

/// Workspace root, derived from this crate's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// One line of production code
#[derive(Debug, Clone)]
pub struct CodeLine {
    /// File the line came from, relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// Code with any trailing `//` comment removed
    pub code: String,
    /// Whether the enclosing function is `async`
    pub in_async_fn: bool,
}

impl std::fmt::Display for CodeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.code.trim())
    }
}

/// Every production line under [`PRODUCTION_DIRS`]
///
/// Lines from the first `#[cfg(test)]` onward are skipped; test modules sit
/// at the bottom of each file.
#[must_use]
pub fn production_lines() -> Vec<CodeLine> {
    let root = workspace_root();
    let mut lines = Vec::new();

    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        assert!(path.exists(), "missing source directory {}", path.display());

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            lines.extend(scan_source(&relative, &content));
        }
    }

    lines
}

/// Split `content` into production [`CodeLine`]s
#[must_use]
pub fn scan_source(path: &Path, content: &str) -> Vec<CodeLine> {
    let mut lines = Vec::new();
    let mut in_async_fn = false;

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }

        let code = line.split("//").next().unwrap_or(line).to_string();
        if let Some(is_async) = fn_signature(&code) {
            in_async_fn = is_async;
        }

        lines.push(CodeLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code,
            in_async_fn,
        });
    }

    lines
}

/// `Some(is_async)` if the line starts a function
fn fn_signature(code: &str) -> Option<bool> {
    let mut words = code.split_whitespace().peekable();
    let mut is_async = false;
    while let Some(word) = words.next() {
        match word {
            "pub" | "pub(crate)" | "pub(super)" | "const" | "unsafe" | "extern" => {}
            "async" => is_async = true,
            "fn" => return words.peek().map(|_| is_async),
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_module_is_skipped() {
        let source = "fn a() {\n    work();\n}\n\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        let lines = scan_source(Path::new("x.rs"), source);
        assert!(lines.iter().all(|l| !l.code.contains("fn b")));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_async_context_tracking() {
        let source = "pub async fn run() {\n    step();\n}\nfn sync() {\n    other();\n}\n";
        let lines = scan_source(Path::new("x.rs"), source);
        assert!(lines[1].in_async_fn);
        assert!(!lines[4].in_async_fn);
    }

    #[test]
    fn test_trailing_comments_removed() {
        let lines = scan_source(Path::new("x.rs"), "let a = 1; // sleep(1)\n");
        assert_eq!(lines[0].code.trim(), "let a = 1;");
    }

    #[test]
    fn test_fn_signature() {
        assert_eq!(fn_signature("    pub async fn go(&self) {"), Some(true));
        assert_eq!(fn_signature("fn helper() -> u32 {"), Some(false));
        assert_eq!(fn_signature("let f = fn_pointer;"), None);
        assert_eq!(fn_signature("    // fn commented"), None);
    }

    #[test]
    fn test_workspace_root_has_production_dirs() {
        let root = workspace_root();
        for dir in PRODUCTION_DIRS {
            assert!(root.join(dir).exists(), "{dir} not under {}", root.display());
        }
    }
}
