//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in production code must not block the runtime.
//! - No `std::fs` or `std::net` calls inside `async fn`
//! - No `block_on` anywhere outside tests
//! - No `reqwest::blocking`
//!
//! Synchronous functions (config loading, socket setup before the accept
//! loop) may use `std::fs`.

use architectural_enforcement::{production_lines, scan_source, CodeLine};

const BLOCKING_IN_ASYNC: &[&str] = &[
    "std::fs::",
    "fs::read",
    "fs::write",
    "fs::remove",
    "fs::create_dir",
    "std::net::",
    "File::open",
    "File::create",
];

const BLOCKING_ANYWHERE: &[&str] = &["block_on(", "reqwest::blocking"];

fn blocking_violation(line: &CodeLine) -> Option<&'static str> {
    let code = line.code.as_str();
    if let Some(pattern) = BLOCKING_ANYWHERE.iter().find(|p| code.contains(*p)) {
        return Some(pattern);
    }
    if line.in_async_fn && !code.contains("tokio::fs::") {
        return BLOCKING_IN_ASYNC.iter().find(|p| code.contains(*p)).copied();
    }
    None
}

#[test]
fn test_no_blocking_io_in_production_code() {
    let violations: Vec<String> = production_lines()
        .iter()
        .filter_map(|line| blocking_violation(line).map(|pattern| format!("{line} [{pattern}]")))
        .collect();

    if !violations.is_empty() {
        eprintln!("\nBlocking calls found in async production code:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nUse tokio::fs, tokio::net and .await instead.");
        panic!(
            "Found {} blocking I/O violation(s) in production code",
            violations.len()
        );
    }
}

#[test]
fn test_detects_std_fs_in_async_fn() {
    let lines = scan_source(
        std::path::Path::new("x.rs"),
        "async fn save() {\n    std::fs::write(path, bytes)?;\n}\nfn load() {\n    std::fs::read_to_string(path)?;\n}\n",
    );
    assert_eq!(blocking_violation(&lines[1]), Some("std::fs::"));
    assert_eq!(blocking_violation(&lines[4]), None);
}

#[test]
fn test_tokio_fs_is_fine() {
    let lines = scan_source(
        std::path::Path::new("x.rs"),
        "async fn save() {\n    tokio::fs::write(path, bytes).await?;\n}\n",
    );
    assert_eq!(blocking_violation(&lines[1]), None);
}

#[test]
fn test_block_on_flagged_everywhere() {
    let lines = scan_source(
        std::path::Path::new("x.rs"),
        "fn main() {\n    futures::executor::block_on(run());\n}\n",
    );
    assert_eq!(blocking_violation(&lines[1]), Some("block_on("));
}
