//! Integration Test: Sleep Prohibition
//!
//! **Policy**: production code waits on I/O, tokens and channels. It does not
//! sleep, except where a delay is the behaviour itself:
//! - retry backoff between backend attempts
//! - pacing of canned fallback answers
//! - the per-generation deadline raced against the stream
//!
//! `std::thread::sleep` is forbidden everywhere outside tests.

use std::path::Path;

use architectural_enforcement::{production_lines, CodeLine};

/// Files allowed to call `tokio::time::sleep`, and why
const SLEEP_ALLOWED: &[(&str, &str)] = &[
    ("conductor/core/src/backend/retry.rs", "retry backoff"),
    ("conductor/core/src/streaming/fallback.rs", "fallback chunk pacing"),
    ("conductor/core/src/conductor.rs", "generation deadline"),
];

fn is_sleep_call(line: &CodeLine) -> bool {
    let code = line.code.as_str();
    code.contains("::sleep(") || code.contains(" sleep(") || code.contains("(sleep(")
}

fn sleep_allowed(path: &Path) -> bool {
    SLEEP_ALLOWED
        .iter()
        .any(|(allowed, _)| path == Path::new(allowed))
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = production_lines()
        .iter()
        .filter(|line| is_sleep_call(line) && !sleep_allowed(&line.path))
        .map(ToString::to_string)
        .collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAllowed sleep sites:");
        for (path, reason) in SLEEP_ALLOWED {
            eprintln!("  {path} ({reason})");
        }
        panic!("Found {} sleep violation(s) in production code", violations.len());
    }
}

#[test]
fn test_no_thread_sleep_in_production_code() {
    let violations: Vec<String> = production_lines()
        .iter()
        .filter(|line| line.code.contains("thread::sleep"))
        .map(ToString::to_string)
        .collect();

    assert!(
        violations.is_empty(),
        "std::thread::sleep blocks a runtime worker:\n{}",
        violations.join("\n")
    );
}

#[test]
fn test_allowed_sleep_sites_still_exist() {
    let lines = production_lines();
    for (path, reason) in SLEEP_ALLOWED {
        assert!(
            lines
                .iter()
                .any(|line| line.path == Path::new(path) && is_sleep_call(line)),
            "{path} no longer sleeps ({reason}); drop it from the allow-list"
        );
    }
}

#[test]
fn test_sleep_detection() {
    let lines = architectural_enforcement::scan_source(
        Path::new("x.rs"),
        "async fn poll() {\n    tokio::time::sleep(Duration::from_millis(10)).await;\n}\n",
    );
    assert!(is_sleep_call(&lines[1]));
    assert!(!is_sleep_call(&lines[0]));
}
