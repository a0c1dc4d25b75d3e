//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions MUST NOT perform blocking I/O. Use
//! `tokio::fs`, `tokio::net`, async `reqwest` and tokio's stdio instead.
//! Synchronous functions (such as config loading at startup) may use
//! `std::fs`.

use architectural_enforcement::{production_files, report, FnKind, Violation};

const BLOCKING_PATTERNS: &[&str] = &[
    "std::fs::",
    "std::net::",
    "std::io::stdin()",
    "std::io::stdout()",
    "std::thread::sleep",
];

#[test]
fn test_no_blocking_io_in_async_functions() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_files() {
        for (idx, code) in file.production_code() {
            if !BLOCKING_PATTERNS.iter().any(|p| code.contains(p)) {
                continue;
            }
            if file.enclosing_fn(idx) == Some(FnKind::Async) {
                violations.push(file.violation(idx));
            }
        }
    }

    report(
        "CRITICAL: Blocking I/O found in async functions!",
        &violations,
        &[
            "✅ tokio::fs, tokio::net, tokio::io::stdin()/stdout()",
            "✅ tokio::task::spawn_blocking for unavoidable blocking work",
        ],
    );
}

#[test]
fn test_no_blocking_http_client() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_files() {
        for (idx, code) in file.production_code() {
            if code.contains("reqwest::blocking") {
                violations.push(file.violation(idx));
            }
        }
    }

    report(
        "CRITICAL: reqwest::blocking used in production code!",
        &violations,
        &["✅ Use the async reqwest::Client"],
    );
}
