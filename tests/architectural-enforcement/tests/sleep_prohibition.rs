//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT sleep. Streaming waits on socket
//! reads bounded by `tokio::time::timeout`, and lock waits on the lock.
//! **Exceptions**: test code

use architectural_enforcement::{production_files, report, Violation};

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_files() {
        for (idx, code) in file.production_code() {
            if code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(") {
                violations.push(file.violation(idx));
            }
        }
    }

    report(
        "CRITICAL: Sleep calls found in production code!",
        &violations,
        &[
            "✅ Wait on the I/O itself (stream.next(), lock().await, rx.recv())",
            "✅ Bound waits with tokio::time::timeout",
            "❌ Sleep in polling loops or as synchronization",
        ],
    );
}

#[test]
fn test_production_sources_are_scanned() {
    let files = production_files();
    assert!(
        files.iter().any(|f| f.path.ends_with("tutor/core/src/chat.rs")),
        "orchestrator source not found"
    );
    assert!(files.iter().any(|f| f.path.ends_with("tutor/cli/src/main.rs")));
}
