//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors. No `unwrap()`, `expect()`,
//! `panic!`, `todo!` or `unimplemented!` outside tests.

use architectural_enforcement::{production_files, report, Violation};

const PANIC_PATTERNS: &[&str] = &[
    ".unwrap()",
    ".expect(",
    "panic!(",
    "todo!(",
    "unimplemented!(",
];

#[test]
fn test_no_panics_in_production_code() {
    let mut violations: Vec<Violation> = Vec::new();

    for file in production_files() {
        for (idx, code) in file.production_code() {
            if PANIC_PATTERNS.iter().any(|p| code.contains(p)) {
                violations.push(file.violation(idx));
            }
        }
    }

    report(
        "CRITICAL: Panicking calls found in production code!",
        &violations,
        &[
            "✅ Return Result and use ?",
            "✅ unwrap_or / unwrap_or_default / unwrap_or_else for real defaults",
        ],
    );
}
