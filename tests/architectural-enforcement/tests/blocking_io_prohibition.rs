//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions MUST NOT perform blocking I/O. Synchronous
//! helpers (config and prompt loading before the mesh is built) may read
//! files with `std::fs`.
//! **Never allowed**: `std::net`, `reqwest::blocking`, `std::process::Command`.

use architectural_enforcement::{production_sources, SourceFile};

/// Test that production code does not use blocking I/O where it would stall the runtime
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(blocking_io_violations)
        .collect();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nRequired async I/O:");
        eprintln!("  - tokio::fs inside async functions");
        eprintln!("  - reqwest async client for HTTP");
        eprintln!("  - tokio::io::stdin()/stdout() for the protocol stream");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

fn blocking_io_violations(file: &SourceFile) -> Vec<String> {
    let mut violations = Vec::new();

    for (idx, line) in file.lines.iter().enumerate() {
        if let Some(what) = always_forbidden(line) {
            violations.push(file.violation(idx, what));
            continue;
        }

        let in_async = file.enclosing_fn_is_async(idx) == Some(true);
        if in_async {
            if let Some(what) = forbidden_in_async(line) {
                violations.push(file.violation(idx, what));
            }
        }
    }

    violations
}

fn always_forbidden(line: &str) -> Option<&'static str> {
    if line.contains("std::net::") || line.contains("use std::net") {
        Some("Blocking network I/O")
    } else if line.contains("reqwest::blocking") {
        Some("Blocking HTTP client")
    } else if line.contains("std::process::Command") {
        Some("Blocking process I/O")
    } else {
        None
    }
}

fn forbidden_in_async(line: &str) -> Option<&'static str> {
    if line.contains("std::fs::") {
        Some("Blocking file I/O in async")
    } else if line.contains("std::io::stdin()") || line.contains("std::io::stdout()") {
        Some("Blocking stdin/stdout in async")
    } else {
        None
    }
}

#[test]
fn test_blocking_io_detection() {
    use std::path::PathBuf;

    let file = SourceFile::from_content(
        PathBuf::from("mesh/core/src/example.rs"),
        "pub async fn load() {\n    std::fs::read_to_string(p);\n}\n\
         pub fn parse() {\n    std::fs::read_to_string(p);\n}\n\
         fn fetch() {\n    reqwest::blocking::get(u);\n}\n",
    );

    let violations = blocking_io_violations(&file);

    assert_eq!(violations.len(), 2, "{violations:?}");
    assert!(violations[0].contains(":2 - Blocking file I/O in async"));
    assert!(violations[1].contains(":8 - Blocking HTTP client"));
}
