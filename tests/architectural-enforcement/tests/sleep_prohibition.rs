//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep. Waiting happens on I/O,
//! on channels, or on `tokio::time::interval` / `tokio::time::timeout`.
//! **Exceptions**: test code.

use architectural_enforcement::{production_sources, SourceFile};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations: Vec<String> = production_sources()
        .iter()
        .flat_map(sleep_violations)
        .collect();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAcceptable alternatives:");
        eprintln!("  - tokio::time::interval() for periodic work");
        eprintln!("  - tokio::time::timeout() to bound a wait");
        eprintln!("  - channels or Notify to wait for events");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}

fn sleep_violations(file: &SourceFile) -> Vec<String> {
    file.lines
        .iter()
        .enumerate()
        .filter(|(_, line)| is_sleep_call(line))
        .map(|(idx, _)| file.violation(idx, "Sleep call"))
        .collect()
}

fn is_sleep_call(line: &str) -> bool {
    line.contains("::sleep(") || line.contains(".sleep(") || line.contains("sleep_until(")
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    tokio::time::sleep(Duration::from_millis(10)).await;"));
    assert!(is_sleep_call("    std::thread::sleep(delay);"));
    assert!(!is_sleep_call("    let mut ticker = tokio::time::interval(period);"));
}
