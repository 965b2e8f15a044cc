//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT block a thread with `std::thread::sleep`,
//! and may only use `tokio::time::sleep` for reopen backoff. Everything else
//! waits on I/O, channels or `tokio::time::interval`.

use std::fs;

use architectural_enforcement::{
    in_backoff_context, production_lines, rust_files, workspace_root, Violation, PRODUCTION_DIRS,
};

fn find_sleep_violations() -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_files(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let all: Vec<&str> = content.lines().collect();

            for (idx, code) in production_lines(&content) {
                if code.contains("thread::sleep") {
                    violations.push(Violation {
                        path: path.clone(),
                        line: idx + 1,
                        rule: "Blocking thread sleep",
                        text: code.trim().to_string(),
                    });
                } else if (code.contains("::sleep(") || code.contains("sleep_until("))
                    && !in_backoff_context(&all, idx)
                {
                    violations.push(Violation {
                        path: path.clone(),
                        line: idx + 1,
                        rule: "Sleep outside reopen backoff",
                        text: code.trim().to_string(),
                    });
                }
            }
        }
    }

    violations
}

#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nAcceptable: tokio::time::sleep in reopen backoff, test code.");
        eprintln!("Use tokio::time::interval for periodic work and channels to wait.");

        panic!(
            "\nFound {} sleep violation(s) in production code.",
            violations.len()
        );
    }
}
