//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async functions in production code MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, not `std::fs`, `std::net` sockets.
//!
//! Blocking calls in plain functions (config loading before serving, log file
//! setup) are acceptable.

use std::fs;

use architectural_enforcement::{
    in_async_fn, production_lines, rust_files, workspace_root, Violation, PRODUCTION_DIRS,
};

const BLOCKING_PATTERNS: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::TcpStream", "Blocking network I/O"),
    ("std::net::TcpListener", "Blocking network I/O"),
    ("std::net::UdpSocket", "Blocking network I/O"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::process::Command", "Blocking process I/O"),
];

fn find_blocking_io_violations() -> Vec<Violation> {
    let root = workspace_root();
    let mut violations = Vec::new();

    for dir in PRODUCTION_DIRS {
        for path in rust_files(&root.join(dir)) {
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let all: Vec<&str> = content.lines().collect();

            for (idx, code) in production_lines(&content) {
                for (pattern, rule) in BLOCKING_PATTERNS {
                    if code.contains(pattern) && in_async_fn(&all, idx) {
                        violations.push(Violation {
                            path: path.clone(),
                            line: idx + 1,
                            rule,
                            text: code.trim().to_string(),
                        });
                    }
                }
            }
        }
    }

    violations
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async production code:\n");
        for violation in &violations {
            eprintln!("  {violation}");
        }
        eprintln!("\nRequired async I/O:");
        eprintln!("  - tokio::fs::File::open(..).await");
        eprintln!("  - tokio::net::TcpListener::bind(..).await");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.",
            violations.len()
        );
    }
}

#[test]
fn test_upstream_is_opened_with_tokio_fs() {
    let reader = workspace_root().join("relay/core/src/reader.rs");
    let content = fs::read_to_string(&reader).expect("reader source");
    assert!(content.contains("tokio::fs::"));
}
