//! Integration Test: Relay Core Independence
//!
//! **Policy**: `relay-core` carries the pipeline and the render loop only. It
//! must not depend on the HTTP server stack or the terminal UI stack, so the
//! daemon and the cluster can each wrap it in their own transport.

use std::fs;

use architectural_enforcement::{production_lines, rust_files, workspace_root};

const FORBIDDEN_CRATES: &[&str] = &[
    "axum",
    "tower-http",
    "ratatui",
    "crossterm",
    "tokio-tungstenite",
    "clap",
];

#[test]
fn test_core_manifest_has_no_server_or_ui_crates() {
    let manifest = workspace_root().join("relay/core/Cargo.toml");
    let content = fs::read_to_string(&manifest).expect("relay-core manifest");

    let offenders: Vec<&str> = FORBIDDEN_CRATES
        .iter()
        .copied()
        .filter(|name| {
            content.lines().any(|line| {
                let line = line.trim_start();
                line.starts_with(&format!("{name} ")) || line.starts_with(&format!("{name}="))
            })
        })
        .collect();

    assert!(offenders.is_empty(), "relay-core depends on {offenders:?}");
}

#[test]
fn test_core_sources_do_not_reach_for_server_or_ui() {
    let src = workspace_root().join("relay/core/src");
    let mut offenders = Vec::new();

    for path in rust_files(&src) {
        let content = fs::read_to_string(&path).expect("source file");
        for (idx, code) in production_lines(&content) {
            for krate in ["axum::", "ratatui::", "crossterm::", "tokio_tungstenite::"] {
                if code.contains(krate) {
                    offenders.push(format!("{}:{} {}", path.display(), idx + 1, code.trim()));
                }
            }
        }
    }

    assert!(offenders.is_empty(), "core reaches outward:\n{}", offenders.join("\n"));
}
