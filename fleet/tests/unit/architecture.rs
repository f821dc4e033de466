//! Structural tests for layer boundary enforcement.
//!
//! These tests scan source files to verify that the domain stays pure and
//! that only the infrastructure layer touches the SSH library.

use std::path::{Path, PathBuf};

/// Collect all `.rs` files under a directory recursively.
fn collect_rs_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                files.extend(collect_rs_files(&path));
            } else if path.extension().and_then(|e| e.to_str()) == Some("rs") {
                files.push(path);
            }
        }
    }
    files
}

/// Read a file and strip comment lines to avoid false positives.
fn read_non_comment_lines(path: &Path) -> Vec<String> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    content
        .lines()
        .filter(|l| {
            let trimmed = l.trim();
            !trimmed.starts_with("//") && !trimmed.starts_with("/*") && !trimmed.starts_with('*')
        })
        .map(String::from)
        .collect()
}

/// Every line under `src/<layer>` containing one of `forbidden`.
fn violations(layer: &str, forbidden: &[&str]) -> Vec<String> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src").join(layer);
    let mut found = Vec::new();
    for file in collect_rs_files(&dir) {
        let rel = file
            .strip_prefix(env!("CARGO_MANIFEST_DIR"))
            .unwrap_or(&file)
            .display()
            .to_string();
        for (i, line) in read_non_comment_lines(&file).iter().enumerate() {
            if let Some(pattern) = forbidden.iter().find(|p| line.contains(*p)) {
                found.push(format!("{rel}:{}: `{pattern}` in: {line}", i + 1));
            }
        }
    }
    found
}

#[test]
fn domain_has_no_io_or_outer_layer_imports() {
    let found = violations(
        "domain",
        &[
            "crate::application",
            "crate::infra",
            "tokio::",
            "std::fs",
            "std::net",
            "std::process",
            "ssh2",
        ],
    );
    assert!(
        found.is_empty(),
        "domain/ must stay pure:\n{}",
        found.join("\n")
    );
}

#[test]
fn application_does_not_depend_on_infra() {
    let found = violations("application", &["crate::infra", "ssh2::"]);
    assert!(
        found.is_empty(),
        "application/ must only use ports:\n{}",
        found.join("\n")
    );
}

#[test]
fn ssh_library_is_confined_to_infra() {
    let src = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut found = Vec::new();
    for file in collect_rs_files(&src) {
        let rel = file.strip_prefix(&src).unwrap_or(&file).display().to_string();
        if rel.starts_with("infra") {
            continue;
        }
        if read_non_comment_lines(&file)
            .iter()
            .any(|l| l.contains("use ssh2") || l.contains("ssh2::"))
        {
            found.push(rel);
        }
    }
    assert!(found.is_empty(), "ssh2 used outside infra/: {found:?}");
}
