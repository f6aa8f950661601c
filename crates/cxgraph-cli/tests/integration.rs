//! Integration tests for the cxgraph CLI
//!
//! These tests run the binary against a small C project written to a temp
//! directory. `HOME` points into the temp directory so no global config is
//! picked up.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package cxgraph-cli --test integration
//! ```

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

const HEADER: &str = "\
int add(int a, int b);
";

const MAIN_C: &str = "\
#include \"math.h\"

int add(int a, int b) { return a + b; }

int main(void) {
    return add(1, 2);
}
";

/// Get a Command for the cxgraph binary, run inside `workspace`
#[allow(deprecated)]
fn cxgraph(workspace: &Path) -> Command {
    let mut cmd = Command::cargo_bin("cxgraph").expect("Failed to find cxgraph binary");
    cmd.current_dir(workspace)
        .env("HOME", workspace.join("home"))
        .env_remove("CXGRAPH_CONFIG")
        .env_remove("CXGRAPH_NO_PREAMBLE")
        .env_remove("CXGRAPH_DUMP")
        .env_remove("RUST_LOG");
    cmd
}

fn setup_project() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    std::fs::create_dir_all(temp.path().join("include")).unwrap();
    std::fs::create_dir_all(temp.path().join("src")).unwrap();
    std::fs::write(temp.path().join("include/math.h"), HEADER).unwrap();
    std::fs::write(temp.path().join("src/main.c"), MAIN_C).unwrap();
    temp
}

// ============================================================================
// Index
// ============================================================================

#[test]
fn test_index_prints_summary() {
    let temp = setup_project();
    cxgraph(temp.path())
        .args(["index", "src", "-I", "include", "--no-preamble", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Files indexed:    1"))
        .stdout(predicate::str::contains("Files failed:     0"))
        .stdout(predicate::str::contains("function"));
}

#[test]
fn test_index_json_output() {
    let temp = setup_project();
    let output = cxgraph(temp.path())
        .args(["index", "src", "-I", "include", "--no-preamble", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["indexed"], 1);
    assert_eq!(report["failed"], 0);
    assert!(report["by_category"]["function"].as_u64().unwrap() >= 2);
}

#[test]
fn test_index_reads_workspace_config() {
    let temp = setup_project();
    std::fs::create_dir_all(temp.path().join(".cxgraph")).unwrap();
    std::fs::write(
        temp.path().join(".cxgraph/config.toml"),
        "[analysis]\ninclude_paths = [\"include\"]\n\n[preamble]\nenabled = false\n",
    )
    .unwrap();

    // The header is only found through the configured include path
    cxgraph(temp.path())
        .args(["symbols", "src", "--name", "add", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("math.h:1:5"));
}

#[test]
fn test_index_missing_path_fails() {
    let temp = setup_project();
    cxgraph(temp.path())
        .args(["index", "nowhere", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_invalid_config_file_fails() {
    let temp = setup_project();
    let config = temp.path().join("broken.toml");
    std::fs::write(&config, "[preamble]\nlanguage = \"pascal\"\n").unwrap();

    cxgraph(temp.path())
        .args(["--config", config.to_str().unwrap(), "index", "src", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("preamble.language"));
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_symbols_lists_declarations() {
    let temp = setup_project();
    cxgraph(temp.path())
        .args(["symbols", "src", "-I", "include", "--no-preamble", "--name", "add", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("math.h:1:5"))
        .stdout(predicate::str::contains("main.c:3:5"));
}

#[test]
fn test_symbols_unknown_name_fails() {
    let temp = setup_project();
    cxgraph(temp.path())
        .args(["symbols", "src", "--no-preamble", "--name", "subtract", "-q"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No symbol named 'subtract'"));
}

#[test]
fn test_refs_from_use_site() {
    let temp = setup_project();
    cxgraph(temp.path())
        .args([
            "refs",
            "src",
            "-I",
            "include",
            "--no-preamble",
            "--at",
            "src/main.c:6:12",
            "-q",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("function add"))
        .stdout(predicate::str::contains("main.c:6:12"));
}

#[test]
fn test_outline_nests_parameters() {
    let temp = setup_project();
    cxgraph(temp.path())
        .args(["outline", "src", "--no-preamble", "--file", "src/main.c", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("function main"))
        .stdout(predicate::str::contains("\n  parameter a"));
}
