//! Integration tests driving the CLI binary end to end.
//!
//! Each test spawns the `driftkv` binary with a scratch data directory,
//! pipes a command script into stdin, and asserts on the printed output.
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::tempdir;

/// Runs a command script through the CLI and captures stdout.
fn run_cli(data_dir: &Path, hnsw_dir: &Path, script: &str) -> String {
    let mut child = Command::new(env!("CARGO_BIN_EXE_driftkv"))
        .env("DRIFTKV_DATA_DIR", data_dir.to_str().unwrap())
        .env("DRIFTKV_HNSW_DIR", hnsw_dir.to_str().unwrap())
        .env("DRIFTKV_EMBED_DIM", "32")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn driftkv");

    {
        let stdin = child.stdin.as_mut().expect("failed to open stdin");
        stdin.write_all(script.as_bytes()).unwrap();
        stdin.write_all(b"EXIT\n").unwrap();
    }

    let output = child.wait_with_output().expect("failed to read output");
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn basic_put_get() {
    let dir = tempdir().unwrap();
    let out = run_cli(
        &dir.path().join("data"),
        &dir.path().join("hnsw"),
        "PUT 1 hello from the shell\nGET 1\n",
    );
    assert!(out.contains("OK"));
    assert!(out.contains("hello from the shell"));
}

#[test]
fn delete_hides_value() {
    let dir = tempdir().unwrap();
    let out = run_cli(
        &dir.path().join("data"),
        &dir.path().join("hnsw"),
        "PUT 5 short lived entry\nDEL 5\nGET 5\n",
    );
    assert!(out.contains("(nil)"));
}

#[test]
fn scan_prints_range_in_order() {
    let dir = tempdir().unwrap();
    let out = run_cli(
        &dir.path().join("data"),
        &dir.path().join("hnsw"),
        "PUT 3 third entry\nPUT 1 first entry\nPUT 2 second entry\nSCAN 1 2\n",
    );
    assert!(out.contains("1 -> first entry"));
    assert!(out.contains("2 -> second entry"));
    assert!(!out.contains("third entry"));
    assert!(out.contains("(2 entries)"));
}

#[test]
fn knn_finds_exact_text() {
    let dir = tempdir().unwrap();
    let out = run_cli(
        &dir.path().join("data"),
        &dir.path().join("hnsw"),
        "PUT 10 maritime charts and navigation\nPUT 11 tomato gardening advice\nHNSW maritime charts and navigation | 1\n",
    );
    assert!(out.contains("10 -> maritime charts and navigation"));
}

#[test]
fn values_survive_restart() {
    let dir = tempdir().unwrap();
    let data = dir.path().join("data");
    let hnsw = dir.path().join("hnsw");

    let out = run_cli(&data, &hnsw, "PUT 7 durable value\nSAVE\n");
    assert!(out.contains("OK"));

    let out = run_cli(&data, &hnsw, "GET 7\nHNSW durable value | 1\n");
    assert!(out.contains("durable value"));
    assert!(out.contains("7 -> durable value"));
}
