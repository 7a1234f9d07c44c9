//! CLI integration tests

use std::process::{Command, Output};

fn profilerctl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_profilerctl"))
        .args(args)
        .env_remove("PROFILER_API_URL")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = profilerctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("workload profiler"), "Should show app name");
    assert!(stdout.contains("submit"), "Should show submit command");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("logs"), "Should show logs command");
    assert!(stdout.contains("list"), "Should show list command");
    assert!(stdout.contains("--api-url"), "Should show api url option");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = profilerctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("profilerctl"), "Should show binary name");
}

/// Test submit subcommand help
#[test]
fn test_submit_help() {
    let output = profilerctl(&["submit", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Submit help should succeed");
    assert!(stdout.contains("--type"), "Should show type option");
    assert!(stdout.contains("--body"), "Should show body option");
    assert!(stdout.contains("calibration"), "Should list run types");
}

/// Test that an unknown run type is rejected before any request
#[test]
fn test_submit_rejects_unknown_type() {
    let output = profilerctl(&["submit", "shop", "--type", "sizing"]);

    assert!(!output.status.success(), "Unknown type should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("sizing"), "Should name the bad value");
}

/// Test status against a mock profiler with JSON output
#[test]
fn test_status_json_output() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/profilers/runs/run-7")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"runId": "run-7", "appName": "shop", "kind": "benchmark",
                "state": "RUNNING", "created": "2024-03-01T10:00:00Z",
                "deploymentId": "dep-2"}"#,
        )
        .create();

    let output = profilerctl(&[
        "--api-url",
        &server.url(),
        "--format",
        "json",
        "status",
        "run-7",
    ]);

    assert!(output.status.success(), "Status should succeed");
    let body: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(body["state"], "RUNNING");
    assert_eq!(body["deploymentId"], "dep-2");
    mock.assert();
}

/// Test that an API error fails the command
#[test]
fn test_logs_for_unknown_run_fails() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/profilers/runs/nope/logs")
        .with_status(404)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error": "Unable to find run nope"}"#)
        .create();

    let output = profilerctl(&["--api-url", &server.url(), "logs", "nope"]);

    assert!(!output.status.success(), "Unknown run should fail");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Unable to find run nope"));
}

/// Test list renders a table
#[test]
fn test_list_table_output() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/profilers/runs")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"runId": "run-1", "appName": "shop", "kind": "calibration",
                 "state": "FINISHED", "created": "2024-03-01T10:00:00Z"}]"#,
        )
        .create();

    let output = profilerctl(&["--api-url", &server.url(), "list"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "List should succeed");
    assert!(stdout.contains("run-1"));
    assert!(stdout.contains("FINISHED"));
    assert!(stdout.contains("Total: 1 runs"));
}
