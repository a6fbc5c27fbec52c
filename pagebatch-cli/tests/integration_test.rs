//! End-to-end tests for the `pagebatch` binary
//!
//! Each test runs the compiled binary against a mock api.php.

use std::process::{Command, Output};

use mockito::{Matcher, Server};

fn run_pagebatch(server: &Server, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pagebatch"))
        .args(args)
        .env("PAGEBATCH_API_URL", format!("{}/api.php", server.url()))
        .env("PAGEBATCH_MIN_INTERVAL_MS", "0")
        .env("PAGEBATCH_MAX_ATTEMPTS", "1")
        .env("RUST_LOG", "off")
        .output()
        .expect("Failed to run pagebatch")
}

const BALANCE_BODY: &str = r#"{
    "batchcomplete": true,
    "query": {
        "pages": [
            {
                "pageid": 1,
                "ns": 0,
                "title": "Balance",
                "revisions": [{ "revid": 7, "slots": { "main": { "content": "{{Skill|name=Balance}}" } } }]
            },
            { "ns": 0, "title": "Skill Cards", "missing": true }
        ]
    }
}"#;

#[test]
fn test_prints_page_content() {
    let mut server = Server::new();
    let mock = server
        .mock("GET", "/api.php")
        .match_query(Matcher::UrlEncoded("titles".into(), "Balance".into()))
        .with_body(BALANCE_BODY)
        .expect(1)
        .create();

    let output = run_pagebatch(&server, &["Balance"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "Command failed: {}", stderr);
    assert!(stdout.contains("--- BEGIN Balance ---"));
    assert!(stdout.contains("{{Skill|name=Balance}}"));
    assert!(stdout.contains("--- END Balance ---"));
    mock.assert();
}

#[test]
fn test_missing_page_fails_the_run() {
    let mut server = Server::new();
    server
        .mock("GET", "/api.php")
        .match_query(Matcher::Any)
        .with_body(BALANCE_BODY)
        .create();

    let output = run_pagebatch(&server, &["Balance", "Skill Cards"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stdout.contains("--- BEGIN Balance ---"));
    assert!(stderr.contains("Skill Cards: page not found"));
    assert!(stderr.contains("1 of 2 pages could not be fetched"));
}

#[test]
fn test_json_output() {
    let mut server = Server::new();
    server
        .mock("GET", "/api.php")
        .match_query(Matcher::Any)
        .with_body(BALANCE_BODY)
        .create();

    let output = run_pagebatch(&server, &["--json", "Balance", "Skill Cards"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("Invalid JSON line"))
        .collect();

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["title"], "Balance");
    assert_eq!(lines[0]["revision_id"], 7);
    assert_eq!(lines[1]["requested"], "Skill Cards");
    assert_eq!(lines[1]["kind"], "not_found");
}

#[test]
fn test_requires_titles() {
    let output = Command::new(env!("CARGO_BIN_EXE_pagebatch"))
        .output()
        .expect("Failed to run pagebatch");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "Missing usage: {}", stderr);
}
