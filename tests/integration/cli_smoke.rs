//! CLI smoke tests against the built binary

use assert_cmd::Command;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use super::support::{setup, test_config, PROFILE_ID};

fn ads_sync() -> Command {
    let mut cmd = Command::cargo_bin("ads-sync").unwrap();
    cmd.env_remove("AMAZON_CLIENT_ID")
        .env_remove("AMAZON_CLIENT_SECRET")
        .env_remove("AMAZON_REFRESH_TOKEN")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn test_help_lists_commands() {
    let output = ads_sync().arg("--help").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["verify", "entities", "apply", "report"] {
        assert!(stdout.contains(command), "missing {command} in:\n{stdout}");
    }
}

#[test]
fn test_missing_credentials_fail() {
    ads_sync()
        .args(["--profile-id", PROFILE_ID, "verify"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_out_of_range_retries_rejected() {
    ads_sync()
        .args(["--max-retries", "0", "verify"])
        .assert()
        .failure();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_apply_writes_audit_trail() {
    let (server, _engine) = setup().await;
    Mock::given(method("PUT"))
        .and(path("/v2/sp/keywords"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!([
            {"keywordId": 501, "code": "SUCCESS"},
            {"keywordId": 502, "code": "INVALID_ARGUMENT", "details": "bid below minimum"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let mutations_path = dir.path().join("mutations.json");
    let audit_path = dir.path().join("audit.csv");
    std::fs::write(
        &config_path,
        serde_json::to_vec(&test_config(&server)).unwrap(),
    )
    .unwrap();
    std::fs::write(
        &mutations_path,
        json!([
            {"entityId": "501", "field": "bid", "newValue": 0.8, "oldValue": 0.6, "reason": "low acos"},
            {"entityId": "502", "field": "bid", "newValue": 0.01, "oldValue": 0.6, "reason": "high acos"}
        ])
        .to_string(),
    )
    .unwrap();

    let mut cmd = ads_sync();
    cmd.env("AMAZON_CLIENT_ID", "client-id")
        .env("AMAZON_CLIENT_SECRET", "client-secret")
        .env("AMAZON_REFRESH_TOKEN", "refresh-1")
        .arg("--config")
        .arg(&config_path)
        .args(["--profile-id", PROFILE_ID, "--output-format", "json", "apply", "--file"])
        .arg(&mutations_path)
        .arg("--audit-file")
        .arg(&audit_path);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert!(
        output.status.success(),
        "stderr:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["items"].as_array().unwrap().len(), 2);

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    let lines: Vec<&str> = audit.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("timestamp,action_type"));
    assert!(lines[1].contains("update_bid"));
    assert!(lines[2].contains("INVALID_ARGUMENT"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unwritable_audit_trail_fails_run() {
    let (server, _engine) = setup().await;
    Mock::given(method("PUT"))
        .and(path("/v2/sp/keywords"))
        .respond_with(ResponseTemplate::new(207).set_body_json(json!([
            {"keywordId": 501, "code": "SUCCESS"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let mutations_path = dir.path().join("mutations.json");
    let audit_path = dir.path().join("missing").join("audit.csv");
    std::fs::write(&config_path, serde_json::to_vec(&test_config(&server)).unwrap()).unwrap();
    std::fs::write(
        &mutations_path,
        json!([{"entityId": "501", "field": "bid", "newValue": 0.8}]).to_string(),
    )
    .unwrap();

    let mut cmd = ads_sync();
    cmd.env("AMAZON_CLIENT_ID", "client-id")
        .env("AMAZON_CLIENT_SECRET", "client-secret")
        .env("AMAZON_REFRESH_TOKEN", "refresh-1")
        .arg("--config")
        .arg(&config_path)
        .args(["--profile-id", PROFILE_ID, "--output-format", "json", "apply", "--file"])
        .arg(&mutations_path)
        .arg("--audit-file")
        .arg(&audit_path);
    let output = tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    // The summary is still printed before the failure is reported.
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["items"].as_array().unwrap().len(), 1);
    assert!(!audit_path.exists());
}
