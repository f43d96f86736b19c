use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A `mineru` command isolated from the user's real config and env.
fn mineru(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mineru").expect("Binary exists");
    cmd.env("MINERU_CONFIG", config_dir.path().join("config.json"))
        .env("MINERU_API_BASE", "http://127.0.0.1:9")
        .env_remove("MINERU_API_TOKEN")
        .env_remove("MINERU_API_KEY")
        .env_remove("MINERU_OUTPUT_DIR")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn no_arguments_prints_help() {
    let dir = TempDir::new().unwrap();
    mineru(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("batch").and(predicate::str::contains("status")));
}

#[test]
fn token_round_trips_through_config_file() {
    let dir = TempDir::new().unwrap();
    let token = "abcdefghij-0123456789-KLMNOPQRST";

    mineru(&dir)
        .args(["token", token])
        .assert()
        .success()
        .stdout(predicate::str::contains("Token updated successfully."));

    let saved = fs::read_to_string(dir.path().join("config.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(json["api_token"], token);

    mineru(&dir)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Token: abcdefghij...KLMNOPQRST"))
        .stdout(predicate::str::contains(token).not());
}

#[test]
fn config_token_flag_saves_directly() {
    let dir = TempDir::new().unwrap();
    mineru(&dir)
        .args(["config", "--token", "flag-token"])
        .assert()
        .success();
    let saved = fs::read_to_string(dir.path().join("config.json")).unwrap();
    assert!(saved.contains("flag-token"));
}

#[test]
fn missing_token_points_at_config_command() {
    let dir = TempDir::new().unwrap();
    let pdf = dir.path().join("doc.pdf");
    fs::write(&pdf, b"%PDF-1.7").unwrap();

    mineru(&dir)
        .arg(&pdf)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API token configured"))
        .stderr(predicate::str::contains("mineru config"));
}

#[test]
fn corrupt_config_counts_as_not_configured() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("config.json"), "{ broken").unwrap();

    mineru(&dir)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No token configured."))
        .stderr(predicate::str::contains("corrupt"));
}

#[test]
fn invalid_local_file_fails_without_contacting_service() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.pdf");

    mineru(&dir)
        .env("MINERU_API_TOKEN", "env-token")
        .arg(&missing)
        .args(["-o", dir.path().join("out").to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("missing.pdf: failed: file not found"));
}

#[test]
fn batch_reports_every_input() {
    let dir = TempDir::new().unwrap();
    let notes = dir.path().join("notes.txt");
    fs::write(&notes, "plain text").unwrap();

    mineru(&dir)
        .env("MINERU_API_TOKEN", "env-token")
        .arg("batch")
        .arg(&notes)
        .arg(dir.path().join("gone.pdf"))
        .arg("--no-wait")
        .assert()
        .failure()
        .stdout(predicate::str::contains("notes.txt: failed: unsupported format"))
        .stdout(predicate::str::contains("gone.pdf: failed: file not found"));
}
