use assert_cmd::Command;
use predicates::prelude::*;

fn snapgram() -> Command {
    let mut cmd = Command::cargo_bin("snapgram").expect("snapgram binary");
    cmd.env("SNAPGRAM_LOG", "off");
    cmd
}

#[test]
fn prints_version() {
    snapgram()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    snapgram()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapgram").and(predicate::str::contains("--offline")));
}

#[test]
fn offline_like_shows_new_count() {
    let dir = tempfile::tempdir().unwrap();
    snapgram()
        .args(["--offline", "--config"])
        .arg(dir.path().join("none.yaml"))
        .args(["like", "P1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("likes: 3 (liked)"));
}

#[test]
fn missing_command_is_a_usage_error() {
    snapgram()
        .arg("--offline")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("usage: snapgram"));
}
