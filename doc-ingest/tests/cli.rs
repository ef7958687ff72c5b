use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::{tempdir, NamedTempFile};

fn doc_ingest() -> Command {
    let mut cmd = Command::cargo_bin("doc-ingest").expect("Binary exists");
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_every_source_selector() {
    doc_ingest()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--s3-url")
                .and(predicate::str::contains("--github-url"))
                .and(predicate::str::contains("--gitlab-url"))
                .and(predicate::str::contains("--subreddit-name"))
                .and(predicate::str::contains("--wikipedia-page-title"))
                .and(predicate::str::contains("--drive-id"))
                .and(predicate::str::contains("--config")),
        );
}

#[test]
fn missing_source_is_a_usage_error() {
    doc_ingest()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("required"));
}

#[test]
fn two_sources_are_a_usage_error() {
    doc_ingest()
        .args(["--s3-url", "s3://bucket/prefix/", "--subreddit-name", "rust"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn unreadable_config_fails_before_any_work() {
    let out = tempdir().unwrap();
    doc_ingest()
        .arg("--config")
        .arg(out.path().join("does-not-exist.yaml"))
        .arg("--structured-output-dir")
        .arg(out.path().join("structured"))
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Failed to read config file"));
    assert!(!out.path().join("structured").exists());
}

#[test]
fn malformed_config_is_rejected() {
    let config = NamedTempFile::new().expect("Creating temp config file failed");
    write(config.path(), "source:\n  type: ftp\n  host: example.org\n").unwrap();
    doc_ingest()
        .arg("--config")
        .arg(config.path())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Failed to parse config YAML"));
}
