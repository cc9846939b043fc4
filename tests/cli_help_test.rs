// CLI surface tests: the subcommand set and argument validation are part of
// the product contract, so pin them without touching any backend.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_every_workflow_command() {
    let mut cmd = Command::cargo_bin("galley").unwrap();

    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("generate"))
        .stdout(predicate::str::contains("review"))
        .stdout(predicate::str::contains("reset"))
        .stdout(predicate::str::contains("finalize"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("watch"));
}

#[test]
fn test_review_refuses_accept_and_reject_together() {
    let mut cmd = Command::cargo_bin("galley").unwrap();

    cmd.args([
        "review",
        "--session",
        "s-1",
        "intro",
        "--accept",
        "--reject",
    ])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_export_rejects_unknown_format() {
    let mut cmd = Command::cargo_bin("galley").unwrap();

    cmd.args(["export", "--session", "s-1", "--format", "latex"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown export format"));
}

#[test]
fn test_missing_session_argument_is_an_error() {
    let mut cmd = Command::cargo_bin("galley").unwrap();

    cmd.args(["status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--session"));
}
