// CLI behaviour through the built binary

use assert_cmd::Command;
use predicates::prelude::*;

fn reserve_flow(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("reserve-flow").unwrap();
    // Keep configuration files of the working tree out of the picture.
    cmd.current_dir(dir.path());
    cmd
}

#[test]
fn test_stages_lists_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .arg("stages")
        .assert()
        .success()
        .stdout(predicate::str::contains("== Request =="))
        .stdout(predicate::str::contains("== Site Visit =="))
        .stdout(predicate::str::contains("AmendmentPending"))
        .stdout(predicate::str::contains("(auto)"));
}

#[test]
fn test_stages_json_has_every_status() {
    let dir = tempfile::tempdir().unwrap();
    let output = reserve_flow(&dir).args(["stages", "--json"]).output().unwrap();
    assert!(output.status.success());

    let stages: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let stages = stages.as_array().unwrap();
    assert_eq!(stages.len(), 30);
    assert_eq!(stages[0]["status"], "RequestCreated");
    assert_eq!(stages[0]["default_next"], "RequestApproved");
}

#[test]
fn test_transitions_from_proposal_sent() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args(["transitions", "ProposalSent"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ProposalAccepted"))
        .stdout(predicate::str::contains("RequestDeclined"))
        .stdout(predicate::str::contains("ProposalChangesRequested"));
}

#[test]
fn test_archived_has_no_transitions() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args(["transitions", "RequestArchived"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has no allowed transitions"));
}

#[test]
fn test_parallel_stage_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args(["transitions", "ServiceContactsRequested"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Runs in parallel with: FinancialInfoRequested"));
}

#[test]
fn test_can_checks_advancing_role() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args(["can", "ProposalSent", "specialist", "advance"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("no:"));

    reserve_flow(&dir)
        .args(["can", "SiteVisitDataEntered", "staff", "requestchanges"])
        .assert()
        .success()
        .stdout(predicate::str::contains("yes: SiteVisitDataEntered -> AmendmentPending"));
}

#[test]
fn test_unknown_status_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args(["transitions", "Lunch"])
        .assert()
        .failure();
}

#[test]
fn test_evaluate_amendment_required() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args([
            "evaluate",
            "--original",
            "10,5,0",
            "--actual",
            "14,5,0",
            "--mode",
            "VarianceWithAmendment",
            "--percent",
            "20",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("variance:   +4 (+26.67%)"))
        .stdout(predicate::str::contains("status:     ExceedsThreshold"))
        .stdout(predicate::str::contains("blocking:   true"))
        .stdout(predicate::str::contains("Amendment required."));
}

#[test]
fn test_evaluate_uses_configured_mode() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("reserve-flow.toml"),
        "[scope_change]\nmode = \"VarianceReportOnly\"\n",
    )
    .unwrap();

    reserve_flow(&dir)
        .args(["evaluate", "--original", "10,0,0", "--actual", "5,0,0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mode:       VarianceReportOnly"))
        .stdout(predicate::str::contains("blocking:   false"))
        .stdout(predicate::str::contains("5 fewer"));
}

#[test]
fn test_evaluate_rejects_bad_counts() {
    let dir = tempfile::tempdir().unwrap();
    reserve_flow(&dir)
        .args(["evaluate", "--original", "10,5", "--actual", "14,5,0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("building,common,additional"));
}

#[test]
fn test_config_write() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("written.toml");

    reserve_flow(&dir)
        .args(["config", "--write"])
        .arg(&target)
        .assert()
        .success()
        .stdout(predicate::str::contains("[scope_change]"))
        .stdout(predicate::str::contains("[policy_cache]"));

    let written = std::fs::read_to_string(&target).unwrap();
    assert!(written.contains("mode = \"NoAction\""));
}
