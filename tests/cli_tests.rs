// End-to-end tests of the compiled binary. Workspaces are prepared
// through the library so the binary's read-only subcommands can be
// exercised without network access or the bioinformatics tools.

use assert_cmd::Command;
use crossmotif::motif::MotifReport;
use crossmotif::pipeline::{PipelineContext, Stage};
use crossmotif::sequence::SequenceStore;
use crossmotif::workspace::Workspace;
use predicates::prelude::*;
use tempfile::TempDir;

fn crossmotif() -> Command {
    Command::cargo_bin("crossmotif").unwrap()
}

/// A workspace whose manifest says the motif scan has completed.
fn scanned_workspace(base: &std::path::Path, name: &str) -> Workspace {
    let ws = Workspace::create(base, name).unwrap();
    let mut ctx = PipelineContext::new(ws.query_name());
    ctx.stage = Stage::MotifScanned;
    ctx.sequences = SequenceStore::parse(">A1 kinase alpha\nMKV\n>A2 kinase beta\nMTT\n").unwrap();
    ctx.motif_reports = Some(vec![
        MotifReport {
            source_accession_id: "A1".to_string(),
            motif_name: Some("ZINC_FINGER_C2H2_1".to_string()),
        },
        MotifReport {
            source_accession_id: "A2".to_string(),
            motif_name: None,
        },
    ]);
    ctx.save(&ws).unwrap();
    ws
}

#[test]
fn help_lists_the_subcommands() {
    crossmotif()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("branch"))
        .stdout(predicate::str::contains("report"))
        .stdout(predicate::str::contains("clean"))
        .stdout(predicate::str::contains(
            "Cross-taxon protein motif comparison pipeline",
        ));
}

#[test]
fn report_fails_for_a_query_that_was_never_started() {
    let dir = TempDir::new().unwrap();
    crossmotif()
        .args(["report", "--name", "never_started"])
        .args(["--base-dir", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No workspace found"));
}

#[test]
fn report_summarizes_stage_and_motifs() {
    let dir = TempDir::new().unwrap();
    scanned_workspace(dir.path(), "kinase_mammalia");

    crossmotif()
        .args(["report", "--name", "kinase_mammalia"])
        .args(["--base-dir", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("stage: MotifScanned"))
        .stdout(predicate::str::contains("Sequences in store: 2"))
        .stdout(predicate::str::contains(
            "Found the motif ZINC_FINGER_C2H2_1 1 times.",
        ))
        .stdout(predicate::str::contains("No completed comparison branches."));
}

#[test]
fn branch_requires_the_scan_to_have_completed() {
    let dir = TempDir::new().unwrap();
    let ws = Workspace::create(dir.path(), "too_early").unwrap();
    let mut ctx = PipelineContext::new(ws.query_name());
    ctx.save(&ws).unwrap();

    crossmotif()
        .args(["branch", "--name", "too_early"])
        .args(["--base-dir", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("is at stage Init"));
}

#[test]
fn clean_with_yes_removes_the_workspace() {
    let dir = TempDir::new().unwrap();
    let ws = scanned_workspace(dir.path(), "doomed");
    let root = ws.root().to_path_buf();
    assert!(root.exists());

    crossmotif()
        .args(["clean", "--name", "doomed", "--yes"])
        .args(["--base-dir", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed"));
    assert!(!root.exists());
}

#[test]
fn clean_fails_for_a_missing_workspace() {
    let dir = TempDir::new().unwrap();
    crossmotif()
        .args(["clean", "--name", "missing", "--yes"])
        .args(["--base-dir", dir.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No workspace found"));
}

#[test]
fn run_rejects_a_motif_without_a_cross_taxon() {
    crossmotif()
        .args(["run", "--family", "kinase", "--taxon", "mammalia"])
        .args(["--motif", "ZINC_FINGER_C2H2_1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--cross-taxon"));
}

#[test]
fn run_rejects_a_non_positive_threshold() {
    crossmotif()
        .args(["run", "--family", "kinase", "--taxon", "mammalia"])
        .args(["--threshold", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("greater than zero"));
}
