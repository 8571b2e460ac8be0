mod common;

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use common::{TestWorkspace, admissions_extract};

fn binary() -> Command {
    Command::cargo_bin("admission-ingest").expect("binary exists")
}

fn count_rows(database: &std::path::Path, table: &str) -> i64 {
    let connection = Connection::open(database).expect("open database");
    connection
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })
        .expect("count rows")
}

#[test]
fn analyze_reports_each_rule() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("sih.csv", &admissions_extract(10));
    binary()
        .args(["analyze", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Quality report over 10 row(s)"))
        .stdout(contains("[range:IDADE] 1 row(s) flagged"))
        .stdout(contains("[upper_bound:QT_DIARIAS] 1 row(s) flagged"))
        .stdout(contains("[temporal_order:DT_SAIDA>=DT_INTER] 1 row(s) flagged"))
        .stdout(contains("5/10 absent (50.00%)"))
        .stdout(contains("years 2019; oldest 2019"));
}

#[test]
fn analyze_marks_missing_columns_not_applicable() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("partial.csv", "IDADE,CGC_HOSP\n34,0002534\n150,0002534\n");
    binary()
        .args(["analyze", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("[range:IDADE] 1 row(s) flagged"))
        .stdout(contains("not applicable: missing column(s) QT_DIARIAS"))
        .stdout(contains("not applicable: missing column(s) DT_SAIDA, DT_INTER"));
}

#[test]
fn analyze_filters_entities_and_labels_them() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("sih.csv", &admissions_extract(9));
    let names = workspace.write("hospitals.yml", "\"0002534\": HUSE\n");
    let json = workspace.join("findings.json");
    let export = workspace.join("selected.csv");
    binary()
        .args([
            "analyze",
            "-i",
            input.to_str().unwrap(),
            "--only-entities",
            "0002534",
            "--entity-names",
            names.to_str().unwrap(),
            "--completeness",
            "--json",
            json.to_str().unwrap(),
            "--export",
            export.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Quality report over 3 row(s)"))
        .stdout(contains("HUSE (0002534)"))
        .stdout(contains("MUNIC_RES"));

    let findings: JsonValue =
        serde_json::from_str(&fs::read_to_string(&json).expect("read json")).expect("parse json");
    assert_eq!(findings["total_rows"], 3);
    assert_eq!(findings["findings"].as_array().expect("findings").len(), 7);
    assert_eq!(findings["findings"][0]["rule"], "range:IDADE");

    let exported = fs::read_to_string(&export).expect("export");
    let mut lines = exported.lines();
    assert!(lines.next().expect("header").starts_with("identificador,ANO_CMPT"));
    assert_eq!(lines.count(), 3);
    assert!(exported.lines().skip(1).all(|line| line.contains(",0002534,")));
}

#[test]
fn tsv_extension_selects_tab_delimiter() {
    let workspace = TestWorkspace::new();
    let tsv = admissions_extract(6).replace(',', "\t");
    let input = workspace.write("sih.tsv", &tsv);
    binary()
        .args(["analyze", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Quality report over 6 row(s)"))
        .stdout(contains("[range:IDADE] 1 row(s) flagged"))
        .stdout(contains("[temporal_order:DT_SAIDA>=DT_INTER] 1 row(s) flagged"));
}

#[test]
fn normalize_converts_latin1_to_utf8() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_latin1(
        "latin.csv",
        "CGC_HOSP,MUNIC_RES\n0002534,São Cristóvão\n2816210,Nossa Senhora da Conceição\n0002534,Aracaju\n",
    );
    let output = workspace.join("clean.csv");
    let report = workspace.join("report.txt");
    binary()
        .args([
            "normalize",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Total lines processed: 4"));

    let normalized = fs::read_to_string(&output).expect("normalized output is UTF-8");
    assert_eq!(normalized.lines().count(), 4);
    assert!(normalized.contains("0002534,Aracaju"));
    let report = fs::read_to_string(&report).expect("report");
    assert!(report.contains("Resolved encoding:"));
}

#[test]
fn load_is_repeatable_and_audits_rejected_batches() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("sih.csv", &admissions_extract(10));
    let database = workspace.join("sih.db");
    let audit = workspace.join("audit.log");
    let ddl = workspace.join("schema.sql");
    let args = [
        "load",
        "-i",
        input.to_str().unwrap(),
        "-d",
        database.to_str().unwrap(),
        "--table",
        "internacoes",
        "--batch-size",
        "4",
        "--audit-log",
        audit.to_str().unwrap(),
        "--ddl",
        ddl.to_str().unwrap(),
    ];

    binary()
        .args(args)
        .assert()
        .success()
        .stdout(contains("10 row(s) committed"));
    assert_eq!(count_rows(&database, "internacoes"), 10);
    let schema = fs::read_to_string(&ddl).expect("ddl");
    assert!(schema.starts_with("CREATE TABLE IF NOT EXISTS \"internacoes\""));
    assert!(schema.contains("\"identificador\" INTEGER PRIMARY KEY"));

    // Same identifiers again: the table already exists and every batch
    // collides with the stored keys.
    binary()
        .args(args)
        .assert()
        .success()
        .stdout(contains("0 row(s) committed, 10 row(s) in 3 failed batch(es)"));
    assert_eq!(count_rows(&database, "internacoes"), 10);
    let audit = fs::read_to_string(&audit).expect("audit log");
    assert_eq!(audit.lines().count(), 3);
    assert!(audit.contains("rows 1-4: "));
    assert!(audit.contains("rows 9-10: "));
}

#[test]
fn run_writes_all_artifacts_and_summary() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("SIH-AIH.csv", &admissions_extract(12));
    let database = workspace.join("out.db");
    let normalized = workspace.join("normalized.csv");
    let quality = workspace.join("quality.txt");
    let summary = workspace.join("summary.json");
    binary()
        .args([
            "run",
            "-i",
            input.to_str().unwrap(),
            "-d",
            database.to_str().unwrap(),
            "-o",
            normalized.to_str().unwrap(),
            "--quality-report",
            quality.to_str().unwrap(),
            "--summary-json",
            summary.to_str().unwrap(),
            "--storage",
            "inferred",
        ])
        .assert()
        .success()
        .stdout(contains("Rows processed: 12"))
        .stdout(contains("Flagged by range:IDADE: 1"));

    assert_eq!(count_rows(&database, "SIHAIH"), 12);
    assert!(workspace.join("out_schema.sql").exists());
    assert!(workspace.join("SIH-AIH_encoding_report.txt").exists());
    assert_eq!(
        fs::read_to_string(&normalized).expect("normalized").lines().count(),
        13
    );
    assert!(
        fs::read_to_string(&quality)
            .expect("quality report")
            .contains("[type_tally]")
    );

    let summary: JsonValue =
        serde_json::from_str(&fs::read_to_string(&summary).expect("summary")).expect("json");
    assert_eq!(summary["rows_processed"], 12);
    assert_eq!(summary["load"]["rows_committed"], 12);
    assert_eq!(summary["flagged_per_rule"]["upper_bound:QT_DIARIAS"], 1);
}

#[test]
fn missing_input_fails_with_error_message() {
    let workspace = TestWorkspace::new();
    binary()
        .args([
            "analyze",
            "-i",
            workspace.join("absent.csv").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("error:"))
        .stderr(contains("could not be read"));
}

#[test]
fn ragged_rows_need_lenient_mode() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("ragged.csv", "IDADE,CGC_HOSP\n34,0002534\n35\n");
    binary()
        .args(["analyze", "-i", input.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("has 1 field(s) but the header declares 2"));
    binary()
        .args(["analyze", "-i", input.to_str().unwrap(), "--lenient"])
        .assert()
        .success()
        .stdout(contains("Quality report over 2 row(s)"));
}
