mod common;

use std::fs;

use assert_cmd::Command;
use predicates::str::contains;

use common::{TestWorkspace, parse_table_row};

fn mixed_fixture() -> &'static str {
    "id,price,active,joined,notes\n\
     1,10.5,yes,2024-01-02,first\n\
     2,11.0,no,2024-02-03,second\n\
     3,12.5,yes,2024-03-04,third\n\
     4,13.0,no,2024-04-05,fourth\n"
}

#[test]
fn probe_prints_inferred_kinds() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("mixed.csv", mixed_fixture());

    let assert = Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args(["probe", "-i", input.to_str().unwrap()])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");

    let kind_of = |name: &str| -> String {
        let line = stdout
            .lines()
            .find(|line| line.starts_with(name))
            .unwrap_or_else(|| panic!("{name} row missing: {stdout}"));
        parse_table_row(line)[1].clone()
    };
    assert_eq!(kind_of("id"), "numeric");
    assert_eq!(kind_of("price"), "numeric");
    assert_eq!(kind_of("active"), "boolean");
    assert_eq!(kind_of("joined"), "datetime");
    assert_eq!(kind_of("notes"), "text");
}

#[test]
fn probe_writes_a_hints_file_clean_can_consume() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("mixed.csv", mixed_fixture());
    let hints = workspace.path().join("mixed-hints.yml");

    Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "-o",
            hints.to_str().unwrap(),
        ])
        .assert()
        .success();

    let hints_text = fs::read_to_string(&hints).expect("hints file");
    assert!(hints_text.contains("declared"), "hints: {hints_text}");
    assert!(hints_text.contains("joined"), "hints: {hints_text}");

    // The emitted hints round-trip into a clean run.
    let report = workspace.path().join("report.json");
    Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args([
            "clean",
            "-i",
            input.to_str().unwrap(),
            "-o",
            workspace.path().join("out.csv").to_str().unwrap(),
            "--hints",
            hints.to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
        ])
        .assert()
        .success();
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).expect("report file"))
            .expect("report json");
    assert_eq!(report["column_kinds"]["joined"], "datetime");
    assert_eq!(report["column_kinds"]["active"], "boolean");
}

#[test]
fn probe_sample_rows_limits_the_scan() {
    let workspace = TestWorkspace::new();
    let mut data = String::from("v\n");
    for i in 0..50 {
        data.push_str(&format!("{i}\n"));
    }
    let input = workspace.write("long.csv", &data);

    let assert = Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "--sample-rows",
            "10",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let line = stdout.lines().find(|l| l.starts_with("v")).expect("v row");
    let cells = parse_table_row(line);
    assert_eq!(cells[3], "10", "sampled row count: {stdout}");
}

#[test]
fn probe_rejects_binary_columnar_files() {
    let workspace = TestWorkspace::new();
    let input = workspace.write_bytes("data.xlsx", b"PK\x03\x04");

    Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args(["probe", "-i", input.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("xlsx"));
}
