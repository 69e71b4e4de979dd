mod common;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

use common::{TestWorkspace, parse_table_row};

fn numbers_fixture(rows: usize) -> String {
    let mut data = String::from("id,value,label\n");
    for i in 0..rows {
        data.push_str(&format!("{i},{},item_{}\n", (i * 3) % 101, i % 5));
    }
    data
}

fn run_profile(args: &[&str]) -> String {
    let assert = Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args(args)
        .assert()
        .success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8")
}

#[test]
fn profile_reports_numeric_columns_only() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("numbers.csv", &numbers_fixture(50));

    let stdout = run_profile(&["profile", "-i", input.to_str().unwrap()]);
    assert!(stdout.contains("id"), "id missing: {stdout}");
    assert!(stdout.contains("value"), "value missing: {stdout}");
    assert!(!stdout.contains("label"), "label unexpectedly profiled");

    let id_line = stdout
        .lines()
        .find(|line| line.starts_with("id"))
        .expect("id row");
    let cells = parse_table_row(id_line);
    assert_eq!(cells[1], "50", "count");
    assert_eq!(cells[2], "24.5000", "mean of 0..49");
    assert_eq!(cells[4], "0", "min");
    assert_eq!(cells[5], "49", "max");
    assert_eq!(cells[7], "0", "nulls");
}

#[test]
fn chunk_size_does_not_change_profile_output() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("numbers.csv", &numbers_fixture(997));

    let coarse = run_profile(&[
        "profile",
        "-i",
        input.to_str().unwrap(),
        "--chunk-size",
        "100000",
    ]);
    let fine = run_profile(&[
        "profile",
        "-i",
        input.to_str().unwrap(),
        "--chunk-size",
        "13",
    ]);
    assert_eq!(coarse, fine, "profiles must be chunk-size invariant");
}

#[test]
fn explicit_columns_override_inference() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("numbers.csv", &numbers_fixture(20));

    let stdout = run_profile(&[
        "profile",
        "-i",
        input.to_str().unwrap(),
        "-C",
        "value",
    ]);
    assert!(stdout.contains("value"));
    let lines_with_id = stdout
        .lines()
        .filter(|line| line.starts_with("id"))
        .count();
    assert_eq!(lines_with_id, 0, "id should not be profiled: {stdout}");
}

#[test]
fn limit_caps_the_rows_profiled() {
    let workspace = TestWorkspace::new();
    let input = workspace.write("numbers.csv", &numbers_fixture(100));

    let stdout = run_profile(&[
        "profile",
        "-i",
        input.to_str().unwrap(),
        "--limit",
        "10",
    ]);
    let id_line = stdout
        .lines()
        .find(|line| line.starts_with("id"))
        .expect("id row");
    let cells = parse_table_row(id_line);
    assert_eq!(cells[1], "10", "limit should cap the count: {stdout}");
}

#[test]
fn null_tokens_show_up_in_the_null_column() {
    let workspace = TestWorkspace::new();
    let data = "v,w\n1,a\nNA,b\n2,c\nn/a,d\n3,e\n--,f\n";
    let input = workspace.write("tokens.csv", data);

    let stdout = run_profile(&["profile", "-i", input.to_str().unwrap(), "-C", "v"]);
    let line = stdout.lines().find(|l| l.starts_with("v")).expect("v row");
    let cells = parse_table_row(line);
    assert_eq!(cells[1], "3", "count: {stdout}");
    assert_eq!(cells[7], "3", "nulls: {stdout}");
    assert_eq!(cells[2], "2", "mean of 1,2,3: {stdout}");
}

#[test]
fn text_only_input_asks_for_explicit_columns() {
    let workspace = TestWorkspace::new();
    let data = "name,city\nada,london\ngrace,ny\n";
    let input = workspace.write("text.csv", data);

    Command::cargo_bin("csv-refinery")
        .expect("binary exists")
        .args(["profile", "-i", input.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("No numeric columns").and(contains("--columns")));
}
