mod common;

use std::fs;

use common::{TestWorkspace, bin, fixture_str};
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;

fn stdout_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("stdout is JSON")
}

#[test]
fn load_prints_resolved_eligibility_table() {
    bin()
        .args(["load", "-i", &fixture_str("eligibility.csv"), "-d", "eligibility"])
        .assert()
        .success()
        .stdout(contains("country_normalized"))
        .stdout(contains("Japan"))
        .stdout(contains("Means-tested, municipal"))
        .stdout(contains("orphan row").not());
}

#[test]
fn load_json_fills_missing_columns_with_na() {
    let assert = bin()
        .args([
            "load",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
            "--format",
            "json",
        ])
        .assert()
        .success();
    let records = stdout_json(&assert.get_output().stdout);
    let records = records.as_array().expect("array of records");
    assert_eq!(records.len(), 3);

    let japan = &records[0];
    assert_eq!(japan["country"], "Japan");
    assert_eq!(japan["country_normalized"], "Japan");
    assert_eq!(japan["income"], "Yes");
    assert_eq!(japan["pr"], "Yes");
    assert_eq!(japan["employment"], "NA");
    assert_eq!(japan["note"], "Means-tested, municipal");
    assert_eq!(records[2]["all"], "Yes");
}

#[test]
fn load_csv_writes_profile_columns_to_file() {
    let workspace = TestWorkspace::new();
    let output = workspace.path().join("eligibility_out.csv");
    bin()
        .args([
            "load",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
            "-f",
            "csv",
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let contents = fs::read_to_string(&output).expect("read output");
    let mut lines = contents.lines();
    assert_eq!(
        lines.next(),
        Some("country,country_normalized,all,income,pr,residency,employment,note")
    );
    assert_eq!(
        lines.next(),
        Some("Japan,Japan,No,Yes,Yes,No,NA,\"Means-tested, municipal\"")
    );
}

#[test]
fn load_reads_stdin_with_dash() {
    bin()
        .args(["load", "-i", "-", "-d", "reassessment", "-f", "csv"])
        .write_stdin("Country,Frequency,Segment\nKorea,Annual,Public\n")
        .assert()
        .success()
        .stdout(contains("country,country_normalized,segment,frequency,detail"))
        .stdout(contains("Korea,Korea,Public,Annual,"));
}

#[test]
fn load_decodes_requested_input_encoding() {
    let workspace = TestWorkspace::new();
    let path = workspace.write(
        "latin1.csv",
        b"Country,Segment\nCura\xe7ao,Public\n".as_slice(),
    );
    bin()
        .args([
            "load",
            "-i",
            path.to_str().unwrap(),
            "-d",
            "reassessment",
            "-f",
            "csv",
            "--input-encoding",
            "latin1",
        ])
        .assert()
        .success()
        .stdout(contains("Curaçao,Curaçao,Public"));
}

#[test]
fn load_fails_when_country_header_is_missing() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("no_country.csv", "Nation,Income threshold\nJapan,Yes\n");
    bin()
        .args(["load", "-i", path.to_str().unwrap(), "-d", "eligibility"])
        .assert()
        .failure()
        .stderr(contains("missing required field 'country'"))
        .stderr(contains("pass --column <field>=<index> to map it"))
        .stderr(contains("--sheet").not());
}

#[test]
fn load_column_flag_maps_unrecognized_header() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("nation.csv", "Nation,Income threshold\nJapan,Yes\n");
    bin()
        .args([
            "load",
            "-i",
            path.to_str().unwrap(),
            "-d",
            "eligibility",
            "--column",
            "country=0",
            "-f",
            "csv",
        ])
        .assert()
        .success()
        .stdout(contains("Japan,Japan,NA,Yes,NA,NA,NA,"));
}

#[test]
fn load_column_flag_rejects_unknown_field() {
    bin()
        .args([
            "load",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
            "--column",
            "rent=1",
        ])
        .assert()
        .failure()
        .stderr(contains("cannot map field 'rent'"));
}

#[test]
fn load_fails_on_missing_file() {
    let workspace = TestWorkspace::new();
    let path = workspace.path().join("absent.csv");
    bin()
        .args(["load", "-i", path.to_str().unwrap(), "-d", "priority"])
        .assert()
        .failure()
        .stderr(contains("could not load dataset"));
}

#[test]
fn load_grouped_definitions_merges_terms_per_country() {
    let assert = bin()
        .args([
            "load",
            "-i",
            &fixture_str("definitions.csv"),
            "-d",
            "definitions",
            "--grouped",
            "-f",
            "json",
        ])
        .assert()
        .success();
    let groups = stdout_json(&assert.get_output().stdout);
    let groups = groups.as_array().expect("array of groups");
    let countries = groups
        .iter()
        .map(|group| group["country"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(countries, vec!["Austria", "Netherlands"]);
    assert_eq!(
        groups[1]["terms_joined"],
        "Social rental housing；Woningcorporaties"
    );
    assert_eq!(groups[1]["items"].as_array().unwrap().len(), 2);
}

#[test]
fn scan_lists_detected_header_row() {
    bin()
        .args(["scan", "-i", &fixture_str("housing_stock_wide.csv")])
        .assert()
        .success()
        .stdout(contains("housing_stock_wide.csv"))
        .stdout(contains("wide-year-in-columns"));
}

#[test]
fn melt_wide_sheet_to_csv_drops_aggregates_and_placeholders() {
    let assert = bin()
        .args([
            "melt",
            "-i",
            &fixture_str("housing_stock_wide.csv"),
            "-f",
            "csv",
        ])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(
        lines,
        vec![
            "country,year,value",
            "Austria,2010,23",
            "Austria,2015,24",
            "Austria,2020,23.6",
            "Japan,2010,3.5",
            "Japan,2015,3.3",
            "Japan,2020,3.1",
            "Korea,2015,6.5",
            "Korea,2020,7.1",
        ]
    );
}

#[test]
fn melt_long_table_keeps_year_column() {
    let assert = bin()
        .args(["melt", "-i", &fixture_str("rents_long.csv"), "-f", "json"])
        .assert()
        .success();
    let records = stdout_json(&assert.get_output().stdout);
    let records = records.as_array().expect("array of observations");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["country"], "AUT");
    assert_eq!(records[0]["year"], "2019");
    assert_eq!(records[1]["value"], 21.9);
}

#[test]
fn melt_manual_selection_overrides_detection() {
    bin()
        .args([
            "melt",
            "-i",
            &fixture_str("housing_stock_wide.csv"),
            "--sheet",
            "housing_stock_wide.csv",
            "--header-row",
            "2",
            "--orientation",
            "wide-year-in-columns",
            "-f",
            "csv",
        ])
        .assert()
        .success()
        .stdout(contains("Korea,2020,7.1"));
}

#[test]
fn melt_unknown_sheet_is_reported() {
    bin()
        .args([
            "melt",
            "-i",
            &fixture_str("housing_stock_wide.csv"),
            "--sheet",
            "Table 9",
        ])
        .assert()
        .failure()
        .stderr(contains("sheet 'Table 9' not found"));
}

#[test]
fn melt_without_table_suggests_manual_selection() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("notes.csv", "Notes\nNothing tabular here\nStill nothing\n");
    bin()
        .args(["melt", "-i", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("could not auto-detect"))
        .stderr(contains("--sheet, --header-row and --orientation"));
}

#[test]
fn melt_long_table_with_mapped_columns() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("obs.csv", "Member,Period,Obs\nAUT,2019,22.4\nAUT,2020,21.9\n");
    let manual = [
        "melt",
        "-i",
        path.to_str().unwrap(),
        "--sheet",
        "obs.csv",
        "--header-row",
        "0",
        "--orientation",
        "long",
    ];
    bin()
        .args(manual)
        .assert()
        .failure()
        .stderr(contains("pass --column <field>=<index> to map it"));

    bin()
        .args(manual)
        .args(["--column", "country=0", "--column", "value=2", "-f", "csv"])
        .assert()
        .success()
        .stdout(contains("AUT,2019,22.4"))
        .stdout(contains("AUT,2020,21.9"));
}

#[test]
fn melt_reads_detection_overrides_from_config() {
    let workspace = TestWorkspace::new();
    let config = workspace.write(
        "ingest.yml",
        "clean:\n  excluded_countries: [Austria]\n",
    );
    bin()
        .args([
            "melt",
            "-i",
            &fixture_str("housing_stock_wide.csv"),
            "-c",
            config.to_str().unwrap(),
            "-f",
            "csv",
        ])
        .assert()
        .success()
        .stdout(contains("Austria").not())
        .stdout(contains("OECD average,2010,7.1"));
}

#[test]
fn report_dry_run_prints_card_request() {
    let assert = bin()
        .args([
            "report",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
            "--country",
            "japan",
            "--dry-run",
        ])
        .assert()
        .success();
    let request = stdout_json(&assert.get_output().stdout);
    assert_eq!(request["topic"], "eligibility");
    assert_eq!(request["mode"], "card");
    assert_eq!(request["language"], "zh");
    let rows = request["data"]["rows"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Country"], "Japan");
    assert_eq!(request["data"]["stats"]["yesShareByField"]["Income"], 1.0);
}

#[test]
fn report_dry_run_applies_flag_and_sort() {
    let assert = bin()
        .args([
            "report",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
            "--flag",
            "Citizenship/PR=yes",
            "--sort",
            "score",
            "--dry-run",
        ])
        .assert()
        .success();
    let request = stdout_json(&assert.get_output().stdout);
    assert_eq!(request["filters"]["sort"], "score");
    assert_eq!(request["filters"]["flag"]["field"], "Citizenship/PR");
    let countries = request["data"]["rows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["Country"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(countries, vec!["Japan", "Korea"]);
}

#[test]
fn report_without_endpoint_prints_local_summary() {
    bin()
        .args([
            "report",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
        ])
        .assert()
        .success()
        .stdout(contains("3 visible row(s)"))
        .stdout(contains("<li><strong>Country:</strong> Japan</li>"))
        .stdout(contains("AI summary failed").not());
}

#[test]
fn report_falls_back_when_service_is_unreachable() {
    let unreachable = [
        "report",
        "-i",
        &fixture_str("eligibility.csv"),
        "-d",
        "eligibility",
        "--endpoint",
        "http://127.0.0.1:9",
    ];
    bin()
        .args(unreachable)
        .assert()
        .success()
        .stdout(contains("AI summary failed; showing a rule-based summary instead."))
        .stdout(contains("<li><strong>Income:</strong> Yes</li>"));

    bin()
        .args(unreachable)
        .arg("--no-fallback")
        .assert()
        .failure()
        .stderr(contains("Requesting report from http://127.0.0.1:9/api/report"));
}

#[test]
fn report_tag_filter_is_definitions_only() {
    bin()
        .args([
            "report",
            "-i",
            &fixture_str("eligibility.csv"),
            "-d",
            "eligibility",
            "--tag",
            "public_provider",
            "--dry-run",
        ])
        .assert()
        .failure()
        .stderr(contains("tag filters apply to definitions"));
}

#[test]
fn chat_dry_run_bundles_every_source() {
    let eligibility = format!("eligibility={}", fixture_str("eligibility.csv"));
    let definitions = format!("definitions={}", fixture_str("definitions.csv"));
    let assert = bin()
        .args([
            "chat",
            "-q",
            "Which countries cap income?",
            "-s",
            &eligibility,
            "-s",
            &definitions,
            "--language",
            "en",
            "--dry-run",
        ])
        .assert()
        .success();
    let request = stdout_json(&assert.get_output().stdout);
    assert_eq!(request["topic"], "chat");
    assert_eq!(request["mode"], "qa");
    assert_eq!(request["question"], "Which countries cap income?");
    let datasets = request["data"]["datasets"].as_object().unwrap();
    assert_eq!(datasets["eligibility"].as_array().unwrap().len(), 3);
    assert_eq!(datasets["definitions"].as_array().unwrap().len(), 3);
}
