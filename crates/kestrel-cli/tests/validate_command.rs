use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;

#[allow(deprecated)]
fn get_kestrel_bin() -> PathBuf {
    assert_cmd::cargo::cargo_bin("kestrel")
}

/// Suite fixtures live at the workspace root
fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_validate_lists_scenarios() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate").arg(fixture("valid_suite.json"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Suite 'demo' is valid"))
        .stdout(predicate::str::contains("heading is shown"))
        .stdout(predicate::str::contains("search, then go back"))
        .stdout(predicate::str::contains("1280x720, 375x667"))
        .stdout(predicate::str::contains("3 repetition(s)"));
}

#[test]
fn test_validate_json_output() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate")
        .arg(fixture("valid_suite.json"))
        .arg("--format")
        .arg("json");

    let output = cmd.assert().success().get_output().stdout.clone();
    let outline: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(outline["suite"], "demo");
    assert_eq!(outline["baseUrl"], "https://example.com");
    assert_eq!(outline["setupSteps"], 1);
    assert_eq!(outline["repetitions"], 3);
    assert_eq!(outline["scenarios"].as_array().unwrap().len(), 2);
    assert_eq!(outline["scenarios"][1]["steps"], 4);
}

#[test]
fn test_validate_table_output_quotes_commas() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate")
        .arg(fixture("valid_suite.json"))
        .arg("-f")
        .arg("table");

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("Scenario,Steps,Viewports"))
        .stdout(predicate::str::contains("heading is shown,1,"))
        .stdout(predicate::str::contains("\"search, then go back\",4,1280x720 375x667"));
}

#[test]
fn test_validate_rejects_duplicate_names() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate").arg(fixture("duplicate_names.json"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Duplicate scenario name 'login'"));
}

#[test]
fn test_validate_relative_url_needs_base() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate").arg(fixture("relative_without_base.json"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("base_url"));
}

#[test]
fn test_validate_missing_file() {
    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate").arg(fixture("does-not-exist.json"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load suite"));
}

#[test]
fn test_validate_malformed_json() {
    let temp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(temp.path(), "{\"name\": \"broken\", \"scenarios\": [").unwrap();

    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate").arg(temp.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("JSON error"));
}

#[test]
fn test_validate_bundled_search_suite() {
    let suite = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../suites/search.json");

    let mut cmd = Command::new(get_kestrel_bin());
    cmd.arg("validate").arg(suite);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("YouTube search"))
        .stdout(predicate::str::contains("case-insensitive search"));
}
