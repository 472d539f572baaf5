// End-to-end tests for the `devcenter` binary: stdout contracts and exit codes.
//
// Run with: cargo test -p devcenter-cli --test cli_tests -- --nocapture

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

fn devcenter() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_devcenter"));
    cmd.current_dir(env!("CARGO_MANIFEST_DIR"));
    cmd.env_remove("DEVCENTER_HIERARCHY");
    cmd.env_remove("DEVCENTER_LOG");
    cmd
}

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../rollup/tests/fixtures")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

fn run(args: &[&str]) -> Output {
    devcenter().args(args).output().expect("run devcenter")
}

fn code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Assert stdout is a single, parseable JSON value.
fn assert_single_json(stdout: &[u8]) -> serde_json::Value {
    let text = String::from_utf8_lossy(stdout);
    let trimmed = text.trim();
    assert!(!trimmed.is_empty(), "stdout should not be empty");
    serde_json::from_str(trimmed)
        .unwrap_or_else(|e| panic!("stdout must be valid JSON.\nParse error: {e}\nstdout:\n{trimmed}"))
}

// ===========================================================================
// devcenter rollup
// ===========================================================================

#[test]
fn rollup_json_to_stdout() {
    let hierarchy = fixture("hierarchy.toml");
    let export = fixture("export-a.csv");
    let output = run(&["rollup", "--hierarchy", &hierarchy, &export]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));

    let val = assert_single_json(&output.stdout);
    let payments = &val["organizations"]["acme/payments"]["log4shell"];
    assert_eq!(payments["pass"], 2);
    assert_eq!(payments["fail"], 1);
    assert_eq!(val["unattributed"]["log4shell"]["pass"], 1);
    assert_eq!(val["diagnostics"]["attributed_rows"], 6);
}

#[test]
fn rollup_is_byte_identical_across_runs() {
    let hierarchy = fixture("hierarchy.toml");
    let a = fixture("export-a.csv");
    let b = fixture("export-b.csv");
    let first = run(&["rollup", "--hierarchy", &hierarchy, &a, &b]);
    let second = run(&["rollup", "--hierarchy", &hierarchy, &b, &a]);
    assert_eq!(code(&first), 0);
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn rollup_csv_to_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("rollup.csv");
    let hierarchy = fixture("hierarchy.toml");
    let export = fixture("export-b.csv");
    let output = run(&[
        "rollup",
        "--hierarchy",
        &hierarchy,
        "--format",
        "csv",
        "--output",
        out.to_str().unwrap(),
        &export,
    ]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    assert!(output.stdout.is_empty());

    let text = std::fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("organization,recipe,pass,fail,error,skipped,total"));
    assert_eq!(lines.next(), Some("acme,gradle-wrapper,1,1,1,0,3"));
}

#[test]
fn rollup_text_summary() {
    let hierarchy = fixture("hierarchy.toml");
    let export = fixture("export-a.csv");
    let output = run(&["rollup", "--hierarchy", &hierarchy, "-f", "text", &export]);
    assert_eq!(code(&output), 0);
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("(unattributed)"));
    assert!(text.contains("  payments"));
}

#[test]
fn rollup_from_stdin() {
    let hierarchy = fixture("hierarchy.toml");
    let mut child = devcenter()
        .args(["rollup", "--hierarchy", &hierarchy, "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn devcenter");
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"repository,recipe,outcome\ngithub.com/acme/ledger,secrets,fail\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["organizations"]["acme"]["secrets"]["fail"], 1);
}

#[test]
fn strict_mode_fails_on_parse_errors_but_still_reports() {
    let hierarchy = fixture("hierarchy.toml");
    let export = fixture("export-malformed.csv");
    let output = run(&["rollup", "--hierarchy", &hierarchy, "--strict", &export]);
    assert_eq!(code(&output), 5);
    assert!(stderr(&output).contains("3 rows failed to parse"));
    let val = assert_single_json(&output.stdout);
    assert_eq!(val["diagnostics"]["parse_errors"], 3);

    let lenient = run(&["rollup", "--hierarchy", &hierarchy, &export]);
    assert_eq!(code(&lenient), 0);
}

#[test]
fn strict_mode_fails_on_unattributed_share() {
    let dir = tempfile::tempdir().unwrap();
    let export = dir.path().join("orphans.csv");
    std::fs::write(&export, "repository,recipe,outcome\nelsewhere/a,X,pass\ngithub.com/acme/ledger,X,pass\n").unwrap();
    let hierarchy = fixture("hierarchy.toml");
    let output = run(&["rollup", "--hierarchy", &hierarchy, "--strict", export.to_str().unwrap()]);
    assert_eq!(code(&output), 5);
    assert!(stderr(&output).contains("unattributed"));
}

// ===========================================================================
// Exit codes
// ===========================================================================

#[test]
fn missing_hierarchy_is_usage_error() {
    let export = fixture("export-a.csv");
    let output = run(&["rollup", &export]);
    assert_eq!(code(&output), 2);
    assert!(stderr(&output).contains("--hierarchy or --repos-csv"));
}

#[test]
fn cyclic_hierarchy_is_config_error() {
    let hierarchy = fixture("cyclic.toml");
    let export = fixture("export-a.csv");
    let output = run(&["rollup", "--hierarchy", &hierarchy, &export]);
    assert_eq!(code(&output), 3);
    assert!(stderr(&output).contains("cycle"));
    assert!(output.stdout.is_empty());
}

#[test]
fn missing_column_is_config_error() {
    let hierarchy = fixture("hierarchy.toml");
    let export = fixture("export-origin.csv");
    let output = run(&["rollup", "--hierarchy", &hierarchy, &export]);
    assert_eq!(code(&output), 3);
    assert!(stderr(&output).contains("hint:"));
}

#[test]
fn missing_export_is_io_error() {
    let hierarchy = fixture("hierarchy.toml");
    let output = run(&["rollup", "--hierarchy", &hierarchy, "does-not-exist.csv"]);
    assert_eq!(code(&output), 4);
}

// ===========================================================================
// devcenter validate / resolve
// ===========================================================================

#[test]
fn validate_reports_unit_counts() {
    let hierarchy = fixture("hierarchy.toml");
    let config = fixture("origin.toml");
    let output = run(&["validate", "--hierarchy", &hierarchy, "--config", &config]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("valid: 4 unit(s), 4 organization path(s), exclusive"));
}

#[test]
fn validate_repos_csv() {
    let repos = fixture("repos.csv");
    let output = run(&["validate", "--repos-csv", &repos]);
    assert_eq!(code(&output), 0, "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("non-exclusive"));
}

#[test]
fn resolve_prints_owners() {
    let hierarchy = fixture("hierarchy.toml");
    let output = run(&[
        "resolve",
        "--hierarchy",
        &hierarchy,
        "github.com/acme/platform-gradle",
        "github.com/nobody/x",
    ]);
    assert_eq!(code(&output), 0);
    let text = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        text,
        "github.com/acme/platform-gradle\tacme/platform\ngithub.com/nobody/x\t(unattributed)\n"
    );
}

#[test]
fn resolve_json() {
    let repos = fixture("repos.csv");
    let output = run(&["resolve", "--repos-csv", &repos, "--json", "github.com/acme/ledger"]);
    assert_eq!(code(&output), 0);
    let val = assert_single_json(&output.stdout);
    assert_eq!(
        val["github.com/acme/ledger"],
        serde_json::json!(["ALL/Commerce/Payments", "ALL/Java Guild"])
    );
}

// ===========================================================================
// devcenter diff
// ===========================================================================

#[test]
fn diff_exit_codes() {
    let dir = tempfile::tempdir().unwrap();
    let hierarchy = fixture("hierarchy.toml");
    let before = dir.path().join("before.json");
    let after = dir.path().join("after.json");

    let a = fixture("export-a.csv");
    let b = fixture("export-b.csv");
    let out1 = run(&["rollup", "--hierarchy", &hierarchy, "-o", before.to_str().unwrap(), &a]);
    assert_eq!(code(&out1), 0);
    let out2 = run(&["rollup", "--hierarchy", &hierarchy, "-o", after.to_str().unwrap(), &a, &b]);
    assert_eq!(code(&out2), 0);

    let same = run(&["diff", before.to_str().unwrap(), before.to_str().unwrap()]);
    assert_eq!(code(&same), 0);
    assert!(same.stdout.is_empty());

    let changed = run(&["diff", before.to_str().unwrap(), after.to_str().unwrap()]);
    assert_eq!(code(&changed), 1);
    let text = String::from_utf8_lossy(&changed.stdout);
    assert!(text.contains("~ acme gradle-wrapper: pass +1, fail +1, error +1"));
    assert!(stderr(&changed).is_empty());

    let json = run(&["diff", "--json", before.to_str().unwrap(), after.to_str().unwrap()]);
    assert_eq!(code(&json), 1);
    let val = assert_single_json(&json.stdout);
    assert!(val["cells"].as_array().unwrap().len() >= 3);
}
