//! `dbqt` end-to-end runs against SQLite.

use db_query_tagger_testkit::{fixture_path, unique_temp_dir};
use rusqlite::Connection;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn dbqt() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_dbqt"));
    command.env_remove("DBQT_DATABASE").env_remove("DBQT_LOG");
    command
}

fn seed(label: &str) -> Result<(PathBuf, PathBuf), Box<dyn std::error::Error>> {
    let dir = unique_temp_dir(label);
    std::fs::create_dir_all(&dir)?;
    let database = dir.join("inventory.db");
    let conn = Connection::open(&database)?;
    conn.execute_batch(
        "CREATE TABLE devices (id TEXT PRIMARY KEY, name TEXT NOT NULL, site TEXT);
         INSERT INTO devices VALUES ('42', 'sensor-a', 'lab');
         INSERT INTO devices VALUES ('7', 'sensor-b', 'roof');",
    )?;

    let config = dir.join("tagger.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[[processors.db_query_tagger]]
database_type = "sqlite3"
database = "{}"
query = "select name, site from devices where id = ?"
query_params_tags = ["id"]
query_results_tags = ["device_name", "site"]
remove_query_params_tags = true
"#,
            database.to_string_lossy().replace('\\', "/")
        ),
    )?;
    Ok((dir, config))
}

fn stdout_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

fn tag<'a>(metric: &'a serde_json::Value, name: &str) -> Option<&'a str> {
    metric.pointer(&format!("/tags/{name}")).and_then(serde_json::Value::as_str)
}

fn run_with_stdin(mut command: Command, input: &Path) -> io::Result<Output> {
    let body = std::fs::read(input)?;
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&body)?;
    }
    child.wait_with_output()
}

#[test]
fn describe_prints_the_plugin_identity() -> io::Result<()> {
    let output = dbqt().arg("describe").output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("name: db_query_tagger"));
    assert!(stdout.contains("sqlite3"));
    Ok(())
}

#[test]
fn sample_config_passes_config_check() -> TestResult {
    let dir = unique_temp_dir("dbqt-e2e-sample");
    std::fs::create_dir_all(&dir)?;
    let sample = dbqt().arg("sample-config").output()?;
    assert!(sample.status.success());
    let path = dir.join("sample.toml");
    std::fs::write(&path, &sample.stdout)?;

    let check = dbqt()
        .args(["config", "check", "--path"])
        .arg(&path)
        .output()?;
    assert!(
        check.status.success(),
        "{}",
        String::from_utf8_lossy(&check.stderr)
    );
    assert!(String::from_utf8_lossy(&check.stdout).contains("instances: 1"));
    Ok(())
}

#[test]
fn apply_tags_stdin_to_stdout() -> TestResult {
    let (_dir, config) = seed("dbqt-e2e-stdin")?;
    let mut command = dbqt();
    command
        .args(["--quiet", "--log-level", "error", "apply", "--config"])
        .arg(&config);
    let output = run_with_stdin(command, &fixture_path("metrics/devices.jsonl"))?;
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );

    let metrics = stdout_lines(&output);
    assert_eq!(metrics.len(), 4);
    assert_eq!(tag(&metrics[0], "device_name"), Some("sensor-a"));
    assert_eq!(tag(&metrics[0], "site"), Some("lab"));
    assert_eq!(tag(&metrics[0], "id"), None);
    assert_eq!(tag(&metrics[1], "id"), Some("99"));
    assert_eq!(tag(&metrics[1], "device_name"), None);
    assert_eq!(tag(&metrics[3], "site"), Some("roof"));
    assert!(output.stderr.is_empty());
    Ok(())
}

#[test]
fn apply_file_to_file_with_telemetry() -> TestResult {
    let (dir, config) = seed("dbqt-e2e-files")?;
    let out = dir.join("out.jsonl");
    let output = dbqt()
        .args(["apply", "--telemetry", "--batch-size", "2", "--config"])
        .arg(&config)
        .arg("--input")
        .arg(fixture_path("metrics/devices.jsonl"))
        .arg("--output")
        .arg(&out)
        .output()?;
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(output.stdout.is_empty());

    let written = std::fs::read_to_string(&out)?;
    assert_eq!(written.lines().count(), 4);

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("tagger.lookup.found"));
    assert!(stderr.contains("info: applied 4 metrics in 2 batches"));
    Ok(())
}

#[test]
fn malformed_input_exits_with_invalid_input() -> TestResult {
    let (dir, config) = seed("dbqt-e2e-bad-input")?;
    let input = dir.join("bad.jsonl");
    std::fs::write(&input, "{\"name\":\"ok\"}\nnot json\n")?;

    let output = dbqt()
        .arg("apply")
        .arg("--config")
        .arg(&config)
        .arg("--input")
        .arg(&input)
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line: 2"));
    Ok(())
}

#[test]
fn non_utf8_input_exits_with_invalid_input() -> TestResult {
    let (dir, config) = seed("dbqt-e2e-non-utf8")?;
    let input = dir.join("latin1.jsonl");
    std::fs::write(&input, b"{\"name\":\"caf\xe9\"}\n")?;

    let output = dbqt()
        .arg("apply")
        .arg("--config")
        .arg(&config)
        .arg("--input")
        .arg(&input)
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line: 1"));
    Ok(())
}

#[test]
fn missing_config_exits_with_io() -> io::Result<()> {
    let output = dbqt()
        .args(["config", "check", "--path"])
        .arg(fixture_path("config/absent.toml"))
        .output()?;
    assert_eq!(output.status.code(), Some(3));
    Ok(())
}

#[test]
fn env_override_reaches_config_show() -> io::Result<()> {
    let output = dbqt()
        .args(["config", "show", "--path"])
        .arg(fixture_path("config/tagger.flat.toml"))
        .env("DBQT_DATABASE", "postgres://reader:s3cr3t@db/inventory")
        .env("DBQT_DATABASE_TYPE", "postgres")
        .output()?;
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("postgres://db/inventory"));
    assert!(!stdout.contains("s3cr3t"));
    Ok(())
}
