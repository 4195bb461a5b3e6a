//! End-to-end tests running the `lt` binary against a temporary home.

use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use chrono::{Duration, Utc};
use tempfile::TempDir;

fn lt_binary() -> String {
    env!("CARGO_BIN_EXE_lt").to_string()
}

fn lt(home: &Path) -> Command {
    let mut command = Command::new(lt_binary());
    command
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env("LT_DATABASE_PATH", home.join("lt.db"))
        .env_remove("RUST_LOG");
    command
}

/// Runs `lt run` with the given signal lines on stdin until EOF.
fn run_monitor(home: &Path, lines: &[&str]) -> Output {
    let mut child = lt(home)
        .arg("run")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn lt run");
    {
        let mut stdin = child.stdin.take().unwrap();
        for line in lines {
            writeln!(stdin, "{line}").unwrap();
        }
    }
    let output = child.wait_with_output().unwrap();
    assert!(
        output.status.success(),
        "lt run should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn stdout_lines(output: &Output) -> Vec<serde_json::Value> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| serde_json::from_str(line).expect("payload line should be JSON"))
        .collect()
}

fn success(command: &mut Command) -> Output {
    let output = command.output().unwrap();
    assert!(
        output.status.success(),
        "command should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

/// A session open at EOF is closed and printed before the monitor exits.
#[test]
fn test_run_closes_open_session_on_eof() {
    let temp = TempDir::new().unwrap();

    let output = run_monitor(
        temp.path(),
        &[
            r#"{"signal":"connection","connected":true}"#,
            r#"{"signal":"volume","level":7,"max":15}"#,
            r#"{"signal":"playback","active":true}"#,
        ],
    );

    let payloads = stdout_lines(&output);
    assert_eq!(payloads.len(), 1, "exactly one session should be emitted");
    let avg = payloads[0]["avgVolume"].as_f64().unwrap();
    assert!((avg - 46.67).abs() < 0.01, "unexpected average {avg}");
    assert!(payloads[0]["duration"].as_u64().unwrap() >= 1);
    assert!(payloads[0].get("isEstimated").is_none());

    let listed = success(lt(temp.path()).args(["sessions", "--json"]));
    assert_eq!(stdout_lines(&listed).len(), 1);
}

/// Nothing is emitted when the tracking predicate never held.
#[test]
fn test_run_without_playback_emits_nothing() {
    let temp = TempDir::new().unwrap();

    let output = run_monitor(
        temp.path(),
        &[
            r#"{"signal":"connection","connected":true}"#,
            r#"{"signal":"volume","level":0,"max":15}"#,
            r#"{"signal":"playback","active":true}"#,
        ],
    );

    assert!(stdout_lines(&output).is_empty());
}

/// Usage events recorded while the monitor was down are recovered once.
#[test]
fn test_backfill_recovers_missed_session() {
    let temp = TempDir::new().unwrap();

    // Leave the accessory connected when the monitor stops
    run_monitor(temp.path(), &[r#"{"signal":"connection","connected":true}"#]);

    let start = Utc::now() - Duration::hours(1);
    let end = start + Duration::seconds(45);
    success(lt(temp.path()).args([
        "usage",
        "add",
        "--package",
        "com.spotify.music",
        "--kind",
        "enter",
        "--at",
        &start.to_rfc3339(),
    ]));
    success(lt(temp.path()).args([
        "usage",
        "add",
        "--package",
        "com.spotify.music",
        "--kind",
        "exit",
        "--at",
        &end.to_rfc3339(),
    ]));

    let dry_run = success(lt(temp.path()).args(["backfill", "--dry-run"]));
    let planned = stdout_lines(&dry_run);
    assert_eq!(planned.len(), 1);
    assert_eq!(planned[0]["duration"], 45);
    assert_eq!(planned[0]["isEstimated"], true);
    assert_eq!(planned[0]["avgVolume"], 50.0);

    let listed = success(lt(temp.path()).args(["sessions", "--json"]));
    assert!(stdout_lines(&listed).is_empty(), "dry run must not store");

    let first = success(lt(temp.path()).arg("backfill"));
    assert_eq!(stdout_lines(&first).len(), 1);
    let second = success(lt(temp.path()).arg("backfill"));
    assert!(stdout_lines(&second).is_empty(), "second pass must not duplicate");

    let listed = success(lt(temp.path()).args(["sessions", "--json"]));
    assert_eq!(stdout_lines(&listed).len(), 1);
}

/// A disconnected accessory at shutdown means there is nothing to recover.
#[test]
fn test_backfill_skips_when_disconnected() {
    let temp = TempDir::new().unwrap();

    let start = Utc::now() - Duration::hours(1);
    success(lt(temp.path()).args([
        "usage",
        "add",
        "--package",
        "com.spotify.music",
        "--kind",
        "enter",
        "--at",
        &start.to_rfc3339(),
    ]));

    let output = success(lt(temp.path()).arg("backfill"));
    assert!(stdout_lines(&output).is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no accessory was connected"));
}
