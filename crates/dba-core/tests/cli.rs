//! CLI tests for dba.
//!
//! These tests verify help, version, argument errors, and startup failures
//! produce the documented exit codes, and that `--once` prints a report.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;

const DBA_VARS: &[&str] = &[
    "DBA_ADB_PATH",
    "DBA_MIN_PORT",
    "DBA_LIMIT_PORT",
    "DBA_PRINT_OUTPUT",
    "DBA_SLEEP_AFTER_CONNECT",
    "DBA_SLEEP_AFTER_LOOP",
    "DBA_EXCLUDE_PORT",
    "DBA_COMMAND_TIMEOUT",
    "DBA_LOG",
    "DBA_LOG_FORMAT",
    "DBA_LOG_TIMESTAMPS",
    "RUST_LOG",
];

/// Get a Command for the dba binary with a clean DBA_* environment.
fn dba() -> Command {
    let mut cmd = cargo_bin_cmd!("dba");
    for var in DBA_VARS {
        cmd.env_remove(var);
    }
    cmd
}

// ============================================================================
// Help and version
// ============================================================================

mod help {
    use super::*;

    #[test]
    fn help_exits_with_args_error() {
        dba()
            .arg("--help")
            .assert()
            .code(10)
            .stderr(predicate::str::contains("Usage"))
            .stderr(predicate::str::contains("--min-port"))
            .stderr(predicate::str::contains("--sleep-after-connect"));
    }

    #[test]
    fn help_with_value_is_accepted() {
        dba().arg("--help=1").assert().code(10);
        dba().arg("-h").assert().code(10);
    }

    #[test]
    fn help_wins_over_other_flags() {
        dba()
            .args(["--min-port", "6000", "--help"])
            .assert()
            .code(10)
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn version_flag_works() {
        dba()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("dba"));
    }
}

// ============================================================================
// Argument errors
// ============================================================================

mod args {
    use super::*;

    #[test]
    fn unknown_flag() {
        dba()
            .arg("--definitely-not-a-flag")
            .assert()
            .code(10)
            .stderr(predicate::str::contains("unexpected argument"));
    }

    #[test]
    fn port_out_of_range() {
        dba().args(["--min-port", "70000"]).assert().code(10);
        dba().args(["--min_port=-1"]).assert().code(10);
    }

    #[test]
    fn non_numeric_delay() {
        dba()
            .args(["--sleep-after-loop", "soon"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("sleep-after-loop"));
    }

    #[test]
    fn bad_toggle_value() {
        dba().args(["--limit-port=maybe"]).assert().code(10);
    }

    #[test]
    fn bad_log_format() {
        dba()
            .args(["--log-format", "xml"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("invalid value 'xml'"));
    }

    #[test]
    fn env_value_is_validated() {
        dba().env("DBA_MIN_PORT", "not-a-port").assert().code(10);
    }
}

// ============================================================================
// Startup
// ============================================================================

mod startup {
    use super::*;

    #[test]
    fn missing_bridge_is_capability_error() {
        dba()
            .args(["--adb-path", "definitely-not-an-adb-binary-7731", "--once"])
            .assert()
            .code(11)
            .stderr(predicate::str::contains("Missing Capability"))
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn empty_bridge_path_is_args_error() {
        dba().args(["--adb-path", ""]).assert().code(10);
    }
}

// ============================================================================
// Single cycle
// ============================================================================

#[cfg(unix)]
mod once {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn fake_adb(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dba-cli-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("adb");
        let script = r#"#!/bin/sh
case "$1" in
  devices) printf 'List of devices attached\nemulator-5554          offline transport_id:2\n' ;;
  *) exit 0 ;;
esac
"#;
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn once_prints_json_report() {
        let adb = fake_adb("report");
        let output = dba()
            .args(["--once", "--sleep-after-connect", "0", "--adb-path"])
            .arg(&adb)
            .output()
            .unwrap();

        // The socket table tool may be missing in minimal environments; the
        // cycle then fails but still reports.
        let code = output.status.code().unwrap();
        assert!(code == 0 || code == 3, "unexpected exit code {code}");

        let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(report["cycle"], 1);
        assert!(report["started_at"].is_string());
        if code == 0 {
            assert_eq!(report["disconnected"][0], "emulator-5554");
        } else {
            assert!(report["failure"]["phase"].is_string());
        }
    }

    #[test]
    fn print_output_beats_rust_log() {
        let adb = fake_adb("verbose");
        dba()
            .env("RUST_LOG", "error")
            .args(["--once", "--sleep-after-connect", "0", "--log-format", "jsonl"])
            .args(["--print-output=1", "--adb-path"])
            .arg(&adb)
            .assert()
            .stderr(predicate::str::contains("\"level\":\"DEBUG\""));
    }

    #[test]
    fn rust_log_alone_sets_the_level() {
        let adb = fake_adb("quiet");
        dba()
            .env("RUST_LOG", "error")
            .args(["--once", "--sleep-after-connect", "0", "--log-format", "jsonl"])
            .arg("--adb-path")
            .arg(&adb)
            .assert()
            .stderr(predicate::str::contains("\"level\":\"DEBUG\"").not())
            .stderr(predicate::str::contains("\"level\":\"INFO\"").not());
    }

    #[test]
    fn jsonl_logs_go_to_stderr() {
        let adb = fake_adb("jsonl");
        dba()
            .args(["--once", "--sleep-after-connect", "0", "--log-format", "jsonl"])
            .args(["--print-output", "1", "--adb-path"])
            .arg(&adb)
            .assert()
            .stderr(predicate::str::contains("\"level\":"))
            .stdout(predicate::str::starts_with("{"));
    }
}
