//! Integration tests for the `powerctl` binary.
//!
//! These tests exercise the CLI binary via `assert_cmd`, each against its
//! own config file and profiles directory.

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn cli() -> assert_cmd::Command {
    cargo_bin_cmd!("powerctl")
}

/// Write a config with one TDP setting and a private profiles directory.
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    let profiles = dir.join("profiles");
    let toml = format!(
        r#"
profiles_dir = "{}"
foreground_command = ""

[[settings]]
name = "TDP"
values = ["5W", "10W", "15W"]

[[settings]]
name = "Refresh Rate"
values = [40, 60]
"#,
        profiles.display().to_string().replace('\\', "\\\\")
    );
    std::fs::write(&path, toml).unwrap();
    path
}

#[test]
fn cli_help_succeeds() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("powerctl"));
}

#[test]
fn cli_version_prints_version() {
    cli()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn cli_config_json_produces_valid_json() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = cli()
        .args(["--json", "config", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value =
        serde_json::from_slice(&output).expect("config --json should produce valid JSON");
    assert!(json["settings"].is_object());
    assert_eq!(json["config_file_exists"], true);
    assert_eq!(json["settings"]["settings"][0]["name"], "TDP");
}

// ── --verbose flag ──

#[test]
fn cli_verbose_flag_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cli().args(["-v", "config", "--config"]).arg(&config).assert().success();
}

#[test]
fn cli_verbose_long_flag_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cli()
        .args(["--verbose", "config", "--config"])
        .arg(&config)
        .assert()
        .success();
}

// ── Subcommands ──

#[test]
fn cli_status_lists_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cli()
        .args(["status", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("TDP:"))
        .stdout(predicate::str::contains("PowerControl.Autostart"));
}

#[test]
fn cli_status_json_has_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let output = cli()
        .args(["--json", "status", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["engine"]["profile"], "PowerControl.Autostart");
    assert_eq!(json["engine"]["settings"][1]["name"], "Refresh Rate");
}

#[test]
fn cli_profiles_empty() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cli()
        .args(["profiles", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("No profiles stored."));
}

#[test]
fn cli_profile_set_show_delete_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    cli()
        .args(["profile", "set", "TDP", "10W", "--process", "game.exe", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("TDP = 10W"));

    let output = cli()
        .args(["--json", "profile", "show", "--process", "game.exe", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["name"], "PowerControl.Process.game.exe");
    assert_eq!(json["exists"], true);
    assert_eq!(json["values"]["TDP"], "10W");

    cli()
        .args(["profiles", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("PowerControl.Process.game.exe"));

    cli()
        .args(["profile", "delete", "--process", "game.exe", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Deleted"));

    cli()
        .args(["profile", "show", "--process", "game.exe", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("profile does not exist"));
}

#[test]
fn cli_profile_set_keeps_configured_integer_kind() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cli()
        .args(["profile", "set", "Refresh Rate", "60", "--config"])
        .arg(&config)
        .assert()
        .success();

    let output = cli()
        .args(["--json", "profile", "show", "--config"])
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["name"], "PowerControl.Autostart");
    assert_eq!(json["values"]["Refresh Rate"], 60);
}

#[test]
fn cli_docked_requires_process() {
    cli()
        .args(["profile", "show", "--docked"])
        .assert()
        .failure();
}

#[test]
fn cli_run_interactive_reads_commands() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    cli()
        .args(["run", "--interactive", "--config"])
        .arg(&config)
        .write_stdin("set TDP 15W\nstatus\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("Profile: PowerControl.Autostart"))
        .stdout(predicate::str::contains("TDP"))
        .stdout(predicate::str::contains("Stopped."));
}

#[test]
fn cli_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "poll_interval_ms = 0\n[[settings]]\nname = \"TDP\"\nvalues = [\"5W\"]\n",
    )
    .unwrap();
    cli()
        .args(["status", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn cli_config_init_writes_default_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    cli()
        .args(["config", "--init", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("(loaded)"));
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("poll_interval_ms = 1000"));
}
