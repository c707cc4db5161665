//! Drives the `warden` binary end to end.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::io::Write;
use std::process::{Command, Output};

fn warden(args: &[&str], envs: &[(&str, &str)]) -> std::io::Result<Output> {
    let mut command = Command::new(env!("CARGO_BIN_EXE_warden"));
    command.args(args).env("RUST_LOG", "warn");
    for (key, value) in envs {
        command.env(key, value);
    }
    command.output()
}

fn stdout_json(output: &Output) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    Ok(serde_json::from_slice(&output.stdout)?)
}

#[test]
fn test_config_prints_file_and_env_overrides() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        "[failover]\ncooldown_minutes = 30\n\n[reconciliation]\nauto_heal_enabled = false"
    )?;
    let path = file.path().to_string_lossy().to_string();

    let output = warden(
        &["--config", &path, "config"],
        &[("WARDEN_FAILOVER_MAX_CONSECUTIVE_FAILURES", "5")],
    )?;

    assert!(output.status.success(), "config command failed: {output:?}");
    let config = stdout_json(&output)?;
    assert_eq!(config["failover"]["cooldown_minutes"], 30);
    assert_eq!(config["failover"]["max_consecutive_failures"], 5);
    assert_eq!(config["failover"]["heartbeat_timeout_minutes"], 10);
    assert_eq!(config["reconciliation"]["auto_heal_enabled"], false);
    Ok(())
}

#[test]
fn test_invalid_config_halts_with_error() -> Result<(), Box<dyn std::error::Error>> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "[failover]\nmax_consecutive_failures = 0")?;
    let path = file.path().to_string_lossy().to_string();

    let output = warden(&["--config", &path, "config"], &[])?;

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Configuration could not be loaded"));
    Ok(())
}

#[test]
fn test_simulate_recovers_broken_devices() -> Result<(), Box<dyn std::error::Error>> {
    let output = warden(&["simulate", "--devices", "5", "--cycles", "1"], &[])?;

    assert!(output.status.success(), "simulate failed: {output:?}");
    let summary = stdout_json(&output)?;

    let cycle = &summary["cycles"][0];
    // status mismatch, missing container, orphan
    assert_eq!(cycle["consistency"]["detected"], 3);
    assert_eq!(cycle["consistency"]["healed"], 3);
    // unhealthy, error (missing container), stale heartbeat
    assert_eq!(cycle["failover"]["failures_detected"], 3);
    assert_eq!(cycle["failover"]["recovered"], 3);

    assert_eq!(summary["failover"]["totalMigrations"], 3);
    assert_eq!(summary["failover"]["successfulMigrations"], 3);
    assert_eq!(summary["deviceStatuses"]["running"], 4);
    assert_eq!(summary["deviceStatuses"]["stopped"], 1);
    Ok(())
}
