// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Integration Test for the ringlogd binary.

use crate::tests::{read_lines, temp_log};
use anyhow::Result;
use std::process::Command;

const BIN: &str = env!("CARGO_BIN_EXE_ringlogd");

/// **Passing Test:** `check-config` accepts a valid JSON5 file.
#[test]
#[cfg_attr(tarpaulin, ignore)]
fn test_check_config_valid() -> Result<()> {
    let (dir, log_path) = temp_log("cli.log");
    let config_path = dir.path().join("ringlog.json5");
    std::fs::write(
        &config_path,
        format!(
            "{{\n  // comment\n  log: {{ path: {:?}, }},\n  dispatcher: {{ workers: 2 }},\n}}\n",
            log_path
        ),
    )?;

    let output = Command::new(BIN)
        .arg("check-config")
        .arg(&config_path)
        .output()?;
    assert!(output.status.success(), "{:?}", output);
    assert!(String::from_utf8_lossy(&output.stdout).contains(": ok"));
    Ok(())
}

/// **Passing Test:** `check-config` rejects an invalid file with a non-zero exit.
#[test]
#[cfg_attr(tarpaulin, ignore)]
fn test_check_config_invalid() -> Result<()> {
    let (dir, _log_path) = temp_log("unused.log");
    let config_path = dir.path().join("bad.json5");
    std::fs::write(&config_path, "{ dispatcher: { workers: 0 } }")?;

    let output = Command::new(BIN)
        .arg("check-config")
        .arg(&config_path)
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("at least one worker"));
    Ok(())
}

/// **Passing Test:** `run` pushes demo jobs through the dispatcher into the log file.
#[test]
#[cfg_attr(tarpaulin, ignore)]
fn test_run_writes_log() -> Result<()> {
    let (dir, log_path) = temp_log("run.log");
    let config_path = dir.path().join("run.json5");
    std::fs::write(
        &config_path,
        format!("{{ log: {{ path: {:?} }}, dispatcher: {{ workers: 2 }} }}", log_path),
    )?;

    let output = Command::new(BIN)
        .arg("run")
        .arg("--config")
        .arg(&config_path)
        .arg("--jobs")
        .arg("8")
        .output()?;
    assert!(output.status.success(), "{:?}", output);

    let lines = read_lines(&log_path);
    assert_eq!(lines[0], "ringlogd starting, 8 demo jobs");
    assert_eq!(lines.iter().filter(|l| l.starts_with("job ")).count(), 8);
    assert!(lines
        .iter()
        .any(|l| l == "6 category jobs ran on the main thread"));
    Ok(())
}
