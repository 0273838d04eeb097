//! Integration tests for the command-line surface.
// The cargo_bin function is marked deprecated in favor of cargo_bin! macro,
// but both work correctly.
#![allow(deprecated)]

mod common;

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use common::{fixtures, Version};

fn cmd() -> Command {
    let mut cmd = Command::new(cargo_bin("dep-checkr"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn write_module(dir: &Path, name: &str, version: Version, refs: &[(&str, Version)]) {
    fs::write(
        dir.join(format!("{}.dll", name)),
        fixtures::image(name, version, refs),
    )
    .unwrap();
}

#[test]
fn cli_shows_help() -> Result<(), Box<dyn std::error::Error>> {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--ambient-path"));
    Ok(())
}

#[test]
fn cli_rejects_missing_directory() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    cmd()
        .arg(temp.path().join("does-not-exist"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Path not valid"));
    Ok(())
}

#[test]
fn cli_rejects_file_path() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let file = temp.path().join("App.dll");
    fs::write(&file, b"")?;
    cmd().arg(&file).assert().code(1);
    Ok(())
}

#[test]
fn cli_empty_directory_is_clean() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    fs::write(temp.path().join("readme.txt"), b"nothing here")?;
    cmd()
        .arg(temp.path())
        .arg("--no-ambient")
        .assert()
        .success()
        .stdout(predicate::str::contains("No files to inspect."));
    Ok(())
}

#[test]
fn cli_unreadable_module_is_skipped_not_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    fs::write(temp.path().join("Broken.dll"), b"not a PE image")?;
    cmd()
        .arg(temp.path())
        .args(["--no-ambient", "--report", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"issue_count\": 0"))
        .stdout(predicate::str::contains("Broken.dll"));
    Ok(())
}

#[test]
fn cli_reads_local_config() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let cfg_dir = temp.path().join(".dep-checkr");
    fs::create_dir_all(&cfg_dir)?;
    fs::write(cfg_dir.join("config.toml"), "[scan]\nextensions = [\"exe\"]\n")?;
    fs::write(temp.path().join("Broken.dll"), b"ignored, wrong extension")?;
    cmd()
        .arg(temp.path())
        .arg("--no-ambient")
        .assert()
        .success()
        .stdout(predicate::str::contains("No files to inspect."));
    Ok(())
}

#[test]
fn cli_bad_config_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let cfg = temp.path().join("bad.toml");
    fs::write(&cfg, "[scan\n")?;
    cmd()
        .arg(temp.path())
        .arg("--config")
        .arg(&cfg)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config"));
    Ok(())
}

#[test]
fn cli_exit_code_is_one_per_missing_module() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let v1 = Version::new(1, 0, 0, 0);
    write_module(temp.path(), "App", v1, &[("Missing", v1)]);
    write_module(temp.path(), "Tool", v1, &[("Missing", v1)]);
    cmd()
        .arg(temp.path())
        .arg("--no-ambient")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Could not locate"))
        .stdout(predicate::str::contains("Missing"));
    Ok(())
}

#[test]
fn cli_exit_code_counts_distinct_missing_modules() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let v1 = Version::new(1, 0, 0, 0);
    write_module(temp.path(), "App", v1, &[("Missing", v1), ("Gone", v1)]);
    cmd()
        .arg(temp.path())
        .args(["--no-ambient", "--report", "json"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"issue_count\": 2"));
    Ok(())
}

#[test]
fn cli_version_mismatch_is_an_issue() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    write_module(
        temp.path(),
        "App",
        Version::new(1, 0, 0, 0),
        &[("Core", Version::new(2, 0, 0, 0))],
    );
    write_module(temp.path(), "Core", Version::new(2, 1, 0, 0), &[]);
    cmd()
        .arg(temp.path())
        .arg("--no-ambient")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Could not locate"));
    Ok(())
}

#[test]
fn cli_ambient_redirect_is_reported_but_clean() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    let runtime = TempDir::new()?;
    write_module(
        temp.path(),
        "App",
        Version::new(1, 0, 0, 0),
        &[("Util", Version::new(1, 5, 0, 0))],
    );
    write_module(runtime.path(), "Util", Version::new(1, 7, 0, 0), &[]);

    let cfg = temp.path().join("runtime.toml");
    fs::write(&cfg, "[ambient]\ndiscover_runtime = false\n")?;
    cmd()
        .arg(temp.path())
        .arg("--config")
        .arg(&cfg)
        .arg("--ambient-path")
        .arg(runtime.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Loaded via redirect"))
        .stdout(predicate::str::contains("Util"));
    Ok(())
}
