//! CLI end-to-end tests
//!
//! Tests for the tablekit command-line interface. Every test runs in its own
//! temporary directory so no `tablekit.toml` from the working tree is picked up.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the tablekit binary, run inside `dir`
#[allow(deprecated)]
fn tablekit_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tablekit").unwrap();
    cmd.current_dir(dir).env_remove("RUST_LOG");
    cmd
}

fn database_url(dir: &Path) -> String {
    format!("sqlite:///{}", dir.join("blog.db").display())
}

#[test]
fn test_cli_no_args_shows_help() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("tablekit"))
        .stdout(predicate::str::contains("filter-posts"));
}

#[test]
fn test_cli_version_command() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tablekit"));
}

#[test]
fn test_cli_table_creates_lesson_database() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .arg("table")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created: users"))
        .stdout(predicate::str::contains("is_staff BOOLEAN NOT NULL DEFAULT 0"));
    assert!(dir.path().join("example-01.db").exists());

    // A second run finds the table in place
    tablekit_cmd(dir.path())
        .arg("table")
        .assert()
        .success()
        .stdout(predicate::str::contains("All tables already exist"));
}

#[test]
fn test_cli_classic_and_declarative() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .arg("classic")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mapped User -> users (id, username, is_staff)"));
    assert!(dir.path().join("example-02.db").exists());

    tablekit_cmd(dir.path())
        .arg("declarative")
        .assert()
        .success()
        .stdout(predicate::str::contains("DEFAULT ''"));
    assert!(dir.path().join("example-03.db").exists());
}

#[test]
fn test_cli_tour() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .args(["--database", &database_url(dir.path()), "tour"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added profile: Mark Two"))
        .stdout(predicate::str::contains(
            "admin with profile and posts User #1 username:admin None [Django lesson by #1]",
        ))
        .stdout(predicate::str::contains("his matched posts: Flask lesson by #2"))
        .stdout(predicate::str::contains("his matched posts: FastAPI lesson").not());
}

#[test]
fn test_cli_steps_share_a_database_file() {
    let dir = tempdir().unwrap();
    let url = database_url(dir.path());

    for step in ["init", "create-users", "add-profiles", "create-posts"] {
        tablekit_cmd(dir.path())
            .args(["--database", &url, step])
            .assert()
            .success();
    }

    tablekit_cmd(dir.path())
        .args(["--database", &url, "filter-profiles"])
        .assert()
        .success()
        .stdout(predicate::str::contains("marks: [User #2 username:mark]"))
        .stdout(predicate::str::contains("pure SQL:"));

    let output = tablekit_cmd(dir.path())
        .args(["--database", &url, "--json", "filter-posts"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let matches: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let matches = matches.as_array().unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0]["user"]["username"], "admin");
    assert_eq!(matches[0]["user"]["profile"], serde_json::Value::Null);
    assert_eq!(matches[1]["post"]["title"], "Flask lesson");
    assert_eq!(matches[1]["user"]["profile"]["first_name"], "Mark");
}

#[test]
fn test_cli_duplicate_users_fail() {
    let dir = tempdir().unwrap();
    let url = database_url(dir.path());

    tablekit_cmd(dir.path())
        .args(["--database", &url, "init"])
        .assert()
        .success();
    tablekit_cmd(dir.path())
        .args(["--database", &url, "create-users"])
        .assert()
        .success();
    tablekit_cmd(dir.path())
        .args(["--database", &url, "create-users"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to create users"));
}

#[test]
fn test_cli_show_users_before_init_fails() {
    let dir = tempdir().unwrap();
    tablekit_cmd(dir.path())
        .args(["--database", &database_url(dir.path()), "show-users"])
        .assert()
        .failure();
}

#[test]
fn test_cli_config_file_sets_data_dir() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("data");
    fs::create_dir(&data_dir).unwrap();
    let config_path = dir.path().join("custom.toml");
    fs::write(&config_path, "[lessons]\ndata_dir = \"data\"\n").unwrap();

    tablekit_cmd(dir.path())
        .args(["--config", config_path.to_str().unwrap(), "table"])
        .assert()
        .success();
    assert!(data_dir.join("example-01.db").exists());
}

#[test]
fn test_cli_validate_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("tablekit.toml");
    fs::write(
        &config_path,
        "[database]\nurl = \"sqlite:///blog.db\"\npool_size = 2\n",
    )
    .unwrap();

    tablekit_cmd(dir.path())
        .args(["validate", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Pool size: 2"));

    fs::write(&config_path, "[database]\npool_size = 0\n").unwrap();
    tablekit_cmd(dir.path())
        .args(["validate", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("pool_size"));
}

#[test]
fn test_cli_default_config_in_working_directory() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("tablekit.toml"),
        "[database]\nurl = \"sqlite:///picked-up.db\"\n",
    )
    .unwrap();

    tablekit_cmd(dir.path()).arg("init").assert().success();
    assert!(dir.path().join("picked-up.db").exists());
}
