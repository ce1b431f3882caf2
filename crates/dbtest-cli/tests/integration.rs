#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// Settings that never read the user's connection-config files and keep
/// settle delays short.
const BASE_SETTINGS: &str = "\
provision:
  config_files: []
local:
  step_settle_delay_ms: 10
  mysql_settle_delay_ms: 10
  shutdown_timeout_ms: 500
";

fn write_settings(dir: &TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("dbtest.yaml");
    std::fs::write(&path, format!("{BASE_SETTINGS}{extra}")).unwrap();
    path
}

fn dbtest(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dbtest").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("DBTEST_CONFIG")
        .env_remove("DBTEST_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

// ---------------------------------------------------------------------------
// dbtest name
// ---------------------------------------------------------------------------

#[test]
fn name_uses_defaults() {
    let dir = TempDir::new().unwrap();
    dbtest(&dir)
        .arg("name")
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^dbtestutil_[0-9a-f]{8}_test\n$").unwrap());
}

#[test]
fn name_honours_parts() {
    let dir = TempDir::new().unwrap();
    dbtest(&dir)
        .args(["name", "--stem", "orders", "--suffix", "it", "--separator", "-"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"^orders-[0-9a-f]{8}-it\n$").unwrap());
}

#[test]
fn name_json() {
    let dir = TempDir::new().unwrap();
    let out = dbtest(&dir).args(["name", "--json"]).output().unwrap();
    assert!(out.status.success());

    let value: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    let name = value["name"].as_str().unwrap();
    assert!(name.starts_with("dbtestutil_"));
    assert!(name.ends_with("_test"));
}

#[test]
fn names_are_unique() {
    let dir = TempDir::new().unwrap();
    let a = dbtest(&dir).arg("name").output().unwrap().stdout;
    let b = dbtest(&dir).arg("name").output().unwrap().stdout;
    assert_ne!(a, b);
}

// ---------------------------------------------------------------------------
// dbtest create / drop (preflight failures need no server)
// ---------------------------------------------------------------------------

#[test]
fn create_rejects_missing_suffix() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(&dir, "");
    dbtest(&dir)
        .arg("--config")
        .arg(&settings)
        .args(["create", "--database", "production", "--host", "192.0.2.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DBTESTUTIL_DATABASE_MISSING_SUFFIX"))
        .stderr(predicate::str::contains("production"));
}

#[test]
fn create_rejects_blacklisted_host() {
    let dir = TempDir::new().unwrap();
    let settings = dir.path().join("dbtest.yaml");
    std::fs::write(
        &settings,
        "provision:\n  config_files: []\n  host_blacklist:\n    - db.prod.internal\n",
    )
    .unwrap();

    dbtest(&dir)
        .arg("--config")
        .arg(&settings)
        .args(["create", "-d", "app_1234abcd_test", "--host", "db.prod.internal"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DBTESTUTIL_HOST_BLACKLISTED"));
}

#[test]
fn drop_applies_the_same_checks() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(&dir, "");
    dbtest(&dir)
        .env("DBTEST_CONFIG", &settings)
        .args(["drop", "--database", "customers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DBTESTUTIL_DATABASE_MISSING_SUFFIX"));
}

#[test]
fn create_rejects_bad_self_destruct() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(&dir, "");
    dbtest(&dir)
        .arg("--config")
        .arg(&settings)
        .args([
            "create",
            "-d",
            "app_1234abcd_test",
            "--host",
            "192.0.2.1",
            "--self-destruct",
            "six hours",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DBTESTUTIL_INVALID_DURATION"));
}

#[test]
fn self_destruct_flags_conflict() {
    let dir = TempDir::new().unwrap();
    dbtest(&dir)
        .args([
            "create",
            "-d",
            "app_test",
            "--self-destruct",
            "PT1H",
            "--no-self-destruct",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn create_requires_database() {
    let dir = TempDir::new().unwrap();
    dbtest(&dir)
        .arg("create")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--database"));
}

// ---------------------------------------------------------------------------
// settings file
// ---------------------------------------------------------------------------

#[test]
fn malformed_settings_are_reported() {
    let dir = TempDir::new().unwrap();
    let settings = dir.path().join("broken.yaml");
    std::fs::write(&settings, "provision: [not, a, map]\n").unwrap();

    dbtest(&dir)
        .arg("--config")
        .arg(&settings)
        .arg("name")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DBTESTUTIL_CONFIG"));
}

// ---------------------------------------------------------------------------
// dbtest local
// ---------------------------------------------------------------------------

#[test]
fn local_up_fails_without_server_binaries() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(
        &dir,
        "  mysqld: no-such-mysqld\n  \
         mysql_install_db: no-such-mysql_install_db\n  \
         mysql_tzinfo_to_sql: no-such-tzinfo\n  \
         mysql: no-such-mysql\n  \
         mysqladmin: no-such-mysqladmin\n  \
         mysql_data_dir: ./mysql-local\n",
    );

    dbtest(&dir)
        .arg("--config")
        .arg(&settings)
        .args(["local", "up"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("DBTESTUTIL_BINARY_NOT_FOUND"));

    assert!(!dir.path().join("mysql-local").exists());
}

#[test]
fn local_down_without_instance_succeeds() {
    let dir = TempDir::new().unwrap();
    let settings = write_settings(
        &dir,
        "  mysqladmin: no-such-mysqladmin\n  mysql_data_dir: ./mysql-local\n",
    );

    dbtest(&dir)
        .arg("--config")
        .arg(&settings)
        .args(["local", "down"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped"));
}
