//! Black-box CLI coverage for subcommands that don't need a live
//! coordinator or local PostgreSQL instance: `config get|set` and the
//! `show` variants backed purely by `<name>.cfg`/on-disk paths.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::predicate;

fn write_sample_cfg(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
    let pgdata = dir.join("data");
    fs::create_dir_all(&pgdata).unwrap();
    let cfg_path = dir.join(format!("{name}.cfg"));
    fs::write(
        &cfg_path,
        format!(
            "[node]\n\
             name = {name}\n\
             hostname = node1.internal\n\
             pgdata = {pgdata}\n\
             pgport = 5432\n\
             monitor = postgres://monitor.internal:5432/pg_auto_failover\n",
            pgdata = pgdata.display()
        ),
    )
    .unwrap();
    cfg_path
}

#[test]
fn config_get_prints_a_known_key() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = write_sample_cfg(dir.path(), "node1");

    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("--pgdata")
        .arg(cfg_path.parent().unwrap().join("data"))
        .arg("--name")
        .arg("node1")
        .arg("config")
        .arg("get")
        .arg("node.hostname")
        .assert()
        .success()
        .stdout(predicate::str::contains("node1.internal"));
}

#[test]
fn config_get_rejects_unknown_key() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_cfg(dir.path(), "node1");

    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("--pgdata")
        .arg(dir.path().join("data"))
        .arg("--name")
        .arg("node1")
        .arg("config")
        .arg("get")
        .arg("node.bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown key"));
}

#[test]
fn config_set_persists_to_the_cfg_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg_path = write_sample_cfg(dir.path(), "node1");

    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("--pgdata")
        .arg(dir.path().join("data"))
        .arg("--name")
        .arg("node1")
        .arg("config")
        .arg("set")
        .arg("node.hostname")
        .arg("node2.internal")
        .assert()
        .success();

    let rendered = fs::read_to_string(&cfg_path).unwrap();
    assert!(rendered.contains("node2.internal"));
}

#[test]
fn config_set_rejects_a_malformed_port() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_cfg(dir.path(), "node1");

    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("--pgdata")
        .arg(dir.path().join("data"))
        .arg("--name")
        .arg("node1")
        .arg("config")
        .arg("set")
        .arg("node.pgport")
        .arg("not-a-port")
        .assert()
        .failure();
}

#[test]
fn show_file_prints_the_state_file_path() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_cfg(dir.path(), "node1");

    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("--pgdata")
        .arg(dir.path().join("data"))
        .arg("--name")
        .arg("node1")
        .arg("show")
        .arg("file")
        .assert()
        .success()
        .stdout(predicate::str::contains("node1.state"));
}

#[test]
fn show_uri_prints_the_configured_monitor() {
    let dir = tempfile::tempdir().unwrap();
    write_sample_cfg(dir.path(), "node1");

    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("--pgdata")
        .arg(dir.path().join("data"))
        .arg("--name")
        .arg("node1")
        .arg("show")
        .arg("uri")
        .assert()
        .success()
        .stdout(predicate::str::contains("postgres://monitor.internal"));
}

#[test]
fn missing_pgdata_is_a_bad_args_failure() {
    Command::cargo_bin("pg_autoctl")
        .unwrap()
        .arg("show")
        .arg("file")
        .assert()
        .failure();
}
