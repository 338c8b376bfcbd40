#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn stackup() -> Command {
    let mut cmd = Command::cargo_bin("stackup").unwrap();
    cmd.env_remove("STACKUP_CONFIG").env("RUST_LOG", "off");
    cmd
}

fn write(path: &Path, content: &str) -> PathBuf {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
    path.to_path_buf()
}

/// A stack description rooting every layout directory inside `dir`.
fn stack_config(dir: &TempDir, extra: &str) -> PathBuf {
    let r = dir.path().display();
    write(
        &dir.path().join("stackup.yaml"),
        &format!(
            "layout:\n\
             \x20 src_dir: {r}/src\n\
             \x20 conf_dir: {r}/conf\n\
             \x20 data_dir: {r}/data\n\
             \x20 contest_dir: {r}/contest\n\
             \x20 web_dir: {r}/web\n\
             \x20 secret_dir: {r}/secret\n\
             \x20 supervisor_conf_dir: {r}/supervisor\n\
             handoff:\n\
             \x20 command: [\"/usr/bin/supervisord\", \"-n\"]\n\
             {extra}"
        ),
    )
}

// ---------------------------------------------------------------------------
// stackup inichange
// ---------------------------------------------------------------------------

#[test]
fn inichange_merges_to_stdout() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir.path().join("a.conf"), "[server]\nx = 1\ny = keep\n");
    let b = write(&dir.path().join("b.conf"), "# operator\n[server]\nx = 2\n");

    stackup()
        .arg("inichange")
        .arg(&a)
        .arg(&b)
        .args(["-s", "server.x=3", "-s", "extra.flag=on"])
        .assert()
        .success()
        .stdout("[server]\nx = 3\ny = keep\n\n[extra]\nflag = on\n\n");
}

#[test]
fn inichange_writes_private_output() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir.path().join("a.conf"), "[server]\nport = 7368\n");
    let out = dir.path().join("out/server.conf");

    stackup()
        .arg("inichange")
        .arg(&a)
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout("");

    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        "[server]\nport = 7368\n\n"
    );
    let mode = std::fs::metadata(&out).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn inichange_bad_override_exits_2_without_writing() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir.path().join("a.conf"), "[server]\nx = 1\n");
    let out = dir.path().join("out.conf");

    stackup()
        .arg("inichange")
        .arg(&a)
        .args(["-s", "serverx=3", "-o"])
        .arg(&out)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid override 'serverx=3'"));

    assert!(!out.exists());
}

#[test]
fn inichange_missing_source_exits_2() {
    let dir = TempDir::new().unwrap();
    stackup()
        .arg("inichange")
        .arg(dir.path().join("absent.conf"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("required file not found"));
}

#[test]
fn inichange_parse_error_names_line() {
    let dir = TempDir::new().unwrap();
    let a = write(&dir.path().join("a.conf"), "[server]\nx = 1\nnot a setting\n");
    stackup()
        .arg("inichange")
        .arg(&a)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("a.conf:3:"));
}

// ---------------------------------------------------------------------------
// stackup cache
// ---------------------------------------------------------------------------

#[test]
fn cache_list_on_fresh_volume() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "");

    stackup()
        .arg("--config")
        .arg(&config)
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No completed actions."));

    assert!(!dir.path().join("data/abacus/runcache.redb").exists());
}

#[test]
fn cache_list_table_shows_redacted_entries() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "");
    {
        let cache = stackup_core::cache::ActionCache::open(
            &dir.path().join("data/abacus/runcache.redb"),
        )
        .unwrap();
        let id = stackup_core::cache::ActionId::new("create_account")
            .arg("standings")
            .secret_arg("hunter2");
        cache.mark_done(&id).unwrap();
    }

    stackup()
        .env("STACKUP_CONFIG", &config)
        .args(["cache", "list"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("COMPLETED            ACTION\n"))
        .stdout(predicate::str::contains("create_account(standings, <redacted>)"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn cache_list_json_shows_entries() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "");
    {
        let cache = stackup_core::cache::ActionCache::open(
            &dir.path().join("data/abacus/runcache.redb"),
        )
        .unwrap();
        let id = stackup_core::cache::ActionId::new("create_account")
            .arg("standings")
            .secret_arg("hunter2");
        cache.mark_done(&id).unwrap();
    }

    let out = stackup()
        .env("STACKUP_CONFIG", &config)
        .args(["cache", "list", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("create_account(standings"));
    assert!(text.contains("completed_at"));
    assert!(!text.contains("hunter2"));
}

// ---------------------------------------------------------------------------
// stackup marker / server
// ---------------------------------------------------------------------------

#[test]
fn marker_without_certificates_fails() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "");

    stackup()
        .arg("--config")
        .arg(&config)
        .args(["marker", "--no-handoff"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no certificates found"));
}

#[test]
fn marker_provisions_and_prints_handoff() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "");
    std::fs::create_dir_all(dir.path().join("conf/abacus-certs")).unwrap();
    write(
        &dir.path().join("src/docker/marker.conf"),
        "[server]\naddress = localhost\n",
    );
    write(
        &dir.path().join("src/docker/marker-supervisord.conf"),
        "[program:markerd]\n",
    );

    stackup()
        .arg("--config")
        .arg(&config)
        .args(["marker", "--server", "judge.example.org", "--no-handoff"])
        .assert()
        .success()
        .stdout("/usr/bin/supervisord -n\n");

    let conf = std::fs::read_to_string(dir.path().join("data/abacus/marker.conf")).unwrap();
    assert!(conf.contains("address = judge.example.org"));
    assert!(dir
        .path()
        .join("supervisor/marker-supervisord.conf")
        .is_file());
}

#[test]
fn missing_config_file_exits_2() {
    let dir = TempDir::new().unwrap();
    stackup()
        .arg("--config")
        .arg(dir.path().join("nope.yaml"))
        .args(["server", "--no-handoff"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load stack configuration"));
}

#[test]
fn bad_stop_signal_exits_2() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "app_server:\n  stop_signal: SIGBOGUS\n");
    stackup()
        .arg("--config")
        .arg(&config)
        .args(["server", "--no-handoff"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown signal name"));
    assert!(!dir.path().join("data").exists());
}

#[test]
fn server_with_missing_sources_exits_2_and_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = stack_config(&dir, "");
    stackup()
        .arg("--config")
        .arg(&config)
        .args(["server", "--no-handoff"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("server.conf"));
    assert!(!dir.path().join("data").exists());
    assert!(!dir.path().join("conf").exists());
}

// ---------------------------------------------------------------------------
// stackup shell
// ---------------------------------------------------------------------------

#[test]
fn shell_execs_bash_with_args() {
    stackup()
        .args(["shell", "-c", "echo provisioned"])
        .assert()
        .success()
        .stdout("provisioned\n");
}
