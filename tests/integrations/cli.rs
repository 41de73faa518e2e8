use assert_cmd::Command;
use predicates::prelude::*;

fn monitor() -> Command {
    let mut cmd = Command::cargo_bin("dns-latency-monitor").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn check_accepts_valid_flags() {
    monitor()
        .args(["--check", "-n", "198.51.100.1", "-d", "example.test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"));
}

#[test]
fn missing_targets_exit_with_status_one() {
    monitor()
        .arg("--check")
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Config error: At least 1 nameserver must be configured.",
        ))
        .stderr(predicate::str::contains(
            "Config error: At least 1 domain must be configured.",
        ));
}

#[test]
fn every_bad_value_is_reported() {
    monitor()
        .args([
            "--check",
            "-n",
            "dns.example",
            "-d",
            "bad_name.test",
            "--timeout",
            "0",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Invalid nameserver 'dns.example', expecting valid IP or IP:port",
        ))
        .stderr(predicate::str::contains(
            "Invalid domain 'bad_name.test', expecting valid DNS name",
        ))
        .stderr(predicate::str::contains(
            "SecondsBeforeTimeout must be 1 or higher",
        ));
}

#[test]
fn unreadable_config_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "nameservers = 42").unwrap();
    monitor()
        .args(["--check", "--config", path.to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Config error:"));
}
