use clap::Parser;
use dns_latency_monitor::cli::Cli;
use dns_latency_monitor::config::{Config, ConfigError, DEFAULT_CONFIG_FILE};
use serial_test::serial;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{Builder, NamedTempFile};

/// A helper function to run a test with a temporary config file.
fn with_config_file<F>(content: &str, suffix: &str, test_fn: F)
where
    F: FnOnce(PathBuf),
{
    let mut file: NamedTempFile = Builder::new().suffix(suffix).tempfile().unwrap();
    write!(file, "{}", content).unwrap();
    test_fn(file.path().to_path_buf());
}

fn load(args: &[&str]) -> Result<Config, ConfigError> {
    let mut argv = vec!["dns-latency-monitor"];
    argv.extend_from_slice(args);
    Config::load(&Cli::try_parse_from(argv).unwrap())
}

#[test]
#[serial]
fn toml_file_is_loaded() {
    let toml = r#"
        nameservers = ["198.51.100.1", "198.51.100.2:5353"]
        domains = ["example.test", "example.org"]
        seconds_between_tests = 10
        seconds_before_timeout = 3
        log_level = "debug"
        log_file_folder = "/var/log/dns-latency"

        [metrics]
        enabled = true
        listen_address = "0.0.0.0:9200"
    "#;

    with_config_file(toml, ".toml", |path| {
        let config = load(&["--config", path.to_str().unwrap()]).unwrap();
        assert_eq!(config.nameservers, vec!["198.51.100.1", "198.51.100.2:5353"]);
        assert_eq!(config.domains, vec!["example.test", "example.org"]);
        assert_eq!(config.seconds_between_tests, 10);
        assert_eq!(config.seconds_before_timeout, 3);
        assert_eq!(config.log_level, "debug");
        assert_eq!(
            config.log_file_folder,
            Some(PathBuf::from("/var/log/dns-latency"))
        );
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen_address, "0.0.0.0:9200".parse().unwrap());
        assert!(config.validate().is_empty());
    });
}

#[test]
#[serial]
fn json_file_is_loaded() {
    let json = r#"{
        "nameservers": ["2001:db8::1"],
        "domains": ["example.test"],
        "seconds_before_timeout": 4
    }"#;

    with_config_file(json, ".json", |path| {
        let config = load(&["--config", path.to_str().unwrap()]).unwrap();
        assert_eq!(config.nameservers, vec!["2001:db8::1"]);
        assert_eq!(config.seconds_before_timeout, 4);
        assert_eq!(config.seconds_between_tests, 5);
    });
}

#[test]
#[serial]
fn pascal_and_camel_case_json_keys_are_recognised() {
    let json = r#"{
        "Nameservers": ["198.51.100.1", "198.51.100.2"],
        "Domains": ["example.test"],
        "SecondsBetweenTests": 60,
        "secondsBeforeTimeout": 3,
        "AppInsightsConnectionString": null,
        "fileLogFolder": "/var/log/dns-latency"
    }"#;

    with_config_file(json, ".json", |path| {
        let config = load(&["--config", path.to_str().unwrap()]).unwrap();
        assert_eq!(config.nameservers, vec!["198.51.100.1", "198.51.100.2"]);
        assert_eq!(config.domains, vec!["example.test"]);
        assert_eq!(config.seconds_between_tests, 60);
        assert_eq!(config.seconds_before_timeout, 3);
        assert_eq!(
            config.log_file_folder,
            Some(PathBuf::from("/var/log/dns-latency"))
        );
        assert!(config.validate().is_empty());
    });
}

#[test]
#[serial]
fn config_json_in_working_directory_is_used_without_flag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(DEFAULT_CONFIG_FILE),
        r#"{"Nameservers": ["198.51.100.7"], "Domains": ["example.test"], "SecondsBeforeTimeout": 4}"#,
    )
    .unwrap();

    let original = std::env::current_dir().unwrap();
    std::env::set_current_dir(dir.path()).unwrap();
    let loaded = load(&[]);
    std::env::set_current_dir(original).unwrap();

    let config = loaded.unwrap();
    assert_eq!(config.nameservers, vec!["198.51.100.7"]);
    assert_eq!(config.seconds_before_timeout, 4);
}

#[test]
#[serial]
fn cli_overrides_file() {
    let toml = r#"
        nameservers = ["198.51.100.1"]
        domains = ["example.test"]
        seconds_before_timeout = 3
    "#;

    with_config_file(toml, ".toml", |path| {
        let config = load(&[
            "--config",
            path.to_str().unwrap(),
            "--nameserver",
            "198.51.100.9",
            "--timeout",
            "7",
            "--metrics-listen",
            "127.0.0.1:9300",
        ])
        .unwrap();
        assert_eq!(config.nameservers, vec!["198.51.100.9"]);
        assert_eq!(config.domains, vec!["example.test"]);
        assert_eq!(config.seconds_before_timeout, 7);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen_address, "127.0.0.1:9300".parse().unwrap());
    });
}

#[test]
#[serial]
fn environment_overrides_file_but_not_cli() {
    let toml = r#"
        nameservers = ["198.51.100.1"]
        domains = ["example.test"]
        seconds_between_tests = 10
    "#;

    std::env::set_var("DNSMONITOR_SECONDS_BETWEEN_TESTS", "20");
    std::env::set_var("DNSMONITOR_METRICS__LOG_METRICS", "true");
    with_config_file(toml, ".toml", |path| {
        let from_env = load(&["--config", path.to_str().unwrap()]).unwrap();
        assert_eq!(from_env.seconds_between_tests, 20);
        assert!(from_env.metrics.log_metrics);

        let from_cli = load(&["--config", path.to_str().unwrap(), "--interval", "30"]).unwrap();
        assert_eq!(from_cli.seconds_between_tests, 30);
    });
    std::env::remove_var("DNSMONITOR_SECONDS_BETWEEN_TESTS");
    std::env::remove_var("DNSMONITOR_METRICS__LOG_METRICS");
}

#[test]
#[serial]
fn empty_config_loads_but_does_not_validate() {
    let config = load(&[]).unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(
        config.validate(),
        vec![
            "At least 1 nameserver must be configured.".to_string(),
            "At least 1 domain must be configured.".to_string(),
        ]
    );
}

#[test]
#[serial]
fn malformed_file_is_a_load_error() {
    with_config_file("seconds_before_timeout = \"soon\"", ".toml", |path| {
        let err = load(&["--config", path.to_str().unwrap()]).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)), "{err}");
    });
}
