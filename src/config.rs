//! Configuration management for the latency monitor
//!
//! This module defines the main `Config` struct and its sub-structs,
//! responsible for holding all application settings. It uses the `figment`
//! crate to layer built-in defaults, a TOML or JSON file, environment
//! variables and command-line arguments.
//!
//! Keys in the file are matched without regard to case or underscores, so a
//! `config.json` written as `{"Nameservers": [...], "SecondsBetweenTests": 5,
//! "FileLogFolder": "..."}` loads the same as the snake_case form.

use crate::cli::Cli;
use crate::probe::parse_nameserver;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    value::{Dict, Map, Value},
    Figment, Metadata, Profile, Provider,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix for environment overrides, e.g. `DNSMONITOR_SECONDS_BEFORE_TIMEOUT=3`
/// or `DNSMONITOR_METRICS__ENABLED=true`.
pub const ENV_PREFIX: &str = "DNSMONITOR_";

/// Read from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Nameservers to probe, as `IP` or `IP:port`.
    pub nameservers: Vec<String>,
    /// Domains queried against every nameserver.
    pub domains: Vec<String>,
    /// Pause between the end of one probe round and the next.
    pub seconds_between_tests: u64,
    /// How long to wait for a response before reporting a timeout.
    pub seconds_before_timeout: u64,
    /// Local address for the probe socket.
    pub bind_address: Option<SocketAddr>,
    /// The logging level for the application.
    pub log_level: String,
    /// Folder for daily rolling JSON log files.
    pub log_file_folder: Option<PathBuf>,
    pub metrics: MetricsConfig,
}

/// Configuration for metrics export.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics over HTTP.
    pub enabled: bool,
    /// Address of the `/metrics` endpoint.
    pub listen_address: SocketAddr,
    /// Periodically log metric values instead (ignored when `enabled`).
    pub log_metrics: bool,
    pub log_aggregation_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_address: SocketAddr::from(([127, 0, 0, 1], 9100)),
            log_metrics: false,
            log_aggregation_seconds: 60,
        }
    }
}

// Provide a default implementation for tests and easy setup.
impl Default for Config {
    fn default() -> Self {
        Self {
            nameservers: vec![],
            domains: vec![],
            seconds_between_tests: 5,
            seconds_before_timeout: 2,
            bind_address: None,
            log_level: "info".to_string(),
            log_file_folder: None,
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the config file named on
    /// the command line (or `./config.json` if present), `DNSMONITOR_`
    /// environment variables and finally the command-line arguments
    /// themselves.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));
        match &cli.config {
            Some(path) => figment = merge_file(figment, path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                figment = merge_file(figment, Path::new(DEFAULT_CONFIG_FILE))
            }
            None => {}
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }

    /// Returns one human-readable message per problem found; empty when the
    /// configuration is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.nameservers.is_empty() {
            issues.push("At least 1 nameserver must be configured.".to_string());
        }
        for ns in &self.nameservers {
            if parse_nameserver(ns).is_none() {
                issues.push(format!(
                    "Invalid nameserver '{ns}', expecting valid IP or IP:port"
                ));
            }
        }

        if self.domains.is_empty() {
            issues.push("At least 1 domain must be configured.".to_string());
        }
        for domain in &self.domains {
            if !is_valid_hostname(domain) {
                issues.push(format!(
                    "Invalid domain '{domain}', expecting valid DNS name"
                ));
            }
        }

        if self.seconds_before_timeout < 1 {
            issues.push("SecondsBeforeTimeout must be 1 or higher".to_string());
        }

        issues
    }
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        figment.merge(NormalizedKeys(Json::file(path)))
    } else {
        figment.merge(NormalizedKeys(Toml::file(path)))
    }
}

/// Known keys folded to lowercase without underscores, with their field name.
const FIELD_NAMES: &[(&str, &str)] = &[
    ("nameservers", "nameservers"),
    ("domains", "domains"),
    ("secondsbetweentests", "seconds_between_tests"),
    ("secondsbeforetimeout", "seconds_before_timeout"),
    ("bindaddress", "bind_address"),
    ("loglevel", "log_level"),
    ("logfilefolder", "log_file_folder"),
    ("filelogfolder", "log_file_folder"),
    ("metrics", "metrics"),
    ("enabled", "enabled"),
    ("listenaddress", "listen_address"),
    ("logmetrics", "log_metrics"),
    ("logaggregationseconds", "log_aggregation_seconds"),
];

/// Maps a file key such as `SecondsBetweenTests` or `fileLogFolder` onto the
/// field it names. Unknown keys are returned unchanged.
pub fn normalize_key(key: &str) -> String {
    let folded: String = key
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    FIELD_NAMES
        .iter()
        .find(|(alias, _)| *alias == folded)
        .map_or_else(|| key.to_string(), |(_, field)| field.to_string())
}

fn normalize_dict(dict: Dict) -> Dict {
    dict.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Dict(tag, inner) => Value::Dict(tag, normalize_dict(inner)),
                other => other,
            };
            (normalize_key(&key), value)
        })
        .collect()
}

/// Wraps a file provider and rewrites its keys with [`normalize_key`].
struct NormalizedKeys<P>(P);

impl<P: Provider> Provider for NormalizedKeys<P> {
    fn metadata(&self) -> Metadata {
        self.0.metadata()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Ok(self
            .0
            .data()?
            .into_iter()
            .map(|(profile, dict)| (profile, normalize_dict(dict)))
            .collect())
    }

    fn profile(&self) -> Option<Profile> {
        self.0.profile()
    }
}

/// Checks that `name` is a DNS host name: dot-separated labels of ASCII
/// letters, digits and hyphens, no label starting or ending with a hyphen.
pub fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}
