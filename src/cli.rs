//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration file and environment variables, taking precedence over both.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Measures DNS resolution latency against a set of nameservers.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML or JSON configuration file. Defaults to `./config.json`
    /// when that file exists.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Nameserver to probe (IP or IP:port). Repeat to probe several.
    #[arg(short, long = "nameserver", value_name = "ADDR")]
    pub nameserver: Vec<String>,

    /// Domain to query. Repeat to query several.
    #[arg(short, long = "domain", value_name = "NAME")]
    pub domain: Vec<String>,

    /// Seconds between probe rounds.
    #[arg(long, value_name = "SECONDS")]
    pub interval: Option<u64>,

    /// Seconds to wait for a response before reporting a timeout.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Log filter, e.g. `info` or `dns_latency_monitor=debug`.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, value_name = "ADDR")]
    pub metrics_listen: Option<SocketAddr>,

    /// Validate the configuration and exit.
    #[arg(long)]
    pub check: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        // Repeated flags replace the configured list rather than extend it.
        if !self.nameserver.is_empty() {
            dict.insert("nameservers".into(), Value::from(self.nameserver.clone()));
        }

        if !self.domain.is_empty() {
            dict.insert("domains".into(), Value::from(self.domain.clone()));
        }

        if let Some(interval) = self.interval {
            dict.insert("seconds_between_tests".into(), Value::from(interval));
        }

        if let Some(timeout) = self.timeout {
            dict.insert("seconds_before_timeout".into(), Value::from(timeout));
        }

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        // Giving a listen address implies the exporter is wanted.
        if let Some(addr) = self.metrics_listen {
            let mut metrics = Dict::new();
            metrics.insert("enabled".into(), Value::from(true));
            metrics.insert("listen_address".into(), Value::from(addr.to_string()));
            dict.insert("metrics".into(), Value::from(metrics));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
