pub mod codec;
pub mod emitter;
pub mod engine;
pub mod ids;
pub mod receiver;
pub mod sender;
pub mod table;
#[cfg(feature = "test-utils")]
pub mod test_utils;
pub mod timeout;

use crate::config::{Config, ConfigError};
use crate::core::ProbeTarget;
use hickory_resolver::proto::ProtoError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use emitter::MeasurementEmitter;
pub use engine::LatencyMonitor;
pub use ids::IdAllocator;
pub use receiver::{ReceiveOutcome, Receiver};
pub use sender::Sender;
pub use table::CorrelationTable;
pub use timeout::TimeoutMonitor;

/// Port used for nameservers configured without an explicit one.
pub const DNS_PORT: u16 = 53;

/// The validated probing parameters consumed by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSettings {
    pub nameservers: Vec<SocketAddr>,
    pub domains: Vec<String>,
    /// Delay between the end of one probe round and the start of the next.
    pub interval: Duration,
    /// Maximum time to wait for a response before reporting a timeout.
    pub timeout: Duration,
}

impl ProbeSettings {
    /// Builds settings from a configuration, failing with every validation
    /// issue found.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let issues = config.validate();
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }

        let mut nameservers = Vec::with_capacity(config.nameservers.len());
        for ns in &config.nameservers {
            let addr = parse_nameserver(ns)
                .ok_or_else(|| ConfigError::Invalid(vec![format!("Invalid nameserver '{ns}'")]))?;
            nameservers.push(addr);
        }

        Ok(Self {
            nameservers,
            domains: config.domains.clone(),
            interval: Duration::from_secs(config.seconds_between_tests),
            timeout: Duration::from_secs(config.seconds_before_timeout),
        })
    }

    /// All probe targets in send order: every nameserver for the first
    /// domain, then every nameserver for the next one.
    pub fn targets(&self) -> Vec<ProbeTarget> {
        self.domains
            .iter()
            .flat_map(|domain| {
                self.nameservers
                    .iter()
                    .map(move |ns| ProbeTarget::new(domain.clone(), *ns))
            })
            .collect()
    }
}

/// Parses `IP` or `IP:port` (IPv6 with a port in brackets), defaulting the
/// port to 53.
pub fn parse_nameserver(value: &str) -> Option<SocketAddr> {
    let value = value.trim();
    if let Ok(ip) = value.parse::<std::net::IpAddr>() {
        return Some(SocketAddr::new(ip, DNS_PORT));
    }
    value.parse::<SocketAddr>().ok()
}

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to bind probe socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid domain '{domain}': {source}")]
    InvalidDomain {
        domain: String,
        #[source]
        source: ProtoError,
    },

    #[error("failed to encode query #{id}: {source}")]
    Encode {
        id: u16,
        #[source]
        source: ProtoError,
    },

    #[error("failed to send to {nameserver}: {source}")]
    Send {
        nameserver: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to receive: {0}")]
    Receive(#[source] std::io::Error),

    #[error("malformed response from {from}: {source}")]
    Malformed {
        from: SocketAddr,
        #[source]
        source: ProtoError,
    },

    #[error("message #{id} from {from} is not a response")]
    NotAResponse { from: SocketAddr, id: u16 },
}
