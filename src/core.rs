//! Core domain types and service traits for the latency monitor
//!
//! This module defines the data that flows through the probing engine and the
//! narrow telemetry contract the engine reports through.

use crate::probe::ProbeError;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// A single (domain, nameserver) pair probed once per round.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeTarget {
    /// The name queried for `A` records.
    pub domain: String,
    /// The nameserver the query is sent to.
    pub nameserver: SocketAddr,
}

impl ProbeTarget {
    pub fn new(domain: impl Into<String>, nameserver: SocketAddr) -> Self {
        Self {
            domain: domain.into(),
            nameserver,
        }
    }
}

/// A query that has been sent and is still waiting for a response or a timeout.
///
/// The sender records the entry just before handing the datagram to the
/// socket, so that an immediate answer always finds it, and withdraws it if
/// the send fails. For that short window an entry exists for a query that is
/// not yet on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightQuery {
    /// The DNS header identifier, unique among outstanding queries.
    pub id: u16,
    /// Monotonic timestamp taken right before transmission.
    pub sent_at: Instant,
    pub domain: String,
    pub nameserver: SocketAddr,
}

impl InFlightQuery {
    /// Time elapsed between transmission and `now`.
    ///
    /// Saturates to zero if `now` precedes the send timestamp.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }
}

/// The outcome of one query lifecycle: a response latency or a timeout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub nameserver: SocketAddr,
    pub domain: String,
    #[serde(rename = "latency_ms", serialize_with = "serialize_latency_ms")]
    pub latency: Duration,
    pub timed_out: bool,
}

impl Measurement {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// Metric labels for this measurement: `Resolver`, `Domain` and, for
    /// timeouts only, `Timeout`.
    pub fn labels(&self) -> Vec<(&'static str, String)> {
        let mut labels = vec![
            ("Resolver", self.nameserver.to_string()),
            ("Domain", self.domain.clone()),
        ];
        if self.timed_out {
            labels.push(("Timeout", "true".to_string()));
        }
        labels
    }
}

fn serialize_latency_ms<S: serde::Serializer>(
    latency: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(latency.as_secs_f64() * 1000.0)
}

/// Identifies which engine loop an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Sender,
    Receiver,
    Timeout,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Service Traits
// =============================================================================

/// Destination for numeric telemetry produced by the engine.
///
/// The engine never checks whether telemetry is configured; it always holds a
/// sink, which is [`NoopTelemetry`] when nothing should be reported.
pub trait TelemetrySink: Send + Sync {
    /// Records one sample of a named metric with string labels.
    fn track_metric(&self, name: &str, value: f64, labels: &[(&'static str, String)]);

    /// Counts one occurrence of a named event.
    fn track_event(&self, name: &str, labels: &[(&'static str, String)]);

    /// Sets the current value of a named gauge.
    fn track_gauge(&self, name: &str, value: f64);

    /// Reports an error contained inside one loop iteration.
    fn track_exception(&self, operation: Operation, error: &ProbeError);
}

/// A telemetry sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn track_metric(&self, _name: &str, _value: f64, _labels: &[(&'static str, String)]) {}

    fn track_event(&self, _name: &str, _labels: &[(&'static str, String)]) {}

    fn track_gauge(&self, _name: &str, _value: f64) {}

    fn track_exception(&self, _operation: Operation, _error: &ProbeError) {}
}
