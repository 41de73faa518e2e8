//! # Internal Metrics Module
//!
//! This module provides the infrastructure for collecting and exposing the
//! probe's measurements and health counters through the `metrics` facade.
//!
//! ## Components:
//!
//! - **`MetricsBuilder`**: The entry point for initializing the metrics system.
//!   It picks the recorder (Prometheus, periodic logging, or none), spawns the
//!   background tasks that recorder needs, and hands back the telemetry sink.
//!
//! - **`Metrics`**: A lightweight, cloneable `TelemetrySink` that forwards
//!   every measurement, event and exception to the global recorder.
//!
//! - **`MetricsServer`**: (Defined in `server.rs`) An `axum`-based web server
//!   that exposes the `/metrics` endpoint for Prometheus to scrape.
//!
//! - **`LoggingRecorder`**: (Defined in `logging_recorder.rs`) A recorder that
//!   periodically writes a summary of every series to the log.

use crate::config::MetricsConfig;
use crate::core::{NoopTelemetry, Operation, TelemetrySink};
use crate::internal_metrics::logging_recorder::LoggingRecorder;
use crate::internal_metrics::server::MetricsServer;
use crate::probe::ProbeError;
use crate::task_manager::TaskManager;
use metrics::{Label, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

pub mod logging_recorder;
pub mod server;

/// Round-trip time of every probe, in milliseconds. Timeouts carry
/// `Timeout="true"`.
pub const LATENCY_METRIC: &str = "dns_resolution_latency_ms";
pub const QUERIES_SENT_METRIC: &str = "dns_queries_sent_total";
pub const UNMATCHED_RESPONSES_METRIC: &str = "dns_responses_unmatched_total";
pub const IGNORED_DATAGRAMS_METRIC: &str = "dns_datagrams_ignored_total";
pub const EXCEPTIONS_METRIC: &str = "probe_exceptions_total";
pub const IN_FLIGHT_METRIC: &str = "dns_in_flight_queries";

/// Histogram buckets for the latency metric, in milliseconds.
const LATENCY_BUCKETS_MS: &[f64] = &[
    1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

fn to_labels(labels: &[(&'static str, String)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

/// Telemetry sink backed by whatever recorder is globally installed.
#[derive(Clone, Default)]
pub struct Metrics;

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates a new `Metrics` instance and registers descriptions for all
    /// supported metrics with the global recorder.
    pub fn new() -> Self {
        metrics::describe_histogram!(LATENCY_METRIC, Unit::Milliseconds, "Round-trip time of each DNS probe, labeled by resolver and domain; timeouts are labeled Timeout=true.");
        metrics::describe_counter!(QUERIES_SENT_METRIC, Unit::Count, "Total number of DNS queries sent, labeled by resolver.");
        metrics::describe_counter!(UNMATCHED_RESPONSES_METRIC, Unit::Count, "Responses from a probed resolver that matched no outstanding query (late or duplicate).");
        metrics::describe_counter!(IGNORED_DATAGRAMS_METRIC, Unit::Count, "Datagrams received from addresses that are not configured resolvers.");
        metrics::describe_counter!(EXCEPTIONS_METRIC, Unit::Count, "Errors contained inside a probe loop iteration, labeled by operation.");
        metrics::describe_gauge!(IN_FLIGHT_METRIC, Unit::Count, "Queries sent and still awaiting a response or timeout.");
        Self
    }
}

impl TelemetrySink for Metrics {
    fn track_metric(&self, name: &str, value: f64, labels: &[(&'static str, String)]) {
        metrics::histogram!(name.to_owned(), to_labels(labels)).record(value);
    }

    fn track_event(&self, name: &str, labels: &[(&'static str, String)]) {
        metrics::counter!(name.to_owned(), to_labels(labels)).increment(1);
    }

    fn track_gauge(&self, name: &str, value: f64) {
        metrics::gauge!(name.to_owned()).set(value);
    }

    fn track_exception(&self, operation: Operation, _error: &ProbeError) {
        metrics::counter!(EXCEPTIONS_METRIC, "operation" => operation.as_str()).increment(1);
    }
}

/// Builder for the metrics system.
///
/// Prometheus wins when `enabled`; otherwise `log_metrics` installs the
/// logging recorder; otherwise telemetry is discarded.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    /// Creates a new `MetricsBuilder` with the given configuration.
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the configured recorder and spawns its background tasks on
    /// `tasks`. Returns the sink the probe should report to and, when the
    /// exporter is running, the address it listens on.
    ///
    /// Failing to bind or install the exporter is logged and degrades to the
    /// no-op sink; the probe itself keeps running.
    pub async fn build(self, tasks: &TaskManager) -> (Arc<dyn TelemetrySink>, Option<SocketAddr>) {
        if self.config.enabled {
            return self.build_prometheus(tasks).await;
        }

        if self.config.log_metrics {
            let interval = Duration::from_secs(self.config.log_aggregation_seconds.max(1));
            info!(
                "Logging recorder enabled. Metrics will be printed every {} seconds.",
                interval.as_secs()
            );
            let recorder = LoggingRecorder::new();
            let reporter = recorder.reporter(interval);
            if let Err(e) = metrics::set_global_recorder(recorder) {
                error!("Failed to install logging recorder: {}", e);
                return (Arc::new(NoopTelemetry), None);
            }
            tasks.spawn("MetricsLogger", reporter.run(tasks.shutdown_rx()));
            return (Arc::new(Metrics::new()), None);
        }

        (Arc::new(NoopTelemetry), None)
    }

    async fn build_prometheus(
        self,
        tasks: &TaskManager,
    ) -> (Arc<dyn TelemetrySink>, Option<SocketAddr>) {
        let builder = match PrometheusBuilder::new().set_buckets_for_metric(
            Matcher::Full(LATENCY_METRIC.to_string()),
            LATENCY_BUCKETS_MS,
        ) {
            Ok(builder) => builder,
            Err(e) => {
                error!("Failed to configure Prometheus buckets: {}", e);
                return (Arc::new(NoopTelemetry), None);
            }
        };
        let recorder = builder.build_recorder();
        let handle = recorder.handle();

        // Bind first so a busy port is reported before the recorder is taken.
        let listener = match TcpListener::bind(self.config.listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(
                    "Failed to bind metrics server to {}: {}",
                    self.config.listen_address, e
                );
                return (Arc::new(NoopTelemetry), None);
            }
        };

        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!("Failed to get local address for metrics server: {}", e);
                return (Arc::new(NoopTelemetry), None);
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!("Failed to install Prometheus recorder: {}", e);
            return (Arc::new(NoopTelemetry), None);
        }

        let server = MetricsServer::new(listener, handle, tasks.shutdown_rx());
        tasks.spawn("MetricsServer", server.run());
        info!("Metrics server listening on http://{}/metrics", addr);

        (Arc::new(Metrics::new()), Some(addr))
    }
}
