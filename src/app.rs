//! The main application logic, decoupled from the entry point.

use crate::{
    config::Config,
    core::TelemetrySink,
    internal_metrics::MetricsBuilder,
    probe::{LatencyMonitor, ProbeSettings},
    task_manager::TaskManager,
    types::{MeasurementReceiver, MeasurementSender},
};
use anyhow::Result;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{info, instrument};

/// How long tasks get to finish after shutdown is signalled before they are
/// aborted.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A built application, ready to run.
pub struct App {
    task_manager: TaskManager,
    monitor: LatencyMonitor,
    measurements: MeasurementSender,
    metrics_addr: Option<SocketAddr>,
    local_addr: SocketAddr,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    /// Address of the Prometheus endpoint, when it is enabled.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Address the probe socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Subscribes to measurements. Subscribing before [`App::run`] sees every
    /// measurement of the first round.
    pub fn subscribe(&self) -> MeasurementReceiver {
        self.measurements.subscribe()
    }

    /// Starts probing, waits for the shutdown signal and then gracefully shuts
    /// down all tasks.
    pub async fn run(self) -> Result<()> {
        let mut shutdown_rx = self.task_manager.shutdown_rx();
        self.task_manager
            .spawn("LatencyMonitor", self.monitor.run(shutdown_rx.clone()));
        info!("DNS latency monitor running.");

        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }
        info!("Shutdown signal received. Waiting for tasks to complete...");

        self.task_manager.shutdown(SHUTDOWN_GRACE).await;
        info!("All tasks shut down.");
        Ok(())
    }
}

/// Builder for the main application.
///
/// Separates constructing the components from running them, and lets tests
/// swap the telemetry sink.
pub struct AppBuilder {
    config: Config,
    telemetry_override: Option<Arc<dyn TelemetrySink>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            telemetry_override: None,
        }
    }

    /// Reports to `telemetry` instead of installing a metrics recorder.
    pub fn telemetry_override(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry_override = Some(telemetry);
        self
    }

    /// Validates the configuration, sets up telemetry and binds the probe
    /// socket. Nothing is sent until [`App::run`].
    #[instrument(skip_all)]
    pub async fn build(self, shutdown_rx: watch::Receiver<bool>) -> Result<App> {
        let config = self.config;
        let settings = ProbeSettings::from_config(&config)?;
        let task_manager = TaskManager::new(shutdown_rx);

        let (telemetry, metrics_addr) = match self.telemetry_override {
            Some(telemetry) => (telemetry, None),
            None => {
                MetricsBuilder::new(config.metrics.clone())
                    .build(&task_manager)
                    .await
            }
        };

        let monitor = LatencyMonitor::bind(&settings, config.bind_address, telemetry).await?;
        let local_addr = monitor.local_addr();
        let measurements = monitor.emitter().sender();

        info!(
            nameservers = settings.nameservers.len(),
            domains = settings.domains.len(),
            interval_s = settings.interval.as_secs(),
            timeout_s = settings.timeout.as_secs(),
            %local_addr,
            "Application built."
        );

        Ok(App {
            task_manager,
            monitor,
            measurements,
            metrics_addr,
            local_addr,
        })
    }
}
