//! Fans completed measurements out to telemetry and subscribers.

use crate::core::{Measurement, Operation, TelemetrySink};
use crate::internal_metrics::LATENCY_METRIC;
use crate::probe::ProbeError;
use crate::types::MeasurementSender;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the measurement broadcast channel. Slow subscribers lag and
/// lose the oldest measurements rather than stalling the engine.
pub const MEASUREMENT_CHANNEL_CAPACITY: usize = 1024;

/// Hands every measurement and contained error to the injected sinks.
#[derive(Clone)]
pub struct MeasurementEmitter {
    telemetry: Arc<dyn TelemetrySink>,
    tx: MeasurementSender,
}

impl MeasurementEmitter {
    pub fn new(telemetry: Arc<dyn TelemetrySink>) -> Self {
        let (tx, _rx) = broadcast::channel(MEASUREMENT_CHANNEL_CAPACITY);
        Self { telemetry, tx }
    }

    /// Publishes a measurement to the telemetry sink and to any subscribers.
    pub fn emit(&self, measurement: Measurement) {
        self.telemetry.track_metric(
            LATENCY_METRIC,
            measurement.latency_ms(),
            &measurement.labels(),
        );
        // No subscribers is the normal case when running as a daemon.
        if self.tx.send(measurement).is_err() {
            trace!("No measurement subscribers");
        }
    }

    /// Reports an error contained inside one loop iteration.
    pub fn exception(&self, operation: Operation, error: &ProbeError) {
        self.telemetry.track_exception(operation, error);
    }

    /// Counts a named event, e.g. a sent query or an unmatched response.
    pub fn event(&self, name: &str, labels: &[(&'static str, String)]) {
        self.telemetry.track_event(name, labels);
    }

    pub fn gauge(&self, name: &str, value: f64) {
        self.telemetry.track_gauge(name, value);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Measurement> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> MeasurementSender {
        self.tx.clone()
    }
}

impl std::fmt::Debug for MeasurementEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}
