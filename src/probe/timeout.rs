//! The timeout monitor: periodically evicts queries that waited too long.

use super::{CorrelationTable, MeasurementEmitter};
use crate::core::Measurement;
use crate::internal_metrics::IN_FLIGHT_METRIC;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Lower bound on the wake interval, so a zero test interval does not spin.
pub const MIN_WAKE_INTERVAL: Duration = Duration::from_millis(50);

/// How often the monitor scans the table: half the timeout window, or twice
/// the test interval if that is shorter.
pub fn wake_interval(timeout: Duration, interval: Duration) -> Duration {
    (timeout / 2).min(interval * 2).max(MIN_WAKE_INTERVAL)
}

pub struct TimeoutMonitor {
    table: Arc<CorrelationTable>,
    emitter: MeasurementEmitter,
    timeout: Duration,
    wake_interval: Duration,
}

impl TimeoutMonitor {
    pub fn new(
        table: Arc<CorrelationTable>,
        emitter: MeasurementEmitter,
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            table,
            emitter,
            timeout,
            wake_interval: wake_interval(timeout, interval),
        }
    }

    pub fn wake_interval(&self) -> Duration {
        self.wake_interval
    }

    /// Evicts every entry older than the timeout as of `now` and emits a
    /// timeout measurement for each one evicted here.
    ///
    /// Entries are re-checked under the table lock, so an entry the receiver
    /// removes concurrently is never reported twice.
    pub fn sweep(&self, now: Instant) -> Vec<Measurement> {
        let mut expired = Vec::new();
        for id in self.table.snapshot_keys() {
            let Some(query) = self.table.remove_if(id, |q| q.age(now) > self.timeout) else {
                continue;
            };

            let latency = query.age(now);
            let measurement = Measurement {
                nameserver: query.nameserver,
                domain: query.domain,
                latency,
                timed_out: true,
            };
            warn!(
                id,
                latency_ms = measurement.latency_ms(),
                nameserver = %measurement.nameserver,
                domain = %measurement.domain,
                "#{}: ({:.0}ms) {} -> NO RESPONSE",
                id,
                measurement.latency_ms(),
                measurement.nameserver
            );
            self.emitter.emit(measurement.clone());
            expired.push(measurement);
        }

        self.emitter.gauge(IN_FLIGHT_METRIC, self.table.len() as f64);
        expired
    }

    /// Sweeps on every wake until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(
            wake_interval_ms = self.wake_interval.as_millis() as u64,
            "Timeout monitor started."
        );
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = sleep(self.wake_interval) => {}
            }

            let expired = self.sweep(Instant::now());
            if !expired.is_empty() {
                debug!(count = expired.len(), "Evicted timed-out queries");
            }
        }
        info!("Timeout monitor received shutdown signal, exiting.");
    }
}

impl std::fmt::Debug for TimeoutMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutMonitor")
            .field("timeout", &self.timeout)
            .field("wake_interval", &self.wake_interval)
            .finish_non_exhaustive()
    }
}
