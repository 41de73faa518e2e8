//! A metrics recorder that periodically logs all captured metrics.

use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_util::registry::{AtomicStorage, Registry};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type SharedRegistry = Arc<Registry<Key, AtomicStorage>>;

/// A metrics recorder whose values are written to the log by a
/// [`MetricsReporter`] instead of being exported.
pub struct LoggingRecorder {
    registry: SharedRegistry,
}

impl Default for LoggingRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggingRecorder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new(AtomicStorage)),
        }
    }

    /// Returns the task that logs this recorder's contents every `interval`.
    pub fn reporter(&self, interval: Duration) -> MetricsReporter {
        MetricsReporter {
            registry: self.registry.clone(),
            interval,
        }
    }
}

/// Periodically logs every series held by a [`LoggingRecorder`].
pub struct MetricsReporter {
    registry: SharedRegistry,
    interval: Duration,
}

/// Summary of the histogram samples drained in one reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSummary {
    pub count: usize,
    pub mean: f64,
    pub max: f64,
}

impl WindowSummary {
    fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().sum();
        let max = samples.iter().copied().fold(f64::MIN, f64::max);
        Some(Self {
            count: samples.len(),
            mean: sum / samples.len() as f64,
            max,
        })
    }
}

impl MetricsReporter {
    /// Logs one snapshot. Counters and gauges are cumulative; histogram
    /// samples are summarised and then cleared, so each line covers only the
    /// window since the previous report.
    pub fn report(&self) -> Vec<(String, WindowSummary)> {
        tracing::debug!("--- Metrics Snapshot ---");

        for (key, counter) in self.registry.get_counter_handles() {
            let value = counter.load(Ordering::Relaxed);
            tracing::info!("[Counter] {}: {}", key, value);
        }

        for (key, gauge) in self.registry.get_gauge_handles() {
            let value = f64::from_bits(gauge.load(Ordering::Relaxed));
            tracing::info!("[Gauge] {}: {}", key, value);
        }

        let mut summaries = Vec::new();
        for (key, histogram) in self.registry.get_histogram_handles() {
            let mut window = None;
            histogram.clear_with(|samples| {
                if let Some(summary) = WindowSummary::from_samples(samples) {
                    window = Some(match window {
                        None => summary,
                        Some(prev) => merge(prev, summary),
                    });
                }
            });
            if let Some(summary) = window {
                tracing::info!(
                    "[Histogram] {}: count={} mean={:.1} max={:.1} over the last {}s",
                    key,
                    summary.count,
                    summary.mean,
                    summary.max,
                    self.interval.as_secs()
                );
                summaries.push((key.to_string(), summary));
            }
        }
        summaries
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        // The first tick completes immediately and there is nothing to report yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    tracing::info!("Metrics logging task received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }
}

// `clear_with` may hand over samples in several blocks.
fn merge(a: WindowSummary, b: WindowSummary) -> WindowSummary {
    let count = a.count + b.count;
    WindowSummary {
        count,
        mean: (a.mean * a.count as f64 + b.mean * b.count as f64) / count as f64,
        max: a.max.max(b.max),
    }
}

impl Recorder for LoggingRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        self.registry.get_or_create_counter(key, |c| c.clone()).into()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        self.registry.get_or_create_gauge(key, |g| g.clone()).into()
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        self.registry.get_or_create_histogram(key, |h| h.clone()).into()
    }
}
