//! Test doubles: a loopback nameserver and a telemetry sink that records
//! everything it is given.

use super::{codec, ProbeError};
use crate::core::{Operation, TelemetrySink};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// How a [`FakeNameserver`] reacts to each query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Answer each query with one `A` record after `delay`.
    Answer { delay: Duration },
    /// Answer each query twice.
    AnswerTwice,
    /// Never answer.
    Silent,
}

/// A UDP nameserver on loopback that answers A queries with `127.0.0.1`.
pub struct FakeNameserver {
    addr: SocketAddr,
    queries: Arc<Mutex<Vec<(u16, String)>>>,
    handle: JoinHandle<()>,
}

impl FakeNameserver {
    pub async fn start(behaviour: Behaviour) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
        let addr = socket.local_addr()?;
        let queries = Arc::new(Mutex::new(Vec::new()));

        let seen = queries.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let query = buf[..len].to_vec();
                let Ok(message) = hickory_resolver::proto::op::Message::from_vec(&query) else {
                    continue;
                };
                let name = message
                    .queries()
                    .first()
                    .map(|q| q.name().to_ascii().trim_end_matches('.').to_string())
                    .unwrap_or_default();
                seen.lock().unwrap().push((message.id(), name));

                let Ok(response) = codec::encode_response(&query, &[Ipv4Addr::LOCALHOST]) else {
                    continue;
                };
                match behaviour {
                    Behaviour::Silent => {}
                    Behaviour::AnswerTwice => {
                        let _ = socket.send_to(&response, peer).await;
                        let _ = socket.send_to(&response, peer).await;
                    }
                    Behaviour::Answer { delay } if delay.is_zero() => {
                        let _ = socket.send_to(&response, peer).await;
                    }
                    Behaviour::Answer { delay } => {
                        let socket = socket.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            let _ = socket.send_to(&response, peer).await;
                        });
                    }
                }
            }
        });

        Ok(Self {
            addr,
            queries,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every query received so far as `(id, domain)`, in arrival order.
    pub fn queries(&self) -> Vec<(u16, String)> {
        self.queries.lock().unwrap().clone()
    }
}

impl Drop for FakeNameserver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub name: String,
    pub value: f64,
    pub labels: Vec<(&'static str, String)>,
}

/// A [`TelemetrySink`] that keeps every call for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    pub metrics: Mutex<Vec<RecordedMetric>>,
    pub events: Mutex<Vec<(String, Vec<(&'static str, String)>)>>,
    pub gauges: Mutex<Vec<(String, f64)>>,
    pub exceptions: Mutex<Vec<(Operation, String)>>,
}

impl RecordingTelemetry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn metrics(&self) -> Vec<RecordedMetric> {
        self.metrics.lock().unwrap().clone()
    }

    /// Number of events recorded under `name`.
    pub fn event_count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    pub fn exceptions(&self) -> Vec<(Operation, String)> {
        self.exceptions.lock().unwrap().clone()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn track_metric(&self, name: &str, value: f64, labels: &[(&'static str, String)]) {
        self.metrics.lock().unwrap().push(RecordedMetric {
            name: name.to_string(),
            value,
            labels: labels.to_vec(),
        });
    }

    fn track_event(&self, name: &str, labels: &[(&'static str, String)]) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), labels.to_vec()));
    }

    fn track_gauge(&self, name: &str, value: f64) {
        self.gauges.lock().unwrap().push((name.to_string(), value));
    }

    fn track_exception(&self, operation: Operation, error: &ProbeError) {
        self.exceptions
            .lock()
            .unwrap()
            .push((operation, error.to_string()));
    }
}
