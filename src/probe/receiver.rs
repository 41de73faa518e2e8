//! The receiver loop: reads responses, matches them to outstanding queries
//! and emits latency measurements.

use super::{codec, CorrelationTable, MeasurementEmitter, ProbeError};
use crate::core::{Measurement, Operation};
use crate::internal_metrics::{IGNORED_DATAGRAMS_METRIC, UNMATCHED_RESPONSES_METRIC};
use hickory_resolver::proto::op::ResponseCode;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Large enough for any UDP DNS response, with or without EDNS.
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Pause after a socket-level receive error before reading again.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// What became of one inbound datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    /// The response matched an outstanding query.
    Matched(Measurement),
    /// No outstanding query has this identifier for this nameserver: a
    /// duplicate, a late response to a timed-out query, or a forgery.
    Unmatched { id: u16, from: SocketAddr },
    /// The datagram did not come from a configured nameserver.
    IgnoredSource(SocketAddr),
}

/// Folds an IPv4-mapped IPv6 source (`[::ffff:a.b.c.d]:p`), as reported by a
/// dual-stack socket, back to its IPv4 form so it compares equal to the
/// configured nameserver.
pub fn canonical_source(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        SocketAddr::V4(_) => addr,
    }
}

pub struct Receiver {
    socket: Arc<UdpSocket>,
    nameservers: HashSet<SocketAddr>,
    table: Arc<CorrelationTable>,
    emitter: MeasurementEmitter,
}

impl Receiver {
    pub fn new(
        socket: Arc<UdpSocket>,
        nameservers: impl IntoIterator<Item = SocketAddr>,
        table: Arc<CorrelationTable>,
        emitter: MeasurementEmitter,
    ) -> Self {
        Self {
            socket,
            nameservers: nameservers.into_iter().map(canonical_source).collect(),
            table,
            emitter,
        }
    }

    /// Waits for one datagram and handles it.
    pub async fn receive_one(&self, buf: &mut [u8]) -> Result<ReceiveOutcome, ProbeError> {
        let (len, from) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(ProbeError::Receive)?;
        let received_at = Instant::now();
        self.handle_datagram(&buf[..len], from, received_at)
    }

    /// Validates a datagram received at `received_at` and, if it answers an
    /// outstanding query, removes that query and emits its measurement.
    ///
    /// A parse failure leaves the correlation table untouched.
    pub fn handle_datagram(
        &self,
        datagram: &[u8],
        from: SocketAddr,
        received_at: Instant,
    ) -> Result<ReceiveOutcome, ProbeError> {
        let from = canonical_source(from);
        if !self.nameservers.contains(&from) {
            debug!(%from, len = datagram.len(), "Ignoring datagram from unknown source");
            self.emitter.event(IGNORED_DATAGRAMS_METRIC, &[]);
            return Ok(ReceiveOutcome::IgnoredSource(from));
        }

        let response = codec::decode_response(datagram, from)?;

        // Identifiers are unique across nameservers, so a known identifier
        // arriving from another nameserver is not an answer to that query.
        // Requiring the source to match keeps one resolver (or anything able
        // to spoof its address) from completing another resolver's query.
        let Some(query) = self.table.remove_if(response.id, |q| q.nameserver == from) else {
            warn!(
                id = response.id,
                %from,
                "#{}: Received unknown response from {}",
                response.id,
                from
            );
            self.emitter
                .event(UNMATCHED_RESPONSES_METRIC, &[("Resolver", from.to_string())]);
            return Ok(ReceiveOutcome::Unmatched {
                id: response.id,
                from,
            });
        };

        let latency = query.age(received_at);
        let measurement = Measurement {
            nameserver: from,
            domain: query.domain,
            latency,
            timed_out: false,
        };
        let results = response
            .addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        if response.response_code == ResponseCode::NoError {
            info!(
                id = response.id,
                latency_ms = measurement.latency_ms(),
                nameserver = %from,
                domain = %measurement.domain,
                "#{}: ({:.1}ms) {} -> {}",
                response.id,
                measurement.latency_ms(),
                from,
                results
            );
        } else {
            info!(
                id = response.id,
                latency_ms = measurement.latency_ms(),
                nameserver = %from,
                domain = %measurement.domain,
                rcode = %response.response_code,
                "#{}: ({:.1}ms) {} -> {} {}",
                response.id,
                measurement.latency_ms(),
                from,
                response.response_code,
                results
            );
        }

        self.emitter.emit(measurement.clone());
        Ok(ReceiveOutcome::Matched(measurement))
    }

    /// Receives until the shutdown signal fires.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(nameservers = self.nameservers.len(), "Receiver started.");
        let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let result = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                result = self.receive_one(&mut buf) => result,
            };

            match result {
                Ok(_) => {}
                Err(e @ ProbeError::Receive(_)) => {
                    error!(error = %e, "Error while receiving, {}", e);
                    self.emitter.exception(Operation::Receiver, &e);
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        _ = sleep(RECEIVE_ERROR_BACKOFF) => {}
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Dropping datagram, {}", e);
                    self.emitter.exception(Operation::Receiver, &e);
                }
            }
        }
        info!("Receiver received shutdown signal, exiting.");
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("nameservers", &self.nameservers)
            .finish_non_exhaustive()
    }
}
