//! The sender loop: one query per target per round, paced, then the
//! inter-round sleep.

use super::{codec, CorrelationTable, IdAllocator, MeasurementEmitter, ProbeError};
use crate::core::{InFlightQuery, Operation, ProbeTarget};
use crate::internal_metrics::QUERIES_SENT_METRIC;
use hickory_resolver::proto::rr::Name;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Pause after each send so a round is spread out instead of burst.
pub const PACING_DELAY: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
struct PreparedTarget {
    target: ProbeTarget,
    name: Name,
}

pub struct Sender {
    socket: Arc<UdpSocket>,
    targets: Vec<PreparedTarget>,
    table: Arc<CorrelationTable>,
    ids: IdAllocator,
    emitter: MeasurementEmitter,
    interval: Duration,
}

impl Sender {
    /// Creates a sender for `targets`, in the order given.
    ///
    /// Fails if any target domain is not a valid DNS name.
    pub fn new(
        socket: Arc<UdpSocket>,
        targets: Vec<ProbeTarget>,
        table: Arc<CorrelationTable>,
        emitter: MeasurementEmitter,
        interval: Duration,
    ) -> Result<Self, ProbeError> {
        let targets = targets
            .into_iter()
            .map(|target| {
                let name = codec::parse_name(&target.domain)?;
                Ok(PreparedTarget { target, name })
            })
            .collect::<Result<Vec<_>, ProbeError>>()?;

        Ok(Self {
            socket,
            targets,
            table,
            ids: IdAllocator::new(),
            emitter,
            interval,
        })
    }

    /// Replaces the identifier allocator.
    pub fn with_id_allocator(mut self, ids: IdAllocator) -> Self {
        self.ids = ids;
        self
    }

    /// Sends one query to every target, in order.
    ///
    /// Stops at the first failure; the rest of the round is skipped. Returns
    /// the identifiers sent.
    pub async fn send_round(&mut self) -> Result<Vec<u16>, ProbeError> {
        let mut sent = Vec::with_capacity(self.targets.len());
        for index in 0..self.targets.len() {
            sent.push(self.send_one(index).await?);
            sleep(PACING_DELAY).await;
        }
        Ok(sent)
    }

    async fn send_one(&mut self, index: usize) -> Result<u16, ProbeError> {
        let id = self.ids.next_id();
        let PreparedTarget { target, name } = &self.targets[index];
        let packet = codec::encode_query(id, name)?;

        // Publish the entry before the datagram leaves so that an immediate
        // response always finds it.
        let sent_at = Instant::now();
        let displaced = self.table.insert(InFlightQuery {
            id,
            sent_at,
            domain: target.domain.clone(),
            nameserver: target.nameserver,
        });
        if let Some(stale) = displaced {
            warn!(
                id,
                stale_domain = %stale.domain,
                stale_nameserver = %stale.nameserver,
                "#{}: identifier reused while still outstanding, dropping older query",
                id
            );
        }

        if let Err(source) = self.socket.send_to(&packet, target.nameserver).await {
            self.table.remove_if_present(id);
            return Err(ProbeError::Send {
                nameserver: target.nameserver,
                source,
            });
        }

        info!(
            id,
            domain = %target.domain,
            nameserver = %target.nameserver,
            "#{}: {} -> {}",
            id,
            target.domain,
            target.nameserver
        );
        self.emitter.event(
            QUERIES_SENT_METRIC,
            &[("Resolver", target.nameserver.to_string())],
        );
        Ok(id)
    }

    /// Runs rounds until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        debug!(targets = self.targets.len(), "Sender started.");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                result = self.send_round() => {
                    if let Err(e) = result {
                        error!(error = %e, "Error while sending, {}", e);
                        self.emitter.exception(Operation::Sender, &e);
                    }
                }
            }

            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = sleep(self.interval) => {}
            }
        }
        info!("Sender received shutdown signal, exiting.");
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("targets", &self.targets.len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
