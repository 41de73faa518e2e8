//! The latency monitor: owns the shared socket and correlation table and
//! runs the sender, receiver and timeout monitor side by side.

use super::{
    CorrelationTable, MeasurementEmitter, ProbeError, ProbeSettings, Receiver, Sender,
    TimeoutMonitor,
};
use crate::core::{Measurement, Operation, TelemetrySink};
use crate::task_manager::TaskManager;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tracing::{info, info_span, Instrument};

/// Local address to bind when none is configured: `[::]` (dual-stack) if any
/// nameserver is IPv6, otherwise `0.0.0.0`, on an ephemeral port.
pub fn default_bind_address(nameservers: &[SocketAddr]) -> SocketAddr {
    let ip = if nameservers.iter().any(SocketAddr::is_ipv6) {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    } else {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    };
    SocketAddr::new(ip, 0)
}

pub struct LatencyMonitor {
    sender: Sender,
    receiver: Receiver,
    timeout_monitor: TimeoutMonitor,
    table: Arc<CorrelationTable>,
    emitter: MeasurementEmitter,
    local_addr: SocketAddr,
}

impl LatencyMonitor {
    /// Binds the probe socket and builds the monitor.
    pub async fn bind(
        settings: &ProbeSettings,
        bind_address: Option<SocketAddr>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ProbeError> {
        let addr = bind_address.unwrap_or_else(|| default_bind_address(&settings.nameservers));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProbeError::Bind { addr, source })?;
        Self::new(settings, socket, telemetry)
    }

    /// Builds the monitor around an already bound socket.
    pub fn new(
        settings: &ProbeSettings,
        socket: UdpSocket,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Result<Self, ProbeError> {
        let local_addr = socket.local_addr().map_err(ProbeError::Receive)?;
        let socket = Arc::new(socket);
        let table = Arc::new(CorrelationTable::new());
        let emitter = MeasurementEmitter::new(telemetry);

        let sender = Sender::new(
            socket.clone(),
            settings.targets(),
            table.clone(),
            emitter.clone(),
            settings.interval,
        )?;
        let receiver = Receiver::new(
            socket,
            settings.nameservers.iter().copied(),
            table.clone(),
            emitter.clone(),
        );
        let timeout_monitor = TimeoutMonitor::new(
            table.clone(),
            emitter.clone(),
            settings.timeout,
            settings.interval,
        );

        Ok(Self {
            sender,
            receiver,
            timeout_monitor,
            table,
            emitter,
            local_addr,
        })
    }

    /// Subscribes to every measurement emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Measurement> {
        self.emitter.subscribe()
    }

    pub fn emitter(&self) -> &MeasurementEmitter {
        &self.emitter
    }

    /// The table of outstanding queries.
    pub fn table(&self) -> Arc<CorrelationTable> {
        self.table.clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the three loops as separate tasks until the shutdown signal
    /// fires, then waits for all of them to finish.
    ///
    /// Queries still outstanding at shutdown are discarded.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!(local_addr = %self.local_addr, "Latency monitor starting.");
        let tasks = TaskManager::new(shutdown_rx.clone());

        tasks.spawn(
            "Sender",
            self.sender
                .run(shutdown_rx.clone())
                .instrument(info_span!("probe", operation = %Operation::Sender)),
        );
        tasks.spawn(
            "Receiver",
            self.receiver
                .run(shutdown_rx.clone())
                .instrument(info_span!("probe", operation = %Operation::Receiver)),
        );
        tasks.spawn(
            "TimeoutMonitor",
            self.timeout_monitor
                .run(shutdown_rx)
                .instrument(info_span!("probe", operation = %Operation::Timeout)),
        );

        tasks.join().await;
        info!(
            discarded = self.table.len(),
            "Latency monitor stopped."
        );
    }
}

impl std::fmt::Debug for LatencyMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyMonitor")
            .field("local_addr", &self.local_addr)
            .field("sender", &self.sender)
            .field("timeout_monitor", &self.timeout_monitor)
            .finish_non_exhaustive()
    }
}
