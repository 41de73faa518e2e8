//! End-to-end tests of the latency monitor against loopback nameservers.

#[path = "../helpers/mod.rs"]
mod helpers;

use dns_latency_monitor::internal_metrics::{LATENCY_METRIC, UNMATCHED_RESPONSES_METRIC};
use dns_latency_monitor::probe::test_utils::{Behaviour, FakeNameserver, RecordingTelemetry};
use dns_latency_monitor::probe::{LatencyMonitor, ProbeSettings};
use helpers::next_measurement;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

fn settings(nameservers: &[SocketAddr], domains: &[&str], timeout: Duration) -> ProbeSettings {
    ProbeSettings {
        nameservers: nameservers.to_vec(),
        domains: domains.iter().map(|d| d.to_string()).collect(),
        interval: Duration::from_secs(30),
        timeout,
    }
}

fn loopback() -> Option<SocketAddr> {
    Some("127.0.0.1:0".parse().unwrap())
}

#[tokio::test]
async fn answered_query_is_measured_and_reported() {
    let ns = FakeNameserver::start(Behaviour::Answer {
        delay: Duration::from_millis(20),
    })
    .await
    .unwrap();
    let telemetry = RecordingTelemetry::new();
    let monitor = LatencyMonitor::bind(
        &settings(&[ns.addr()], &["example.test"], Duration::from_secs(2)),
        loopback(),
        telemetry.clone(),
    )
    .await
    .unwrap();
    let mut rx = monitor.subscribe();
    let table = monitor.table();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    let m = next_measurement(&mut rx, Duration::from_secs(5)).await;
    assert!(!m.timed_out);
    assert_eq!(m.nameserver, ns.addr());
    assert_eq!(m.domain, "example.test");
    assert!(m.latency >= Duration::from_millis(20), "{:?}", m.latency);
    assert!(m.latency < Duration::from_secs(2));
    assert!(table.is_empty());

    let metrics = telemetry.metrics();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0].name, LATENCY_METRIC);
    assert!(metrics[0]
        .labels
        .contains(&("Resolver", ns.addr().to_string())));
    assert!(metrics[0]
        .labels
        .contains(&("Domain", "example.test".to_string())));
    assert!(!metrics[0].labels.iter().any(|(k, _)| *k == "Timeout"));

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn dual_stack_socket_matches_ipv4_answers() {
    let ns = FakeNameserver::start(Behaviour::Answer {
        delay: Duration::ZERO,
    })
    .await
    .unwrap();
    let monitor = LatencyMonitor::bind(
        &settings(&[ns.addr()], &["example.test"], Duration::from_secs(1)),
        Some("[::]:0".parse().unwrap()),
        RecordingTelemetry::new(),
    )
    .await
    .unwrap();
    let mut rx = monitor.subscribe();
    let table = monitor.table();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    let m = next_measurement(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(ns.queries(), vec![(1000, "example.test".to_string())]);
    assert!(!m.timed_out, "{m:?}");
    assert_eq!(m.nameserver, ns.addr());
    assert!(m.latency < Duration::from_secs(1));
    assert!(table.is_empty());

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn silent_nameserver_produces_exactly_one_timeout() {
    let ns = FakeNameserver::start(Behaviour::Silent).await.unwrap();
    let telemetry = RecordingTelemetry::new();
    let monitor = LatencyMonitor::bind(
        &settings(&[ns.addr()], &["example.test"], Duration::from_secs(1)),
        loopback(),
        telemetry.clone(),
    )
    .await
    .unwrap();
    let mut rx = monitor.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    let m = next_measurement(&mut rx, Duration::from_secs(5)).await;
    assert!(m.timed_out);
    assert!(m.latency > Duration::from_secs(1));
    assert!(m.latency < Duration::from_secs(3), "{:?}", m.latency);
    assert!(telemetry.metrics()[0]
        .labels
        .contains(&("Timeout", "true".to_string())));

    // No second report for the same query.
    assert!(timeout(Duration::from_millis(1500), rx.recv()).await.is_err());

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn round_is_sent_domain_major_with_sequential_ids() {
    let ns1 = FakeNameserver::start(Behaviour::Answer {
        delay: Duration::ZERO,
    })
    .await
    .unwrap();
    let ns2 = FakeNameserver::start(Behaviour::Answer {
        delay: Duration::ZERO,
    })
    .await
    .unwrap();
    let monitor = LatencyMonitor::bind(
        &settings(
            &[ns1.addr(), ns2.addr()],
            &["a.test", "b.test"],
            Duration::from_secs(2),
        ),
        loopback(),
        RecordingTelemetry::new(),
    )
    .await
    .unwrap();
    let mut rx = monitor.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    let mut seen = Vec::new();
    for _ in 0..4 {
        let m = next_measurement(&mut rx, Duration::from_secs(5)).await;
        assert!(!m.timed_out);
        seen.push((m.domain, m.nameserver));
    }
    seen.sort();
    let mut expected = vec![
        ("a.test".to_string(), ns1.addr()),
        ("a.test".to_string(), ns2.addr()),
        ("b.test".to_string(), ns1.addr()),
        ("b.test".to_string(), ns2.addr()),
    ];
    expected.sort();
    assert_eq!(seen, expected);

    assert_eq!(
        ns1.queries(),
        vec![(1000, "a.test".to_string()), (1002, "b.test".to_string())]
    );
    assert_eq!(
        ns2.queries(),
        vec![(1001, "a.test".to_string()), (1003, "b.test".to_string())]
    );

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn duplicate_response_is_counted_but_not_measured_twice() {
    let ns = FakeNameserver::start(Behaviour::AnswerTwice).await.unwrap();
    let telemetry = RecordingTelemetry::new();
    let monitor = LatencyMonitor::bind(
        &settings(&[ns.addr()], &["example.test"], Duration::from_secs(2)),
        loopback(),
        telemetry.clone(),
    )
    .await
    .unwrap();
    let mut rx = monitor.subscribe();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    let m = next_measurement(&mut rx, Duration::from_secs(5)).await;
    assert!(!m.timed_out);
    assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_err());
    assert_eq!(telemetry.event_count(UNMATCHED_RESPONSES_METRIC), 1);

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_discards_outstanding_queries() {
    let ns = FakeNameserver::start(Behaviour::Silent).await.unwrap();
    let monitor = LatencyMonitor::bind(
        &settings(&[ns.addr()], &["example.test"], Duration::from_secs(1)),
        loopback(),
        RecordingTelemetry::new(),
    )
    .await
    .unwrap();
    let mut rx = monitor.subscribe();
    let table = monitor.table();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(shutdown_rx));

    timeout(Duration::from_secs(2), async {
        while table.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("query should be outstanding");

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_millis(500), handle)
        .await
        .expect("monitor should stop promptly")
        .unwrap();

    assert_eq!(table.len(), 1);
    assert!(matches!(
        rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
            | Err(tokio::sync::broadcast::error::TryRecvError::Closed)
    ));
}
