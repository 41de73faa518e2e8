#[path = "../helpers/mod.rs"]
mod helpers;

use dns_latency_monitor::config::ConfigError;
use dns_latency_monitor::probe::test_utils::{Behaviour, FakeNameserver, RecordingTelemetry};
use dns_latency_monitor::probe::ProbeError;
use helpers::app::TestAppBuilder;
use helpers::next_measurement;
use std::time::Duration;

#[tokio::test]
async fn app_probes_every_interval_until_shutdown() {
    let ns = FakeNameserver::start(Behaviour::Answer {
        delay: Duration::ZERO,
    })
    .await
    .unwrap();
    let telemetry = RecordingTelemetry::new();
    let mut app = TestAppBuilder::new()
        .with_nameservers(&[ns.addr()])
        .with_telemetry(telemetry.clone())
        .start()
        .await
        .unwrap();

    let first = next_measurement(&mut app.measurements, Duration::from_secs(5)).await;
    let second = next_measurement(&mut app.measurements, Duration::from_secs(5)).await;
    assert!(!first.timed_out && !second.timed_out);

    let queries = ns.queries();
    assert!(queries.len() >= 2);
    assert_eq!(queries[0].0, 1000);
    assert_eq!(queries[1].0, 1001);

    app.shutdown(Duration::from_secs(3)).await.unwrap();
    assert!(telemetry.exceptions().is_empty());
}

#[tokio::test]
async fn app_reports_timeouts_for_a_silent_nameserver() {
    let ns = FakeNameserver::start(Behaviour::Silent).await.unwrap();
    let mut app = TestAppBuilder::new()
        .with_nameservers(&[ns.addr()])
        .with_telemetry(RecordingTelemetry::new())
        .with_config_modifier(|c| c.seconds_between_tests = 5)
        .start()
        .await
        .unwrap();

    let m = next_measurement(&mut app.measurements, Duration::from_secs(5)).await;
    assert!(m.timed_out);
    assert_eq!(m.nameserver, ns.addr());

    app.shutdown(Duration::from_secs(3)).await.unwrap();
}

#[tokio::test]
async fn invalid_config_fails_to_build() {
    let result = TestAppBuilder::new()
        .with_config_modifier(|c| {
            c.nameservers = vec!["not-an-ip".to_string()];
            c.seconds_before_timeout = 0;
        })
        .start()
        .await;

    let err = result.err().expect("build should fail");
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::Invalid(issues)) => {
            assert_eq!(issues.len(), 2, "{issues:?}");
            assert!(issues[0].contains("not-an-ip"));
            assert_eq!(issues[1], "SecondsBeforeTimeout must be 1 or higher");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn busy_bind_address_fails_to_build() {
    let taken = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();
    let result = TestAppBuilder::new()
        .with_nameservers(&["127.0.0.1:53".parse().unwrap()])
        .with_config_modifier(|c| c.bind_address = Some(addr))
        .start()
        .await;

    let err = result.err().expect("build should fail");
    assert!(matches!(
        err.downcast_ref::<ProbeError>(),
        Some(ProbeError::Bind { .. })
    ));
}
