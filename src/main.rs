//! DNS Latency Monitor
//!
//! Sends A queries for a set of domains to a set of nameservers at a fixed
//! interval and reports the round-trip latency of every probe.

use anyhow::Result;
use clap::Parser;
use dns_latency_monitor::{app::App, cli::Cli, config::Config, logging};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = Config::load(&cli).unwrap_or_else(|err| {
        eprintln!("Config error: {err}");
        std::process::exit(1);
    });

    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("Config error: {issue}");
        }
        std::process::exit(1);
    }

    if cli.check {
        println!("Configuration OK");
        return Ok(());
    }

    let _log_guard = logging::init(&config)?;

    info!("DNS latency monitor starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Nameservers: {}", config.nameservers.join(", "));
    info!("Domains: {}", config.domains.join(", "));
    info!("Seconds Between Tests: {}", config.seconds_between_tests);
    info!("Seconds Before Timeout: {}", config.seconds_before_timeout);
    info!("Log Level: {}", config.log_level);
    match &config.log_file_folder {
        Some(folder) => info!("Log File Folder: {}", folder.display()),
        None => info!("Log File Folder: Not configured"),
    }
    if config.metrics.enabled {
        info!("Metrics: Prometheus on {}", config.metrics.listen_address);
    } else if config.metrics.log_metrics {
        info!(
            "Metrics: logged every {}s",
            config.metrics.log_aggregation_seconds
        );
    } else {
        info!("Metrics: Disabled");
    }
    info!("-------------------------------------------------------");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = App::builder(config).build(shutdown_rx).await?;
    let app_handle = tokio::spawn(app.run());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Shutting down gracefully...");
    // The receiver lives inside the app task; a send error means it already exited.
    let _ = shutdown_tx.send(true);

    match app_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Application exited with error: {:#}", e),
        Err(e) => error!("Application task panicked: {}", e),
    }

    info!("Exiting.");
    Ok(())
}
