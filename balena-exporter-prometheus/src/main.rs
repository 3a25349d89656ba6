//! Prometheus exporter for balena fleets.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use balena_client::{Application, BalenaClient, Device, FleetApi, MockFleet, Release};
use balena_exporter_prometheus::config::LogFormat;
use balena_exporter_prometheus::{BalenaMetrics, ExporterConfig, FleetPoller, HttpServer};

/// Prometheus exporter for balena fleets.
#[derive(Parser, Debug)]
#[command(name = "balena-exporter-prometheus")]
#[command(about = "Export balena fleet state as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format). Environment variables
    /// override its values.
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides
    /// `logging.level` from the configuration file.
    #[arg(long)]
    log_level: Option<String>,

    /// Serve a built-in sample fleet instead of contacting the API.
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    config.apply_process_env()?;
    config.override_log_level(args.log_level)?;

    // Initialize logging
    let log_level = config.logging.max_level()?;
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("balena_exporter_prometheus={}", log_level).parse()?)
        .add_directive(format!("balena_client={}", log_level).parse()?);

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }

    info!("Starting balena Prometheus exporter");

    if args.demo {
        info!("Demo mode: serving built-in sample fleet");
        return serve(demo_fleet(), config).await;
    }

    let mut client = BalenaClient::new(
        &config.balena.api_uri,
        Duration::from_secs(config.balena.request_timeout_secs),
    )?;
    match &config.balena.api_token {
        Some(token) => client = client.with_token(token.clone()),
        None => {
            client
                .login(&config.balena.username, &config.balena.password)
                .await?
        }
    }

    serve(client, config).await
}

/// Run the poller and the HTTP server until a signal or a fatal poll error.
async fn serve<A: FleetApi + 'static>(api: A, config: ExporterConfig) -> anyhow::Result<()> {
    let listen_addr = config.prometheus.listen_addr()?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(BalenaMetrics::new());
    let poller = FleetPoller::new(api, metrics.clone(), &config.polling);
    let stats = poller.stats();
    let http_server = HttpServer::new(
        metrics,
        stats.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Start poller
    let mut poller_task = tokio::spawn(poller.run(shutdown_rx));

    // Wait for a shutdown signal or for the poller to give up
    let mut poll_error = None;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate_signal() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut poller_task => {
            match result {
                Ok(Err(e)) => poll_error = Some(anyhow::Error::new(e)),
                Err(e) => poll_error = Some(anyhow::anyhow!("Poller task failed: {}", e)),
                Ok(Ok(())) => {}
            }
        }
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if !poller_task.is_finished() {
            let _ = poller_task.await;
        }
        let _ = http_task.await;
    })
    .await;

    // Print final stats
    let stats = stats.read().clone();
    info!(
        cycles_completed = stats.cycles_completed,
        cycles_failed = stats.cycles_failed,
        devices = stats.last_device_count,
        "Final statistics"
    );

    info!("Exporter stopped");

    match poll_error {
        Some(e) => {
            error!("Exiting after failed poll cycle: {}", e);
            Err(e)
        }
        None => Ok(()),
    }
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

/// Small fleet for `--demo`.
fn demo_fleet() -> MockFleet {
    MockFleet::new()
        .with_application(Application::new(1, "weather-stations"))
        .with_application(Application::new(2, "gateways"))
        .with_release(Release::new(100, "4f2a9c1", "2024-03-10T09:15:00.000Z"))
        .with_release(Release::new(101, "b7e03d8", "2024-04-22T16:40:12.250Z"))
        .with_device(
            Device::new("7c1e5f0a9b2d4e6f8a1c3e5b7d9f0a2c", 1)
                .with_release(100)
                .with_memory_usage(312.0)
                .with_status("Idle")
                .with_overall_status("online"),
        )
        .with_device(
            Device::new("e2b4d6f8a0c2e4f6b8d0a2c4e6f8b0d2", 1)
                .with_release(101)
                .with_memory_usage(298.0)
                .with_status("Updating")
                .with_overall_status("updating"),
        )
        .with_device(Device::new("9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c4d", 2).with_overall_status("offline"))
}
