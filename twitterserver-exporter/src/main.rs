//! Prometheus exporter for Twitter Server statistics.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use twitterserver_exporter::config::LogFormat;
use twitterserver_exporter::{Exporter, ExporterConfig, HttpServer};

/// Prometheus exporter for Twitter Server statistics.
#[derive(Parser, Debug)]
#[command(name = "twitterserver-exporter")]
#[command(about = "Export Twitter Server metrics.json as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// Address on which to expose metrics (overrides config).
    #[arg(long = "web.listen-address")]
    listen_address: Option<String>,

    /// Path under which to expose Prometheus metrics (overrides config).
    #[arg(long = "web.telemetry-path")]
    telemetry_path: Option<String>,

    /// URL of the Twitter Server metrics.json (overrides config).
    #[arg(long = "twitterserver.url")]
    url: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(listen) = self.listen_address {
            config.web.listen = listen;
        }
        if let Some(path) = self.telemetry_path {
            config.web.path = path;
        }
        if let Some(url) = self.url {
            config.source.url = url;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
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
    args.apply(&mut config);
    config.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("twitterserver_exporter={}", config.logging.level))
    });

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

    info!(url = %config.source.url, "Starting Twitter Server exporter");

    let exporter = Arc::new(Exporter::from_config(&config)?);
    let listen_addr = config.web.listen_addr()?;
    let http_server = HttpServer::new(exporter.clone(), listen_addr, config.web.path.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut http_task = tokio::spawn(http_server.run(shutdown_rx));

    tokio::select! {
        result = &mut http_task => {
            // The server only returns on its own when it failed to start.
            return result?;
        }
        _ = shutdown_signal() => {}
    }

    shutdown_tx.send(true)?;

    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server exited with error"),
        Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
        Err(_) => warn!("Timed out waiting for HTTP server to stop"),
        Ok(Ok(Ok(()))) => {}
    }

    let stats = exporter.stats();
    info!(
        scrape_errors = stats.errors_total(),
        last_scrape_duration_secs = stats.last_duration_secs(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
