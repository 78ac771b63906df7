//! graphite_exporter binary
//!
//! Accepts Graphite plaintext samples over TCP and UDP and exposes them for
//! Prometheus to scrape.

use graphite_exporter::api::{self, HttpMetrics};
use graphite_exporter::config::{normalize_listen_address, ComponentFactory, ExporterConfig};
use graphite_exporter::ingester::{serve_tcp, serve_udp};
use graphite_exporter::mapper::CacheType;
use graphite_exporter::telemetry::{init_logging, LogFormat};
use graphite_exporter::Error;

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::signal;
use tracing::{error, info};

/// Prometheus exporter for metrics in the Graphite plaintext format
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address on which to expose metrics and the web interface
    #[arg(long = "web.listen-address", env = "GRAPHITE_EXPORTER_WEB_LISTEN_ADDRESS", default_value = ":9108")]
    web_listen_address: String,

    /// Path under which to expose Prometheus metrics
    #[arg(long = "web.telemetry-path", env = "GRAPHITE_EXPORTER_TELEMETRY_PATH", default_value = "/metrics")]
    telemetry_path: String,

    /// TCP and UDP address on which to accept samples
    #[arg(long = "graphite.listen-address", env = "GRAPHITE_EXPORTER_LISTEN_ADDRESS", default_value = ":9109")]
    graphite_listen_address: String,

    /// Metric mapping configuration file name
    #[arg(long = "graphite.mapping-config", env = "GRAPHITE_EXPORTER_MAPPING_CONFIG")]
    mapping_config: Option<PathBuf>,

    /// How long a sample is valid for
    #[arg(long = "graphite.sample-expiry", env = "GRAPHITE_EXPORTER_SAMPLE_EXPIRY", default_value = "5m", value_parser = humantime::parse_duration)]
    sample_expiry: Duration,

    /// Only store metrics that match the mapping configuration
    #[arg(long = "graphite.mapping-strict-match", env = "GRAPHITE_EXPORTER_STRICT_MATCH")]
    strict_match: bool,

    /// Drop samples whose label keys differ from those first seen for the metric
    #[arg(long = "graphite.label-consistency", env = "GRAPHITE_EXPORTER_LABEL_CONSISTENCY", default_value_t = true, action = ArgAction::Set)]
    label_consistency: bool,

    /// Maximum size of the metric mapping cache
    #[arg(long = "graphite.cache-size", env = "GRAPHITE_EXPORTER_CACHE_SIZE", default_value_t = 1000)]
    cache_size: usize,

    /// Metric mapping cache type
    #[arg(long = "graphite.cache-type", env = "GRAPHITE_EXPORTER_CACHE_TYPE", default_value = "lru", value_parser = ["lru", "random"])]
    cache_type: String,

    /// Capacity of the internal line and sample queues
    #[arg(long = "graphite.channel-capacity", env = "GRAPHITE_EXPORTER_CHANNEL_CAPACITY", default_value_t = 1024)]
    channel_capacity: usize,

    /// Check configuration and exit
    #[arg(long = "check-config")]
    check_config: bool,

    /// Log level: trace, debug, info, warn, error
    #[arg(long = "log.level", env = "GRAPHITE_EXPORTER_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format: logfmt or json
    #[arg(long = "log.format", env = "GRAPHITE_EXPORTER_LOG_FORMAT", default_value = "logfmt")]
    log_format: String,
}

impl Args {
    fn exporter_config(&self) -> Result<ExporterConfig, Error> {
        let config = ExporterConfig {
            web_listen_address: self.web_listen_address.clone(),
            telemetry_path: self.telemetry_path.clone(),
            graphite_listen_address: self.graphite_listen_address.clone(),
            mapping_config: self.mapping_config.clone(),
            sample_expiry: self.sample_expiry,
            strict_match: self.strict_match,
            label_consistency: self.label_consistency,
            cache_size: self.cache_size,
            cache_type: self.cache_type.parse::<CacheType>().map_err(Error::Config)?,
            channel_capacity: self.channel_capacity,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_format: LogFormat = args.log_format.parse()?;
    init_logging("graphite_exporter", &args.log_level, log_format)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting graphite_exporter");

    let config = args.exporter_config()?;
    let mapper = ComponentFactory::create_mapper(
        config.mapping_config.as_deref(),
        config.cache_size,
        config.cache_type,
    )
    .map_err(|e| {
        error!(error = %e, "Error loading metric mapping config");
        e
    })?;

    if args.check_config {
        info!("Configuration check successful, exiting");
        return Ok(());
    }

    let collector = ComponentFactory::create_collector(&config, mapper)?;
    let shutdown = collector.shutdown_token();

    let graphite_addr = normalize_listen_address(&config.graphite_listen_address);
    let tcp = TcpListener::bind(&graphite_addr).await.map_err(|e| {
        error!(address = %graphite_addr, error = %e, "Error binding to TCP socket");
        e
    })?;
    let udp = UdpSocket::bind(&graphite_addr).await.map_err(|e| {
        error!(address = %graphite_addr, error = %e, "Error listening to UDP address");
        e
    })?;
    tokio::spawn(serve_tcp(tcp, collector.clone(), shutdown.clone()));
    tokio::spawn(serve_udp(udp, collector.clone(), shutdown.clone()));

    let http_metrics = HttpMetrics::new()?;
    let registry = Arc::new(api::build_registry(&collector, &http_metrics)?);
    let router = api::build_http_router(config.api_config(), collector.clone(), registry, http_metrics);

    let web_addr = normalize_listen_address(&config.web_listen_address);
    let listener = TcpListener::bind(&web_addr).await?;

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        signal_token.cancel();
    });

    info!(
        web_address = %web_addr,
        graphite_address = %graphite_addr,
        telemetry_path = %config.telemetry_path,
        "graphite_exporter ready"
    );

    let http_shutdown = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    collector.shutdown().await;
    info!("graphite_exporter shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

