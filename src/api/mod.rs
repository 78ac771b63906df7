//! HTTP surface of the exporter
//!
//! - `<telemetry path>`: Prometheus text exposition of live samples and
//!   self-metrics
//! - `/`: landing page linking the metrics path
//! - `/health`, `/ready`: liveness and readiness checks

pub mod exposition;
mod telemetry;

pub use exposition::{encode_text, samples_to_families, SnapshotCollector};
pub use telemetry::{build_info, http_observability_middleware, HttpMetrics};

use crate::ingester::Collector;
use crate::Result;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::Registry;
use std::sync::Arc;
use tracing::error;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Path serving the exposition
    pub telemetry_path: String,
    /// Graphite ingest address, shown on the landing page
    pub graphite_address: String,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            telemetry_path: "/metrics".to_string(),
            graphite_address: ":9109".to_string(),
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
    pub collector: Arc<Collector>,
    pub config: ApiServerConfig,
}

/// Registry holding the live samples, ingestion metrics, HTTP metrics and
/// build info.
pub fn build_registry(collector: &Collector, http_metrics: &HttpMetrics) -> Result<Registry> {
    let registry = Registry::new();
    registry.register(Box::new(SnapshotCollector::new(collector.store().clone())?))?;
    collector.metrics().register(&registry)?;
    http_metrics.register(&registry)?;
    registry.register(Box::new(build_info()?))?;
    Ok(registry)
}

/// Build the HTTP router
pub fn build_http_router(
    config: ApiServerConfig,
    collector: Arc<Collector>,
    registry: Arc<Registry>,
    http_metrics: HttpMetrics,
) -> Router {
    use axum::middleware;

    let mut router = Router::new()
        .route(&config.telemetry_path, get(metrics_handler))
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    if config.telemetry_path != "/" {
        router = router.route("/", get(landing_page));
    }

    router
        .with_state(ApiState {
            registry,
            collector,
            config,
        })
        .layer(middleware::from_fn_with_state(
            http_metrics,
            http_observability_middleware,
        ))
}

async fn metrics_handler(State(state): State<ApiState>) -> Response {
    match encode_text(&state.registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn landing_page(State(state): State<ApiState>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>Graphite Exporter</title></head>\n<body>\n\
         <h1>Graphite Exporter</h1>\n<p>Prometheus Graphite Exporter</p>\n\
         <p>Accepting plaintext Graphite samples over TCP and UDP on {}</p>\n\
         <ul><li><a href=\"{}\">Metrics</a></li></ul>\n</body>\n</html>\n",
        state.config.graphite_address, state.config.telemetry_path
    ))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn ready_check(State(state): State<ApiState>) -> (StatusCode, &'static str) {
    if state.collector.shutdown_token().is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING DOWN")
    } else {
        (StatusCode::OK, "READY")
    }
}
