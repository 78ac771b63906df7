//! HTTP-level telemetry for the metrics endpoint.

use crate::Result;
use axum::extract::{MatchedPath, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::time::Instant;
use tracing::{info_span, Instrument};

/// Request instruments, registered next to the exported samples.
#[derive(Clone)]
pub struct HttpMetrics {
    request_count: IntCounterVec,
    request_duration_seconds: HistogramVec,
}

impl HttpMetrics {
    pub fn new() -> Result<Self> {
        let request_count = IntCounterVec::new(
            Opts::new(
                "graphite_exporter_http_requests_total",
                "Total number of HTTP requests by route and status code",
            ),
            &["method", "route", "code"],
        )?;
        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "graphite_exporter_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "route"],
        )?;
        Ok(Self {
            request_count,
            request_duration_seconds,
        })
    }

    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.request_count.clone()))?;
        registry.register(Box::new(self.request_duration_seconds.clone()))?;
        Ok(())
    }

    fn record(&self, method: &str, route: &str, status: u16, elapsed_seconds: f64) {
        let code = status.to_string();
        self.request_count
            .with_label_values(&[method, route, &code])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[method, route])
            .observe(elapsed_seconds);
    }
}

/// `graphite_exporter_build_info` gauge, constant 1.
pub fn build_info() -> Result<GaugeVec> {
    let gauge = GaugeVec::new(
        Opts::new(
            "graphite_exporter_build_info",
            "A metric with a constant '1' value labeled by version and build target",
        ),
        &["version", "rustc_target_os", "rustc_target_arch"],
    )?;
    gauge
        .with_label_values(&[
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            std::env::consts::ARCH,
        ])
        .set(1.0);
    Ok(gauge)
}

/// HTTP middleware that records request count and duration and opens a span.
pub async fn http_observability_middleware(
    State(metrics): State<HttpMetrics>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let span = info_span!(
        "http.request",
        http.request.method = %method,
        http.route = %route
    );
    let response = next.run(req).instrument(span).await;
    metrics.record(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
