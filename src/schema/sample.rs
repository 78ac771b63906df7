//! Live sample representation and Prometheus naming rules

use super::MetricType;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Label set, ordered by key so that equality and output are deterministic.
pub type Labels = BTreeMap<String, String>;

/// The latest reading of one Graphite series.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric path exactly as received, tag suffix included. Store key.
    pub original_identifier: String,
    /// Canonical Prometheus metric name
    pub name: String,
    pub value: f64,
    pub labels: Labels,
    pub help: String,
    pub timestamp: DateTime<Utc>,
    pub metric_type: MetricType,
}

impl Sample {
    /// Help text used when the mapping rule does not provide one.
    pub fn default_help(name: &str) -> String {
        format!("Graphite metric {}", name)
    }
}

/// Replace every character outside `[A-Za-z0-9_:]` with `_`.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Names of the exporter's own metrics, exposed next to the samples.
pub const SELF_METRIC_NAMES: [&str; 8] = [
    "graphite_last_processed_timestamp_seconds",
    "graphite_sample_expiry_seconds",
    "graphite_tag_parse_failures",
    "graphite_invalid_metrics",
    "graphite_exporter_live_samples",
    "graphite_exporter_http_requests_total",
    "graphite_exporter_http_request_duration_seconds",
    "graphite_exporter_build_info",
];

/// True if a sample named `name` would collide with a self-metric family,
/// including the histogram `_bucket`, `_sum` and `_count` series.
pub fn is_reserved_metric_name(name: &str) -> bool {
    SELF_METRIC_NAMES.contains(&name)
        || ["_bucket", "_sum", "_count"].iter().any(|suffix| {
            name.strip_suffix(suffix)
                .is_some_and(|base| SELF_METRIC_NAMES.contains(&base))
        })
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`, excluding the reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    if name.starts_with("__") {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Convert fractional Unix seconds into a UTC timestamp.
///
/// The integer part gives seconds and the fractional part nanoseconds.
/// Returns `None` for NaN, infinities and values chrono cannot represent.
pub fn timestamp_from_unix_f64(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    let secs = value.trunc();
    if secs < i64::MIN as f64 || secs > i64::MAX as f64 {
        return None;
    }
    let mut secs = secs as i64;
    let mut nanos = (value.fract() * 1e9).round() as i64;
    // Negative fractions borrow from the seconds part
    if nanos < 0 {
        secs = secs.checked_sub(1)?;
        nanos += 1_000_000_000;
    }
    if nanos >= 1_000_000_000 {
        secs = secs.checked_add(1)?;
        nanos -= 1_000_000_000;
    }
    DateTime::from_timestamp(secs, nanos as u32)
}
