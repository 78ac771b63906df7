//! Ingestion self-metrics.
//!
//! Owned by the collector and registered into the exporter's registry, so
//! that several collectors (e.g. in tests) never share counters.

use crate::Result;
use prometheus::{Gauge, IntCounter, Opts, Registry};
use std::time::Duration;

#[derive(Clone)]
pub struct IngestMetrics {
    last_processed: Gauge,
    sample_expiry: Gauge,
    tag_parse_failures: IntCounter,
    invalid_metrics: IntCounter,
}

impl IngestMetrics {
    pub fn new(sample_expiry: Duration) -> Result<Self> {
        let last_processed = Gauge::with_opts(Opts::new(
            "graphite_last_processed_timestamp_seconds",
            "Unix timestamp of the last processed graphite metric.",
        ))?;
        let sample_expiry_gauge = Gauge::with_opts(Opts::new(
            "graphite_sample_expiry_seconds",
            "How long in seconds a metric sample is valid for.",
        ))?;
        sample_expiry_gauge.set(sample_expiry.as_secs_f64());

        let tag_parse_failures = IntCounter::with_opts(Opts::new(
            "graphite_tag_parse_failures",
            "Total count of samples with invalid tags",
        ))?;
        let invalid_metrics = IntCounter::with_opts(Opts::new(
            "graphite_invalid_metrics",
            "Total count of metrics dropped due to mismatched label keys",
        ))?;

        Ok(Self {
            last_processed,
            sample_expiry: sample_expiry_gauge,
            tag_parse_failures,
            invalid_metrics,
        })
    }

    /// Register every instrument with `registry`.
    pub fn register(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.last_processed.clone()))?;
        registry.register(Box::new(self.sample_expiry.clone()))?;
        registry.register(Box::new(self.tag_parse_failures.clone()))?;
        registry.register(Box::new(self.invalid_metrics.clone()))?;
        Ok(())
    }

    pub fn record_processed(&self, unix_seconds: f64) {
        self.last_processed.set(unix_seconds);
    }

    pub fn record_tag_parse_failure(&self) {
        self.tag_parse_failures.inc();
    }

    pub fn record_invalid_metric(&self) {
        self.invalid_metrics.inc();
    }

    pub fn tag_parse_failures(&self) -> u64 {
        self.tag_parse_failures.get()
    }

    pub fn invalid_metrics(&self) -> u64 {
        self.invalid_metrics.get()
    }

    pub fn last_processed(&self) -> f64 {
        self.last_processed.get()
    }
}

impl std::fmt::Debug for IngestMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestMetrics")
            .field("tag_parse_failures", &self.tag_parse_failures.get())
            .field("invalid_metrics", &self.invalid_metrics.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_gather() {
        let metrics = IngestMetrics::new(Duration::from_secs(300)).unwrap();
        let registry = Registry::new();
        metrics.register(&registry).unwrap();
        metrics.record_tag_parse_failure();

        let families = registry.gather();
        let names: Vec<_> = families.iter().map(|f| f.get_name().to_string()).collect();
        assert!(names.contains(&"graphite_sample_expiry_seconds".to_string()));
        assert!(names.contains(&"graphite_tag_parse_failures".to_string()));

        let expiry = families
            .iter()
            .find(|f| f.get_name() == "graphite_sample_expiry_seconds")
            .unwrap();
        assert_eq!(expiry.get_metric()[0].get_gauge().get_value(), 300.0);
    }

    #[test]
    fn test_instances_are_independent() {
        let a = IngestMetrics::new(Duration::from_secs(60)).unwrap();
        let b = IngestMetrics::new(Duration::from_secs(60)).unwrap();
        a.record_invalid_metric();
        assert_eq!(a.invalid_metrics(), 1);
        assert_eq!(b.invalid_metrics(), 0);
    }
}
