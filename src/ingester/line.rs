//! Per-line parsing, mapping and drop policy.

use super::guard::LabelGuard;
use super::tags::parse_metric_name_and_tags;
use super::telemetry::IngestMetrics;
use crate::clock::Clock;
use crate::mapper::{MappingAction, MetricMapper};
use crate::schema::{
    is_reserved_metric_name, is_valid_label_name, is_valid_metric_name, sanitize_metric_name,
    timestamp_from_unix_f64, MetricType, Sample,
};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Why a line did not produce a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not exactly three space-separated fields
    MalformedLine,
    InvalidTags,
    /// Matched a rule with `action: drop`
    MappingDrop,
    /// No rule matched and strict matching is on
    StrictMatch,
    /// Metric or label name unusable after sanitizing, or taken by one of
    /// the exporter's own metrics
    InvalidName,
    /// Label-key set differs from the one first seen for the metric
    InconsistentLabels,
    InvalidValue,
    InvalidTimestamp,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::MalformedLine => "malformed_line",
            DropReason::InvalidTags => "invalid_tags",
            DropReason::MappingDrop => "mapping_drop",
            DropReason::StrictMatch => "strict_match",
            DropReason::InvalidName => "invalid_name",
            DropReason::InconsistentLabels => "inconsistent_labels",
            DropReason::InvalidValue => "invalid_value",
            DropReason::InvalidTimestamp => "invalid_timestamp",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Policy switches for the line processor
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Drop metrics that match no mapping rule
    pub strict_match: bool,
    /// Enforce a single label-key set per metric name
    pub label_consistency: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            strict_match: false,
            label_consistency: true,
        }
    }
}

/// Turns raw plaintext lines into samples.
pub struct LineProcessor {
    config: ProcessorConfig,
    mapper: Arc<dyn MetricMapper>,
    guard: LabelGuard,
    metrics: IngestMetrics,
    clock: Arc<dyn Clock>,
}

impl LineProcessor {
    pub fn new(
        config: ProcessorConfig,
        mapper: Arc<dyn MetricMapper>,
        metrics: IngestMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            mapper,
            guard: LabelGuard::new(),
            metrics,
            clock,
        }
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    /// Process one line. Drops are terminal for the line only.
    pub fn process(&self, raw_line: &str) -> Result<Sample, DropReason> {
        let line = raw_line.trim();
        debug!(line, "Incoming line");

        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() != 3 {
            info!(parts = parts.len(), line, "Invalid part count");
            return Err(DropReason::MalformedLine);
        }
        let original_identifier = parts[0];

        let (parsed_name, mut labels) = match parse_metric_name_and_tags(original_identifier) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.metrics.record_tag_parse_failure();
                info!(line, error = %e, "Invalid tags");
                return Err(DropReason::InvalidTags);
            }
        };

        let mapping = self.mapper.get_mapping(&parsed_name, MetricType::Gauge);
        match &mapping {
            Some(m) if m.action == MappingAction::Drop => {
                debug!(metric = %parsed_name, "Dropped by mapping rule");
                return Err(DropReason::MappingDrop);
            }
            None if self.config.strict_match => {
                debug!(metric = %parsed_name, "Dropped, no mapping and strict match enabled");
                return Err(DropReason::StrictMatch);
            }
            _ => {}
        }

        let (name, scale, help) = match mapping {
            Some(m) => {
                labels.extend(m.labels);
                (sanitize_metric_name(&m.name), m.scale, m.help)
            }
            None => (sanitize_metric_name(&parsed_name), None, None),
        };

        if !is_valid_metric_name(&name) || !labels.keys().all(|k| is_valid_label_name(k)) {
            self.metrics.record_invalid_metric();
            info!(metric = %name, line, "Dropped, invalid metric or label name");
            return Err(DropReason::InvalidName);
        }

        if is_reserved_metric_name(&name) {
            self.metrics.record_invalid_metric();
            info!(metric = %name, line, "Dropped, name collides with an exporter metric");
            return Err(DropReason::InvalidName);
        }

        if self.config.label_consistency && !self.guard.check(&name, &labels) {
            self.metrics.record_invalid_metric();
            info!(
                metric = %name,
                line,
                "Dropped because metric keys do not match previously used keys"
            );
            return Err(DropReason::InconsistentLabels);
        }

        let mut value: f64 = match parts[1].parse() {
            Ok(v) => v,
            Err(_) => {
                info!(line, "Invalid value");
                return Err(DropReason::InvalidValue);
            }
        };
        if let Some(scale) = scale {
            value *= scale;
        }

        let timestamp = match parts[2].parse::<f64>().ok().and_then(timestamp_from_unix_f64) {
            Some(ts) => ts,
            None => {
                info!(line, "Invalid timestamp");
                return Err(DropReason::InvalidTimestamp);
            }
        };

        let help = help.unwrap_or_else(|| Sample::default_help(&name));
        let sample = Sample {
            original_identifier: original_identifier.to_string(),
            name,
            value,
            labels,
            help,
            timestamp,
            metric_type: MetricType::Gauge,
        };
        debug!(metric = %sample.name, value = sample.value, "Processing sample");

        self.metrics
            .record_processed(self.clock.now().timestamp_micros() as f64 / 1e6);
        Ok(sample)
    }
}

impl fmt::Debug for LineProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineProcessor")
            .field("config", &self.config)
            .field("guarded_names", &self.guard.len())
            .finish()
    }
}
