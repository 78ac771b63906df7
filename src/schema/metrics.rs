//! Metric type and block schema definitions
//!
//! Backfilled blocks use a label-as-columns model: every label key seen in a
//! block becomes a nullable string column next to the timestamp, metric name
//! and value columns.

use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Standard field names
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const METRIC_NAME_FIELD: &str = "metric_name";
pub const VALUE_F64_FIELD: &str = "value_f64";

/// True for names taken by the fixed block columns.
pub fn is_reserved_column(name: &str) -> bool {
    name == TIMESTAMP_FIELD || name == METRIC_NAME_FIELD || name == VALUE_F64_FIELD
}

/// Metric types understood by the mapping engine.
///
/// Graphite carries no type information, so ingested samples are always
/// [`MetricType::Gauge`]; the other variants exist so mapping rules can be
/// restricted with `match_metric_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricType {
    /// Point-in-time value
    Gauge,
    /// Monotonically increasing counter
    Counter,
    /// Timer/histogram/summary style observations
    Observer,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Gauge => "gauge",
            MetricType::Counter => "counter",
            MetricType::Observer => "observer",
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gauge" => Ok(Self::Gauge),
            "counter" => Ok(Self::Counter),
            "observer" | "timer" | "histogram" | "summary" => Ok(Self::Observer),
            other => Err(format!(
                "unknown metric type '{}'; expected one of gauge, counter, observer",
                other
            )),
        }
    }
}

/// Arrow schema for one backfilled block
#[derive(Debug, Clone)]
pub struct MetricSchema {
    schema: SchemaRef,
    label_columns: Vec<String>,
}

impl MetricSchema {
    /// Create a new schema builder
    pub fn builder() -> MetricSchemaBuilder {
        MetricSchemaBuilder::new()
    }

    /// Get the Arrow schema
    pub fn arrow_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Label column names, sorted
    pub fn label_columns(&self) -> &[String] {
        &self.label_columns
    }

    /// Check if a column exists
    pub fn has_column(&self, name: &str) -> bool {
        self.schema.field_with_name(name).is_ok()
    }
}

/// Builder for MetricSchema
#[derive(Debug, Default)]
pub struct MetricSchemaBuilder {
    labels: BTreeSet<String>,
}

impl MetricSchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a label column; duplicates are ignored
    pub fn with_label(mut self, name: impl Into<String>) -> Self {
        self.labels.insert(name.into());
        self
    }

    pub fn with_labels<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(names.into_iter().map(Into::into));
        self
    }

    /// Build the schema
    pub fn build(self) -> MetricSchema {
        // Millisecond precision, matching Prometheus block timestamps
        let mut fields = vec![
            Field::new(
                TIMESTAMP_FIELD,
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
                false,
            ),
            Field::new(METRIC_NAME_FIELD, DataType::Utf8, false),
            Field::new(VALUE_F64_FIELD, DataType::Float64, false),
        ];

        // A label literally called like a fixed column would clash
        let label_columns: Vec<String> = self
            .labels
            .into_iter()
            .filter(|name| !is_reserved_column(name))
            .collect();
        for name in &label_columns {
            fields.push(Field::new(name, DataType::Utf8, true));
        }

        MetricSchema {
            schema: Arc::new(Schema::new(fields)),
            label_columns,
        }
    }
}
