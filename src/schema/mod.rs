//! Schema definitions for graphite-exporter
//!
//! `Sample` is the unit flowing from the line processor into the store and
//! out to scrapes. `MetricSchema` describes the columnar layout of backfilled
//! blocks, where labels are stored as columns rather than tag sets.

mod metrics;
mod sample;

pub use metrics::{
    is_reserved_column, MetricSchema, MetricSchemaBuilder, MetricType, METRIC_NAME_FIELD,
    TIMESTAMP_FIELD, VALUE_F64_FIELD,
};
pub use sample::{
    is_reserved_metric_name, is_valid_label_name, is_valid_metric_name, sanitize_metric_name,
    timestamp_from_unix_f64, Labels, Sample, SELF_METRIC_NAMES,
};
