//! Offline backfill of historical Graphite data
//!
//! Replays every series of a [`DbReader`] through the metric mapper and
//! writes one block per aligned time window to an object store:
//!
//! ```text
//! <block id>/data.parquet   timestamp, metric_name, value_f64, <label columns...>
//! <block id>/meta.json      BlockMeta
//! ```

mod block;
pub mod whisper;

pub use block::{BlockBuilder, BlockMeta, BlockStats, BlockWriter, DATA_FILE, META_FILE};
pub use whisper::{WhisperBuilder, WhisperFile, WhisperReader};

use crate::mapper::{MappingAction, MetricMapper};
use crate::schema::{
    is_reserved_column, is_valid_label_name, is_valid_metric_name, sanitize_metric_name, Labels,
    MetricSchema, MetricType,
};
use crate::{Error, Result};
use bytes::Bytes;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prometheus' base block duration
pub const DEFAULT_BLOCK_DURATION_MS: i64 = 2 * 60 * 60 * 1000;

/// One stored value, timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub timestamp: i64,
    pub value: f64,
}

/// Source of historical series
pub trait DbReader {
    /// Every metric name in the database
    fn metrics(&self) -> Result<Vec<String>>;

    /// Oldest and newest non-NaN timestamps across all metrics, milliseconds
    fn min_max_timestamps(&self) -> Result<(i64, i64)>;

    /// Points with `from < t <= until`, sorted, NaN-free
    fn points(&self, metric: &str, from_ms: i64, until_ms: i64) -> Result<Vec<Point>>;
}

#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub block_duration_ms: i64,
    /// Samples buffered before a record batch is written
    pub max_samples_in_appender: usize,
    pub strict_match: bool,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        Self {
            block_duration_ms: DEFAULT_BLOCK_DURATION_MS,
            max_samples_in_appender: 5000,
            strict_match: false,
        }
    }
}

/// A source metric resolved to its exported name and labels
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSeries {
    /// Name in the source database
    pub metric: String,
    pub name: String,
    pub labels: Labels,
}

/// Block duration in milliseconds; must be a power-of-two multiple of 2h.
pub fn validate_block_duration(duration: Duration) -> Result<i64> {
    let invalid = || Error::InvalidBlockDuration(humantime::format_duration(duration).to_string());
    let ms = i64::try_from(duration.as_millis()).map_err(|_| invalid())?;
    if ms == 0 || ms % DEFAULT_BLOCK_DURATION_MS != 0 {
        return Err(invalid());
    }
    let multiple = ms / DEFAULT_BLOCK_DURATION_MS;
    if !(multiple as u64).is_power_of_two() {
        return Err(invalid());
    }
    Ok(ms)
}

/// Map every source metric once; dropped metrics are left out.
pub fn resolve_series(
    metrics: &[String],
    mapper: &dyn MetricMapper,
    strict_match: bool,
) -> Vec<ResolvedSeries> {
    let mut resolved = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let mapping = mapper.get_mapping(metric, MetricType::Gauge);
        let (name, labels) = match mapping {
            Some(m) if m.action == MappingAction::Drop => continue,
            Some(m) => (sanitize_metric_name(&m.name), m.labels),
            None if strict_match => continue,
            None => (sanitize_metric_name(metric), Labels::new()),
        };
        if !is_valid_metric_name(&name) || !labels.keys().all(|k| is_valid_label_name(k)) {
            warn!(metric = %metric, name = %name, "Skipping metric with invalid name");
            continue;
        }
        if let Some(label) = labels.keys().find(|k| is_reserved_column(k)) {
            warn!(
                metric = %metric,
                name = %name,
                label = %label,
                "Skipping metric, label name is a reserved block column"
            );
            continue;
        }
        resolved.push(ResolvedSeries {
            metric: metric.clone(),
            name,
            labels,
        });
    }
    resolved
}

/// Write one block per window `[t, t + block)` from the aligned minimum
/// timestamp up to the maximum. Windows without samples produce no block.
pub async fn create_blocks(
    reader: &dyn DbReader,
    mapper: &dyn MetricMapper,
    store: Arc<dyn ObjectStore>,
    options: &BackfillOptions,
) -> Result<Vec<BlockMeta>> {
    if options.max_samples_in_appender == 0 {
        return Err(Error::Config(
            "max samples in appender must be positive".to_string(),
        ));
    }
    let block = options.block_duration_ms;
    let (mint, maxt) = reader.min_max_timestamps()?;
    let mint = mint.div_euclid(block) * block;

    let series = resolve_series(&reader.metrics()?, mapper, options.strict_match);
    let schema = MetricSchema::builder()
        .with_labels(series.iter().flat_map(|s| s.labels.keys().cloned()))
        .build();
    info!(
        series = series.len(),
        mint,
        maxt,
        block_duration_ms = block,
        "Starting block creation"
    );

    let writer = BlockWriter::new()?;
    let mut written = Vec::new();
    let mut t = mint;
    while t <= maxt {
        let mut builder = writer.start(&schema)?;
        for (idx, s) in series.iter().enumerate() {
            // Reader bounds are (from, until]; shift by one second for [t, t + block)
            for point in reader.points(&s.metric, t - 1000, t + block - 1000)? {
                builder.append(idx, s, point.timestamp, point.value);
                if builder.pending() >= options.max_samples_in_appender {
                    builder.commit()?;
                }
            }
        }

        match builder.finish()? {
            Some((data, meta)) => {
                write_block(store.as_ref(), data, &meta).await?;
                info!(
                    block_id = %meta.block_id,
                    min_time = meta.min_time,
                    max_time = meta.max_time,
                    samples = meta.stats.num_samples,
                    "Wrote block"
                );
                written.push(meta);
            }
            None => debug!(window_start = t, "No samples in window"),
        }
        t += block;
    }
    Ok(written)
}

async fn write_block(store: &dyn ObjectStore, data: Bytes, meta: &BlockMeta) -> Result<()> {
    store.put(&meta.data_path(), data.into()).await?;
    let json = serde_json::to_vec_pretty(meta)?;
    store.put(&meta.meta_path(), Bytes::from(json).into()).await?;
    Ok(())
}

fn format_time(ms: i64, human_readable: bool) -> String {
    if !human_readable {
        return ms.to_string();
    }
    match chrono::DateTime::from_timestamp(ms.div_euclid(1000), 0) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S +0000 UTC").to_string(),
        None => ms.to_string(),
    }
}

fn format_bytes(bytes: u64, human_readable: bool) -> String {
    if !human_readable {
        return bytes.to_string();
    }
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Render written blocks as an aligned table.
pub fn format_block_table(blocks: &[BlockMeta], human_readable: bool) -> String {
    const HEADER: [&str; 7] = [
        "BLOCK ID",
        "MIN TIME",
        "MAX TIME",
        "DURATION",
        "NUM SAMPLES",
        "NUM SERIES",
        "SIZE",
    ];
    const MIN_WIDTH: usize = 13;
    const PADDING: usize = 2;

    let mut rows: Vec<Vec<String>> = vec![HEADER.iter().map(|h| h.to_string()).collect()];
    for meta in blocks {
        let span = Duration::from_millis(meta.max_time.saturating_sub(meta.min_time).max(0) as u64);
        rows.push(vec![
            meta.block_id.to_string(),
            format_time(meta.min_time, human_readable),
            format_time(meta.max_time, human_readable),
            humantime::format_duration(span).to_string(),
            meta.stats.num_samples.to_string(),
            meta.stats.num_series.to_string(),
            format_bytes(meta.size_bytes, human_readable),
        ]);
    }

    let widths: Vec<usize> = (0..HEADER.len())
        .map(|col| {
            rows.iter()
                .map(|r| r[col].len() + PADDING)
                .max()
                .unwrap_or(0)
                .max(MIN_WIDTH)
        })
        .collect();

    let mut out = String::new();
    for row in rows {
        let last = row.len() - 1;
        for (col, cell) in row.iter().enumerate() {
            if col == last {
                out.push_str(cell);
            } else {
                out.push_str(&format!("{:<width$}", cell, width = widths[col]));
            }
        }
        out.push('\n');
    }
    out
}
