//! Block writer: Parquet data file plus JSON metadata per time window.

use super::ResolvedSeries;
use crate::schema::MetricSchema;
use crate::{Error, Result};
use arrow_array::{ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMillisecondArray};
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::{EnabledStatistics, WriterProperties, WriterVersion};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

pub const DATA_FILE: &str = "data.parquet";
pub const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStats {
    pub num_samples: u64,
    pub num_series: u64,
}

/// Contents of `meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: Uuid,
    /// First sample timestamp, milliseconds, inclusive
    pub min_time: i64,
    /// Last sample timestamp + 1, milliseconds, exclusive
    pub max_time: i64,
    pub stats: BlockStats,
    /// Size of the data file in bytes
    pub size_bytes: u64,
    pub version: u32,
}

impl BlockMeta {
    pub fn data_path(&self) -> object_store::path::Path {
        object_store::path::Path::from(format!("{}/{}", self.block_id, DATA_FILE))
    }

    pub fn meta_path(&self) -> object_store::path::Path {
        object_store::path::Path::from(format!("{}/{}", self.block_id, META_FILE))
    }
}

/// Writer properties shared by every block
#[derive(Debug, Clone)]
pub struct BlockWriter {
    props: WriterProperties,
}

impl BlockWriter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            props: Self::build_writer_properties()?,
        })
    }

    fn build_writer_properties() -> Result<WriterProperties> {
        Ok(WriterProperties::builder()
            .set_writer_version(WriterVersion::PARQUET_2_0)
            .set_compression(Compression::ZSTD(ZstdLevel::try_new(3)?))
            // metric names and label values repeat heavily
            .set_dictionary_enabled(true)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_data_page_size_limit(1024 * 1024)
            .build())
    }

    /// Start a new block for `schema`.
    pub fn start(&self, schema: &MetricSchema) -> Result<BlockBuilder> {
        let writer =
            ArrowWriter::try_new(Vec::new(), schema.arrow_schema(), Some(self.props.clone()))?;
        Ok(BlockBuilder {
            schema: schema.clone(),
            writer,
            pending: PendingColumns::new(schema.label_columns().len()),
            min_time: i64::MAX,
            max_time: i64::MIN,
            num_samples: 0,
            series: HashSet::new(),
        })
    }
}

#[derive(Debug, Default)]
struct PendingColumns {
    timestamps: Vec<i64>,
    names: Vec<String>,
    values: Vec<f64>,
    labels: Vec<Vec<Option<String>>>,
}

impl PendingColumns {
    fn new(label_columns: usize) -> Self {
        Self {
            labels: vec![Vec::new(); label_columns],
            ..Default::default()
        }
    }

    fn len(&self) -> usize {
        self.timestamps.len()
    }
}

/// Accumulates samples of one block, writing a record batch per commit.
pub struct BlockBuilder {
    schema: MetricSchema,
    writer: ArrowWriter<Vec<u8>>,
    pending: PendingColumns,
    min_time: i64,
    max_time: i64,
    num_samples: u64,
    series: HashSet<usize>,
}

impl BlockBuilder {
    /// Append one sample of the series at `series_idx`.
    pub fn append(
        &mut self,
        series_idx: usize,
        series: &ResolvedSeries,
        timestamp: i64,
        value: f64,
    ) {
        self.pending.timestamps.push(timestamp);
        self.pending.names.push(series.name.clone());
        self.pending.values.push(value);
        for (column, label) in self.schema.label_columns().iter().enumerate() {
            self.pending.labels[column].push(series.labels.get(label).cloned());
        }

        self.min_time = self.min_time.min(timestamp);
        self.max_time = self.max_time.max(timestamp);
        self.num_samples += 1;
        self.series.insert(series_idx);
    }

    /// Samples appended since the last commit
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write pending samples as one record batch.
    pub fn commit(&mut self) -> Result<()> {
        if self.pending.len() == 0 {
            return Ok(());
        }
        let pending = std::mem::replace(
            &mut self.pending,
            PendingColumns::new(self.schema.label_columns().len()),
        );

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(TimestampMillisecondArray::from(pending.timestamps).with_timezone("UTC")),
            Arc::new(StringArray::from(pending.names)),
            Arc::new(Float64Array::from(pending.values)),
        ];
        for values in pending.labels {
            columns.push(Arc::new(StringArray::from(values)));
        }

        let batch = RecordBatch::try_new(self.schema.arrow_schema(), columns)?;
        self.writer.write(&batch)?;
        Ok(())
    }

    /// Close the block. Returns `None` when nothing was appended.
    pub fn finish(mut self) -> Result<Option<(Bytes, BlockMeta)>> {
        self.commit()?;
        if self.num_samples == 0 {
            return Ok(None);
        }
        let data = self.writer.into_inner()?;
        let max_time = self
            .max_time
            .checked_add(1)
            .ok_or_else(|| Error::Internal("block max time overflow".to_string()))?;

        let meta = BlockMeta {
            block_id: Uuid::new_v4(),
            min_time: self.min_time,
            max_time,
            stats: BlockStats {
                num_samples: self.num_samples,
                num_series: self.series.len() as u64,
            },
            size_bytes: data.len() as u64,
            version: 1,
        };
        Ok(Some((Bytes::from(data), meta)))
    }
}
