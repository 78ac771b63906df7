//! Backfill integration tests
//!
//! Builds a small Whisper tree on disk, runs block creation against a local
//! output directory and reads the blocks back.

use arrow_array::{Array, Float64Array, StringArray, TimestampMillisecondArray};
use bytes::Bytes;
use chrono::DateTime;
use graphite_exporter::backfill::{
    create_blocks, format_block_table, validate_block_duration, BackfillOptions, BlockMeta,
    WhisperBuilder, WhisperReader, DEFAULT_BLOCK_DURATION_MS,
};
use graphite_exporter::clock::{Clock, ManualClock};
use graphite_exporter::config::ComponentFactory;
use graphite_exporter::mapper::{CacheType, GlobMapper};
use object_store::ObjectStore;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const NOW: i64 = 1_640_000_000;
// hour-aligned, so every point sits on a 60s slot
const BASE: u32 = (NOW - NOW % 3600) as u32;

const MAPPING: &str = r#"
mappings:
  - match: "servers.*.load"
    name: "server_load"
    labels:
      host: "$1"
  - match: "noise.*"
    action: drop
"#;

fn clock() -> Arc<dyn Clock> {
    Arc::new(ManualClock::new(DateTime::from_timestamp(NOW, 0).unwrap()))
}

/// Six hourly points per file, ending one hour before BASE.
fn write_fixture(root: &Path) {
    for (host, offset) in [("web1", 0.0), ("web2", 100.0)] {
        let mut builder = WhisperBuilder::new(&[(60, 1440)]);
        for k in 1..=6u32 {
            builder = builder.point(0, BASE - 3600 * k, offset + f64::from(k));
        }
        builder
            .write_to(&root.join("servers").join(host).join("load.wsp"))
            .unwrap();
    }
    WhisperBuilder::new(&[(60, 1440)])
        .point(0, BASE - 3600, 1.0)
        .write_to(&root.join("noise").join("chatter.wsp"))
        .unwrap();
}

fn mapper() -> GlobMapper {
    let mapper = GlobMapper::new(1, CacheType::Lru);
    mapper.init_from_yaml_str(MAPPING).unwrap();
    mapper
}

async fn read_parquet(store: &dyn ObjectStore, meta: &BlockMeta) -> Vec<arrow_array::RecordBatch> {
    let data: Bytes = store
        .get(&meta.data_path())
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    ParquetRecordBatchReaderBuilder::try_new(data)
        .unwrap()
        .build()
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[tokio::test]
async fn test_create_blocks_from_whisper() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_fixture(input.path());

    let store = ComponentFactory::create_block_store(output.path()).unwrap();
    let reader = WhisperReader::new(input.path(), clock());
    let blocks = create_blocks(&reader, &mapper(), store.clone(), &BackfillOptions::default())
        .await
        .unwrap();

    // points fall into four aligned 2h windows, the second and third holding two each
    let samples: Vec<u64> = blocks.iter().map(|b| b.stats.num_samples).collect();
    assert_eq!(samples, vec![2, 4, 4, 2]);
    for meta in &blocks {
        assert_eq!(meta.stats.num_series, 2);
        let window = meta.min_time.div_euclid(DEFAULT_BLOCK_DURATION_MS);
        assert_eq!(window, (meta.max_time - 1).div_euclid(DEFAULT_BLOCK_DURATION_MS));
        assert!(meta.size_bytes > 0);

        let on_disk = output
            .path()
            .join(meta.block_id.to_string())
            .join("meta.json");
        let parsed: BlockMeta =
            serde_json::from_slice(&std::fs::read(on_disk).unwrap()).unwrap();
        assert_eq!(&parsed, meta);
    }
    for pair in blocks.windows(2) {
        assert!(pair[0].max_time <= pair[1].min_time);
    }

    let batches = read_parquet(store.as_ref(), &blocks[0]).await;
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 2);
    let batch = &batches[0];
    let names = batch
        .column_by_name("metric_name")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    assert!(names.iter().all(|n| n == Some("server_load")));

    let hosts = batch
        .column_by_name("host")
        .unwrap()
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap();
    let mut hosts: Vec<&str> = hosts.iter().flatten().collect();
    hosts.sort();
    assert_eq!(hosts, vec!["web1", "web2"]);

    let timestamps = batch
        .column_by_name("timestamp")
        .unwrap()
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .unwrap();
    let oldest = i64::from(BASE - 3600 * 6) * 1000;
    assert!(timestamps.iter().all(|t| t == Some(oldest)));

    let values = batch
        .column_by_name("value_f64")
        .unwrap()
        .as_any()
        .downcast_ref::<Float64Array>()
        .unwrap();
    let mut values: Vec<f64> = values.iter().flatten().collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![6.0, 106.0]);
    assert_eq!(batch.column_by_name("host").unwrap().null_count(), 0);
}

#[tokio::test]
async fn test_small_appender_commits_multiple_batches() {
    let input = tempfile::tempdir().unwrap();
    write_fixture(input.path());

    let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
    let reader = WhisperReader::new(input.path(), clock());
    let options = BackfillOptions {
        max_samples_in_appender: 1,
        ..Default::default()
    };
    let blocks = create_blocks(&reader, &mapper(), store.clone(), &options)
        .await
        .unwrap();

    let total: u64 = blocks.iter().map(|b| b.stats.num_samples).sum();
    assert_eq!(total, 12);
    let batches = read_parquet(store.as_ref(), &blocks[1]).await;
    let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
    assert_eq!(rows, 4);
}

#[tokio::test]
async fn test_larger_block_duration_merges_windows() {
    let input = tempfile::tempdir().unwrap();
    write_fixture(input.path());

    let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
    let reader = WhisperReader::new(input.path(), clock());
    let options = BackfillOptions {
        block_duration_ms: validate_block_duration(Duration::from_secs(8 * 3600)).unwrap(),
        ..Default::default()
    };
    let blocks = create_blocks(&reader, &mapper(), store, &options)
        .await
        .unwrap();

    let samples: Vec<u64> = blocks.iter().map(|b| b.stats.num_samples).collect();
    assert_eq!(samples, vec![6, 6]);
}

#[tokio::test]
async fn test_strict_match_without_rules_writes_nothing() {
    let input = tempfile::tempdir().unwrap();
    write_fixture(input.path());

    let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
    let reader = WhisperReader::new(input.path(), clock());
    let options = BackfillOptions {
        strict_match: true,
        ..Default::default()
    };
    let blocks = create_blocks(&reader, &GlobMapper::default(), store, &options)
        .await
        .unwrap();
    assert!(blocks.is_empty());
}

#[test]
fn test_block_duration_validation() {
    assert!(validate_block_duration(Duration::from_secs(2 * 3600)).is_ok());
    assert!(validate_block_duration(Duration::from_secs(4 * 3600)).is_ok());
    assert!(validate_block_duration(Duration::from_secs(3 * 3600)).is_err());
    assert!(validate_block_duration(Duration::from_secs(6 * 3600)).is_err());
    assert!(validate_block_duration(Duration::from_secs(3600)).is_err());
}

#[tokio::test]
async fn test_block_table_lists_every_block() {
    let input = tempfile::tempdir().unwrap();
    write_fixture(input.path());

    let store: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
    let reader = WhisperReader::new(input.path(), clock());
    let blocks = create_blocks(&reader, &mapper(), store, &BackfillOptions::default())
        .await
        .unwrap();

    let table = format_block_table(&blocks, true);
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), blocks.len() + 1);
    assert!(lines[0].starts_with("BLOCK ID"));
    for meta in &blocks {
        assert!(table.contains(&meta.block_id.to_string()));
    }
}
