//! Line processing and scrape throughput benchmark

use graphite_exporter::api::samples_to_families;
use graphite_exporter::clock::{Clock, SystemClock};
use graphite_exporter::ingester::{IngestMetrics, LineProcessor, ProcessorConfig};
use graphite_exporter::mapper::{CacheType, GlobMapper, MetricMapper};
use graphite_exporter::schema::{Labels, MetricType, Sample};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

const MAPPING: &str = r#"
mappings:
  - match: "servers.*.cpu.*"
    name: "server_cpu_${2}"
    labels:
      host: "$1"
  - match: "servers.*.disk.*.*"
    name: "server_disk_${3}"
    labels:
      host: "$1"
      device: "$2"
  - match: '^app\.(?P<svc>[a-z_]+)\.requests\.(?P<code>\d+)$'
    match_type: regex
    name: "app_requests"
    labels:
      service: "${svc}"
      code: "${code}"
"#;

fn create_lines(count: usize) -> Vec<String> {
    let ts = chrono::Utc::now().timestamp();
    (0..count)
        .map(|i| match i % 4 {
            0 => format!("servers.host{:02}.cpu.user {} {}", i % 50, i, ts),
            1 => format!("servers.host{:02}.disk.sda.reads {} {}", i % 50, i, ts),
            2 => format!("app.checkout.requests.{} {} {}", 200 + i % 5, i, ts),
            _ => format!("unmapped.metric.n{};env=prod {} {}", i % 20, i, ts),
        })
        .collect()
}

fn create_processor(cache_size: usize) -> LineProcessor {
    let mapper = GlobMapper::new(cache_size, CacheType::Lru);
    mapper.init_from_yaml_str(MAPPING).unwrap();
    let mapper: Arc<dyn MetricMapper> = Arc::new(mapper);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    LineProcessor::new(
        ProcessorConfig::default(),
        mapper,
        IngestMetrics::new(Duration::from_secs(300)).unwrap(),
        clock,
    )
}

fn benchmark_line_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_processing");
    let lines = create_lines(10_000);
    group.throughput(Throughput::Elements(lines.len() as u64));

    for cache_size in [0, 1000] {
        let processor = create_processor(cache_size);
        group.bench_function(format!("cache_{}", cache_size), |b| {
            b.iter(|| {
                for line in &lines {
                    let _ = black_box(processor.process(line));
                }
            });
        });
    }

    group.finish();
}

fn benchmark_mapping_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapping_lookup");
    let mapper = GlobMapper::new(0, CacheType::Lru);
    mapper.init_from_yaml_str(MAPPING).unwrap();

    for name in ["servers.web1.cpu.user", "app.checkout.requests.200", "no.match.here"] {
        group.bench_function(name, |b| {
            b.iter(|| black_box(mapper.get_mapping(black_box(name), MetricType::Gauge)));
        });
    }

    group.finish();
}

fn benchmark_exposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("exposition");

    for series in [1_000, 10_000] {
        group.throughput(Throughput::Elements(series as u64));
        let now = chrono::Utc::now();
        let samples: Vec<Sample> = (0..series)
            .map(|i| {
                let name = format!("metric_{}", i % 100);
                let mut labels = Labels::new();
                labels.insert("instance".to_string(), format!("i{}", i));
                Sample {
                    original_identifier: format!("metric.{}.i{}", i % 100, i),
                    help: Sample::default_help(&name),
                    name,
                    value: i as f64,
                    labels,
                    timestamp: now,
                    metric_type: MetricType::Gauge,
                }
            })
            .collect();
        let mut samples = samples;
        samples.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));

        group.bench_function(format!("{}_series", series), |b| {
            b.iter(|| black_box(samples_to_families(&samples)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_line_processing,
    benchmark_mapping_lookup,
    benchmark_exposition,
);

criterion_main!(benches);
