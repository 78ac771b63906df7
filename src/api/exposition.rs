//! Prometheus text exposition of live samples.

use crate::ingester::SampleStore;
use crate::schema::{Labels, Sample};
use crate::Result;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::debug;

/// Exposes every live sample in the store as a gauge.
///
/// Samples are grouped into one family per metric name; the help text of the
/// first sample in a family is used for the whole family. The collector also
/// reports `graphite_exporter_live_samples`, which doubles as its registry
/// descriptor.
pub struct SnapshotCollector {
    store: Arc<SampleStore>,
    live_samples: prometheus::Gauge,
}

impl SnapshotCollector {
    pub fn new(store: Arc<SampleStore>) -> Result<Self> {
        let live_samples = prometheus::Gauge::with_opts(prometheus::Opts::new(
            "graphite_exporter_live_samples",
            "Number of non-expired samples exposed by the last scrape.",
        ))?;
        Ok(Self {
            store,
            live_samples,
        })
    }
}

fn gauge_metric(labels: &Labels, value: f64) -> Metric {
    let mut metric = Metric::default();
    for (name, value) in labels {
        let mut pair = LabelPair::default();
        pair.set_name(name.clone());
        pair.set_value(value.clone());
        metric.mut_label().push(pair);
    }
    let mut gauge = Gauge::default();
    gauge.set_value(value);
    metric.set_gauge(gauge);
    metric
}

/// Group sorted samples into gauge families.
pub fn samples_to_families(samples: &[Sample]) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut last_labels: Option<&Labels> = None;

    for sample in samples {
        let same_family = families
            .last()
            .is_some_and(|family| family.get_name() == sample.name);

        if same_family {
            // Distinct identifiers can map onto the same series; keep the first
            if last_labels == Some(&sample.labels) {
                debug!(
                    metric = %sample.name,
                    original = %sample.original_identifier,
                    "Skipping duplicate series"
                );
                continue;
            }
        } else {
            let mut family = MetricFamily::default();
            family.set_name(sample.name.clone());
            family.set_help(sample.help.clone());
            family.set_field_type(MetricType::GAUGE);
            families.push(family);
        }

        if let Some(family) = families.last_mut() {
            family
                .mut_metric()
                .push(gauge_metric(&sample.labels, sample.value));
        }
        last_labels = Some(&sample.labels);
    }
    families
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        // Sample families change with every scrape and are not described
        self.live_samples.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let samples = self.store.snapshot();
        self.live_samples.set(samples.len() as f64);

        let mut families = self.live_samples.collect();
        families.extend(samples_to_families(&samples));
        families
    }
}

/// Encode everything in `registry` in the text format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::Error::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schema::MetricType as SampleType;
    use chrono::DateTime;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000;

    fn sample(id: &str, name: &str, labels: &[(&str, &str)], value: f64) -> Sample {
        Sample {
            original_identifier: id.to_string(),
            name: name.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            help: Sample::default_help(name),
            timestamp: DateTime::from_timestamp(NOW, 0).unwrap(),
            metric_type: SampleType::Gauge,
        }
    }

    fn store() -> Arc<SampleStore> {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(NOW, 0).unwrap()));
        Arc::new(SampleStore::new(Duration::from_secs(300), clock))
    }

    #[test]
    fn test_families_grouped_by_name() {
        let samples = vec![
            sample("a.1", "a", &[("host", "1")], 1.0),
            sample("a.2", "a", &[("host", "2")], 2.0),
            sample("b", "b", &[], 3.0),
        ];
        let families = samples_to_families(&samples);
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].get_metric().len(), 2);
        assert_eq!(families[0].get_field_type(), MetricType::GAUGE);
        assert_eq!(families[1].get_help(), "Graphite metric b");
    }

    #[test]
    fn test_duplicate_series_collapsed() {
        let samples = vec![sample("a.b", "a_b", &[], 1.0), sample("a-b", "a_b", &[], 2.0)];
        let families = samples_to_families(&samples);
        assert_eq!(families[0].get_metric().len(), 1);
        assert_eq!(families[0].get_metric()[0].get_gauge().get_value(), 1.0);
    }

    #[test]
    fn test_text_output() {
        let store = store();
        store.put(sample("load;host=web1", "load", &[("host", "web1")], 0.5));
        let registry = Registry::new();
        registry
            .register(Box::new(SnapshotCollector::new(store.clone()).unwrap()))
            .unwrap();

        let text = encode_text(&registry).unwrap();
        assert!(text.contains("# HELP load Graphite metric load"));
        assert!(text.contains("# TYPE load gauge"));
        assert!(text.contains("load{host=\"web1\"} 0.5"));
        assert!(text.contains("graphite_exporter_live_samples 1"));
    }
}
