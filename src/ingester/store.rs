//! In-memory latest-value store with age-based expiry.

use crate::clock::Clock;
use crate::schema::Sample;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Latest sample per original Graphite identifier.
pub struct SampleStore {
    samples: Mutex<HashMap<String, Sample>>,
    expiry: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl SampleStore {
    pub fn new(sample_expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            expiry: chrono::Duration::from_std(sample_expiry).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    /// Insert or replace. The last arrival wins regardless of its timestamp.
    pub fn put(&self, sample: Sample) {
        self.samples
            .lock()
            .insert(sample.original_identifier.clone(), sample);
    }

    /// Remove every sample older than the expiry window. Returns the count.
    pub fn sweep(&self) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.expiry) else {
            return 0;
        };
        let mut samples = self.samples.lock();
        let before = samples.len();
        samples.retain(|_, s| s.timestamp >= cutoff);
        let removed = before - samples.len();
        if removed > 0 {
            debug!(removed, remaining = samples.len(), "Expired stale samples");
        }
        removed
    }

    /// Live samples sorted by name, labels and original identifier.
    pub fn snapshot(&self) -> Vec<Sample> {
        let mut copied: Vec<Sample> = self.samples.lock().values().cloned().collect();

        if let Some(cutoff) = self.clock.now().checked_sub_signed(self.expiry) {
            copied.retain(|s| s.timestamp >= cutoff);
        }
        copied.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.labels.cmp(&b.labels))
                .then_with(|| a.original_identifier.cmp(&b.original_identifier))
        });
        copied
    }

    pub fn get(&self, original_identifier: &str) -> Option<Sample> {
        self.samples.lock().get(original_identifier).cloned()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_expiry(&self) -> chrono::Duration {
        self.expiry
    }
}

impl std::fmt::Debug for SampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleStore")
            .field("samples", &self.len())
            .field("expiry", &self.expiry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::schema::{Labels, MetricType};
    use chrono::{DateTime, Utc};

    const NOW: i64 = 1_700_000_000;

    fn sample(id: &str, name: &str, value: f64, ts: i64) -> Sample {
        Sample {
            original_identifier: id.to_string(),
            name: name.to_string(),
            value,
            labels: Labels::new(),
            help: Sample::default_help(name),
            timestamp: DateTime::<Utc>::from_timestamp(ts, 0).unwrap(),
            metric_type: MetricType::Gauge,
        }
    }

    fn store() -> (SampleStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(NOW, 0).unwrap()));
        (SampleStore::new(Duration::from_secs(300), clock.clone()), clock)
    }

    #[test]
    fn test_put_is_idempotent() {
        let (store, _) = store();
        let s = sample("a.b", "a_b", 1.0, NOW);
        store.put(s.clone());
        store.put(s.clone());
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(), vec![s]);
    }

    #[test]
    fn test_last_write_wins_regardless_of_timestamp() {
        let (store, _) = store();
        store.put(sample("a.b", "a_b", 1.0, NOW));
        store.put(sample("a.b", "a_b", 2.0, NOW - 10));
        let got = store.get("a.b").unwrap();
        assert_eq!(got.value, 2.0);
        assert_eq!(got.timestamp.timestamp(), NOW - 10);
    }

    #[test]
    fn test_expiry_boundary() {
        let (store, _) = store();
        store.put(sample("inside", "inside", 1.0, NOW - 299));
        store.put(sample("edge", "edge", 1.0, NOW - 300));
        store.put(sample("outside", "outside", 1.0, NOW - 301));

        let names: Vec<_> = store.snapshot().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["edge", "inside"]);

        assert_eq!(store.sweep(), 1);
        assert!(store.get("outside").is_none());
        assert!(store.get("edge").is_some());
    }

    #[test]
    fn test_snapshot_hides_expired_before_sweep() {
        let (store, clock) = store();
        store.put(sample("a", "a", 1.0, NOW));
        clock.advance(chrono::Duration::seconds(301));
        assert!(store.snapshot().is_empty());
        assert_eq!(store.len(), 1);
        store.sweep();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_order() {
        let (store, _) = store();
        let mut x = sample("x.2", "b", 1.0, NOW);
        x.labels.insert("k".into(), "2".into());
        let mut y = sample("x.1", "b", 1.0, NOW);
        y.labels.insert("k".into(), "1".into());
        store.put(x);
        store.put(y);
        store.put(sample("z", "a", 1.0, NOW));

        let ids: Vec<_> = store
            .snapshot()
            .into_iter()
            .map(|s| s.original_identifier)
            .collect();
        assert_eq!(ids, vec!["z", "x.1", "x.2"]);
    }
}
