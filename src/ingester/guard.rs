//! Label-key consistency per canonical metric name.

use crate::schema::Labels;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Remembers the label-key set first accepted for each metric name and
/// rejects later samples whose key set differs.
///
/// Entries are never removed.
#[derive(Debug, Default)]
pub struct LabelGuard {
    seen: Mutex<HashMap<String, String>>,
}

impl LabelGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `labels` for `name` if it is new or has the recorded key set.
    pub fn check(&self, name: &str, labels: &Labels) -> bool {
        // BTreeMap keys are already sorted
        let keys = labels.keys().map(String::as_str).collect::<Vec<_>>().join(",");

        let mut seen = self.seen.lock();
        match seen.get(name) {
            Some(existing) => *existing == keys,
            None => {
                seen.insert(name.to_string(), keys);
                true
            }
        }
    }

    /// Number of metric names with a recorded key set
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
