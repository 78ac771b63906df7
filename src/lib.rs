//! # graphite-exporter
//!
//! Accepts metrics in the Graphite plaintext protocol and exposes the latest
//! value of every series as Prometheus gauges.
//!
//! Incoming names are translated through a glob/regex mapping file into a
//! canonical metric name plus labels. Inline Graphite tags
//! (`metric.path;key=value`) become labels as well.
//!
//! ## Architecture
//!
//! - **Ingester**: TCP/UDP listeners feed a line worker, which parses and maps
//!   each line and hands samples to a single sample worker that owns the
//!   in-memory store and its expiry sweep
//! - **API**: HTTP endpoint serving a point-in-time snapshot of live samples
//! - **Backfill**: offline replay of a Whisper archive into time-partitioned
//!   blocks using the same mapping rules

pub mod api;
pub mod backfill;
pub mod clock;
pub mod config;
pub mod ingester;
pub mod mapper;
pub mod schema;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{ComponentFactory, ExporterConfig};
    pub use crate::ingester::{Collector, CollectorConfig, SampleStore};
    pub use crate::mapper::{GlobMapper, MappingAction, MappingMatch, MetricMapper};
    pub use crate::schema::{Labels, MetricType, Sample};
    pub use crate::{Error, Result};
}
