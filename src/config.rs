//! Exporter configuration and component construction
//!
//! `ExporterConfig` is populated from command-line flags (with environment
//! fallbacks) by the binaries; `ComponentFactory` turns it into the mapper,
//! collector and block output store.

use crate::api::ApiServerConfig;
use crate::clock::{Clock, SystemClock};
use crate::ingester::{Collector, CollectorConfig};
use crate::mapper::{CacheType, GlobMapper, MetricMapper};
use crate::{Error, Result};
use object_store::{local::LocalFileSystem, ObjectStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Settings of the `graphite_exporter` binary
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub web_listen_address: String,
    pub telemetry_path: String,
    pub graphite_listen_address: String,
    pub mapping_config: Option<PathBuf>,
    pub sample_expiry: Duration,
    pub strict_match: bool,
    pub label_consistency: bool,
    pub cache_size: usize,
    pub cache_type: CacheType,
    pub channel_capacity: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            web_listen_address: ":9108".to_string(),
            telemetry_path: "/metrics".to_string(),
            graphite_listen_address: ":9109".to_string(),
            mapping_config: None,
            sample_expiry: Duration::from_secs(300),
            strict_match: false,
            label_consistency: true,
            cache_size: 1000,
            cache_type: CacheType::Lru,
            channel_capacity: 1024,
        }
    }
}

impl ExporterConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.telemetry_path.starts_with('/') {
            return Err(Error::Config(format!(
                "telemetry path must start with '/', got '{}'",
                self.telemetry_path
            )));
        }
        if self.telemetry_path == "/health" || self.telemetry_path == "/ready" {
            return Err(Error::Config(format!(
                "telemetry path '{}' is reserved",
                self.telemetry_path
            )));
        }
        if self.sample_expiry.is_zero() {
            return Err(Error::Config("sample expiry must be positive".to_string()));
        }
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel capacity must be positive".to_string()));
        }
        Ok(())
    }

    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            strict_match: self.strict_match,
            label_consistency: self.label_consistency,
            sample_expiry: self.sample_expiry,
            channel_capacity: self.channel_capacity,
            ..CollectorConfig::default()
        }
    }

    pub fn api_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            telemetry_path: self.telemetry_path.clone(),
            graphite_address: self.graphite_listen_address.clone(),
        }
    }
}

/// Expand the `:port` shorthand to all interfaces.
pub fn normalize_listen_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Build the mapper and load the rule file, if one is configured.
    pub fn create_mapper(
        mapping_config: Option<&Path>,
        cache_size: usize,
        cache_type: CacheType,
    ) -> Result<Arc<GlobMapper>> {
        let mapper = GlobMapper::new(cache_size, cache_type);
        match mapping_config {
            Some(path) => {
                mapper.init_from_file(path)?;
                info!(path = %path.display(), cache_size, "Loaded metric mapping config");
            }
            None => info!("No mapping config, metric names are only sanitized"),
        }
        Ok(Arc::new(mapper))
    }

    /// Start the ingestion pipeline on the current runtime.
    pub fn create_collector(
        config: &ExporterConfig,
        mapper: Arc<dyn MetricMapper>,
    ) -> Result<Arc<Collector>> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Arc::new(Collector::start(
            config.collector_config(),
            mapper,
            clock,
        )?))
    }

    /// Object store rooted at a local output directory, created if missing.
    pub fn create_block_store(output_dir: &Path) -> Result<Arc<dyn ObjectStore>> {
        std::fs::create_dir_all(output_dir)?;
        info!(path = %output_dir.display(), "Using local block output directory");
        Ok(Arc::new(LocalFileSystem::new_with_prefix(output_dir)?))
    }
}
