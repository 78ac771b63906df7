//! Metric name mapping engine
//!
//! Translates a Graphite metric path into a canonical metric name plus
//! labels using an ordered list of glob or regex rules. The first matching
//! rule wins.

pub mod cache;
pub mod config;
pub mod glob;

pub use cache::{CacheType, MappingCache};
pub use config::{MapperConfig, MappingAction, MatchType, RuleConfig};

use crate::schema::{Labels, MetricType};
use crate::Result;
use parking_lot::RwLock;
use regex::Regex;
use std::path::Path;
use tracing::{debug, info};

/// Result of a successful rule match
#[derive(Debug, Clone, PartialEq)]
pub struct MappingMatch {
    /// Expanded name template; empty for drop rules without a name
    pub name: String,
    pub action: MappingAction,
    pub scale: Option<f64>,
    pub help: Option<String>,
    /// Expanded label templates
    pub labels: Labels,
}

/// Mapping capability used by the line processor and the backfill tool
pub trait MetricMapper: Send + Sync {
    /// Look up the first rule matching `name` for the given type.
    fn get_mapping(&self, name: &str, metric_type: MetricType) -> Option<MappingMatch>;

    /// Load a rule file, replacing the current rule set.
    fn init_from_file(&self, path: &Path) -> Result<()>;
}

#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    name: String,
    labels: Vec<(String, String)>,
    metric_type: Option<MetricType>,
    action: MappingAction,
    scale: Option<f64>,
    help: Option<String>,
}

impl CompiledRule {
    fn compile(config: &MapperConfig, rule: &RuleConfig) -> Result<Self> {
        let regex = match config.match_type_for(rule) {
            MatchType::Glob => glob::compile_glob(&rule.pattern)?,
            MatchType::Regex => glob::compile_regex(&rule.pattern)?,
        };
        let metric_type = rule
            .match_metric_type
            .as_deref()
            .map(str::parse::<MetricType>)
            .transpose()
            .map_err(crate::Error::Mapping)?;

        Ok(Self {
            regex,
            name: rule.name.clone().unwrap_or_default(),
            labels: rule
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            metric_type,
            action: rule.action,
            scale: rule.scale,
            help: rule.help.clone(),
        })
    }

    fn apply(&self, name: &str, metric_type: MetricType) -> Option<MappingMatch> {
        if self.metric_type.is_some_and(|t| t != metric_type) {
            return None;
        }
        let captures = self.regex.captures(name)?;
        Some(MappingMatch {
            name: glob::expand(&self.name, &captures),
            action: self.action,
            scale: self.scale,
            help: self.help.clone(),
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), glob::expand(v, &captures)))
                .collect(),
        })
    }
}

/// Rule-list mapper with an optional lookup cache
#[derive(Debug)]
pub struct GlobMapper {
    rules: RwLock<Vec<CompiledRule>>,
    cache: MappingCache,
}

impl Default for GlobMapper {
    fn default() -> Self {
        Self::new(0, CacheType::Lru)
    }
}

impl GlobMapper {
    /// Create a mapper with no rules.
    pub fn new(cache_size: usize, cache_type: CacheType) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            cache: MappingCache::new(cache_size, cache_type),
        }
    }

    /// Replace the rule set from an already parsed config.
    pub fn load(&self, config: &MapperConfig) -> Result<()> {
        let compiled = config
            .mappings
            .iter()
            .map(|rule| CompiledRule::compile(config, rule))
            .collect::<Result<Vec<_>>>()?;

        let count = compiled.len();
        {
            let mut rules = self.rules.write();
            *rules = compiled;
            // lookups insert under the read lock
            self.cache.clear();
        }
        info!(rules = count, "Loaded metric mapping rules");
        Ok(())
    }

    /// Replace the rule set from YAML text.
    pub fn init_from_yaml_str(&self, contents: &str) -> Result<()> {
        self.load(&MapperConfig::from_yaml_str(contents)?)
    }

    /// Number of loaded rules
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

impl MetricMapper for GlobMapper {
    fn get_mapping(&self, name: &str, metric_type: MetricType) -> Option<MappingMatch> {
        let rules = self.rules.read();
        if let Some(hit) = self.cache.get(name, metric_type) {
            return hit;
        }
        let result = rules.iter().find_map(|rule| rule.apply(name, metric_type));
        debug!(metric = name, matched = result.is_some(), "Evaluated mapping rules");
        self.cache.insert(name, metric_type, result.clone());
        result
    }

    fn init_from_file(&self, path: &Path) -> Result<()> {
        self.load(&MapperConfig::from_file(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RULES: &str = r#"
mappings:
  - match: "noise.*"
    action: drop
  - match: "servers.*.cpu.*"
    name: "server_cpu_${2}"
    labels:
      host: "$1"
    help: "CPU time"
  - match: "jobs.*.duration"
    match_metric_type: observer
    name: "job_duration"
  - match: "jobs.*.*"
    name: "job_${2}"
    labels:
      job: "$1"
    scale: 0.5
  - match: '^app\.(?P<svc>[a-z]+)\.requests$'
    match_type: regex
    name: "app_requests"
    labels:
      service: "${svc}"
"#;

    fn mapper() -> GlobMapper {
        let mapper = GlobMapper::new(16, CacheType::Lru);
        mapper.init_from_yaml_str(RULES).unwrap();
        mapper
    }

    #[test]
    fn test_glob_mapping_with_captures() {
        let m = mapper()
            .get_mapping("servers.web1.cpu.user", MetricType::Gauge)
            .unwrap();
        assert_eq!(m.name, "server_cpu_user");
        assert_eq!(m.labels.get("host").map(String::as_str), Some("web1"));
        assert_eq!(m.help.as_deref(), Some("CPU time"));
        assert_eq!(m.action, MappingAction::Map);
    }

    #[test]
    fn test_drop_rule() {
        let m = mapper().get_mapping("noise.foo", MetricType::Gauge).unwrap();
        assert_eq!(m.action, MappingAction::Drop);
    }

    #[test]
    fn test_no_match() {
        assert!(mapper().get_mapping("unknown.metric", MetricType::Gauge).is_none());
        // cached negative result is still a miss
        let mapper = mapper();
        assert!(mapper.get_mapping("unknown.metric", MetricType::Gauge).is_none());
        assert!(mapper.get_mapping("unknown.metric", MetricType::Gauge).is_none());
    }

    #[test]
    fn test_metric_type_filter_falls_through() {
        let mapper = mapper();
        let gauge = mapper
            .get_mapping("jobs.backup.duration", MetricType::Gauge)
            .unwrap();
        assert_eq!(gauge.name, "job_duration");
        assert_eq!(gauge.scale, Some(0.5));

        let observer = mapper
            .get_mapping("jobs.backup.duration", MetricType::Observer)
            .unwrap();
        assert_eq!(observer.name, "job_duration");
        assert_eq!(observer.scale, None);
    }

    #[test]
    fn test_regex_named_capture() {
        let m = mapper()
            .get_mapping("app.checkout.requests", MetricType::Gauge)
            .unwrap();
        assert_eq!(m.name, "app_requests");
        assert_eq!(m.labels.get("service").map(String::as_str), Some("checkout"));
    }

    #[test]
    fn test_first_match_wins() {
        let mapper = GlobMapper::default();
        mapper
            .init_from_yaml_str(
                r#"
mappings:
  - match: "a.*"
    name: "first"
  - match: "a.b"
    name: "second"
"#,
            )
            .unwrap();
        assert_eq!(mapper.get_mapping("a.b", MetricType::Gauge).unwrap().name, "first");
    }

    #[test]
    fn test_reload_replaces_rules_and_clears_cache() {
        let mapper = mapper();
        assert!(mapper.get_mapping("noise.x", MetricType::Gauge).is_some());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "mappings:\n  - match: \"other.*\"\n    name: other").unwrap();
        mapper.init_from_file(file.path()).unwrap();

        assert_eq!(mapper.rule_count(), 1);
        assert!(mapper.get_mapping("noise.x", MetricType::Gauge).is_none());
    }

    #[test]
    fn test_concurrent_lookups_see_latest_rules_after_reload() {
        let mapper = std::sync::Arc::new(mapper());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let mapper = mapper.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let name = format!("servers.h{}.cpu.user", i % 7);
                        mapper.get_mapping(&name, MetricType::Gauge);
                    }
                })
            })
            .collect();
        let replacement = "mappings:\n  - match: \"servers.*.cpu.*\"\n    name: reloaded\n";
        for _ in 0..20 {
            mapper.init_from_yaml_str(replacement).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }

        for i in 0..7 {
            let name = format!("servers.h{}.cpu.user", i);
            let m = mapper.get_mapping(&name, MetricType::Gauge).unwrap();
            assert_eq!(m.name, "reloaded");
            assert!(m.labels.is_empty());
        }
    }

    #[test]
    fn test_failed_reload_keeps_old_rules() {
        let mapper = mapper();
        assert!(mapper.init_from_yaml_str("mappings:\n  - match: \"\"\n").is_err());
        assert_eq!(mapper.rule_count(), 5);
    }
}
