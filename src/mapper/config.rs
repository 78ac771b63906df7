//! Mapping rule file
//!
//! ```yaml
//! defaults:
//!   match_type: glob
//! mappings:
//!   - match: "servers.*.cpu.*"
//!     name: "server_cpu_${2}"
//!     labels:
//!       host: "$1"
//! ```

use crate::schema::{is_valid_label_name, MetricType};
use crate::{Error, Result};
use figment::providers::{Format, Yaml};
use figment::Figment;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// How a rule's `match` pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Dot-separated segments, `*` matches within one segment
    #[default]
    Glob,
    /// Regular expression, unanchored
    Regex,
}

/// What to do with a metric that matched a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingAction {
    #[default]
    Map,
    Drop,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperDefaults {
    #[serde(default)]
    pub match_type: MatchType,
}

/// One rule as written in the file
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_type: Option<MatchType>,
    #[serde(default)]
    pub match_metric_type: Option<String>,
    #[serde(default)]
    pub action: MappingAction,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub help: Option<String>,
}

/// Parsed and validated mapping file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperConfig {
    #[serde(default)]
    pub defaults: MapperDefaults,
    #[serde(default)]
    pub mappings: Vec<RuleConfig>,
}

impl MapperConfig {
    /// Parse a YAML document and validate every rule.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: MapperConfig = Figment::new().merge(Yaml::string(contents)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a mapping file from disk.
    pub fn from_file(path: &Path) -> Result<Self> {
        // a missing file is an error here, unlike Yaml::file
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Mapping(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Effective match type for a rule
    pub fn match_type_for(&self, rule: &RuleConfig) -> MatchType {
        rule.match_type.unwrap_or(self.defaults.match_type)
    }

    fn validate(&self) -> Result<()> {
        for (idx, rule) in self.mappings.iter().enumerate() {
            let ctx = |msg: String| {
                Error::Mapping(format!("mapping #{} ({:?}): {}", idx + 1, rule.pattern, msg))
            };

            if rule.pattern.is_empty() {
                return Err(ctx("match must not be empty".to_string()));
            }

            match self.match_type_for(rule) {
                MatchType::Glob => {
                    if rule.pattern.split('.').any(str::is_empty) {
                        return Err(ctx("glob segments must not be empty".to_string()));
                    }
                }
                MatchType::Regex => {
                    regex::Regex::new(&rule.pattern).map_err(|e| ctx(e.to_string()))?;
                }
            }

            if rule.action == MappingAction::Map
                && rule.name.as_deref().map_or(true, str::is_empty)
            {
                return Err(ctx("name is required unless action is drop".to_string()));
            }

            if let Some(bad) = rule.labels.keys().find(|k| !is_valid_label_name(k)) {
                return Err(ctx(format!("invalid label name '{}'", bad)));
            }

            if let Some(scale) = rule.scale {
                if !scale.is_finite() {
                    return Err(ctx("scale must be a finite number".to_string()));
                }
            }

            if let Some(metric_type) = &rule.match_metric_type {
                metric_type.parse::<MetricType>().map_err(ctx)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_rule() {
        let config = MapperConfig::from_yaml_str(
            r#"
mappings:
  - match: "servers.*.cpu.*"
    name: "server_cpu_${2}"
    labels:
      host: "$1"
    match_metric_type: gauge
    scale: 0.001
    help: "CPU seconds"
"#,
        )
        .unwrap();

        assert_eq!(config.mappings.len(), 1);
        let rule = &config.mappings[0];
        assert_eq!(rule.pattern, "servers.*.cpu.*");
        assert_eq!(rule.name.as_deref(), Some("server_cpu_${2}"));
        assert_eq!(rule.labels.get("host").map(String::as_str), Some("$1"));
        assert_eq!(rule.action, MappingAction::Map);
        assert_eq!(rule.scale, Some(0.001));
        assert_eq!(config.match_type_for(rule), MatchType::Glob);
    }

    #[test]
    fn test_defaults_match_type_applies() {
        let config = MapperConfig::from_yaml_str(
            r#"
defaults:
  match_type: regex
mappings:
  - match: "^foo\\.(.*)$"
    name: "foo"
  - match: "bar.*"
    match_type: glob
    name: "bar"
"#,
        )
        .unwrap();

        assert_eq!(config.match_type_for(&config.mappings[0]), MatchType::Regex);
        assert_eq!(config.match_type_for(&config.mappings[1]), MatchType::Glob);
    }

    #[test]
    fn test_drop_rule_needs_no_name() {
        let config = MapperConfig::from_yaml_str(
            r#"
mappings:
  - match: "noise.*"
    action: drop
"#,
        )
        .unwrap();
        assert_eq!(config.mappings[0].action, MappingAction::Drop);
    }

    #[test]
    fn test_rejects_invalid_rules() {
        let cases = [
            "mappings:\n  - match: \"a.*\"\n",
            "mappings:\n  - match: \"a..b\"\n    name: x\n",
            "mappings:\n  - match: \"(\"\n    match_type: regex\n    name: x\n",
            "mappings:\n  - match: \"a.*\"\n    name: x\n    labels:\n      \"bad-label\": v\n",
            "mappings:\n  - match: \"a.*\"\n    name: x\n    match_metric_type: set\n",
            "mappings:\n  - match: \"a.*\"\n    name: x\n    unexpected: 1\n",
            "mappings:\n  - match: \"a.*\"\n    name: x\n    action: keep\n",
        ];
        for yaml in cases {
            assert!(
                MapperConfig::from_yaml_str(yaml).is_err(),
                "expected rejection for {:?}",
                yaml
            );
        }
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = MapperConfig::from_file(&dir.path().join("absent.yml")).unwrap_err();
        assert!(matches!(err, Error::Mapping(_)));
    }
}
