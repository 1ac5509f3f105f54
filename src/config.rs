//! Run configuration for faultline.
//!
//! A run configuration tunes thresholds and resource limits. Every field has
//! a default, so an empty document (or no document) is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::facts::Severity;

/// Default file names searched for in the scanned directory.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["faultline.yaml", ".faultline.yaml"];

/// Unit assumed for bare numbers in configuration documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DurationUnit {
    #[default]
    #[serde(rename = "ms")]
    Millis,
    #[serde(rename = "s")]
    Seconds,
}

impl DurationUnit {
    /// Factor converting a value in this unit to milliseconds.
    pub fn to_millis(&self) -> f64 {
        match self {
            DurationUnit::Millis => 1.0,
            DurationUnit::Seconds => 1000.0,
        }
    }
}

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Upper bound for `attempts × timeout` before retry amplification fires.
    pub sla_threshold_ms: u64,
    /// Maximum caller depth walked from a changed symbol.
    pub blast_radius_depth: usize,
    /// Files processed concurrently in the map phase.
    pub concurrency_limit: usize,
    /// Files submitted per map wave.
    pub batch_size: usize,
    /// Per-file budget for syntax extraction.
    pub adapter_timeout_ms: u64,
    pub default_duration_unit: DurationUnit,
    /// Glob patterns for paths to exclude from discovery (e.g., "**/generated/**").
    pub excluded_paths: Vec<String>,
    /// Glob patterns selecting configuration documents.
    pub config_globs: Vec<String>,
    /// Extra decorator names that mark a function as an entry point.
    pub entry_point_annotations: Vec<String>,
    /// Lowest severity that makes the CLI exit non-zero.
    pub fail_on: Severity,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sla_threshold_ms: 60_000,
            blast_radius_depth: 3,
            concurrency_limit: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch_size: 64,
            adapter_timeout_ms: 30_000,
            default_duration_unit: DurationUnit::Millis,
            excluded_paths: Vec::new(),
            config_globs: vec![
                "**/application*.yml".to_string(),
                "**/application*.yaml".to_string(),
                "**/application*.properties".to_string(),
                "**/*.env".to_string(),
                "**/.env".to_string(),
                "**/config/**/*.yml".to_string(),
                "**/config/**/*.yaml".to_string(),
                "**/config/**/*.json".to_string(),
                "**/config/**/*.toml".to_string(),
            ],
            entry_point_annotations: Vec::new(),
            fail_on: Severity::High,
        }
    }
}

impl RunConfig {
    /// Parse a run configuration from a YAML file.
    pub fn parse_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config = Self::parse_str(&content).map_err(|e| match e {
            ConfigError::Malformed { message, .. } => ConfigError::Malformed {
                path: path.as_ref().display().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate a run configuration from YAML text.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = if content.trim().is_empty() {
            RunConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| ConfigError::Malformed {
                path: "<run config>".to_string(),
                message: e.to_string(),
            })?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or disable the run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blast_radius_depth == 0 {
            return Err(ConfigError::Invalid(
                "blast_radius_depth must be at least 1".to_string(),
            ));
        }
        if self.concurrency_limit == 0 {
            return Err(ConfigError::Invalid(
                "concurrency_limit must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.adapter_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "adapter_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Check if a path should be excluded based on excluded_paths patterns.
    /// Uses globset for matching, which supports `**` for recursive directory matching.
    pub fn is_path_excluded(&self, path: &Path) -> bool {
        matches_any(&self.excluded_paths, path)
    }

    /// Check if a path is a configuration document.
    pub fn is_config_document(&self, path: &Path) -> bool {
        matches_any(&self.config_globs, path)
    }
}

fn matches_any(patterns: &[String], path: &Path) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        if let Ok(glob) = globset::Glob::new(pattern) {
            builder.add(glob);
        }
    }
    match builder.build() {
        Ok(set) => set.is_match(path),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.sla_threshold_ms, 60_000);
        assert_eq!(config.blast_radius_depth, 3);
        assert!(config.concurrency_limit >= 1);
        assert_eq!(config.default_duration_unit, DurationUnit::Millis);
        assert_eq!(config.fail_on, Severity::High);
    }

    #[test]
    fn test_parse_partial_document() {
        let config = RunConfig::parse_str(
            "sla_threshold_ms: 30000\ndefault_duration_unit: s\nfail_on: medium\n",
        )
        .unwrap();
        assert_eq!(config.sla_threshold_ms, 30_000);
        assert_eq!(config.default_duration_unit, DurationUnit::Seconds);
        assert_eq!(config.fail_on, Severity::Medium);
        assert_eq!(config.blast_radius_depth, 3);
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = RunConfig::parse_str("").unwrap();
        assert_eq!(config.batch_size, 64);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let err = RunConfig::parse_str("blast_radius_depth: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = RunConfig::parse_str("concurrency_limit: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_document() {
        let err = RunConfig::parse_str("sla_threshold_ms: [oops").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn test_path_matching() {
        let config = RunConfig {
            excluded_paths: vec!["**/generated/**".to_string()],
            ..Default::default()
        };
        assert!(config.is_path_excluded(Path::new("src/generated/Api.java")));
        assert!(!config.is_path_excluded(Path::new("src/main/Api.java")));
        assert!(config.is_config_document(Path::new("src/main/resources/application.yml")));
        assert!(config.is_config_document(Path::new("application-prod.properties")));
        assert!(!config.is_config_document(Path::new("src/Api.java")));
    }
}
