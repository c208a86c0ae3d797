//! Configuration for the fleet replicator.
//!
//! Loaded from a YAML file with kebab-case keys. All durations are numeric
//! seconds. Environment variables referenced as `$VAR` or `${VAR}` are
//! interpolated before parsing unless disabled.
//!
//! # Example
//!
//! ```yaml
//! enabled: true
//! patterns:
//!   - "/data/*/databases/*/branches/*/tenants/*.db"
//! max-hot-databases: 500
//! scan-interval: 30
//! hot-promotion:
//!   recent-modify-threshold: 300
//! replica-template:
//!   type: s3
//!   bucket: fleet-backups
//!   region: us-east-1
//!   path: "{{project}}/{{database}}/{{branch}}/{{tenant}}"
//!   access-key-id: "$AWS_ACCESS_KEY_ID"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FleetError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FleetConfig {
    /// Turns multi-database replication on.
    #[serde(default)]
    pub enabled: bool,

    /// Glob patterns for database discovery.
    #[serde(default)]
    pub patterns: Vec<String>,

    /// Cap on concurrently hot databases (default 1000).
    #[serde(default = "default_max_hot_databases")]
    pub max_hot_databases: usize,

    /// Write-detector scan cadence in seconds (default 30).
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,

    /// Reserved cold-tier sync cadence in seconds (default 30).
    #[serde(default = "default_scan_interval")]
    pub cold_sync_interval: u64,

    /// Reserved cold-tier sync mode (default "snapshot").
    #[serde(default = "default_cold_sync_mode")]
    pub cold_sync_mode: String,

    /// Hot-tier promotion thresholds.
    #[serde(default)]
    pub hot_promotion: HotPromotionConfig,

    /// Template expanded per hot database to build its replica client.
    #[serde(default)]
    pub replica_template: Option<ReplicaTemplate>,

    /// Statically configured databases (used by config-backed restore).
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,

    /// Minimal-mode snapshot replicator. Sibling strategy to the streaming
    /// path; selected purely by configuration.
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,
}

/// Promotion thresholds for the hot tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HotPromotionConfig {
    /// Seconds a database stays hot after its last observed write. This is
    /// the hot duration; the name mirrors the original config surface.
    #[serde(default = "default_recent_modify_threshold")]
    pub recent_modify_threshold: u64,

    /// Advisory only; never drives a tier transition.
    #[serde(default = "default_access_count_threshold")]
    pub access_count_threshold: u64,
}

impl Default for HotPromotionConfig {
    fn default() -> Self {
        Self {
            recent_modify_threshold: default_recent_modify_threshold(),
            access_count_threshold: default_access_count_threshold(),
        }
    }
}

/// Replica client template. `path` may carry `{{project}}`-style
/// placeholders, expanded per database before the client is constructed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ReplicaTemplate {
    #[serde(default = "default_replica_type")]
    pub r#type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub endpoint: String,
    /// Streaming sync cadence in seconds (default 10).
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

impl Default for ReplicaTemplate {
    fn default() -> Self {
        Self {
            r#type: default_replica_type(),
            name: String::new(),
            path: String::new(),
            url: String::new(),
            bucket: String::new(),
            region: String::new(),
            endpoint: String::new(),
            sync_interval: default_sync_interval(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

/// A statically configured database with its replica settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: String,
    #[serde(default)]
    pub replica: Option<ReplicaTemplate>,
}

/// Minimal-mode replicator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SnapshotConfig {
    pub pattern: String,
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub endpoint: String,
    /// Key template expanded with parsed path tokens.
    #[serde(default)]
    pub path_template: String,
    /// Scan cadence in seconds (default 30; 15 recommended for busy fleets).
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,
    /// Upload concurrency bound (default 100).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Days to retain hourly snapshots (default 30).
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_max_hot_databases() -> usize {
    1000
}
fn default_scan_interval() -> u64 {
    30
}
fn default_cold_sync_mode() -> String {
    "snapshot".to_string()
}
fn default_recent_modify_threshold() -> u64 {
    300
}
fn default_access_count_threshold() -> u64 {
    10
}
fn default_replica_type() -> String {
    "s3".to_string()
}
fn default_sync_interval() -> u64 {
    10
}
fn default_max_concurrent() -> usize {
    100
}
fn default_retention_days() -> i64 {
    30
}

impl FleetConfig {
    /// Load configuration from a YAML file.
    ///
    /// When `expand_env` is set, `$VAR` / `${VAR}` references are replaced
    /// with their environment values (missing variables become empty, like
    /// shell expansion) before the YAML is parsed.
    pub fn load(path: impl AsRef<Path>, expand_env: bool) -> Result<Self, FleetError> {
        let path = path.as_ref();
        let mut text = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("read {}: {e}", path.display())))?;
        if expand_env {
            text = expand_env_vars(&text);
        }
        let config: Self = serde_yaml::from_str(&text)
            .map_err(|e| FleetError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string (tests, embedding).
    pub fn from_yaml(text: &str) -> Result<Self, FleetError> {
        let config: Self =
            serde_yaml::from_str(text).map_err(|e| FleetError::Config(format!("parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FleetError> {
        if self.enabled && self.patterns.is_empty() {
            return Err(FleetError::Config(
                "enabled is set but no discovery patterns are configured".into(),
            ));
        }
        if self.max_hot_databases == 0 {
            return Err(FleetError::Config(
                "max-hot-databases must be at least 1".into(),
            ));
        }
        if self.scan_interval == 0 {
            return Err(FleetError::Config("scan-interval must be non-zero".into()));
        }
        Ok(())
    }

    /// Detector scan cadence.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    /// How long a database stays hot after a detected write. Sourced from
    /// `hot-promotion.recent-modify-threshold`.
    #[must_use]
    pub fn hot_duration(&self) -> Duration {
        Duration::from_secs(self.hot_promotion.recent_modify_threshold)
    }
}

impl ReplicaTemplate {
    /// Streaming sync cadence.
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }
}

/// Replace `$VAR` and `${VAR}` references with environment values.
/// Unset variables expand to the empty string.
fn expand_env_vars(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some(&(_, '{')) => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if closed {
                    out.push_str(&std::env::var(&name).unwrap_or_default());
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(&(_, c)) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
            _ => out.push('$'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::from_yaml("{}").unwrap();
        assert!(!config.enabled);
        assert_eq!(config.max_hot_databases, 1000);
        assert_eq!(config.scan_interval(), Duration::from_secs(30));
        assert_eq!(config.hot_duration(), Duration::from_secs(300));
        assert_eq!(config.cold_sync_mode, "snapshot");
        assert!(config.replica_template.is_none());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
enabled: true
patterns:
  - "/data/**/*.db"
max-hot-databases: 50
scan-interval: 15
hot-promotion:
  recent-modify-threshold: 60
  access-count-threshold: 5
replica-template:
  type: s3
  bucket: backups
  region: eu-west-2
  path: "{{project}}/{{database}}/{{branch}}/{{tenant}}"
  sync-interval: 5
databases:
  - path: /data/a.db
  - path: /data/b.db
    replica:
      type: s3
      bucket: other
"#;
        let config = FleetConfig::from_yaml(yaml).unwrap();
        assert!(config.enabled);
        assert_eq!(config.max_hot_databases, 50);
        assert_eq!(config.hot_duration(), Duration::from_secs(60));
        let template = config.replica_template.unwrap();
        assert_eq!(template.r#type, "s3");
        assert_eq!(template.sync_interval(), Duration::from_secs(5));
        assert_eq!(config.databases.len(), 2);
        assert!(config.databases[1].replica.is_some());
    }

    #[test]
    fn test_enabled_requires_patterns() {
        let err = FleetConfig::from_yaml("enabled: true").unwrap_err();
        assert!(err.to_string().contains("patterns"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(FleetConfig::from_yaml("bogus-key: 1").is_err());
    }

    #[test]
    fn test_snapshot_block() {
        let yaml = r#"
snapshot:
  pattern: "/data/*.db"
  bucket: snaps
  path-template: "{{project}}"
  retention-days: 7
"#;
        let config = FleetConfig::from_yaml(yaml).unwrap();
        let snapshot = config.snapshot.unwrap();
        assert_eq!(snapshot.retention_days, 7);
        assert_eq!(snapshot.max_concurrent, 100);
        assert_eq!(snapshot.interval_secs, 30);
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("FLEETSYNC_TEST_BUCKET", "frombucket");
        assert_eq!(
            expand_env_vars("bucket: $FLEETSYNC_TEST_BUCKET"),
            "bucket: frombucket"
        );
        assert_eq!(
            expand_env_vars("bucket: ${FLEETSYNC_TEST_BUCKET}!"),
            "bucket: frombucket!"
        );
        // Unset expands to empty, bare dollar survives.
        assert_eq!(expand_env_vars("a: $FLEETSYNC_NOT_SET_XYZ"), "a: ");
        assert_eq!(expand_env_vars("cost: $5"), "cost: $5");
    }
}
