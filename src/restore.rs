// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk restore engine.
//!
//! Recovers every database matching a pattern, with bounded parallelism and
//! continue-on-failure semantics. Two discovery modes:
//!
//! - `remote://bucket/prefix/**` lists the bucket and identifies backups by
//!   their `/generations/…/snapshots/…` key shape;
//! - any other pattern is matched (double-star aware) against the `databases`
//!   list of the YAML configuration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use glob::{MatchOptions, Pattern};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::config::{FleetConfig, ReplicaTemplate};
use crate::dbpath::expand_path_template;
use crate::error::FleetError;
use crate::remote::factory::s3_client_builder;
use crate::remote::{ClientBuilder, RemoteClient, S3RemoteClient, S3RemoteConfig};
use crate::replica::restore_from;

/// Scheme marking remote discovery mode.
const REMOTE_SCHEME: &str = "remote://";

/// Log remote-listing progress every this many keys.
const LIST_PROGRESS_EVERY: usize = 1000;

/// Flags controlling a bulk restore.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// YAML configuration (config-backed discovery only).
    pub config_path: Option<PathBuf>,
    /// Interpolate environment variables in the config file.
    pub expand_env: bool,
    /// Base directory for restored files. Defaults to the original paths
    /// (config mode) or the key-relative paths (remote mode).
    pub output_dir: Option<PathBuf>,
    /// Bounded worker count.
    pub parallel: usize,
    /// Print a progress line after each completed candidate.
    pub progress: bool,
    /// Skip candidates whose local file already exists.
    pub if_db_not_exists: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            expand_env: true,
            output_dir: None,
            parallel: 10,
            progress: false,
            if_db_not_exists: false,
        }
    }
}

/// Where a candidate's backup artifacts live.
#[derive(Debug, Clone)]
pub enum RestoreSource {
    /// Discovered by listing remote keys; `prefix` is the database's
    /// logical path inside the bucket.
    Remote { prefix: String },
    /// Discovered in the configuration file.
    Config {
        db_path: String,
        replica: Option<ReplicaTemplate>,
    },
}

/// A single database to restore.
#[derive(Debug, Clone)]
pub struct RestoreCandidate {
    pub local_path: PathBuf,
    pub source: RestoreSource,
}

/// Outcome of a bulk restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreSummary {
    pub total: usize,
    pub success: usize,
    pub errors: usize,
}

impl RestoreSummary {
    /// True when every candidate restored.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors == 0
    }
}

/// Constructor for a bucket-wide listing/download client.
pub type BucketClientBuilder = Arc<
    dyn Fn(String) -> BoxFuture<'static, Result<Arc<dyn RemoteClient>, FleetError>> + Send + Sync,
>;

/// Pattern-driven bulk restorer.
pub struct RestoreEngine {
    template_clients: ClientBuilder,
    bucket_clients: BucketClientBuilder,
}

impl RestoreEngine {
    /// Build with injected client constructors (tests use in-memory ones).
    #[must_use]
    pub fn new(template_clients: ClientBuilder, bucket_clients: BucketClientBuilder) -> Self {
        Self {
            template_clients,
            bucket_clients,
        }
    }

    /// Production wiring: S3 clients, credentials from template/environment.
    #[must_use]
    pub fn with_s3() -> Self {
        Self::new(
            s3_client_builder(),
            Arc::new(|bucket: String| {
                Box::pin(async move {
                    let client =
                        S3RemoteClient::connect(S3RemoteConfig::for_bucket(bucket)).await?;
                    Ok(Arc::new(client) as Arc<dyn RemoteClient>)
                })
            }),
        )
    }

    /// Restore every database matching `pattern`.
    ///
    /// Never aborts on a per-candidate failure; the summary carries the
    /// tallies and the caller decides the exit code.
    pub async fn run(
        &self,
        pattern: &str,
        options: &RestoreOptions,
    ) -> Result<RestoreSummary, FleetError> {
        let (candidates, shared_client) = if pattern.starts_with(REMOTE_SCHEME) {
            let (candidates, client) = self.discover_remote(pattern, options).await?;
            (candidates, Some(client))
        } else {
            (self.discover_config(pattern, options)?, None)
        };

        if candidates.is_empty() {
            return Err(FleetError::NotFound(format!(
                "no databases found matching pattern: {pattern}"
            )));
        }
        info!(count = candidates.len(), "found databases to restore");

        let total = candidates.len();
        let semaphore = Arc::new(Semaphore::new(options.parallel.max(1)));
        let success = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(total);
        for candidate in candidates {
            let semaphore = Arc::clone(&semaphore);
            let success = Arc::clone(&success);
            let errors = Arc::clone(&errors);
            let completed = Arc::clone(&completed);
            let shared_client = shared_client.clone();
            let builder = Arc::clone(&self.template_clients);
            let if_db_not_exists = options.if_db_not_exists;
            let progress = options.progress;

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;

                match restore_candidate(&candidate, shared_client, builder, if_db_not_exists).await
                {
                    Ok(()) => {
                        success.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        errors.fetch_add(1, Ordering::SeqCst);
                        error!(
                            path = %candidate.local_path.display(),
                            error = %e,
                            "failed to restore database"
                        );
                    }
                }
                if progress {
                    let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    println!("Progress: {current}/{total} databases restored");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let summary = RestoreSummary {
            total,
            success: success.load(Ordering::SeqCst),
            errors: errors.load(Ordering::SeqCst),
        };
        info!(
            total = summary.total,
            success = summary.success,
            errors = summary.errors,
            "restore pattern completed"
        );
        Ok(summary)
    }

    /// Config-backed discovery: every configured database whose local path
    /// matches the double-star pattern.
    fn discover_config(
        &self,
        pattern: &str,
        options: &RestoreOptions,
    ) -> Result<Vec<RestoreCandidate>, FleetError> {
        let config_path = options
            .config_path
            .as_ref()
            .ok_or_else(|| FleetError::Config("config path required for pattern restore".into()))?;
        let config = FleetConfig::load(config_path, options.expand_env)?;

        let matcher = Pattern::new(pattern)
            .map_err(|e| FleetError::Config(format!("invalid pattern {pattern}: {e}")))?;

        let mut candidates = Vec::new();
        for db in &config.databases {
            if !matcher.matches_with(&db.path, match_options()) {
                continue;
            }
            let local_path = match &options.output_dir {
                Some(dir) => dir.join(
                    Path::new(&db.path)
                        .file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new(&db.path)),
                ),
                None => PathBuf::from(&db.path),
            };
            candidates.push(RestoreCandidate {
                local_path,
                source: RestoreSource::Config {
                    db_path: db.path.clone(),
                    replica: db.replica.clone(),
                },
            });
        }
        Ok(candidates)
    }

    /// Remote discovery: parse `remote://bucket/prefix…`, list keys, and
    /// identify backups by the `/generations/` + `/snapshots/` key shape.
    async fn discover_remote(
        &self,
        pattern: &str,
        options: &RestoreOptions,
    ) -> Result<(Vec<RestoreCandidate>, Arc<dyn RemoteClient>), FleetError> {
        let rest = pattern
            .strip_prefix(REMOTE_SCHEME)
            .expect("checked by caller");
        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(FleetError::Config(format!(
                "remote pattern must carry a bucket: {pattern}"
            )));
        }

        info!(bucket, prefix, "discovering remote databases");
        let client = (self.bucket_clients)(bucket.to_string()).await?;

        let (base_prefix, match_pattern) = split_at_wildcard(prefix);

        let mut candidates = Vec::new();
        match match_pattern {
            None => {
                // No wildcard: the whole tail is an exact object path.
                let db_path = prefix.trim_end_matches('/');
                let basename = Path::new(db_path)
                    .file_name()
                    .ok_or_else(|| {
                        FleetError::Config(format!("remote pattern has no object path: {pattern}"))
                    })?
                    .to_os_string();
                let local_path = match &options.output_dir {
                    Some(dir) => dir.join(&basename),
                    None => PathBuf::from(&basename),
                };
                candidates.push(RestoreCandidate {
                    local_path,
                    source: RestoreSource::Remote {
                        prefix: db_path.to_string(),
                    },
                });
            }
            Some(match_pattern) => {
                let matcher = Pattern::new(&match_pattern).map_err(|e| {
                    FleetError::Config(format!("invalid pattern {match_pattern}: {e}"))
                })?;

                let keys = client.list(&base_prefix).await?;
                let mut seen = HashSet::new();
                for (scanned, key) in keys.iter().enumerate() {
                    if (scanned + 1) % LIST_PROGRESS_EVERY == 0 {
                        info!(
                            objects_scanned = scanned + 1,
                            databases_found = candidates.len(),
                            "remote discovery progress"
                        );
                    }
                    // A backup key looks like
                    // <db path>/generations/<gen>/snapshots/<seq>.ltx
                    if !key.contains("/generations/") || !key.contains("/snapshots/") {
                        continue;
                    }
                    let db_path = key
                        .split("/generations/")
                        .next()
                        .unwrap_or_default()
                        .to_string();
                    if db_path.is_empty() || !seen.insert(db_path.clone()) {
                        continue;
                    }

                    let relative = db_path.strip_prefix(&base_prefix).unwrap_or(&db_path);
                    if !matcher.matches_with(relative, match_options()) {
                        continue;
                    }

                    let local_path = match &options.output_dir {
                        Some(dir) => dir.join(relative),
                        None => PathBuf::from(relative),
                    };
                    debug!(db = %db_path, output = %local_path.display(), "discovered database");
                    candidates.push(RestoreCandidate {
                        local_path,
                        source: RestoreSource::Remote { prefix: db_path },
                    });
                }
            }
        }

        info!(databases_found = candidates.len(), "remote discovery complete");
        Ok((candidates, client))
    }
}

async fn restore_candidate(
    candidate: &RestoreCandidate,
    shared_client: Option<Arc<dyn RemoteClient>>,
    builder: ClientBuilder,
    if_db_not_exists: bool,
) -> Result<(), FleetError> {
    if if_db_not_exists && candidate.local_path.exists() {
        info!(path = %candidate.local_path.display(), "database already exists, skipping");
        return Ok(());
    }

    match &candidate.source {
        RestoreSource::Remote { prefix } => {
            let client = shared_client
                .ok_or_else(|| FleetError::Config("remote candidate without client".into()))?;
            restore_from(client.as_ref(), prefix, &candidate.local_path).await
        }
        RestoreSource::Config { db_path, replica } => {
            let Some(replica) = replica else {
                return Err(FleetError::Config(format!(
                    "no replica configured for database: {db_path}"
                )));
            };
            let mut expanded = replica.clone();
            expanded.path = expand_path_template(&replica.path, db_path);
            let prefix = expanded.path.clone();
            let client = builder(expanded).await?;
            restore_from(client.as_ref(), &prefix, &candidate.local_path).await
        }
    }
}

/// Double-star matching: `*` stays within one path segment, `**` crosses.
fn match_options() -> MatchOptions {
    MatchOptions {
        require_literal_separator: true,
        ..MatchOptions::default()
    }
}

/// Split a prefix at its first wildcard-bearing segment. Everything before
/// becomes the listing prefix (with a trailing slash when non-empty);
/// everything from the wildcard segment on becomes the match pattern.
fn split_at_wildcard(prefix: &str) -> (String, Option<String>) {
    let has_wildcard = |s: &str| s.contains(['*', '?', '[']);
    if !has_wildcard(prefix) {
        return (prefix.to_string(), None);
    }

    let parts: Vec<&str> = prefix.split('/').collect();
    let mut base_parts = Vec::new();
    let mut pattern = None;
    for (i, part) in parts.iter().enumerate() {
        if has_wildcard(part) {
            pattern = Some(parts[i..].join("/"));
            break;
        }
        base_parts.push(*part);
    }

    let mut base = base_parts.join("/");
    if !base.is_empty() && !base.ends_with('/') {
        base.push('/');
    }
    (base, pattern)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemote;

    #[test]
    fn test_split_at_wildcard() {
        assert_eq!(split_at_wildcard("a/b/c"), ("a/b/c".into(), None));
        assert_eq!(
            split_at_wildcard("a/b/*.db"),
            ("a/b/".into(), Some("*.db".into()))
        );
        assert_eq!(split_at_wildcard("acme/**"), ("acme/".into(), Some("**".into())));
        assert_eq!(split_at_wildcard("**"), (String::new(), Some("**".into())));
        assert_eq!(
            split_at_wildcard("a/te?ants/x"),
            ("a/".into(), Some("te?ants/x".into()))
        );
    }

    #[test]
    fn test_double_star_crosses_segments_single_star_does_not() {
        let opts = match_options();
        let double = Pattern::new("data/**").unwrap();
        assert!(double.matches_with("data/a/b/c.db", opts));

        let single = Pattern::new("data/*.db").unwrap();
        assert!(single.matches_with("data/c.db", opts));
        assert!(!single.matches_with("data/a/c.db", opts));
    }

    fn engine_with(remote: Arc<InMemoryRemote>) -> RestoreEngine {
        let listing = Arc::clone(&remote);
        RestoreEngine::new(
            Arc::new(move |_template| {
                let remote = Arc::clone(&remote);
                Box::pin(async move { Ok(remote as Arc<dyn RemoteClient>) })
            }),
            Arc::new(move |_bucket| {
                let remote = Arc::clone(&listing);
                Box::pin(async move { Ok(remote as Arc<dyn RemoteClient>) })
            }),
        )
    }

    fn seed_snapshot(remote: &InMemoryRemote, db: &str, seq: u32) {
        remote.seed(
            &format!("{db}/generations/0000000000000001/snapshots/{seq:010}.ltx"),
            crate::compress::compress(b"SQLite format 3\0fake"),
        );
    }

    #[tokio::test]
    async fn test_remote_discovery_dedups_and_matches() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_snapshot(&remote, "acme/db1.db", 0);
        seed_snapshot(&remote, "acme/db1.db", 1);
        seed_snapshot(&remote, "acme/db2.db", 0);
        remote.seed("acme/unrelated.txt", "noise");

        let engine = engine_with(Arc::clone(&remote));
        let out = tempfile::TempDir::new().unwrap();
        let options = RestoreOptions {
            output_dir: Some(out.path().to_path_buf()),
            ..Default::default()
        };

        let summary = engine
            .run("remote://bucket/acme/**", &options)
            .await
            .unwrap();

        assert_eq!(
            summary,
            RestoreSummary {
                total: 2,
                success: 2,
                errors: 0
            }
        );
        assert!(out.path().join("db1.db").exists());
        assert!(out.path().join("db2.db").exists());
    }

    #[tokio::test]
    async fn test_remote_exact_path_without_wildcard() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_snapshot(&remote, "acme/db1.db", 0);

        let engine = engine_with(Arc::clone(&remote));
        let out = tempfile::TempDir::new().unwrap();
        let options = RestoreOptions {
            output_dir: Some(out.path().to_path_buf()),
            ..Default::default()
        };

        let summary = engine
            .run("remote://bucket/acme/db1.db", &options)
            .await
            .unwrap();
        assert!(summary.is_success());
        assert_eq!(summary.total, 1);
        assert!(out.path().join("db1.db").exists());
    }

    #[tokio::test]
    async fn test_no_matches_is_an_error() {
        let remote = Arc::new(InMemoryRemote::new());
        let engine = engine_with(remote);
        let err = engine
            .run("remote://bucket/none/**", &RestoreOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failures_counted_not_fatal() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_snapshot(&remote, "acme/good.db", 0);
        seed_snapshot(&remote, "acme/bad.db", 0);

        let engine = engine_with(Arc::clone(&remote));
        let out = tempfile::TempDir::new().unwrap();
        // A directory squatting on the bad candidate's output path makes
        // its final write fail while the other candidate proceeds.
        std::fs::create_dir_all(out.path().join("bad.db")).unwrap();
        let options = RestoreOptions {
            output_dir: Some(out.path().to_path_buf()),
            ..Default::default()
        };

        let summary = engine
            .run("remote://bucket/acme/**", &options)
            .await
            .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.errors, 1);
        assert!(!summary.is_success());
    }

    #[tokio::test]
    async fn test_if_db_not_exists_skips() {
        let remote = Arc::new(InMemoryRemote::new());
        seed_snapshot(&remote, "acme/db1.db", 0);

        let engine = engine_with(Arc::clone(&remote));
        let out = tempfile::TempDir::new().unwrap();
        let existing = out.path().join("db1.db");
        std::fs::write(&existing, "pre-existing").unwrap();

        let options = RestoreOptions {
            output_dir: Some(out.path().to_path_buf()),
            if_db_not_exists: true,
            ..Default::default()
        };
        let summary = engine
            .run("remote://bucket/acme/**", &options)
            .await
            .unwrap();

        assert!(summary.is_success());
        // The pre-existing file was not overwritten.
        assert_eq!(std::fs::read(&existing).unwrap(), b"pre-existing");
    }

    #[tokio::test]
    async fn test_config_backed_discovery() {
        let remote = Arc::new(InMemoryRemote::new());
        // Backups for the configured database live under its expanded
        // template prefix.
        seed_snapshot(&remote, "app/orders", 0);

        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("fleetsync.yml");
        std::fs::write(
            &config_path,
            r#"
databases:
  - path: /data/app/orders.db
    replica:
      type: s3
      bucket: backups
      path: "{{project}}/{{tenant}}"
  - path: /data/other/ignored.db
"#,
        )
        .unwrap();

        let engine = engine_with(Arc::clone(&remote));
        let out = tempfile::TempDir::new().unwrap();
        let options = RestoreOptions {
            config_path: Some(config_path),
            output_dir: Some(out.path().to_path_buf()),
            ..Default::default()
        };

        let summary = engine.run("/data/app/*.db", &options).await.unwrap();
        assert_eq!(summary.total, 1);
        assert!(summary.is_success());
        assert!(out.path().join("orders.db").exists());
    }

    #[tokio::test]
    async fn test_config_candidate_without_replica_fails() {
        let remote = Arc::new(InMemoryRemote::new());
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("fleetsync.yml");
        std::fs::write(
            &config_path,
            "databases:\n  - path: /data/app/orders.db\n",
        )
        .unwrap();

        let engine = engine_with(remote);
        let options = RestoreOptions {
            config_path: Some(config_path),
            output_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let summary = engine.run("/data/**", &options).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.errors, 1);
    }
}
