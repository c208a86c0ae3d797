// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Minimal-mode replicator.
//!
//! The alternate data path for fleets that do not need streaming: one loop
//! globs the configured pattern, uploads a compressed whole-file snapshot of
//! every changed database, and sweeps expired snapshots hourly.
//!
//! Keys embed the *next* hour, truncated:
//!
//! ```text
//! <template>/<stem>-YYYYMMDD-HH0000.db.lz4
//! ```
//!
//! Successive changes within one hour overwrite the same key, so each
//! `(path, hour)` pair costs at most one stored object and the PUT rate is
//! bounded regardless of write frequency.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::compress;
use crate::config::SnapshotConfig;
use crate::dbpath::expand_path_template;
use crate::metrics::FleetMetrics;
use crate::pool::BufferPool;
use crate::remote::RemoteClient;
use crate::sqlite;

/// Retention sweep cadence.
const RETENTION_TICK: Duration = Duration::from_secs(3600);

/// Replication counters, updated atomically.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub scans: u64,
    pub uploads: u64,
    pub upload_errors: u64,
    pub bytes_uploaded: u64,
}

#[derive(Default)]
struct StatsInner {
    scans: AtomicU64,
    uploads: AtomicU64,
    upload_errors: AtomicU64,
    bytes_uploaded: AtomicU64,
}

#[derive(Debug, Clone)]
struct DbState {
    last_mod: SystemTime,
    last_size: u64,
}

/// Scan-and-upload replicator.
pub struct SnapshotReplicator {
    config: SnapshotConfig,
    client: Arc<dyn RemoteClient>,
    databases: Mutex<HashMap<String, DbState>>,
    upload_sem: Arc<Semaphore>,
    buffers: Arc<BufferPool>,
    stats: Arc<StatsInner>,
    metrics: FleetMetrics,
}

impl SnapshotReplicator {
    #[must_use]
    pub fn new(
        config: SnapshotConfig,
        client: Arc<dyn RemoteClient>,
        metrics: FleetMetrics,
    ) -> Arc<Self> {
        let permits = config.max_concurrent.max(1);
        Arc::new(Self {
            config,
            client,
            databases: Mutex::new(HashMap::new()),
            upload_sem: Arc::new(Semaphore::new(permits)),
            buffers: Arc::new(BufferPool::new()),
            stats: Arc::new(StatsInner::default()),
            metrics,
        })
    }

    /// Run the scan loop until the shutdown signal fires. In-flight uploads
    /// run to completion; the loop only stops scheduling new ones.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            pattern = %self.config.pattern,
            interval_secs = self.config.interval_secs,
            retention_days = self.config.retention_days,
            "snapshot replicator started"
        );

        let mut scan_ticker =
            tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        scan_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut retention_ticker = tokio::time::interval(RETENTION_TICK);
        retention_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first retention tick would sweep before anything
        // uploads; the immediate first scan tick is the initial scan.
        retention_ticker.tick().await;

        loop {
            tokio::select! {
                _ = scan_ticker.tick() => Arc::clone(&self).scan_and_sync().await,
                _ = retention_ticker.tick() => self.cleanup_old_backups().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("snapshot replicator stopped");
    }

    /// One scan-and-sync cycle: upload every new or changed match.
    pub async fn scan_and_sync(self: Arc<Self>) {
        let start = Instant::now();

        let matches = match glob::glob(&self.config.pattern) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(pattern = %self.config.pattern, error = %e, "glob failed");
                return;
            }
        };

        let mut handles = Vec::new();
        {
            // State is updated before the upload is enqueued so a change
            // produces at most one in-flight upload per (path, hour).
            let mut databases = self.databases.lock();
            for path in matches.flatten() {
                let Ok(meta) = std::fs::metadata(&path) else {
                    continue;
                };
                let key = path.to_string_lossy().into_owned();
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

                let changed = match databases.get(&key) {
                    None => true,
                    Some(state) => meta.len() != state.last_size || mtime > state.last_mod,
                };
                if changed {
                    databases.insert(
                        key.clone(),
                        DbState {
                            last_mod: mtime,
                            last_size: meta.len(),
                        },
                    );
                    let replicator = Arc::clone(&self);
                    handles.push(tokio::spawn(async move {
                        let _permit = replicator.upload_sem.acquire().await;
                        replicator.sync_database(Path::new(&key)).await;
                    }));
                }
            }
        }

        let tracked = self.databases.lock().len();
        let synced = handles.len();
        for handle in handles {
            let _ = handle.await;
        }

        self.stats.scans.fetch_add(1, Ordering::Relaxed);
        debug!(
            databases = tracked,
            synced,
            duration = ?start.elapsed(),
            "snapshot scan complete"
        );
    }

    /// Snapshot one database: checkpoint, read, compress, upload.
    async fn sync_database(&self, path: &Path) {
        let start = Instant::now();
        let data = match sqlite::read_db_bytes(path, &self.buffers) {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "read failed");
                return;
            }
        };

        let compressed = compress::compress(&data);
        let key = snapshot_key(&self.config.path_template, path, Utc::now());
        let bytes = compressed.len() as u64;

        let result = self.client.upload(&key, Bytes::from(compressed)).await;
        let failed = result.is_err();
        self.metrics
            .record_sync(&path.to_string_lossy(), start.elapsed(), bytes, false, failed);

        match result {
            Ok(()) => {
                self.stats.uploads.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
                debug!(path = %path.display(), key = %key, bytes, "snapshot uploaded");
            }
            Err(e) => {
                self.stats.upload_errors.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), key = %key, error = %e, "upload failed");
            }
        }
    }

    /// Delete snapshots older than the retention window. Keys whose
    /// embedded timestamp cannot be parsed are skipped, never deleted.
    pub async fn cleanup_old_backups(&self) {
        let start = Instant::now();
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        info!(cutoff = %cutoff.format("%Y-%m-%d"), "starting retention sweep");

        let keys = match self.client.list("").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "listing failed, skipping retention sweep");
                return;
            }
        };

        let to_delete: Vec<String> = keys
            .into_iter()
            .filter(|key| match parse_key_timestamp(key) {
                Some(ts) => ts < cutoff.naive_utc(),
                None => false,
            })
            .collect();

        if to_delete.is_empty() {
            info!("no expired snapshots");
            return;
        }

        let mut deleted = 0usize;
        for chunk in to_delete.chunks(1000) {
            match self.client.delete(chunk).await {
                Ok(()) => deleted += chunk.len(),
                Err(e) => warn!(batch = chunk.len(), error = %e, "delete batch failed"),
            }
        }

        info!(
            deleted,
            expired = to_delete.len(),
            duration = ?start.elapsed(),
            "retention sweep complete"
        );
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            scans: self.stats.scans.load(Ordering::Relaxed),
            uploads: self.stats.uploads.load(Ordering::Relaxed),
            upload_errors: self.stats.upload_errors.load(Ordering::Relaxed),
            bytes_uploaded: self.stats.bytes_uploaded.load(Ordering::Relaxed),
        }
    }

    /// Number of tracked databases.
    #[must_use]
    pub fn database_count(&self) -> usize {
        self.databases.lock().len()
    }
}

/// Build the snapshot key for `path` at time `now`.
///
/// The timestamp is the *next* hour truncated to the hour, so all uploads
/// within one wall-clock hour land on the same key.
#[must_use]
pub fn snapshot_key(template: &str, path: &Path, now: DateTime<Utc>) -> String {
    let expanded = expand_path_template(template, path);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let next_hour = (now + chrono::Duration::hours(1)).format("%Y%m%d-%H0000");
    if expanded.is_empty() {
        format!("{stem}-{next_hour}.db.lz4")
    } else {
        format!("{expanded}/{stem}-{next_hour}.db.lz4")
    }
}

/// Extract the `YYYYMMDD-HHMMSS` timestamp embedded in a snapshot key.
///
/// Returns `None` for keys produced by other templates; retention leaves
/// those untouched.
#[must_use]
pub fn parse_key_timestamp(key: &str) -> Option<NaiveDateTime> {
    let parts: Vec<&str> = key.split('-').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.len() >= 8 && part.starts_with("20") && part[..8].bytes().all(|b| b.is_ascii_digit())
        {
            let date = &part[..8];
            let time_part = parts.get(i + 1)?.split('.').next()?;
            if time_part.len() < 6 || !time_part[..6].bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            return NaiveDateTime::parse_from_str(
                &format!("{date}{}", &time_part[..6]),
                "%Y%m%d%H%M%S",
            )
            .ok();
        }
    }
    None
}
