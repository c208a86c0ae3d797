// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Streaming replica.
//!
//! A [`StreamingReplica`] binds one database to a remote client and ships
//! checkpointed snapshots on a fixed cadence while the database is hot.
//! Artifacts live under a generation/snapshot key layout:
//!
//! ```text
//! <prefix>/generations/<generation>/snapshots/<seq>.ltx
//! ```
//!
//! A fresh generation starts every time a replica is created, so demoting
//! and re-promoting a database begins a new lineage rather than appending to
//! a stale one. Restore picks the lexicographically latest snapshot of the
//! latest generation.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::compress;
use crate::error::FleetError;
use crate::metrics::FleetMetrics;
use crate::pool::BufferPool;
use crate::remote::RemoteClient;
use crate::sqlite;

/// Options for a restore operation.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Where the restored primary file is written.
    pub output_path: PathBuf,
}

/// Background snapshot shipper for one hot database.
pub struct StreamingReplica {
    db_path: PathBuf,
    prefix: String,
    client: Arc<dyn RemoteClient>,
    sync_interval: Duration,
    generation: String,
    seq: AtomicU64,
    /// `(mtime, size)` of the primary file at the last successful upload.
    last_uploaded: Mutex<Option<(SystemTime, u64)>>,
    buffers: Arc<BufferPool>,
    metrics: FleetMetrics,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StreamingReplica {
    #[must_use]
    pub fn new(
        db_path: impl Into<PathBuf>,
        prefix: impl Into<String>,
        client: Arc<dyn RemoteClient>,
        sync_interval: Duration,
        buffers: Arc<BufferPool>,
        metrics: FleetMetrics,
    ) -> Arc<Self> {
        let nanos = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        Arc::new(Self {
            db_path: db_path.into(),
            prefix: prefix.into(),
            client,
            sync_interval,
            generation: format!("{nanos:016x}"),
            seq: AtomicU64::new(0),
            last_uploaded: Mutex::new(None),
            buffers,
            metrics,
            shutdown: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        })
    }

    /// Path of the database this replica is bound to.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Generation identifier of this replica's lineage.
    #[must_use]
    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Start the background sync loop.
    pub async fn start(self: Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let replica = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(replica.sync_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = replica.sync().await {
                            warn!(db = %replica.db_path.display(), error = %e, "replica sync failed");
                        }
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(db = %replica.db_path.display(), "replica sync loop exited");
        });
        *self.task.lock().await = Some(handle);
        info!(db = %self.db_path.display(), generation = %self.generation, "streaming replica started");
    }

    /// Stop the sync loop. Non-hard stops run one best-effort final sync
    /// before the loop is signaled; hard stops skip it (used on shutdown,
    /// where the whole context is going away).
    pub async fn stop(&self, hard: bool) {
        if !hard {
            if let Err(e) = self.sync().await {
                debug!(db = %self.db_path.display(), error = %e, "final sync before stop failed");
            }
        }
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!(db = %self.db_path.display(), "streaming replica stopped");
    }

    /// Ship one snapshot if the primary file changed since the last upload.
    ///
    /// Checkpoints the WAL, reads the primary file, compresses and uploads
    /// it under the next snapshot key. A no-op (unchanged file) is not a
    /// sync for metrics purposes.
    pub async fn sync(&self) -> Result<(), FleetError> {
        let start = Instant::now();

        let meta = std::fs::metadata(&self.db_path)?;
        let fingerprint = (meta.modified()?, meta.len());
        if *self.last_uploaded.lock() == Some(fingerprint) {
            return Ok(());
        }

        let data = sqlite::read_db_bytes(&self.db_path, &self.buffers)?;
        let compressed = compress::compress(&data);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let key = join_key(
            &self.prefix,
            &format!("generations/{}/snapshots/{seq:010}.ltx", self.generation),
        );

        let bytes = compressed.len() as u64;
        let result = self.client.upload(&key, Bytes::from(compressed)).await;
        let failed = result.is_err();
        self.metrics.record_sync(
            &self.db_path.to_string_lossy(),
            start.elapsed(),
            bytes,
            true,
            failed,
        );
        result?;

        *self.last_uploaded.lock() = Some(fingerprint);
        debug!(db = %self.db_path.display(), key = %key, bytes, "snapshot shipped");
        Ok(())
    }

    /// Restore the latest snapshot into `options.output_path`.
    pub async fn restore(&self, options: &RestoreOptions) -> Result<(), FleetError> {
        restore_from(self.client.as_ref(), &self.prefix, &options.output_path).await
    }
}

/// Restore the latest snapshot under `prefix` to `output_path`.
///
/// Picks the lexicographically greatest snapshot key of the greatest
/// generation; snapshot sequence numbers are zero-padded so lexicographic
/// order is creation order.
pub async fn restore_from(
    client: &dyn RemoteClient,
    prefix: &str,
    output_path: &Path,
) -> Result<(), FleetError> {
    let generations_prefix = join_key(prefix, "generations/");
    let keys = client.list(&generations_prefix).await?;

    let latest = keys
        .into_iter()
        .filter(|k| k.contains("/snapshots/"))
        .max()
        .ok_or_else(|| FleetError::NotFound(format!("no snapshots under {generations_prefix}")))?;

    debug!(key = %latest, output = %output_path.display(), "restoring snapshot");
    let payload = client.download(&latest).await?;
    let data = compress::decompress(&payload);

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, data)?;
    info!(key = %latest, output = %output_path.display(), "database restored");
    Ok(())
}

/// Join a key prefix and a relative part without doubling separators.
#[must_use]
pub fn join_key(prefix: &str, rest: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        rest.to_string()
    } else {
        format!("{prefix}/{rest}")
    }
}
