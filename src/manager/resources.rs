// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared resources for the whole fleet.
//!
//! One instance serves every tracked database: worker pools replace
//! per-database background tasks, the connection pool caps open SQLite
//! handles, and the buffer pool recycles read buffers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::FleetError;
use crate::metrics::FleetMetrics;
use crate::pool::{BufferPool, ConnectionPool, PoolTask, WorkerPool};
use crate::sqlite;

/// Idle timeout for pooled SQLite handles.
const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide shared pools.
pub struct SharedResources {
    /// Workers observing hot databases (size/WAL metrics).
    pub monitor_pool: WorkerPool,
    /// Workers producing whole-file snapshots.
    pub snapshot_pool: WorkerPool,
    /// Workers running replica maintenance.
    pub replica_pool: WorkerPool,
    /// Scratch read buffers, shared with every streaming replica.
    pub buffer_pool: Arc<BufferPool>,
    /// LRU-bounded read-only SQLite handles.
    pub connection_pool: Arc<ConnectionPool>,
}

impl SharedResources {
    /// Build the standard pool set, sized for fleets in the tens of
    /// thousands of databases with a bounded hot set.
    #[must_use]
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            monitor_pool: WorkerPool::new("monitor", 100),
            snapshot_pool: WorkerPool::new("snapshot", 50),
            replica_pool: WorkerPool::new("replica", 200),
            buffer_pool: Arc::new(BufferPool::new()),
            connection_pool: Arc::new(ConnectionPool::new(
                max_connections,
                CONNECTION_IDLE_TIMEOUT,
            )),
        })
    }

    /// Drain and stop every worker pool.
    pub async fn shutdown(&self) {
        self.monitor_pool.shutdown().await;
        self.snapshot_pool.shutdown().await;
        self.replica_pool.shutdown().await;
    }
}

/// One-shot observation of a hot database, submitted on promotion.
///
/// Replaces the per-database monitor task of a naive design: the shared
/// monitor pool bounds how many of these run at once, and the size query
/// goes through the shared connection pool rather than a private handle.
pub struct MonitorTask {
    path: String,
    connections: Arc<ConnectionPool>,
    metrics: FleetMetrics,
}

impl MonitorTask {
    #[must_use]
    pub fn new(path: String, connections: Arc<ConnectionPool>, metrics: FleetMetrics) -> Self {
        Self {
            path,
            connections,
            metrics,
        }
    }
}

#[async_trait]
impl PoolTask for MonitorTask {
    async fn execute(&self) -> Result<(), FleetError> {
        let handle = self.connections.get(&self.path)?;
        let size = {
            let conn = handle.lock();
            let page_count: u64 = conn.query_row("PRAGMA page_count", [], |r| r.get(0))?;
            let page_size: u64 = conn.query_row("PRAGMA page_size", [], |r| r.get(0))?;
            page_count * page_size
        };
        self.connections.release(&self.path);

        let wal_size = sqlite::wal_size(Path::new(&self.path));
        self.metrics
            .record_db_metrics(&self.path, size, wal_size, true);
        Ok(())
    }

    fn on_error(&self, err: FleetError) {
        warn!(path = %self.path, error = %err, "monitor task failed");
    }
}
