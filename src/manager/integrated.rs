// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Top-level facade binding the hot/cold manager to its shared resources.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::FleetConfig;
use crate::error::FleetError;
use crate::metrics::FleetMetrics;
use crate::pool::ConnectionPoolStats;
use crate::remote::{ClientBuilder, ReplicaFactory};

use super::{HotColdManager, HotColdOptions, SharedResources};

/// Statistics-logging cadence.
const STATS_TICK: Duration = Duration::from_secs(30);

/// Wires the hot/cold manager with shared resources, the replica factory
/// and the metrics recorder, and runs the outer lifecycle.
pub struct IntegratedManager {
    config: FleetConfig,
    manager: Arc<HotColdManager>,
    resources: Arc<SharedResources>,
    factory: Arc<ReplicaFactory>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for IntegratedManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegratedManager").finish_non_exhaustive()
    }
}

impl IntegratedManager {
    /// Build the component graph from configuration. The replica client
    /// builder must be injected via [`set_client_builder`]
    /// (Self::set_client_builder) before [`start`](Self::start) for
    /// replication to be active.
    pub fn new(config: FleetConfig) -> Result<Arc<Self>, FleetError> {
        if !config.enabled {
            return Err(FleetError::Config(
                "multi-database mode is not enabled".into(),
            ));
        }

        let metrics = FleetMetrics::new();
        let resources = SharedResources::new(config.max_hot_databases);
        let factory = Arc::new(ReplicaFactory::new());

        let manager = HotColdManager::new(
            HotColdOptions {
                max_hot: config.max_hot_databases,
                scan_interval: config.scan_interval(),
                hot_duration: config.hot_duration(),
                replica_template: config.replica_template.clone(),
            },
            Arc::clone(&resources),
            Arc::clone(&factory),
            metrics,
        );

        Ok(Arc::new(Self {
            config,
            manager,
            resources,
            factory,
            shutdown: Mutex::new(None),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }))
    }

    /// Inject the replica client constructor (the binary supplies the real
    /// S3 builder; tests supply in-memory ones).
    pub fn set_client_builder(&self, builder: ClientBuilder) {
        self.factory.set_client_builder(builder);
    }

    /// Start the pool cleanup loop, the manager and the stats loop, then
    /// enroll the configured patterns.
    pub async fn start(self: Arc<Self>) -> Result<(), FleetError> {
        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let cleanup = Arc::clone(&self.resources.connection_pool).start_cleanup(rx.clone());

        Arc::clone(&self.manager).start().await;
        self.manager.add_databases(&self.config.patterns).await;

        let facade = Arc::clone(&self);
        let mut stats_shutdown = rx;
        let stats_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => facade.log_statistics().await,
                    changed = stats_shutdown.changed() => {
                        if changed.is_err() || *stats_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(cleanup);
        tasks.push(stats_loop);

        info!(
            patterns = ?self.config.patterns,
            max_hot_databases = self.config.max_hot_databases,
            scan_interval = ?self.config.scan_interval(),
            "integrated manager started"
        );
        Ok(())
    }

    /// Stop everything and join all background tasks.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        self.manager.stop().await;

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
        self.resources.shutdown().await;
        info!("integrated manager stopped");
    }

    async fn log_statistics(&self) {
        let (total, hot, cold, conn) = self.statistics().await;
        info!(
            total_databases = total,
            hot_databases = hot,
            cold_databases = cold,
            open_connections = conn.current_open,
            total_connections = conn.total_opened,
            "system statistics"
        );
    }

    /// `(total, hot, cold, connection pool stats)`.
    pub async fn statistics(&self) -> (usize, usize, usize, ConnectionPoolStats) {
        let (total, hot, cold) = self.manager.statistics().await;
        (total, hot, cold, self.resources.connection_pool.stats())
    }

    /// Paths of currently hot databases.
    pub async fn hot_databases(&self) -> Vec<String> {
        self.manager.hot_databases().await
    }

    /// True when `path` is hot.
    pub async fn is_hot(&self, path: &str) -> bool {
        self.manager.is_hot(path).await
    }

    /// Re-expand the configured patterns to pick up newly created files.
    pub async fn refresh_patterns(&self) {
        self.manager.add_databases(&self.config.patterns).await;
    }

    /// The underlying hot/cold manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<HotColdManager> {
        &self.manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir, scan_secs: u64) -> FleetConfig {
        FleetConfig::from_yaml(&format!(
            r#"
enabled: true
patterns:
  - "{}/*.db"
scan-interval: {scan_secs}
"#,
            dir.path().display()
        ))
        .unwrap()
    }

    #[test]
    fn test_new_requires_enabled() {
        let err = IntegratedManager::new(FleetConfig::default()).unwrap_err();
        assert!(matches!(err, FleetError::Config(_)));
    }

    #[tokio::test]
    async fn test_start_enrolls_patterns() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.db"), "x").unwrap();
        std::fs::write(dir.path().join("b.db"), "y").unwrap();

        let facade = IntegratedManager::new(config_for(&dir, 3600)).unwrap();
        Arc::clone(&facade).start().await.unwrap();

        let (total, hot, cold, conn) = facade.statistics().await;
        assert_eq!(total, 2);
        assert_eq!(hot, 0);
        assert_eq!(cold, 2);
        assert_eq!(conn.current_open, 0);

        facade.stop().await;
    }

    #[tokio::test]
    async fn test_refresh_patterns_picks_up_new_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.db"), "x").unwrap();

        let facade = IntegratedManager::new(config_for(&dir, 3600)).unwrap();
        Arc::clone(&facade).start().await.unwrap();
        assert_eq!(facade.statistics().await.0, 1);

        std::fs::write(dir.path().join("b.db"), "y").unwrap();
        facade.refresh_patterns().await;
        assert_eq!(facade.statistics().await.0, 2);

        facade.stop().await;
    }
}
