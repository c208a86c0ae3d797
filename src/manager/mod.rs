// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hot/cold lifecycle management.
//!
//! The [`HotColdManager`] owns the active set (hot databases with open
//! handles and running replicas) and the cold set (tracked bookkeeping
//! only). The write detector classifies; the manager reacts: its promote
//! and demote callbacks enqueue commands that a dedicated task processes,
//! so the real work (opening handles, constructing clients, starting
//! replicas) never runs under the detector's lock.

pub mod integrated;
pub mod resources;

pub use integrated::IntegratedManager;
pub use resources::{MonitorTask, SharedResources};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ReplicaTemplate;
use crate::dbpath::DbPath;
use crate::detector::WriteDetector;
use crate::entry::TrackedDb;
use crate::error::FleetError;
use crate::metrics::FleetMetrics;
use crate::remote::ReplicaFactory;
use crate::replica::StreamingReplica;

/// Statistics-logging cadence for the management loop.
const MANAGEMENT_TICK: Duration = Duration::from_secs(30);

/// Bookkeeping for a cold database; no runtime resources.
#[derive(Debug, Clone)]
pub struct ColdInfo {
    pub path: String,
    pub tokens: DbPath,
}

/// Manager construction options.
#[derive(Debug, Clone)]
pub struct HotColdOptions {
    pub max_hot: usize,
    pub scan_interval: Duration,
    pub hot_duration: Duration,
    pub replica_template: Option<ReplicaTemplate>,
}

impl Default for HotColdOptions {
    fn default() -> Self {
        Self {
            max_hot: 1000,
            scan_interval: Duration::from_secs(15),
            hot_duration: Duration::from_secs(15),
            replica_template: None,
        }
    }
}

enum TierCommand {
    Promote(String),
    Demote(String),
}

#[derive(Default)]
struct ManagerState {
    hot: HashMap<String, Arc<TrackedDb>>,
    cold: HashMap<String, ColdInfo>,
    hot_replicas: HashMap<String, Arc<StreamingReplica>>,
}

/// Owner of the hot and cold sets.
pub struct HotColdManager {
    options: HotColdOptions,
    detector: Arc<WriteDetector>,
    factory: Arc<ReplicaFactory>,
    resources: Arc<SharedResources>,
    metrics: FleetMetrics,
    state: RwLock<ManagerState>,
    cmd_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<TierCommand>>>,
    shutdown: parking_lot::Mutex<Option<watch::Sender<bool>>>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl HotColdManager {
    #[must_use]
    pub fn new(
        options: HotColdOptions,
        resources: Arc<SharedResources>,
        factory: Arc<ReplicaFactory>,
        metrics: FleetMetrics,
    ) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let detector = WriteDetector::new(
            options.scan_interval,
            options.hot_duration,
            options.max_hot,
            metrics.clone(),
        );

        // Callbacks run under the detector's lock: channel sends only.
        let promote_tx = cmd_tx.clone();
        let demote_tx = cmd_tx;
        detector.set_callbacks(
            Arc::new(move |path: &str| {
                let _ = promote_tx.send(TierCommand::Promote(path.to_string()));
            }),
            Arc::new(move |path: &str| {
                let _ = demote_tx.send(TierCommand::Demote(path.to_string()));
            }),
        );

        Arc::new(Self {
            options,
            detector,
            factory,
            resources,
            metrics,
            state: RwLock::new(ManagerState::default()),
            cmd_rx: parking_lot::Mutex::new(Some(cmd_rx)),
            shutdown: parking_lot::Mutex::new(None),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// Start the detector, the command processor and the management loop.
    pub async fn start(self: Arc<Self>) {
        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        Arc::clone(&self.detector).start().await;

        let mut cmd_rx = self
            .cmd_rx
            .lock()
            .take()
            .expect("manager started more than once");
        let manager = Arc::clone(&self);
        let mut cmd_shutdown = rx.clone();
        let command_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(TierCommand::Promote(path)) => {
                            if let Err(e) = manager.promote_to_hot(&path).await {
                                warn!(path = %path, error = %e, "promotion failed");
                            }
                        }
                        Some(TierCommand::Demote(path)) => {
                            if let Err(e) = manager.demote_to_cold(&path).await {
                                warn!(path = %path, error = %e, "demotion failed");
                            }
                        }
                        None => break,
                    },
                    changed = cmd_shutdown.changed() => {
                        if changed.is_err() || *cmd_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("tier command loop exited");
        });

        let manager = Arc::clone(&self);
        let mut mgmt_shutdown = rx;
        let management_loop = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MANAGEMENT_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would log before anything is enrolled.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.update_metrics().await;
                        manager.log_statistics().await;
                    }
                    changed = mgmt_shutdown.changed() => {
                        if changed.is_err() || *mgmt_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        let mut tasks = self.tasks.lock().await;
        tasks.push(command_loop);
        tasks.push(management_loop);

        info!(
            max_hot = self.options.max_hot,
            scan_interval = ?self.options.scan_interval,
            hot_duration = ?self.options.hot_duration,
            "hot/cold manager started"
        );
    }

    /// Stop everything: detector first, then loops, then hot resources.
    pub async fn stop(&self) {
        self.detector.stop().await;

        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handles = std::mem::take(&mut *self.tasks.lock().await);
        for handle in handles {
            let _ = handle.await;
        }

        let mut state = self.state.write().await;
        let replicas: Vec<_> = state.hot_replicas.drain().collect();
        for (path, replica) in replicas {
            // Context is going away: no final sync.
            replica.stop(true).await;
            debug!(path = %path, "replica stopped on shutdown");
        }
        let hot: Vec<_> = state.hot.drain().collect();
        for (path, entry) in hot {
            entry.detach_replica();
            if let Err(e) = entry.close() {
                warn!(path = %path, error = %e, "failed to close hot database on shutdown");
            }
        }
        info!("hot/cold manager stopped");
    }

    /// Promote a database to the hot tier.
    ///
    /// A no-op when already hot. Replica construction failures are logged
    /// and the promotion proceeds without replication; open failures abort
    /// the promotion.
    pub async fn promote_to_hot(&self, path: &str) -> Result<(), FleetError> {
        let mut state = self.state.write().await;
        if state.hot.contains_key(path) {
            return Ok(());
        }
        state.cold.remove(path);

        let entry = TrackedDb::new(path);

        let resources = Arc::clone(&self.resources);
        let metrics = self.metrics.clone();
        let monitor_path = path.to_string();
        entry.set_on_open(Box::new(move |_db| {
            let task = MonitorTask::new(
                monitor_path.clone(),
                Arc::clone(&resources.connection_pool),
                metrics.clone(),
            );
            if let Err(e) = resources.monitor_pool.try_submit(Box::new(task)) {
                warn!(path = %monitor_path, error = %e, "monitor task not scheduled");
            }
            Ok(())
        }));
        let close_path = path.to_string();
        entry.set_on_close(Box::new(move |_db| {
            debug!(path = %close_path, "hot database handle released");
            Ok(())
        }));

        entry.open()?;

        if let Some(template) = &self.options.replica_template {
            match self.factory.create_client(template, Path::new(path)).await {
                Ok((client, prefix)) => {
                    let replica = StreamingReplica::new(
                        path,
                        prefix,
                        client,
                        template.sync_interval(),
                        Arc::clone(&self.resources.buffer_pool),
                        self.metrics.clone(),
                    );
                    Arc::clone(&replica).start().await;
                    entry.attach_replica(Arc::clone(&replica));
                    state.hot_replicas.insert(path.to_string(), replica);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "replica creation failed, continuing without replication");
                }
            }
        }

        state.hot.insert(path.to_string(), entry);
        drop(state);

        let tokens = DbPath::parse(path);
        self.metrics
            .update_database_stats(&tokens.project, &tokens.database, 1, 1, 1);
        info!(db = %tokens.filename, "database promoted to hot tier");
        Ok(())
    }

    /// Demote a database to the cold tier. A no-op when not hot.
    pub async fn demote_to_cold(&self, path: &str) -> Result<(), FleetError> {
        let mut state = self.state.write().await;
        let Some(entry) = state.hot.remove(path) else {
            return Ok(());
        };

        if let Some(replica) = state.hot_replicas.remove(path) {
            // Non-hard stop: best-effort final sync before the loop exits.
            replica.stop(false).await;
            entry.detach_replica();
        }

        if let Err(e) = entry.close() {
            warn!(path = %path, error = %e, "failed to close database during demotion");
        }

        let tokens = DbPath::parse(path);
        state.cold.insert(
            path.to_string(),
            ColdInfo {
                path: path.to_string(),
                tokens: tokens.clone(),
            },
        );
        drop(state);

        self.metrics
            .update_database_stats(&tokens.project, &tokens.database, 1, 1, 0);
        info!(db = %tokens.filename, "database demoted to cold tier");
        Ok(())
    }

    /// Enroll every match of the given patterns: the detector tracks them
    /// and new paths join the cold set.
    pub async fn add_databases(&self, patterns: &[String]) {
        self.detector.add_databases(patterns);

        let mut state = self.state.write().await;
        for pattern in patterns {
            let Ok(matches) = glob::glob(pattern) else {
                continue; // already logged by the detector
            };
            for path in matches.flatten() {
                let path = path.to_string_lossy().into_owned();
                if state.hot.contains_key(&path) || state.cold.contains_key(&path) {
                    continue;
                }
                let tokens = DbPath::parse(&path);
                state.cold.insert(
                    path.clone(),
                    ColdInfo {
                        path,
                        tokens,
                    },
                );
            }
        }
        drop(state);

        self.update_metrics().await;
    }

    /// Publish tier counts and per-project aggregates.
    pub async fn update_metrics(&self) {
        let state = self.state.read().await;
        self.metrics
            .update_tier_counts(state.hot.len(), state.cold.len());

        let mut per_project: HashMap<String, (usize, usize)> = HashMap::new();
        for info in state.cold.values() {
            per_project.entry(info.tokens.project.clone()).or_default().0 += 1;
        }
        for path in state.hot.keys() {
            let project = DbPath::parse(path).project;
            let counts = per_project.entry(project).or_default();
            counts.0 += 1;
            counts.1 += 1;
        }
        drop(state);

        for (project, (total, hot)) in per_project {
            self.metrics.update_project_stats(&project, total, hot);
        }
    }

    async fn log_statistics(&self) {
        let (total, hot, cold) = self.statistics().await;
        let (detector_total, detector_hot, _) = self.detector.statistics();
        info!(
            total_tracked = detector_total,
            hot_databases = hot,
            cold_databases = cold,
            total,
            detector_hot,
            "hot/cold manager statistics"
        );
    }

    /// `(total, hot, cold)` managed counts.
    pub async fn statistics(&self) -> (usize, usize, usize) {
        let state = self.state.read().await;
        let hot = state.hot.len();
        let cold = state.cold.len();
        (hot + cold, hot, cold)
    }

    /// Paths of currently hot databases.
    pub async fn hot_databases(&self) -> Vec<String> {
        self.state.read().await.hot.keys().cloned().collect()
    }

    /// True when `path` is in the hot set.
    pub async fn is_hot(&self, path: &str) -> bool {
        self.state.read().await.hot.contains_key(path)
    }

    /// The manager's write detector (status queries, tests).
    #[must_use]
    pub fn detector(&self) -> &Arc<WriteDetector> {
        &self.detector
    }
}
