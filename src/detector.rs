// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write detection and hot/cold classification.
//!
//! The detector periodically stats every tracked database and classifies it
//! as hot (recently modified) or cold (quiescent). Promotion and demotion
//! are reported through callbacks that run while the detector's write lock
//! is held. Callbacks must only do lock-free scheduling (a channel send),
//! never real work, and must not call back into the detector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::FleetError;
use crate::metrics::FleetMetrics;

/// Tier-transition callback. Invoked under the detector's write lock.
pub type TierCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-database write-detection state.
#[derive(Debug, Clone)]
struct WriteState {
    last_mod: SystemTime,
    last_size: u64,
    is_hot: bool,
    hot_until: Instant,
    last_checked: Instant,
}

#[derive(Default)]
struct DetectorState {
    databases: HashMap<String, WriteState>,
    /// Hot paths in promotion order; the front is the LRU eviction victim.
    hot_list: Vec<String>,
}

/// Periodic scanner maintaining the hot/cold classification.
pub struct WriteDetector {
    scan_interval: Duration,
    hot_duration: Duration,
    max_hot: usize,
    state: RwLock<DetectorState>,
    on_promote: RwLock<Option<TierCallback>>,
    on_demote: RwLock<Option<TierCallback>>,
    metrics: FleetMetrics,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl WriteDetector {
    #[must_use]
    pub fn new(
        scan_interval: Duration,
        hot_duration: Duration,
        max_hot: usize,
        metrics: FleetMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            scan_interval,
            hot_duration,
            max_hot,
            state: RwLock::new(DetectorState::default()),
            on_promote: RwLock::new(None),
            on_demote: RwLock::new(None),
            metrics,
            shutdown: Mutex::new(None),
            task: tokio::sync::Mutex::new(None),
        })
    }

    /// Install the promotion/demotion callbacks. Both run under the
    /// detector's write lock and must be non-blocking.
    pub fn set_callbacks(&self, on_promote: TierCallback, on_demote: TierCallback) {
        *self.on_promote.write() = Some(on_promote);
        *self.on_demote.write() = Some(on_demote);
    }

    /// Start the scan loop. The first scan runs immediately.
    pub async fn start(self: Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let detector = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(detector.scan_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => detector.perform_scan(),
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("write detector scan loop exited");
        });
        *self.task.lock().await = Some(handle);
        info!(
            scan_interval = ?self.scan_interval,
            hot_duration = ?self.hot_duration,
            max_hot = self.max_hot,
            "write detector started"
        );
    }

    /// Stop the scan loop and join it.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("write detector stopped");
    }

    /// Run one scan over every tracked database.
    ///
    /// Holds the write lock for the whole scan; `stat` failures other than
    /// NotFound leave the entry untouched for the next tick.
    pub fn perform_scan(&self) {
        let scan_start = Instant::now();
        let now = Instant::now();
        let mut promoted = 0usize;
        let mut demoted = 0usize;

        let mut state = self.state.write();
        let on_promote = self.on_promote.read().clone();
        let on_demote = self.on_demote.read().clone();

        let mut new_hot_list = Vec::with_capacity(state.hot_list.len());
        let paths: Vec<String> = state.databases.keys().cloned().collect();

        for path in paths {
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // The file disappeared; drop it and demote if hot.
                    if let Some(entry) = state.databases.remove(&path) {
                        if entry.is_hot {
                            if let Some(cb) = &on_demote {
                                cb(&path);
                            }
                            demoted += 1;
                        }
                    }
                    continue;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "stat failed, keeping previous state");
                    continue;
                }
            };

            let entry = state.databases.get_mut(&path).expect("key from snapshot");
            let mtime = meta.modified().unwrap_or(entry.last_mod);
            let modified = mtime > entry.last_mod || meta.len() != entry.last_size;

            if modified {
                if !entry.is_hot {
                    if let Some(cb) = &on_promote {
                        cb(&path);
                    }
                    promoted += 1;
                }
                entry.is_hot = true;
                entry.hot_until = now + self.hot_duration;
                entry.last_mod = mtime;
                entry.last_size = meta.len();
                new_hot_list.push(path.clone());
            } else if entry.is_hot && now > entry.hot_until {
                entry.is_hot = false;
                if let Some(cb) = &on_demote {
                    cb(&path);
                }
                demoted += 1;
            } else if entry.is_hot {
                new_hot_list.push(path.clone());
            }
            entry.last_checked = now;
        }

        // Enforce the hot cap: evict the entries with the earliest hot
        // deadlines first.
        if new_hot_list.len() > self.max_hot {
            new_hot_list.sort_by_key(|path| {
                state
                    .databases
                    .get(path)
                    .map(|entry| entry.hot_until)
                    .unwrap_or(now)
            });
            let to_evict = new_hot_list.len() - self.max_hot;
            for path in new_hot_list.drain(..to_evict) {
                if let Some(entry) = state.databases.get_mut(&path) {
                    entry.is_hot = false;
                }
                if let Some(cb) = &on_demote {
                    cb(&path);
                }
                demoted += 1;
            }
        }

        let hot = new_hot_list.len();
        let total = state.databases.len();
        state.hot_list = new_hot_list;
        drop(state);

        self.metrics.update_tier_counts(hot, total - hot);
        debug!(
            duration = ?scan_start.elapsed(),
            total,
            hot,
            promoted,
            demoted,
            "write detection scan complete"
        );
    }

    /// Register a single database. A no-op when already tracked; fails when
    /// the file cannot be stat'ed.
    pub fn add_database(&self, path: &str) -> Result<(), FleetError> {
        let mut state = self.state.write();
        if state.databases.contains_key(path) {
            return Ok(());
        }

        let meta = std::fs::metadata(path)?;
        state.databases.insert(
            path.to_string(),
            WriteState {
                last_mod: meta.modified()?,
                last_size: meta.len(),
                is_hot: false,
                hot_until: Instant::now(),
                last_checked: Instant::now(),
            },
        );
        Ok(())
    }

    /// Register every file matching the given glob patterns. Per-path
    /// registration failures are logged and skipped.
    pub fn add_databases(&self, patterns: &[String]) {
        for pattern in patterns {
            let matches = match glob::glob(pattern) {
                Ok(matches) => matches,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "glob pattern failed");
                    continue;
                }
            };
            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "unreadable glob match");
                        continue;
                    }
                };
                let path = path.to_string_lossy().into_owned();
                if let Err(e) = self.add_database(&path) {
                    warn!(path = %path, error = %e, "failed to add database");
                }
            }
        }
    }

    /// True when `path` is currently classified hot.
    #[must_use]
    pub fn is_hot(&self, path: &str) -> bool {
        self.state
            .read()
            .databases
            .get(path)
            .is_some_and(|entry| entry.is_hot)
    }

    /// `(total, hot, cold)` tracked counts.
    #[must_use]
    pub fn statistics(&self) -> (usize, usize, usize) {
        let state = self.state.read();
        let total = state.databases.len();
        let hot = state.hot_list.len();
        (total, hot, total - hot)
    }

    /// Snapshot of the hot paths, oldest first.
    #[must_use]
    pub fn hot_databases(&self) -> Vec<String> {
        self.state.read().hot_list.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn create_file(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn counting_callbacks() -> (TierCallback, TierCallback, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let promoted = Arc::new(AtomicUsize::new(0));
        let demoted = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&promoted);
        let d = Arc::clone(&demoted);
        (
            Arc::new(move |_path: &str| {
                p.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(move |_path: &str| {
                d.fetch_add(1, Ordering::SeqCst);
            }),
            promoted,
            demoted,
        )
    }

    fn test_detector(hot_duration: Duration, max_hot: usize) -> Arc<WriteDetector> {
        WriteDetector::new(
            Duration::from_millis(100),
            hot_duration,
            max_hot,
            FleetMetrics::new(),
        )
    }

    #[test]
    fn test_add_database_requires_existing_file() {
        let detector = test_detector(Duration::from_millis(200), 10);
        assert!(detector.add_database("/nonexistent/a.db").is_err());

        let dir = TempDir::new().unwrap();
        let path = create_file(&dir, "a.db", "x");
        detector.add_database(&path).unwrap();
        // Re-adding is a no-op.
        detector.add_database(&path).unwrap();
        assert_eq!(detector.statistics(), (1, 0, 1));
    }

    #[test]
    fn test_scan_promotes_on_modification() {
        let dir = TempDir::new().unwrap();
        let detector = test_detector(Duration::from_secs(60), 10);
        let (on_promote, on_demote, promoted, _demoted) = counting_callbacks();
        detector.set_callbacks(on_promote, on_demote);

        let path = create_file(&dir, "a.db", "v1");
        detector.add_database(&path).unwrap();

        detector.perform_scan();
        assert!(!detector.is_hot(&path));

        std::fs::write(&path, "v2 longer").unwrap();
        detector.perform_scan();

        assert!(detector.is_hot(&path));
        assert_eq!(promoted.load(Ordering::SeqCst), 1);
        assert_eq!(detector.statistics(), (1, 1, 0));
    }

    #[test]
    fn test_hot_expires_after_duration() {
        let dir = TempDir::new().unwrap();
        let detector = test_detector(Duration::from_millis(30), 10);
        let (on_promote, on_demote, _promoted, demoted) = counting_callbacks();
        detector.set_callbacks(on_promote, on_demote);

        let path = create_file(&dir, "a.db", "v1");
        detector.add_database(&path).unwrap();
        std::fs::write(&path, "v2 longer").unwrap();
        detector.perform_scan();
        assert!(detector.is_hot(&path));

        std::thread::sleep(Duration::from_millis(60));
        detector.perform_scan();

        assert!(!detector.is_hot(&path));
        assert_eq!(demoted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_deleted_file_dropped_and_demoted_once() {
        let dir = TempDir::new().unwrap();
        let detector = test_detector(Duration::from_secs(60), 10);
        let (on_promote, on_demote, _promoted, demoted) = counting_callbacks();
        detector.set_callbacks(on_promote, on_demote);

        let path = create_file(&dir, "a.db", "v1");
        detector.add_database(&path).unwrap();
        std::fs::write(&path, "v2 longer").unwrap();
        detector.perform_scan();
        assert!(detector.is_hot(&path));

        std::fs::remove_file(&path).unwrap();
        detector.perform_scan();
        detector.perform_scan();

        assert_eq!(detector.statistics(), (0, 0, 0));
        assert_eq!(demoted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_hot_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let detector = test_detector(Duration::from_secs(60), 2);
        let (on_promote, on_demote, promoted, demoted) = counting_callbacks();
        detector.set_callbacks(on_promote, on_demote);

        let mut paths = Vec::new();
        for i in 0..5 {
            let path = create_file(&dir, &format!("db{i}.db"), "v1");
            detector.add_database(&path).unwrap();
            paths.push(path);
        }

        for path in &paths {
            std::fs::write(path, "modified!").unwrap();
        }
        detector.perform_scan();

        let (total, hot, cold) = detector.statistics();
        assert_eq!(total, 5);
        assert_eq!(hot, 2);
        assert_eq!(cold, 3);
        assert_eq!(promoted.load(Ordering::SeqCst), 5);
        assert_eq!(demoted.load(Ordering::SeqCst), 3);
        assert_eq!(detector.hot_databases().len(), 2);
    }

    #[test]
    fn test_hot_membership_matches_hot_list() {
        let dir = TempDir::new().unwrap();
        let detector = test_detector(Duration::from_secs(60), 10);

        let a = create_file(&dir, "a.db", "v1");
        let b = create_file(&dir, "b.db", "v1");
        detector.add_database(&a).unwrap();
        detector.add_database(&b).unwrap();

        std::fs::write(&a, "changed").unwrap();
        detector.perform_scan();

        let hot_list = detector.hot_databases();
        for path in [&a, &b] {
            assert_eq!(detector.is_hot(path), hot_list.contains(path));
        }
    }

    #[test]
    fn test_add_databases_from_patterns() {
        let dir = TempDir::new().unwrap();
        create_file(&dir, "a.db", "x");
        create_file(&dir, "b.db", "x");
        create_file(&dir, "ignore.txt", "x");

        let detector = test_detector(Duration::from_secs(60), 10);
        let pattern = dir.path().join("*.db").to_string_lossy().into_owned();
        detector.add_databases(&[pattern, "/bad/[pattern".into()]);

        assert_eq!(detector.statistics(), (2, 0, 2));
    }

    #[tokio::test]
    async fn test_start_runs_initial_scan() {
        let dir = TempDir::new().unwrap();
        let detector = WriteDetector::new(
            Duration::from_secs(3600),
            Duration::from_secs(60),
            10,
            FleetMetrics::new(),
        );
        let path = create_file(&dir, "a.db", "v1");
        detector.add_database(&path).unwrap();
        std::fs::write(&path, "changed bytes").unwrap();

        Arc::clone(&detector).start().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        detector.stop().await;

        assert!(detector.is_hot(&path));
    }
}
