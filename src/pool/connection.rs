// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded pool of read-only SQLite handles.
//!
//! Handles are opened on demand and cached by path. At capacity the least
//! recently used handle is evicted before a new one opens; a background loop
//! closes handles idle longer than the configured timeout.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::Connection;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::FleetError;
use crate::sqlite;

/// Callback invoked before a pooled handle closes.
pub type OnClose = Box<dyn Fn() -> Result<(), FleetError> + Send + Sync>;

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPoolStats {
    pub current_open: usize,
    pub total_opened: u64,
    pub total_closed: u64,
    pub max_connections: usize,
}

struct PooledConnection {
    conn: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    opened_at: Instant,
    last_used: Instant,
    use_count: u64,
    on_close: Option<OnClose>,
}

struct PoolInner {
    connections: HashMap<String, PooledConnection>,
    lru: LruList,
    total_opened: u64,
    total_closed: u64,
}

/// LRU-bounded cache of open read-only handles keyed by database path.
pub struct ConnectionPool {
    max_connections: usize,
    idle_timeout: Duration,
    inner: Mutex<PoolInner>,
}

impl ConnectionPool {
    #[must_use]
    pub fn new(max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            max_connections,
            idle_timeout,
            inner: Mutex::new(PoolInner {
                connections: HashMap::new(),
                lru: LruList::new(),
                total_opened: 0,
                total_closed: 0,
            }),
        }
    }

    /// Fetch the handle for `path`, opening one if needed.
    ///
    /// An already-open handle refreshes its recency; otherwise, at capacity,
    /// the LRU tail is closed first.
    pub fn get(&self, path: &str) -> Result<Arc<Mutex<Connection>>, FleetError> {
        let mut inner = self.inner.lock();

        if let Some(pooled) = inner.connections.get_mut(path) {
            pooled.last_used = Instant::now();
            pooled.use_count += 1;
            let conn = Arc::clone(&pooled.conn);
            inner.lru.touch(path);
            return Ok(conn);
        }

        if inner.connections.len() >= self.max_connections {
            match inner.lru.evict() {
                Some(victim) => Self::close_locked(&mut inner, &victim),
                // Unreachable while the lru mirrors the connection map.
                None => error!(path = %path, "connection pool at capacity with empty LRU"),
            }
        }

        let conn = Arc::new(Mutex::new(sqlite::open_read_only(Path::new(path))?));
        inner.connections.insert(
            path.to_string(),
            PooledConnection {
                conn: Arc::clone(&conn),
                opened_at: Instant::now(),
                last_used: Instant::now(),
                use_count: 1,
                on_close: None,
            },
        );
        inner.lru.add(path);
        inner.total_opened += 1;
        debug!(path = %path, open = inner.connections.len(), "opened pooled connection");
        Ok(conn)
    }

    /// Mark `path` as recently used.
    pub fn release(&self, path: &str) {
        let mut inner = self.inner.lock();
        if let Some(pooled) = inner.connections.get_mut(path) {
            pooled.last_used = Instant::now();
        }
    }

    /// Install a close hook for an open handle.
    pub fn set_on_close(&self, path: &str, on_close: OnClose) {
        let mut inner = self.inner.lock();
        if let Some(pooled) = inner.connections.get_mut(path) {
            pooled.on_close = Some(on_close);
        }
    }

    /// Explicitly close the handle for `path`, if open.
    pub fn close(&self, path: &str) {
        let mut inner = self.inner.lock();
        Self::close_locked(&mut inner, path);
    }

    fn close_locked(inner: &mut PoolInner, path: &str) {
        let Some(pooled) = inner.connections.remove(path) else {
            return;
        };
        if let Some(on_close) = &pooled.on_close {
            if let Err(e) = on_close() {
                warn!(path = %path, error = %e, "on-close callback failed");
            }
        }
        inner.lru.remove(path);
        inner.total_closed += 1;
        debug!(path = %path, uses = pooled.use_count, "closed pooled connection");
        // Dropping `pooled.conn` closes the handle once callers release it.
    }

    /// Close every handle idle longer than the configured timeout.
    pub fn cleanup(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let idle: Vec<String> = inner
            .connections
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_used) > self.idle_timeout)
            .map(|(path, _)| path.clone())
            .collect();
        for path in idle {
            Self::close_locked(&mut inner, &path);
        }
    }

    /// Spawn the idle-cleanup loop; runs at half the idle timeout until the
    /// shutdown signal fires.
    pub fn start_cleanup(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let pool = self;
        let period = (pool.idle_timeout / 2).max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => pool.cleanup(),
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown.
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        })
    }

    #[must_use]
    pub fn stats(&self) -> ConnectionPoolStats {
        let inner = self.inner.lock();
        ConnectionPoolStats {
            current_open: inner.connections.len(),
            total_opened: inner.total_opened,
            total_closed: inner.total_closed,
            max_connections: self.max_connections,
        }
    }

    /// Number of LRU entries; equals the open-connection count.
    #[must_use]
    pub fn lru_len(&self) -> usize {
        self.inner.lock().lru.len()
    }
}

// -----------------------------------------------------------------------------
// LRU list
// -----------------------------------------------------------------------------

#[derive(Default)]
struct Links {
    prev: Option<String>,
    next: Option<String>,
}

/// Doubly-linked recency list with O(1) add/touch/remove/evict.
/// Head is most recently used; the tail is the eviction candidate.
struct LruList {
    links: HashMap<String, Links>,
    head: Option<String>,
    tail: Option<String>,
}

impl LruList {
    fn new() -> Self {
        Self {
            links: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    fn len(&self) -> usize {
        self.links.len()
    }

    fn add(&mut self, key: &str) {
        if self.links.contains_key(key) {
            self.touch(key);
            return;
        }
        self.links.insert(
            key.to_string(),
            Links {
                prev: None,
                next: self.head.clone(),
            },
        );
        if let Some(old_head) = &self.head {
            if let Some(links) = self.links.get_mut(old_head) {
                links.prev = Some(key.to_string());
            }
        }
        self.head = Some(key.to_string());
        if self.tail.is_none() {
            self.tail = Some(key.to_string());
        }
    }

    fn touch(&mut self, key: &str) {
        if !self.links.contains_key(key) || self.head.as_deref() == Some(key) {
            return;
        }
        self.unlink(key);
        let links = self.links.get_mut(key).expect("checked above");
        links.prev = None;
        links.next = self.head.clone();
        if let Some(old_head) = &self.head {
            if let Some(head_links) = self.links.get_mut(&old_head.clone()) {
                head_links.prev = Some(key.to_string());
            }
        }
        self.head = Some(key.to_string());
        if self.tail.is_none() {
            self.tail = Some(key.to_string());
        }
    }

    fn remove(&mut self, key: &str) {
        if self.links.contains_key(key) {
            self.unlink(key);
            self.links.remove(key);
        }
    }

    /// Remove and return the tail key, or `None` when empty.
    fn evict(&mut self) -> Option<String> {
        let victim = self.tail.clone()?;
        self.unlink(&victim);
        self.links.remove(&victim);
        Some(victim)
    }

    /// Detach `key` from its neighbors, fixing head/tail. The entry itself
    /// stays in the map with dangling links.
    fn unlink(&mut self, key: &str) {
        let (prev, next) = {
            let links = &self.links[key];
            (links.prev.clone(), links.next.clone())
        };
        match &prev {
            Some(p) => {
                if let Some(links) = self.links.get_mut(p) {
                    links.next = next.clone();
                }
            }
            None => self.head = next.clone(),
        }
        match &next {
            Some(n) => {
                if let Some(links) = self.links.get_mut(n) {
                    links.prev = prev.clone();
                }
            }
            None => self.tail = prev,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_db(dir: &TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_lru_evicts_tail() {
        let mut lru = LruList::new();
        lru.add("a");
        lru.add("b");
        lru.add("c");
        assert_eq!(lru.evict().as_deref(), Some("a"));
        assert_eq!(lru.evict().as_deref(), Some("b"));
        assert_eq!(lru.evict().as_deref(), Some("c"));
        assert_eq!(lru.evict(), None);
    }

    #[test]
    fn test_lru_touch_moves_to_head() {
        let mut lru = LruList::new();
        lru.add("a");
        lru.add("b");
        lru.add("c");
        lru.touch("a");
        assert_eq!(lru.evict().as_deref(), Some("b"));
    }

    #[test]
    fn test_lru_remove_middle() {
        let mut lru = LruList::new();
        lru.add("a");
        lru.add("b");
        lru.add("c");
        lru.remove("b");
        assert_eq!(lru.len(), 2);
        assert_eq!(lru.evict().as_deref(), Some("a"));
        assert_eq!(lru.evict().as_deref(), Some("c"));
    }

    #[test]
    fn test_get_caches_handle() {
        let dir = TempDir::new().unwrap();
        let path = create_db(&dir, "a.db");
        let pool = ConnectionPool::new(4, Duration::from_secs(5));

        pool.get(&path).unwrap();
        pool.get(&path).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.current_open, 1);
        assert_eq!(stats.total_opened, 1);
    }

    #[test]
    fn test_capacity_evicts_lru_tail() {
        let dir = TempDir::new().unwrap();
        let a = create_db(&dir, "a.db");
        let b = create_db(&dir, "b.db");
        let c = create_db(&dir, "c.db");
        let pool = ConnectionPool::new(2, Duration::from_secs(5));

        pool.get(&a).unwrap();
        pool.get(&b).unwrap();
        // Touch `a` so `b` becomes the tail.
        pool.get(&a).unwrap();
        pool.get(&c).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.current_open, 2);
        assert_eq!(stats.total_opened, 3);
        assert_eq!(stats.total_closed, 1);
        assert_eq!(pool.lru_len(), stats.current_open);
        // `a` survived; re-getting it opens nothing new.
        pool.get(&a).unwrap();
        assert_eq!(pool.stats().total_opened, 3);
    }

    #[test]
    fn test_get_existing_evicts_none() {
        let dir = TempDir::new().unwrap();
        let a = create_db(&dir, "a.db");
        let b = create_db(&dir, "b.db");
        let pool = ConnectionPool::new(2, Duration::from_secs(5));

        pool.get(&a).unwrap();
        pool.get(&b).unwrap();
        pool.get(&b).unwrap();
        assert_eq!(pool.stats().total_closed, 0);
    }

    #[test]
    fn test_cleanup_closes_idle() {
        let dir = TempDir::new().unwrap();
        let a = create_db(&dir, "a.db");
        let pool = ConnectionPool::new(4, Duration::from_millis(0));

        pool.get(&a).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        pool.cleanup();

        let stats = pool.stats();
        assert_eq!(stats.current_open, 0);
        assert_eq!(stats.total_closed, 1);
    }

    #[test]
    fn test_on_close_callback_runs() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let dir = TempDir::new().unwrap();
        let a = create_db(&dir, "a.db");
        let pool = ConnectionPool::new(4, Duration::from_secs(5));
        let closed = Arc::new(AtomicBool::new(false));

        pool.get(&a).unwrap();
        let flag = Arc::clone(&closed);
        pool.set_on_close(&a, Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        pool.close(&a);

        assert!(closed.load(Ordering::SeqCst));
        assert_eq!(pool.stats().current_open, 0);
    }

    #[test]
    fn test_open_counts_balance() {
        let dir = TempDir::new().unwrap();
        let a = create_db(&dir, "a.db");
        let b = create_db(&dir, "b.db");
        let pool = ConnectionPool::new(4, Duration::from_secs(5));

        pool.get(&a).unwrap();
        pool.get(&b).unwrap();
        pool.close(&a);

        let stats = pool.stats();
        assert_eq!(
            stats.total_opened - stats.total_closed,
            stats.current_open as u64
        );
    }

    #[test]
    fn test_get_missing_file_fails() {
        let pool = ConnectionPool::new(4, Duration::from_secs(5));
        assert!(pool.get("/nonexistent/q.db").is_err());
        assert_eq!(pool.stats().current_open, 0);
    }
}
