// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dynamic database entry wrapper.
//!
//! A [`TrackedDb`] wraps one replicable database with lazy open, idempotent
//! close and lifecycle hooks. Transitions:
//!
//! ```text
//! Closed ──open()──▶ Opening ──success──▶ Open
//!   ▲                   │                   │
//!   │                   └──failure──────────┤
//!   │                                       │
//!   └────Closing ◀──close()─────────────────┘
//! ```
//!
//! Transitions are serialized by the entry's state mutex; hooks run inside
//! the transition and must not call back into the entry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::error::FleetError;
use crate::replica::StreamingReplica;
use crate::sqlite;

/// Lifecycle states of a tracked database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbLifecycle {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Hook invoked inside an open/close transition.
pub type LifecycleHook = Box<dyn Fn(&TrackedDb) -> Result<(), FleetError> + Send + Sync>;

/// A replicable database under dynamic lifecycle management.
pub struct TrackedDb {
    path: PathBuf,
    state: Mutex<DbLifecycle>,
    conn: Mutex<Option<Connection>>,
    last_access: Mutex<Instant>,
    access_count: AtomicU64,
    on_open: Mutex<Option<LifecycleHook>>,
    on_close: Mutex<Option<LifecycleHook>>,
    replica: Mutex<Option<Arc<StreamingReplica>>>,
}

impl TrackedDb {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            state: Mutex::new(DbLifecycle::Closed),
            conn: Mutex::new(None),
            last_access: Mutex::new(Instant::now()),
            access_count: AtomicU64::new(0),
            on_open: Mutex::new(None),
            on_close: Mutex::new(None),
            replica: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Install the open hook. Takes effect on the next transition.
    pub fn set_on_open(&self, hook: LifecycleHook) {
        *self.on_open.lock() = Some(hook);
    }

    /// Install the close hook.
    pub fn set_on_close(&self, hook: LifecycleHook) {
        *self.on_close.lock() = Some(hook);
    }

    /// Open the underlying handle.
    ///
    /// Fails fast when the entry is already `Open`, `Opening` or `Closing`.
    /// If the open hook fails, the handle is closed again and the state
    /// reverts to `Closed`.
    pub fn open(&self) -> Result<(), FleetError> {
        let mut state = self.state.lock();
        match *state {
            DbLifecycle::Open => {
                return Err(FleetError::Lifecycle(format!(
                    "{} is already open",
                    self.path.display()
                )))
            }
            DbLifecycle::Opening => {
                return Err(FleetError::Lifecycle(format!(
                    "{} is already opening",
                    self.path.display()
                )))
            }
            DbLifecycle::Closing => {
                return Err(FleetError::Lifecycle(format!(
                    "{} is closing",
                    self.path.display()
                )))
            }
            DbLifecycle::Closed => {}
        }
        *state = DbLifecycle::Opening;

        let conn = match sqlite::open_read_only(&self.path) {
            Ok(conn) => conn,
            Err(e) => {
                *state = DbLifecycle::Closed;
                return Err(e);
            }
        };
        *self.conn.lock() = Some(conn);
        *state = DbLifecycle::Open;
        *self.last_access.lock() = Instant::now();

        let hook = self.on_open.lock();
        if let Some(hook) = hook.as_ref() {
            if let Err(e) = hook(self) {
                *self.conn.lock() = None;
                *state = DbLifecycle::Closed;
                return Err(FleetError::Lifecycle(format!(
                    "open hook for {}: {e}",
                    self.path.display()
                )));
            }
        }

        info!(path = %self.path.display(), "database opened");
        Ok(())
    }

    /// Close the underlying handle. A no-op when already closed; hook
    /// failures are logged, never propagated.
    pub fn close(&self) -> Result<(), FleetError> {
        let mut state = self.state.lock();
        match *state {
            DbLifecycle::Closed => return Ok(()),
            DbLifecycle::Closing => {
                return Err(FleetError::Lifecycle(format!(
                    "{} is already closing",
                    self.path.display()
                )))
            }
            DbLifecycle::Opening => {
                return Err(FleetError::Lifecycle(format!(
                    "{} is opening",
                    self.path.display()
                )))
            }
            DbLifecycle::Open => {}
        }
        *state = DbLifecycle::Closing;

        let hook = self.on_close.lock();
        if let Some(hook) = hook.as_ref() {
            if let Err(e) = hook(self) {
                warn!(path = %self.path.display(), error = %e, "close hook failed");
            }
        }
        drop(hook);

        *self.conn.lock() = None;
        *state = DbLifecycle::Closed;
        info!(path = %self.path.display(), "database closed");
        Ok(())
    }

    /// Idempotent fast path: when already open, refresh the access
    /// bookkeeping and return; otherwise perform a full [`open`](Self::open).
    pub fn ensure_open(&self) -> Result<(), FleetError> {
        if *self.state.lock() == DbLifecycle::Open {
            self.touch();
            return Ok(());
        }
        self.open()
    }

    fn touch(&self) {
        *self.last_access.lock() = Instant::now();
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.state.lock() == DbLifecycle::Open
    }

    #[must_use]
    pub fn lifecycle(&self) -> DbLifecycle {
        *self.state.lock()
    }

    #[must_use]
    pub fn last_access(&self) -> Instant {
        *self.last_access.lock()
    }

    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Attach the streaming replica shipping this database.
    pub fn attach_replica(&self, replica: Arc<StreamingReplica>) {
        *self.replica.lock() = Some(replica);
    }

    /// Detach and return the attached replica, if any.
    pub fn detach_replica(&self) -> Option<Arc<StreamingReplica>> {
        self.replica.lock().take()
    }

    /// Flush WAL frames into the primary file. Requires open state.
    pub fn checkpoint(&self) -> Result<(), FleetError> {
        self.ensure_open()?;
        sqlite::checkpoint_truncate(&self.path)
    }

    /// Trigger a replica sync. Requires open state; a wrapper without an
    /// attached replica syncs nothing.
    pub async fn sync(&self) -> Result<(), FleetError> {
        self.ensure_open()?;
        let replica = self.replica.lock().clone();
        match replica {
            Some(replica) => replica.sync().await,
            None => Ok(()),
        }
    }
}
