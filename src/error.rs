// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Crate-wide error taxonomy.
//!
//! Errors are grouped by *kind* rather than by origin: scan and upload loops
//! treat everything except `Config` as recoverable (count, log, continue),
//! while configuration problems abort startup. Shutdown is not an error;
//! loops exit silently on their watch signal.

use thiserror::Error;

use crate::remote::RemoteError;

/// Errors surfaced by fleetsync components.
#[derive(Debug, Error)]
pub enum FleetError {
    /// A tracked file or remote artifact no longer exists.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient filesystem failure (stat, read, write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Embedded SQL engine failure (open, checkpoint).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Object-store failure.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Invalid or missing configuration; aborts startup.
    #[error("config error: {0}")]
    Config(String),

    /// Replica template names a type this build cannot construct.
    #[error("unsupported replica type: {0}")]
    UnsupportedReplicaType(String),

    /// Task submitted to a worker pool that has been shut down.
    #[error("worker pool '{0}' is closed")]
    PoolClosed(String),

    /// Non-blocking submission found the worker pool's queue full.
    #[error("worker pool '{0}' queue is full")]
    PoolSaturated(String),

    /// Lifecycle transition rejected by the entry state machine.
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(String),
}

impl FleetError {
    /// True when the underlying cause is a missing file or object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::Remote(RemoteError::NotFound { .. }) => true,
            _ => false,
        }
    }
}
