// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared resource pools.
//!
//! With tens of thousands of tracked databases, per-database resources do
//! not scale: every hot database cannot own its own goroutine-equivalent,
//! its own S3 connection, and its own scratch buffers. Everything that can
//! be shared lives here:
//!
//! - [`WorkerPool`]: fixed-size task executors fed through a bounded queue
//! - [`BufferPool`]: reusable 8 KiB byte buffers
//! - [`ConnectionPool`]: LRU-bounded read-only SQLite handles with idle
//!   eviction
//!
//! Pools are internally synchronized; callers never hold an external lock
//! across pool operations.

pub mod buffer;
pub mod connection;
pub mod worker;

pub use buffer::BufferPool;
pub use connection::{ConnectionPool, ConnectionPoolStats};
pub use worker::{PoolTask, WorkerPool};
