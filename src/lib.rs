//! # Fleetsync
//!
//! Continuous replication of large, dynamically discovered fleets of SQLite
//! databases to object storage, with bulk restore by glob pattern.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Write Detector                          │
//! │  • Globs discovery patterns, stats every tracked file       │
//! │  • Classifies hot (recently written) vs cold (quiescent)    │
//! │  • Enforces the max-hot cap with LRU eviction               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ promote / demote
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Hot/Cold Manager                          │
//! │  • Hot: open handle + streaming replica per database        │
//! │  • Cold: bookkeeping only, zero runtime resources           │
//! │  • Shared pools: workers, buffers, SQLite connections       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ snapshots
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Object Store                            │
//! │  • <prefix>/generations/<gen>/snapshots/<seq>.ltx           │
//! │  • Minimal mode: <prefix>/<stem>-YYYYMMDD-HH0000.db.lz4     │
//! │  • Bulk restore discovers databases by key shape            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two sibling replication strategies, chosen by configuration: the
//! streaming path ([`manager::IntegratedManager`]) keeps hot databases under
//! full lifecycle management, while the minimal path
//! ([`snapshot::SnapshotReplicator`]) is one scan-and-upload loop with
//! hourly retention.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fleetsync::{FleetConfig, IntegratedManager};
//! use fleetsync::remote::factory::s3_client_builder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), fleetsync::FleetError> {
//!     let config = FleetConfig::load("/etc/fleetsync.yml", true)?;
//!     let manager = IntegratedManager::new(config)?;
//!     manager.set_client_builder(s3_client_builder());
//!     Arc::clone(&manager).start().await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     manager.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`detector`]: periodic write detection and tier classification
//! - [`manager`]: hot/cold lifecycle, shared resources, top-level facade
//! - [`entry`]: per-database lifecycle state machine
//! - [`replica`]: streaming replica and the restore surface
//! - [`snapshot`]: minimal-mode scan-and-upload replicator
//! - [`restore`]: bulk restore engine
//! - [`remote`]: object-store clients (S3, in-memory) and the factory
//! - [`pool`]: worker, buffer and connection pools
//! - [`metrics`]: hierarchical aggregated metrics
//! - [`dbpath`]: path token parsing and key templating

pub mod compress;
pub mod config;
pub mod dbpath;
pub mod detector;
pub mod entry;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod remote;
pub mod replica;
pub mod restore;
pub mod snapshot;
pub mod sqlite;

pub use config::{FleetConfig, ReplicaTemplate, SnapshotConfig};
pub use detector::WriteDetector;
pub use entry::{DbLifecycle, TrackedDb};
pub use error::FleetError;
pub use manager::{HotColdManager, IntegratedManager, SharedResources};
pub use metrics::FleetMetrics;
pub use pool::{BufferPool, ConnectionPool, WorkerPool};
pub use remote::{InMemoryRemote, RemoteClient, RemoteError, ReplicaFactory};
pub use replica::StreamingReplica;
pub use restore::{RestoreEngine, RestoreOptions, RestoreSummary};
pub use snapshot::{SnapshotReplicator, SnapshotStats};
