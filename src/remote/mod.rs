// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Object-store abstraction.
//!
//! The replicator talks to remote storage through [`RemoteClient`], a narrow
//! pluggable surface: upload, download, list, batched delete. The production
//! backend is S3 ([`s3::S3RemoteClient`]); tests use the in-memory backend
//! ([`memory::InMemoryRemote`]).

pub mod factory;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use factory::{ClientBuilder, ReplicaFactory, ReplicaKind};
pub use memory::InMemoryRemote;
pub use s3::{S3RemoteClient, S3RemoteConfig};

/// Errors at the object-store boundary.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The requested key does not exist.
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Transport or service failure.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A remote URL or key could not be parsed.
    #[error("invalid remote reference: {0}")]
    Invalid(String),
}

/// Pluggable object-store client.
///
/// Implementations must be `Send + Sync`; the same client is shared by the
/// streaming replicas of a bucket and by the restore engine.
#[async_trait]
pub trait RemoteClient: Send + Sync + std::fmt::Debug {
    /// Upload an object, replacing any existing object under `key`.
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), RemoteError>;

    /// Download an object's bytes.
    async fn download(&self, key: &str) -> Result<Bytes, RemoteError>;

    /// List all keys under `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError>;

    /// Delete the given keys. Implementations may batch internally; absent
    /// keys are not an error.
    async fn delete(&self, keys: &[String]) -> Result<(), RemoteError>;
}
