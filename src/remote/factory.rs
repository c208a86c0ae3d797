// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica client factory.
//!
//! Turns a replica template plus a database path into a ready
//! [`RemoteClient`] and its expanded key prefix. The replica type is a
//! closed enum dispatched exactly once, at promotion; the S3 constructor is
//! injected by the binary before startup so this module never depends on
//! the backend it constructs.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ReplicaTemplate;
use crate::dbpath::expand_path_template;
use crate::error::FleetError;

use super::s3::{S3RemoteClient, S3RemoteConfig};
use super::RemoteClient;

/// Known replica backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaKind {
    S3,
}

impl FromStr for ReplicaKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Self::S3),
            other => Err(FleetError::UnsupportedReplicaType(other.to_string())),
        }
    }
}

/// Injected constructor: template (with its path already expanded) → client.
pub type ClientBuilder = Arc<
    dyn Fn(ReplicaTemplate) -> BoxFuture<'static, Result<Arc<dyn RemoteClient>, FleetError>>
        + Send
        + Sync,
>;

/// Factory for per-database replica clients.
///
/// Constructed first with no builder; the outer binary supplies the real
/// constructor via [`set_client_builder`](Self::set_client_builder) before
/// the manager starts. A factory without a builder fails client creation
/// with a configuration error, which promotion treats as
/// "continue without replication".
#[derive(Default)]
pub struct ReplicaFactory {
    builder: RwLock<Option<ClientBuilder>>,
}

impl ReplicaFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the client constructor.
    pub fn set_client_builder(&self, builder: ClientBuilder) {
        *self.builder.write() = Some(builder);
    }

    /// Create a client for `db_path` from the template.
    ///
    /// The template's `path` placeholders are expanded with the parsed
    /// tokens of `db_path` before construction; the expanded prefix is
    /// returned alongside the client.
    pub async fn create_client(
        &self,
        template: &ReplicaTemplate,
        db_path: &Path,
    ) -> Result<(Arc<dyn RemoteClient>, String), FleetError> {
        let kind = ReplicaKind::from_str(&template.r#type)?;

        let prefix = expand_path_template(&template.path, db_path);
        let mut expanded = template.clone();
        expanded.path = prefix.clone();

        let builder = self
            .builder
            .read()
            .clone()
            .ok_or_else(|| FleetError::Config("replica client builder not injected".into()))?;

        debug!(db = %db_path.display(), kind = ?kind, prefix = %prefix, "creating replica client");
        let client = builder(expanded).await?;
        Ok((client, prefix))
    }
}

/// The production S3 builder, wired in by the binary.
#[must_use]
pub fn s3_client_builder() -> ClientBuilder {
    Arc::new(|template: ReplicaTemplate| {
        Box::pin(async move {
            let client = S3RemoteClient::connect(S3RemoteConfig::from_template(&template)).await?;
            Ok(Arc::new(client) as Arc<dyn RemoteClient>)
        })
    })
}
