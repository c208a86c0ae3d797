// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! S3 object-store client.
//!
//! Works against AWS S3 and S3-compatible services (MinIO, LocalStack) via a
//! custom endpoint with path-style addressing.
//!
//! # Credentials
//!
//! Explicit keys in the replica template take precedence; otherwise the
//! standard AWS environment/profile chain applies. `AWS_ACCESS_KEY_ID`,
//! `AWS_SECRET_ACCESS_KEY`, `AWS_DEFAULT_REGION` and `AWS_ENDPOINT` override
//! or supply values when present.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use tracing::debug;

use crate::config::ReplicaTemplate;

use super::{RemoteClient, RemoteError};

/// S3 delete_objects accepts at most 1000 keys per request.
const DELETE_BATCH_SIZE: usize = 1000;

/// Connection settings for an S3 bucket.
#[derive(Debug, Clone, Default)]
pub struct S3RemoteConfig {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3RemoteConfig {
    /// Build settings for a bucket, filling region/endpoint/credentials from
    /// the environment.
    #[must_use]
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        let mut config = Self {
            bucket: bucket.into(),
            ..Self::default()
        };
        config.apply_env_overrides();
        config
    }

    /// Build settings from a replica template, then apply env overrides.
    #[must_use]
    pub fn from_template(template: &ReplicaTemplate) -> Self {
        let mut config = Self {
            bucket: template.bucket.clone(),
            region: some_if_set(&template.region),
            endpoint: some_if_set(&template.endpoint),
            access_key_id: some_if_set(&template.access_key_id),
            secret_access_key: some_if_set(&template.secret_access_key),
        };
        config.apply_env_overrides();
        config
    }

    /// Fill unset fields from `AWS_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        if self.region.is_none() {
            self.region = std::env::var("AWS_DEFAULT_REGION").ok().filter(|v| !v.is_empty());
        }
        if self.endpoint.is_none() {
            self.endpoint = std::env::var("AWS_ENDPOINT").ok().filter(|v| !v.is_empty());
        }
        if self.access_key_id.is_none() {
            self.access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok().filter(|v| !v.is_empty());
        }
        if self.secret_access_key.is_none() {
            self.secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
                .ok()
                .filter(|v| !v.is_empty());
        }
    }
}

fn some_if_set(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Production S3 client.
#[derive(Debug)]
pub struct S3RemoteClient {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3RemoteClient {
    /// Connect with the given settings.
    pub async fn connect(config: S3RemoteConfig) -> Result<Self, RemoteError> {
        if config.bucket.is_empty() {
            return Err(RemoteError::Invalid("bucket is required".into()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = config.region.clone() {
            loader = loader.region(Region::new(region));
        }
        if let (Some(key), Some(secret)) =
            (config.access_key_id.clone(), config.secret_access_key.clone())
        {
            loader = loader
                .credentials_provider(Credentials::new(key, secret, None, None, "fleetsync-config"));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = config.endpoint.clone() {
            // Custom endpoints (MinIO, LocalStack) need path-style keys.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        debug!(bucket = %config.bucket, region = ?config.region, endpoint = ?config.endpoint, "S3 client ready");
        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket,
        })
    }

    /// The bucket this client operates on.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl RemoteClient for S3RemoteClient {
    async fn upload(&self, key: &str, data: Bytes) -> Result<(), RemoteError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| RemoteError::Backend(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, RemoteError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let service = err.into_service_error();
                if service.is_no_such_key() {
                    return Err(RemoteError::NotFound {
                        key: key.to_string(),
                    });
                }
                return Err(RemoteError::Backend(format!("get {key}: {service}")));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| RemoteError::Backend(format!("read body of {key}: {e}")))?;
        Ok(data.into_bytes())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, RemoteError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| RemoteError::Backend(format!("list {prefix}: {e}")))?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }

            if response.is_truncated() == Some(true) {
                continuation = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn delete(&self, keys: &[String]) -> Result<(), RemoteError> {
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let mut identifiers = Vec::with_capacity(chunk.len());
            for key in chunk {
                identifiers.push(
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| RemoteError::Invalid(format!("key {key}: {e}")))?,
                );
            }
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .build()
                .map_err(|e| RemoteError::Invalid(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| RemoteError::Backend(format!("delete batch: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_template() {
        let template = ReplicaTemplate {
            bucket: "backups".into(),
            region: "eu-west-2".into(),
            endpoint: String::new(),
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            ..Default::default()
        };
        let config = S3RemoteConfig::from_template(&template);
        assert_eq!(config.bucket, "backups");
        assert_eq!(config.region.as_deref(), Some("eu-west-2"));
        assert_eq!(config.access_key_id.as_deref(), Some("AKIA"));
    }

    #[test]
    fn test_env_fills_missing_endpoint() {
        std::env::set_var("AWS_ENDPOINT", "http://127.0.0.1:9000");
        let config = S3RemoteConfig::for_bucket("b");
        assert_eq!(config.endpoint.as_deref(), Some("http://127.0.0.1:9000"));
        std::env::remove_var("AWS_ENDPOINT");
    }

    #[tokio::test]
    async fn test_connect_requires_bucket() {
        let err = S3RemoteClient::connect(S3RemoteConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Invalid(_)));
    }
}
