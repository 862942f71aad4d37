//! [`ObjectStore`] backed by an S3-compatible service via `aws-sdk-s3`.
//!
//! Clients are built from the per-request [`Secrets`]:
//!
//! | Secret key | Meaning |
//! |---|---|
//! | `accessKeyID` | static access key |
//! | `secretAccessKey` | static secret key |
//! | `region` | signing region, default `us-east-1` |
//! | `endpoint` | service URL; `https://` is assumed when no scheme is given |
//!
//! Path-style addressing is always used so MinIO, Ceph RGW and similar
//! gateways work without wildcard DNS.

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use tracing::debug;

use crate::error::CsiError;
use crate::store::{ObjectStore, ObjectStoreProvider};
use crate::types::Secrets;

/// Secret key holding the access key id.
pub const SECRET_ACCESS_KEY_ID: &str = "accessKeyID";
/// Secret key holding the secret access key.
pub const SECRET_SECRET_ACCESS_KEY: &str = "secretAccessKey";
/// Secret key holding the region.
pub const SECRET_REGION: &str = "region";
/// Secret key holding the endpoint URL.
pub const SECRET_ENDPOINT: &str = "endpoint";

/// Region used when neither the secrets nor the defaults name one.
pub const DEFAULT_REGION: &str = "us-east-1";

const CREDENTIALS_PROVIDER: &str = "csi-secrets";

/// Connection settings for an S3 endpoint.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct S3Config {
    /// Static access key id.
    pub access_key_id: String,
    /// Static secret access key.
    pub secret_access_key: String,
    /// Signing region; empty means [`DEFAULT_REGION`].
    pub region: String,
    /// Service URL; empty means the AWS endpoint for the region.
    pub endpoint: String,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("access_key_id", &self.access_key_id)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl S3Config {
    /// Overlay the values present in `secrets` on top of `self`.
    pub fn merged_with(&self, secrets: &Secrets) -> Self {
        let pick = |key: &str, fallback: &str| {
            secrets
                .get_non_empty(key)
                .unwrap_or(fallback)
                .to_owned()
        };
        Self {
            access_key_id: pick(SECRET_ACCESS_KEY_ID, &self.access_key_id),
            secret_access_key: pick(SECRET_SECRET_ACCESS_KEY, &self.secret_access_key),
            region: pick(SECRET_REGION, &self.region),
            endpoint: pick(SECRET_ENDPOINT, &self.endpoint),
        }
    }

    /// The effective signing region.
    pub fn region(&self) -> &str {
        if self.region.is_empty() {
            DEFAULT_REGION
        } else {
            &self.region
        }
    }

    /// The endpoint URL with a scheme, or `None` for the AWS default.
    pub fn endpoint_url(&self) -> Option<String> {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return None;
        }
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Some(endpoint.to_owned())
        } else {
            Some(format!("https://{endpoint}"))
        }
    }
}

/// An S3 client bound to one set of credentials.
pub struct S3Store {
    client: Client,
    region: String,
}

impl S3Store {
    /// Build a client for `config`.
    pub fn new(config: &S3Config) -> Result<Self, CsiError> {
        if config.access_key_id.is_empty() != config.secret_access_key.is_empty() {
            return Err(CsiError::InvalidArgument(format!(
                "both {SECRET_ACCESS_KEY_ID} and {SECRET_SECRET_ACCESS_KEY} must be set"
            )));
        }

        let region = config.region().to_owned();
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .force_path_style(true);
        if !config.access_key_id.is_empty() {
            builder = builder.credentials_provider(Credentials::new(
                config.access_key_id.clone(),
                config.secret_access_key.clone(),
                None,
                None,
                CREDENTIALS_PROVIDER,
            ));
        }
        if let Some(url) = config.endpoint_url() {
            builder = builder.endpoint_url(url);
        }

        debug!(?config, "S3 client configured");
        Ok(Self {
            client: Client::from_conf(builder.build()),
            region,
        })
    }
}

fn sdk_error<E: std::error::Error>(e: E) -> CsiError {
    CsiError::BackendError(DisplayErrorContext(e).to_string())
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, CsiError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(sdk_error(e)),
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), CsiError> {
        let mut req = self.client.create_bucket().bucket(bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != DEFAULT_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        req.send().await.map_err(sdk_error)?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CsiError> {
        self.client
            .delete_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CsiError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, CsiError> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => return Err(sdk_error(e)),
        };
        let body = output.body.collect().await.map_err(CsiError::backend)?;
        Ok(Some(body.into_bytes().to_vec()))
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, CsiError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(sdk_error)?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_owned)),
            );
        }
        Ok(keys)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CsiError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

/// Builds an [`S3Store`] per request, overlaying request secrets on the
/// daemon-wide defaults.
#[derive(Debug, Clone, Default)]
pub struct S3Provider {
    defaults: S3Config,
}

impl S3Provider {
    /// Create a provider with daemon-wide defaults (typically only endpoint
    /// and region).
    pub fn new(defaults: S3Config) -> Self {
        Self { defaults }
    }
}

impl ObjectStoreProvider for S3Provider {
    fn connect(&self, secrets: &Secrets) -> Result<Arc<dyn ObjectStore>, CsiError> {
        let config = self.defaults.merged_with(secrets);
        Ok(Arc::new(S3Store::new(&config)?))
    }
}
