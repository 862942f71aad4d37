//! Object-storage collaborator used by the controller.
//!
//! [`ObjectStore`] exposes the handful of bucket and object primitives the
//! controller needs; the prefix, bucket-purge and metadata helpers are
//! provided methods built on top of them so every implementation lays out
//! objects the same way.
//!
//! A store is obtained per request from an [`ObjectStoreProvider`], because
//! credentials arrive with each CSI call as [`Secrets`].

pub mod memory;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::meta::{FsMeta, join_key, meta_key};
use crate::types::Secrets;

pub use memory::{MemoryStore, StoreOp};
pub use s3::{S3Config, S3Provider, S3Store};

/// Bucket and object operations against an object-storage service.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether `bucket` exists and is accessible.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, CsiError>;

    /// Create an empty bucket.
    async fn make_bucket(&self, bucket: &str) -> Result<(), CsiError>;

    /// Delete an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), CsiError>;

    /// Write an object, replacing any existing one.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CsiError>;

    /// Read an object; `Ok(None)` when the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, CsiError>;

    /// List every key starting with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, CsiError>;

    /// Delete an object.  Deleting a missing key succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CsiError>;

    /// Create the directory marker `path/` inside `bucket`.
    async fn create_prefix(&self, bucket: &str, path: &str) -> Result<(), CsiError> {
        let marker = format!("{}/", join_key(path, ""));
        self.put_object(bucket, &marker, Vec::new())
            .await
            .map_err(|e| e.context(format!("create prefix {bucket}/{path}")))
    }

    /// Remove every object under `path/`, including the marker itself.
    async fn remove_prefix(&self, bucket: &str, path: &str) -> Result<(), CsiError> {
        let dir = format!("{}/", join_key(path, ""));
        let keys = self
            .list_objects(bucket, &dir)
            .await
            .map_err(|e| e.context(format!("list prefix {bucket}/{path}")))?;
        for key in keys {
            self.delete_object(bucket, &key)
                .await
                .map_err(|e| e.context(format!("remove {bucket}/{key}")))?;
        }
        // Some stores never list the marker object.
        self.delete_object(bucket, &dir)
            .await
            .map_err(|e| e.context(format!("remove prefix marker {bucket}/{dir}")))
    }

    /// Purge all objects in `bucket`, then delete the bucket.
    async fn remove_bucket(&self, bucket: &str) -> Result<(), CsiError> {
        let keys = self
            .list_objects(bucket, "")
            .await
            .map_err(|e| e.context(format!("list bucket {bucket}")))?;
        for key in keys {
            self.delete_object(bucket, &key)
                .await
                .map_err(|e| e.context(format!("remove {bucket}/{key}")))?;
        }
        self.delete_bucket(bucket)
            .await
            .map_err(|e| e.context(format!("remove bucket {bucket}")))
    }

    /// Read the metadata record of the volume at `bucket`/`prefix`.
    ///
    /// Returns [`CsiError::VolumeNotFound`] when no record exists and
    /// [`CsiError::BackendError`] when it cannot be read or parsed.
    async fn get_fs_meta(&self, bucket: &str, prefix: &str) -> Result<FsMeta, CsiError> {
        let key = meta_key(prefix);
        let body = self
            .get_object(bucket, &key)
            .await
            .map_err(|e| e.context(format!("get metadata {bucket}/{key}")))?
            .ok_or_else(|| CsiError::VolumeNotFound(format!("{bucket}/{key}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| CsiError::BackendError(format!("decode metadata {bucket}/{key}: {e}")))
    }

    /// Create or overwrite the metadata record described by `meta`.
    async fn set_fs_meta(&self, meta: &FsMeta) -> Result<(), CsiError> {
        let body = serde_json::to_vec(meta).map_err(CsiError::internal)?;
        let key = meta.key();
        self.put_object(&meta.bucket_name, &key, body)
            .await
            .map_err(|e| e.context(format!("set metadata {}/{key}", meta.bucket_name)))
    }
}

/// Builds an [`ObjectStore`] from the credentials carried by a request.
pub trait ObjectStoreProvider: Send + Sync {
    /// Return a store authenticated with `secrets`.
    fn connect(&self, secrets: &Secrets) -> Result<Arc<dyn ObjectStore>, CsiError>;
}
