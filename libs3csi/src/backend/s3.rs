//! S3 storage backend for CSI.
//!
//! [`S3Backend`] implements [`CsiIdentity`] and [`CsiController`] on top of an
//! [`ObjectStoreProvider`].  Volumes are buckets, or prefixes inside a shared
//! bucket when the storage class sets the `bucket` parameter.
//!
//! # Object layout
//!
//! ```text
//! <bucket>/
//!   [<prefix>/].metadata.json   # FsMeta record (provenance, capacity)
//!   [<prefix>/]csi-fs/          # filesystem content exposed by the node side
//! ```
//!
//! The backend keeps no volume state of its own: every call re-reads the
//! bucket and its metadata record, so any number of controller replicas can
//! serve the same cluster.

use tracing::{debug, info, instrument, warn};

use async_trait::async_trait;

use crate::backend::locks::VolumeLocks;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::{CsiIdentity, DEFAULT_DRIVER_NAME};
use crate::meta::{FS_PATH, FsMeta, PARAM_BUCKET, PARAM_MOUNTER, join_key};
use crate::store::ObjectStoreProvider;
use crate::types::*;
use crate::volume_id::{bucket_and_prefix, derive_volume_id, join_bucket_prefix};

/// The only access mode S3-backed volumes support.
pub const SUPPORTED_ACCESS_MODE: AccessMode = AccessMode::SingleNodeWriter;

/// Concrete CSI controller backed by object storage.
pub struct S3Backend<P> {
    provider: P,
    driver_name: String,
    capabilities: Vec<ControllerServiceCapability>,
    locks: VolumeLocks,
}

impl<P: ObjectStoreProvider> S3Backend<P> {
    /// Create a backend that obtains stores from `provider`.
    ///
    /// The backend registers as [`DEFAULT_DRIVER_NAME`] and advertises
    /// [`ControllerServiceCapability::CreateDeleteVolume`].
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            driver_name: DEFAULT_DRIVER_NAME.to_owned(),
            capabilities: vec![ControllerServiceCapability::CreateDeleteVolume],
            locks: VolumeLocks::new(),
        }
    }

    /// Override the plugin name reported by `GetPluginInfo`.
    #[must_use]
    pub fn with_driver_name(mut self, name: impl Into<String>) -> Self {
        self.driver_name = name.into();
        self
    }

    /// Override the advertised controller capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<ControllerServiceCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Reject calls to RPCs this controller does not advertise.
    fn validate_service_request(&self, rpc: ControllerServiceCapability) -> Result<(), CsiError> {
        if self.capabilities.contains(&rpc) {
            return Ok(());
        }
        Err(CsiError::InvalidArgument(format!(
            "unsupported controller capability {rpc:?}"
        )))
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl<P: ObjectStoreProvider> CsiIdentity for S3Backend<P> {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.driver_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl<P: ObjectStoreProvider> CsiController for S3Backend<P> {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        self.validate_service_request(ControllerServiceCapability::CreateDeleteVolume)?;

        let derived = derive_volume_id(&req.name);
        if derived.is_empty() {
            return Err(CsiError::InvalidArgument("name missing in request".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities missing in request".into(),
            ));
        }

        // A bucket override switches to shared-bucket mode: the derived id
        // becomes the prefix inside the named bucket.
        let (volume_id, bucket, prefix) = match req
            .parameters
            .get(PARAM_BUCKET)
            .filter(|b| !b.is_empty())
        {
            Some(bucket) => (
                join_bucket_prefix(bucket, derived.as_str()),
                bucket.clone(),
                derived.0,
            ),
            None => {
                // The id is decoded at the first '/', so it could never be
                // mapped back to this bucket.
                if derived.as_str().contains('/') {
                    return Err(CsiError::InvalidArgument(format!(
                        "volume name {} contains '/' and no bucket parameter is set",
                        req.name
                    )));
                }
                (derived.clone(), derived.0, String::new())
            }
        };

        let capacity_bytes = req.required_bytes();
        let mounter = req
            .parameters
            .get(PARAM_MOUNTER)
            .map(String::as_str)
            .unwrap_or_default();

        debug!(%volume_id, %bucket, %prefix, capacity_bytes, "create volume requested");
        let store = self.provider.connect(&req.secrets)?;
        // Volumes sharing a bucket race to create it: hold the bucket first.
        let _bucket_guard = if prefix.is_empty() {
            None
        } else {
            Some(self.locks.lock_bucket(&bucket).await)
        };
        let _guard = self.locks.lock(&volume_id).await;

        let exists = store
            .bucket_exists(&bucket)
            .await
            .map_err(|e| e.context(format!("check bucket {bucket} exists")))?;

        let meta = if exists {
            match store.get_fs_meta(&bucket, &prefix).await {
                Ok(mut meta) => {
                    if capacity_bytes > meta.capacity_bytes {
                        warn!(
                            %volume_id,
                            requested = capacity_bytes,
                            provisioned = meta.capacity_bytes,
                            "volume exists with a smaller capacity",
                        );
                        return Err(CsiError::VolumeAlreadyExists(volume_id.to_string()));
                    }
                    meta.mounter = mounter.to_owned();
                    meta
                }
                Err(e) => {
                    // Pre-existing bucket we know nothing about: adopt it, but
                    // never claim it as ours so delete leaves it alone.
                    warn!(%volume_id, error = %e, "bucket exists but its metadata is unreadable");
                    FsMeta::new(&bucket, &prefix, mounter, capacity_bytes, false)
                }
            }
        } else {
            store
                .make_bucket(&bucket)
                .await
                .map_err(|e| e.context(format!("create bucket {bucket}")))?;
            store.create_prefix(&bucket, &join_key(&prefix, FS_PATH)).await?;
            FsMeta::new(&bucket, &prefix, mounter, capacity_bytes, true)
        };

        store.set_fs_meta(&meta).await?;

        info!(%volume_id, created_by_csi = meta.created_by_csi, "volume created");
        Ok(Volume {
            volume_id,
            capacity_bytes,
            volume_context: req.parameters,
        })
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        self.validate_service_request(ControllerServiceCapability::CreateDeleteVolume)?;

        let volume_id = &req.volume_id;
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id missing in request".into()));
        }
        let (bucket, prefix) = bucket_and_prefix(volume_id);

        let store = self.provider.connect(&req.secrets)?;
        let _guard = self.locks.lock(volume_id).await;

        let exists = store
            .bucket_exists(bucket)
            .await
            .map_err(|e| e.context(format!("check bucket {bucket} exists")))?;
        if !exists {
            debug!(%bucket, "bucket does not exist, ignoring delete");
            return Ok(());
        }

        let meta = store.get_fs_meta(bucket, prefix).await.map_err(|e| {
            CsiError::Internal(format!("failed to get metadata of volume {volume_id}: {e}"))
        })?;

        if !prefix.is_empty() {
            store.remove_prefix(bucket, prefix).await?;
            info!(%bucket, %prefix, "volume prefix removed, shared bucket kept");
            return Ok(());
        }

        if meta.created_by_csi {
            store.remove_bucket(bucket).await?;
            info!(%bucket, "bucket removed");
        } else {
            info!(%bucket, "bucket was not created by this driver, skipping deletion");
        }
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        let volume_id = &req.volume_id;
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume id missing in request".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities missing in request".into(),
            ));
        }
        let (bucket, prefix) = bucket_and_prefix(volume_id);

        let store = self.provider.connect(&req.secrets)?;
        let exists = store
            .bucket_exists(bucket)
            .await
            .map_err(|e| e.context(format!("check bucket {bucket} exists")))?;
        if !exists {
            return Err(CsiError::VolumeNotFound(format!(
                "{volume_id} (bucket does not exist)"
            )));
        }
        if let Err(e) = store.get_fs_meta(bucket, prefix).await {
            debug!(error = %e, "volume metadata unreadable");
            return Err(CsiError::VolumeNotFound(format!(
                "{volume_id} (metadata does not exist)"
            )));
        }

        if req
            .volume_capabilities
            .iter()
            .any(|cap| cap.access_mode != SUPPORTED_ACCESS_MODE)
        {
            return Ok(ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: "Only single node writer is supported".into(),
            });
        }

        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(vec![VolumeCapability::with_access_mode(
                SUPPORTED_ACCESS_MODE,
            )]),
            message: String::new(),
        })
    }

    async fn controller_expand_volume(
        &self,
        _req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        Err(CsiError::Unimplemented(
            "ControllerExpandVolume is not implemented".into(),
        ))
    }

    async fn controller_get_capabilities(
        &self,
    ) -> Result<Vec<ControllerServiceCapability>, CsiError> {
        Ok(self.capabilities.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::error::ErrorCode;
    use crate::store::{MemoryStore, ObjectStore, StoreOp};

    const GIB: u64 = 1 << 30;

    fn make_backend() -> (S3Backend<MemoryStore>, MemoryStore) {
        let store = MemoryStore::new();
        (S3Backend::new(store.clone()), store)
    }

    fn create_req(name: &str, required_bytes: u64) -> CreateVolumeRequest {
        CreateVolumeRequest {
            name: name.into(),
            capacity_range: Some(CapacityRange {
                required_bytes,
                limit_bytes: 0,
            }),
            volume_capabilities: vec![VolumeCapability::default()],
            ..Default::default()
        }
    }

    fn delete_req(volume_id: &str) -> DeleteVolumeRequest {
        DeleteVolumeRequest {
            volume_id: volume_id.into(),
            ..Default::default()
        }
    }

    fn validate_req(volume_id: &str, mode: AccessMode) -> ValidateVolumeCapabilitiesRequest {
        ValidateVolumeCapabilitiesRequest {
            volume_id: volume_id.into(),
            volume_capabilities: vec![VolumeCapability::with_access_mode(mode)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_and_delete_volume() {
        let (backend, store) = make_backend();

        let vol = backend.create_volume(create_req("My-Volume", GIB)).await.unwrap();
        assert_eq!(vol.volume_id.as_str(), "my-volume");
        assert_eq!(vol.capacity_bytes, GIB);

        assert!(store.bucket_exists("my-volume").await.unwrap());
        assert!(store.contains_object("my-volume", "csi-fs/"));
        let meta = store.get_fs_meta("my-volume", "").await.unwrap();
        assert!(meta.created_by_csi);
        assert_eq!(meta.capacity_bytes, 1_073_741_824);
        assert_eq!(meta.prefix, "");
        assert_eq!(meta.fs_path, FS_PATH);

        backend.delete_volume(delete_req("my-volume")).await.unwrap();
        assert!(!store.bucket_exists("my-volume").await.unwrap());
    }

    #[tokio::test]
    async fn create_volume_idempotent_by_name() {
        let (backend, store) = make_backend();

        let vol1 = backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();
        let after_first = store.mutations();
        // bucket + fs prefix marker + metadata
        assert_eq!(after_first, 3);

        let vol2 = backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();
        assert_eq!(vol1, vol2);
        // Replay only rewrites the metadata record.
        assert_eq!(store.mutations(), after_first + 1);
        assert_eq!(
            store.keys("pvc-1"),
            vec![".metadata.json".to_owned(), "csi-fs/".to_owned()]
        );
    }

    #[tokio::test]
    async fn larger_capacity_on_existing_volume_is_rejected() {
        let (backend, store) = make_backend();
        backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();
        let before = store.mutations();

        let err = backend
            .create_volume(create_req("pvc-1", 2 * GIB))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyExists);
        assert_eq!(store.mutations(), before);
    }

    #[tokio::test]
    async fn smaller_capacity_succeeds_without_shrinking() {
        let (backend, store) = make_backend();
        backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();

        let vol = backend.create_volume(create_req("pvc-1", GIB / 2)).await.unwrap();
        assert_eq!(vol.capacity_bytes, GIB / 2);
        let meta = store.get_fs_meta("pvc-1", "").await.unwrap();
        assert_eq!(meta.capacity_bytes, GIB);
    }

    #[tokio::test]
    async fn replay_updates_only_the_mounter() {
        let (backend, store) = make_backend();
        let mut req = create_req("pvc-1", GIB);
        req.parameters = HashMap::from([(PARAM_MOUNTER.to_owned(), "s3fs".to_owned())]);
        backend.create_volume(req.clone()).await.unwrap();

        req.parameters = HashMap::from([(PARAM_MOUNTER.to_owned(), "rclone".to_owned())]);
        let vol = backend.create_volume(req).await.unwrap();
        assert_eq!(vol.volume_context.get(PARAM_MOUNTER).unwrap(), "rclone");

        let meta = store.get_fs_meta("pvc-1", "").await.unwrap();
        assert_eq!(meta.mounter, "rclone");
        assert!(meta.created_by_csi);
        assert_eq!(meta.capacity_bytes, GIB);
    }

    #[tokio::test]
    async fn existing_bucket_without_metadata_is_adopted_but_not_owned() {
        let (backend, store) = make_backend();
        store.make_bucket("legacy").await.unwrap();
        store
            .put_object("legacy", "data.bin", b"keep me".to_vec())
            .await
            .unwrap();

        let vol = backend.create_volume(create_req("legacy", GIB)).await.unwrap();
        assert_eq!(vol.volume_id.as_str(), "legacy");
        let meta = store.get_fs_meta("legacy", "").await.unwrap();
        assert!(!meta.created_by_csi);
        assert_eq!(meta.capacity_bytes, GIB);
        assert!(!store.contains_object("legacy", "csi-fs/"));

        backend.delete_volume(delete_req("legacy")).await.unwrap();
        assert!(store.bucket_exists("legacy").await.unwrap());
        assert!(store.contains_object("legacy", "data.bin"));
    }

    #[tokio::test]
    async fn corrupt_metadata_falls_back_to_unowned_record() {
        let (backend, store) = make_backend();
        store.make_bucket("pvc-1").await.unwrap();
        store
            .put_object("pvc-1", ".metadata.json", b"garbage".to_vec())
            .await
            .unwrap();

        // Capacity conflicts cannot be detected without a readable record.
        backend
            .create_volume(create_req("pvc-1", 4 * GIB))
            .await
            .unwrap();
        let meta = store.get_fs_meta("pvc-1", "").await.unwrap();
        assert!(!meta.created_by_csi);
        assert_eq!(meta.capacity_bytes, 4 * GIB);
    }

    #[tokio::test]
    async fn create_rejects_missing_arguments() {
        let (backend, store) = make_backend();

        let err = backend.create_volume(create_req("", GIB)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let mut req = create_req("pvc-1", GIB);
        req.volume_capabilities.clear();
        let err = backend.create_volume(req).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn create_without_capacity_range() {
        let (backend, store) = make_backend();
        let mut req = create_req("pvc-1", 0);
        req.capacity_range = None;
        let vol = backend.create_volume(req).await.unwrap();
        assert_eq!(vol.capacity_bytes, 0);
        assert_eq!(store.get_fs_meta("pvc-1", "").await.unwrap().capacity_bytes, 0);
    }

    #[tokio::test]
    async fn long_names_map_to_hashed_bucket() {
        let (backend, store) = make_backend();
        let name = format!("pvc-{}", "a".repeat(80));
        let vol = backend.create_volume(create_req(&name, GIB)).await.unwrap();
        assert_eq!(vol.volume_id.as_str().len(), 40);
        assert!(store.bucket_exists(vol.volume_id.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn shared_bucket_mode_uses_prefixes() {
        let (backend, store) = make_backend();
        let shared = |name: &str| {
            let mut req = create_req(name, GIB);
            req.parameters = HashMap::from([(PARAM_BUCKET.to_owned(), "shared".to_owned())]);
            req
        };

        let vol1 = backend.create_volume(shared("PVC-1")).await.unwrap();
        assert_eq!(vol1.volume_id.as_str(), "shared/pvc-1");
        assert_eq!(vol1.volume_context.get(PARAM_BUCKET).unwrap(), "shared");
        let meta1 = store.get_fs_meta("shared", "pvc-1").await.unwrap();
        assert!(meta1.created_by_csi);
        assert_eq!(meta1.bucket_name, "shared");
        assert_eq!(meta1.prefix, "pvc-1");
        assert!(store.contains_object("shared", "pvc-1/csi-fs/"));
        assert!(store.contains_object("shared", "pvc-1/.metadata.json"));

        // The bucket now exists, so the second volume has no record yet and
        // is recorded as not owned.
        let vol2 = backend.create_volume(shared("pvc-2")).await.unwrap();
        assert_eq!(vol2.volume_id.as_str(), "shared/pvc-2");
        assert!(!store.get_fs_meta("shared", "pvc-2").await.unwrap().created_by_csi);

        backend.delete_volume(delete_req("shared/pvc-1")).await.unwrap();
        assert!(store.bucket_exists("shared").await.unwrap());
        assert_eq!(store.keys("shared"), vec!["pvc-2/.metadata.json".to_owned()]);
    }

    #[tokio::test]
    async fn empty_bucket_override_is_ignored() {
        let (backend, _store) = make_backend();
        let mut req = create_req("pvc-1", GIB);
        req.parameters = HashMap::from([(PARAM_BUCKET.to_owned(), String::new())]);
        let vol = backend.create_volume(req).await.unwrap();
        assert_eq!(vol.volume_id.as_str(), "pvc-1");
    }

    #[tokio::test]
    async fn delete_missing_bucket_is_a_noop() {
        let (backend, store) = make_backend();
        backend.delete_volume(delete_req("ghost")).await.unwrap();
        backend.delete_volume(delete_req("ghost/prefix")).await.unwrap();
        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn delete_twice_succeeds() {
        let (backend, _store) = make_backend();
        backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();
        backend.delete_volume(delete_req("pvc-1")).await.unwrap();
        backend.delete_volume(delete_req("pvc-1")).await.unwrap();
    }

    #[tokio::test]
    async fn delete_without_metadata_is_an_internal_error() {
        let (backend, store) = make_backend();
        store.make_bucket("orphan").await.unwrap();
        let before = store.mutations();

        let err = backend.delete_volume(delete_req("orphan")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(store.bucket_exists("orphan").await.unwrap());
        assert_eq!(store.mutations(), before);
    }

    #[tokio::test]
    async fn delete_rejects_empty_id() {
        let (backend, _store) = make_backend();
        let err = backend.delete_volume(delete_req("")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn backend_outage_surfaces_as_internal() {
        let (backend, store) = make_backend();
        store.set_offline(true);

        let err = backend.create_volume(create_req("pvc-1", GIB)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("check bucket pvc-1 exists"));

        let err = backend.delete_volume(delete_req("pvc-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn failed_bucket_purge_aborts_delete() {
        let (backend, store) = make_backend();
        backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();

        store.fail_on(StoreOp::DeleteObject);
        let err = backend.delete_volume(delete_req("pvc-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("remove pvc-1/"));
        assert!(store.contains_object("pvc-1", ".metadata.json"));

        store.clear_failures();
        store.fail_on(StoreOp::DeleteBucket);
        let err = backend.delete_volume(delete_req("pvc-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("remove bucket pvc-1"));
        assert!(store.bucket_exists("pvc-1").await.unwrap());
    }

    #[tokio::test]
    async fn failed_prefix_removal_aborts_delete() {
        let (backend, store) = make_backend();
        let mut req = create_req("pvc-1", GIB);
        req.parameters = HashMap::from([(PARAM_BUCKET.to_owned(), "shared".to_owned())]);
        backend.create_volume(req).await.unwrap();

        store.fail_on(StoreOp::DeleteObject);
        let err = backend.delete_volume(delete_req("shared/pvc-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("remove shared/pvc-1/"));
        assert!(store.contains_object("shared", "pvc-1/.metadata.json"));

        store.clear_failures();
        store.fail_on(StoreOp::ListObjects);
        let err = backend.delete_volume(delete_req("shared/pvc-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert!(err.to_string().contains("list prefix shared/pvc-1"));
    }

    #[tokio::test]
    async fn names_with_slash_need_a_bucket_parameter() {
        let (backend, store) = make_backend();
        let err = backend
            .create_volume(create_req("team/pvc", GIB))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(store.mutations(), 0);

        let mut req = create_req("team/pvc", GIB);
        req.parameters = HashMap::from([(PARAM_BUCKET.to_owned(), "shared".to_owned())]);
        let vol = backend.create_volume(req).await.unwrap();
        assert_eq!(vol.volume_id.as_str(), "shared/team/pvc");
        assert!(store.contains_object("shared", "team/pvc/.metadata.json"));

        backend.delete_volume(delete_req("shared/team/pvc")).await.unwrap();
        assert!(!store.contains_object("shared", "team/pvc/.metadata.json"));
    }

    #[tokio::test]
    async fn validate_missing_volume() {
        let (backend, store) = make_backend();
        let err = backend
            .validate_volume_capabilities(validate_req("nope", AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        store.make_bucket("bare").await.unwrap();
        let err = backend
            .validate_volume_capabilities(validate_req("bare", AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn validate_confirms_single_node_writer() {
        let (backend, store) = make_backend();
        backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();
        let before = store.mutations();

        let resp = backend
            .validate_volume_capabilities(validate_req("pvc-1", AccessMode::SingleNodeWriter))
            .await
            .unwrap();
        assert!(resp.is_confirmed());
        assert_eq!(
            resp.confirmed.unwrap(),
            vec![VolumeCapability::with_access_mode(AccessMode::SingleNodeWriter)]
        );
        assert_eq!(store.mutations(), before);
    }

    #[tokio::test]
    async fn validate_rejects_other_modes_without_error() {
        let (backend, _store) = make_backend();
        backend.create_volume(create_req("pvc-1", GIB)).await.unwrap();

        let mut req = validate_req("pvc-1", AccessMode::SingleNodeWriter);
        req.volume_capabilities
            .push(VolumeCapability::with_access_mode(AccessMode::MultiNodeMultiWriter));
        let resp = backend.validate_volume_capabilities(req).await.unwrap();
        assert!(!resp.is_confirmed());
        assert_eq!(resp.message, "Only single node writer is supported");
    }

    #[tokio::test]
    async fn validate_rejects_missing_arguments() {
        let (backend, _store) = make_backend();
        let err = backend
            .validate_volume_capabilities(validate_req("", AccessMode::SingleNodeWriter))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let mut req = validate_req("pvc-1", AccessMode::SingleNodeWriter);
        req.volume_capabilities.clear();
        let err = backend.validate_volume_capabilities(req).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn validate_prefixed_volume() {
        let (backend, _store) = make_backend();
        let mut req = create_req("pvc-1", GIB);
        req.parameters = HashMap::from([(PARAM_BUCKET.to_owned(), "shared".to_owned())]);
        backend.create_volume(req).await.unwrap();

        let resp = backend
            .validate_volume_capabilities(validate_req(
                "shared/pvc-1",
                AccessMode::SingleNodeWriter,
            ))
            .await
            .unwrap();
        assert!(resp.is_confirmed());

        let err = backend
            .validate_volume_capabilities(validate_req(
                "shared/pvc-9",
                AccessMode::SingleNodeWriter,
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn expand_is_unimplemented() {
        let (backend, store) = make_backend();
        let err = backend
            .controller_expand_volume(ControllerExpandVolumeRequest {
                volume_id: "pvc-1".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unimplemented);
        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn unadvertised_rpc_is_rejected() {
        let store = MemoryStore::new();
        let backend = S3Backend::new(store.clone()).with_capabilities(Vec::new());
        let err = backend
            .create_volume(create_req("pvc-1", GIB))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        let err = backend.delete_volume(delete_req("pvc-1")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(store.mutations(), 0);
    }

    #[tokio::test]
    async fn concurrent_creates_provision_one_bucket() {
        let store = MemoryStore::new();
        let backend = Arc::new(S3Backend::new(store.clone()));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                tokio::spawn(async move { backend.create_volume(create_req("pvc-1", GIB)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(store.get_fs_meta("pvc-1", "").await.unwrap().created_by_csi);
        // One bucket + marker + metadata, then a metadata rewrite per replay.
        assert_eq!(store.mutations(), 3 + 7);
    }

    /// Gives other tasks a chance to run before every store call.
    #[derive(Clone)]
    struct YieldingStore(MemoryStore);

    #[async_trait]
    impl ObjectStore for YieldingStore {
        async fn bucket_exists(&self, bucket: &str) -> Result<bool, CsiError> {
            tokio::task::yield_now().await;
            self.0.bucket_exists(bucket).await
        }

        async fn make_bucket(&self, bucket: &str) -> Result<(), CsiError> {
            tokio::task::yield_now().await;
            self.0.make_bucket(bucket).await
        }

        async fn delete_bucket(&self, bucket: &str) -> Result<(), CsiError> {
            tokio::task::yield_now().await;
            self.0.delete_bucket(bucket).await
        }

        async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CsiError> {
            tokio::task::yield_now().await;
            self.0.put_object(bucket, key, body).await
        }

        async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, CsiError> {
            tokio::task::yield_now().await;
            self.0.get_object(bucket, key).await
        }

        async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, CsiError> {
            tokio::task::yield_now().await;
            self.0.list_objects(bucket, prefix).await
        }

        async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CsiError> {
            tokio::task::yield_now().await;
            self.0.delete_object(bucket, key).await
        }
    }

    impl ObjectStoreProvider for YieldingStore {
        fn connect(&self, _secrets: &Secrets) -> Result<Arc<dyn ObjectStore>, CsiError> {
            Ok(Arc::new(self.clone()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_in_one_shared_bucket() {
        let store = MemoryStore::new();
        let backend = Arc::new(S3Backend::new(YieldingStore(store.clone())));

        for round in 0..25 {
            let bucket = format!("shared-{round}");
            let tasks: Vec<_> = (0..4)
                .map(|i| {
                    let backend = Arc::clone(&backend);
                    let mut req = create_req(&format!("pvc-{round}-{i}"), GIB);
                    req.parameters = HashMap::from([(PARAM_BUCKET.to_owned(), bucket.clone())]);
                    tokio::spawn(async move { backend.create_volume(req).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let recorded = (0..4)
                .filter(|i| {
                    store.contains_object(&bucket, &format!("pvc-{round}-{i}/.metadata.json"))
                })
                .count();
            assert_eq!(recorded, 4);
        }
        assert!(backend.locks.is_empty());
    }

    #[tokio::test]
    async fn identity_service() {
        let (backend, _store) = make_backend();
        let backend = backend.with_driver_name("test.s3.csi");

        let info = backend.get_plugin_info().await.unwrap();
        assert_eq!(info.name, "test.s3.csi");
        assert!(!info.vendor_version.is_empty());
        assert!(backend.probe().await.unwrap());
        assert_eq!(
            backend.get_plugin_capabilities().await.unwrap(),
            vec![PluginCapability::ControllerService]
        );
        assert_eq!(
            backend.controller_get_capabilities().await.unwrap(),
            vec![ControllerServiceCapability::CreateDeleteVolume]
        );
    }
}
