//! Per-volume metadata persisted inside the backing bucket.
//!
//! The record is stored as JSON next to the volume data, at
//! `<prefix>/.metadata.json`.  Field names match the layout written by
//! earlier S3 CSI drivers so buckets provisioned by them are still
//! recognised.

use serde::{Deserialize, Serialize};

/// Sub-path inside the bucket/prefix that holds filesystem content.
pub const FS_PATH: &str = "csi-fs";

/// Object name of the metadata record.
pub const METADATA_NAME: &str = ".metadata.json";

/// Storage-class parameter overriding the bucket name (shared-bucket mode).
pub const PARAM_BUCKET: &str = "bucket";

/// Storage-class parameter naming the node-side mounter.
pub const PARAM_MOUNTER: &str = "mounter";

/// Provisioning state and provenance of a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FsMeta {
    /// Bucket holding the volume.
    #[serde(rename = "Name")]
    pub bucket_name: String,
    /// Key prefix of the volume, empty in one-bucket-per-volume mode.
    #[serde(rename = "Prefix", default)]
    pub prefix: String,
    /// Opaque tag telling the node side how to expose the volume.
    #[serde(rename = "Mounter", default)]
    pub mounter: String,
    /// Always [`FS_PATH`].
    #[serde(rename = "FSPath", default)]
    pub fs_path: String,
    /// Capacity requested when the volume was first created.
    #[serde(rename = "CapacityBytes", default)]
    pub capacity_bytes: u64,
    /// `true` iff this controller created the bucket.
    #[serde(rename = "CreatedByCsi", default)]
    pub created_by_csi: bool,
}

impl FsMeta {
    /// A fresh record for `bucket`/`prefix`.
    pub fn new(
        bucket_name: &str,
        prefix: &str,
        mounter: &str,
        capacity_bytes: u64,
        created_by_csi: bool,
    ) -> Self {
        Self {
            bucket_name: bucket_name.to_owned(),
            prefix: prefix.to_owned(),
            mounter: mounter.to_owned(),
            fs_path: FS_PATH.to_owned(),
            capacity_bytes,
            created_by_csi,
        }
    }

    /// Object key of this record inside its bucket.
    pub fn key(&self) -> String {
        meta_key(&self.prefix)
    }
}

/// Join path segments the way object keys are laid out, skipping empty ones.
pub fn join_key(prefix: &str, name: &str) -> String {
    match (prefix.trim_matches('/'), name.trim_matches('/')) {
        ("", n) => n.to_owned(),
        (p, "") => p.to_owned(),
        (p, n) => format!("{p}/{n}"),
    }
}

/// Object key of the metadata record for a volume prefix.
pub fn meta_key(prefix: &str) -> String {
    join_key(prefix, METADATA_NAME)
}
