//! Volume identifier derivation.
//!
//! A volume id doubles as the bucket name in one-bucket-per-volume mode, so
//! it has to satisfy S3 bucket naming: lower case and at most 63 characters.
//! Longer names are replaced by their SHA-1 digest, which keeps the mapping
//! deterministic across retries of the same `CreateVolume` call.

use sha1::{Digest, Sha1};

use crate::types::VolumeId;

/// Longest name that is used verbatim as a volume id.
pub const MAX_VOLUME_ID_LEN: usize = 63;

/// Derive the canonical volume id for a requested volume name.
pub fn derive_volume_id(name: &str) -> VolumeId {
    let lowered = name.to_lowercase();
    if lowered.len() > MAX_VOLUME_ID_LEN {
        return VolumeId(hex::encode(Sha1::digest(lowered.as_bytes())));
    }
    VolumeId(lowered)
}

/// Join a bucket and a prefix into a shared-bucket volume id.
pub fn join_bucket_prefix(bucket: &str, prefix: &str) -> VolumeId {
    if prefix.is_empty() {
        return VolumeId(bucket.to_owned());
    }
    VolumeId(format!("{bucket}/{prefix}"))
}

/// Split a volume id into `(bucket, prefix)` at the first `/`.
///
/// The prefix is empty when the id has no slash.
pub fn bucket_and_prefix(volume_id: &VolumeId) -> (&str, &str) {
    volume_id
        .as_str()
        .split_once('/')
        .unwrap_or((volume_id.as_str(), ""))
}
