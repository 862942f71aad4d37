//! Per-volume mutual exclusion.
//!
//! `CreateVolume` and `DeleteVolume` both read backend state and then act on
//! it.  Two calls for the same volume id interleaving those steps could
//! create a bucket twice or delete a bucket that is being re-created, so the
//! controller serializes them per id.  Calls for different volumes do not
//! contend.
//!
//! Creates in shared-bucket mode also take the lock of the bucket they may
//! create, before the volume lock. Buckets and one-bucket-per-volume ids
//! share a key space, which is what makes the two modes exclude each other
//! on the same bucket.
//!
//! The lock is process-local: replicas of the controller must still be
//! fronted by an orchestrator that does not issue concurrent calls for the
//! same volume to different replicas.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::VolumeId;

/// Registry of per-volume locks.  Idle entries are dropped on release.
#[derive(Default)]
pub struct VolumeLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl VolumeLocks {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds the lock for `volume_id`, then take it.
    pub async fn lock(&self, volume_id: &VolumeId) -> VolumeGuard<'_> {
        self.lock_key(volume_id.as_str()).await
    }

    /// Take the lock guarding creation of `bucket`.  Must be taken before
    /// the lock of any volume inside it.
    pub async fn lock_bucket(&self, bucket: &str) -> VolumeGuard<'_> {
        self.lock_key(bucket).await
    }

    async fn lock_key(&self, key: &str) -> VolumeGuard<'_> {
        let mutex = Arc::clone(self.locks.entry(key.to_owned()).or_default().value());
        let guard = mutex.lock_owned().await;
        VolumeGuard {
            locks: &self.locks,
            key: key.to_owned(),
            guard: Some(guard),
        }
    }

    /// Number of volume ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// `true` when no lock is held or awaited.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds the lock for one volume id until dropped.
pub struct VolumeGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for VolumeGuard<'_> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        let mutex = Arc::clone(OwnedMutexGuard::mutex(&guard));
        drop(guard);
        // Only the registry and `mutex` reference it: nobody is waiting.
        self.locks.remove_if(&self.key, |_, entry| {
            Arc::ptr_eq(entry, &mutex) && Arc::strong_count(entry) == 2
        });
    }
}
