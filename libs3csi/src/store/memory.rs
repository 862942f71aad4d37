//! In-process [`ObjectStore`].
//!
//! Buckets live in a [`DashMap`] keyed by bucket name, each holding a sorted
//! map of objects.  The store counts mutating calls and can be switched
//! offline as a whole or made to fail one kind of call, which lets tests
//! assert "no backend mutation" and exercise backend failures without a
//! real S3 endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use crate::error::CsiError;
use crate::store::{ObjectStore, ObjectStoreProvider};
use crate::types::Secrets;

/// Kind of [`ObjectStore`] primitive, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    BucketExists,
    MakeBucket,
    DeleteBucket,
    PutObject,
    GetObject,
    ListObjects,
    DeleteObject,
}

#[derive(Default)]
struct Inner {
    buckets: DashMap<String, BTreeMap<String, Vec<u8>>>,
    mutations: AtomicU64,
    offline: AtomicBool,
    failing: DashSet<StoreOp>,
}

/// Shared in-memory object store.  Clones share the same buckets.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutating calls so far.
    pub fn mutations(&self) -> u64 {
        self.inner.mutations.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with a backend error (or succeed
    /// again when `offline` is `false`).
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Make every subsequent `op` call fail with a backend error.
    pub fn fail_on(&self, op: StoreOp) {
        self.inner.failing.insert(op);
    }

    /// Undo all [`Self::fail_on`] calls.
    pub fn clear_failures(&self) {
        self.inner.failing.clear();
    }

    /// Whether `bucket` holds an object at `key`.
    pub fn contains_object(&self, bucket: &str, key: &str) -> bool {
        self.inner
            .buckets
            .get(bucket)
            .is_some_and(|objects| objects.contains_key(key))
    }

    /// Sorted keys currently stored in `bucket`, empty if it does not exist.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.inner
            .buckets
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self, op: StoreOp) -> Result<(), CsiError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(CsiError::BackendError("object store unreachable".into()));
        }
        if self.inner.failing.contains(&op) {
            return Err(CsiError::BackendError(format!("{op:?} failed")));
        }
        Ok(())
    }

    fn mutated(&self) {
        self.inner.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn no_such_bucket(bucket: &str) -> CsiError {
        CsiError::BackendError(format!("bucket {bucket} does not exist"))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool, CsiError> {
        self.check(StoreOp::BucketExists)?;
        Ok(self.inner.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), CsiError> {
        self.check(StoreOp::MakeBucket)?;
        if self.inner.buckets.contains_key(bucket) {
            return Err(CsiError::BackendError(format!(
                "bucket {bucket} already owned by you"
            )));
        }
        self.inner.buckets.insert(bucket.to_owned(), BTreeMap::new());
        self.mutated();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), CsiError> {
        self.check(StoreOp::DeleteBucket)?;
        let removed = self
            .inner
            .buckets
            .remove_if(bucket, |_, objects| objects.is_empty());
        if removed.is_none() {
            if self.inner.buckets.contains_key(bucket) {
                return Err(CsiError::BackendError(format!(
                    "bucket {bucket} is not empty"
                )));
            }
            return Err(Self::no_such_bucket(bucket));
        }
        self.mutated();
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), CsiError> {
        self.check(StoreOp::PutObject)?;
        let mut objects = self
            .inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        objects.insert(key.to_owned(), body);
        drop(objects);
        self.mutated();
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, CsiError> {
        self.check(StoreOp::GetObject)?;
        let objects = self
            .inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        Ok(objects.get(key).cloned())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, CsiError> {
        self.check(StoreOp::ListObjects)?;
        let objects = self
            .inner
            .buckets
            .get(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        Ok(objects
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), CsiError> {
        self.check(StoreOp::DeleteObject)?;
        let mut objects = self
            .inner
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_such_bucket(bucket))?;
        let existed = objects.remove(key).is_some();
        drop(objects);
        if existed {
            self.mutated();
        }
        Ok(())
    }
}

impl ObjectStoreProvider for MemoryStore {
    fn connect(&self, _secrets: &Secrets) -> Result<Arc<dyn ObjectStore>, CsiError> {
        Ok(Arc::new(self.clone()))
    }
}
