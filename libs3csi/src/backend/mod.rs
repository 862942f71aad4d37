//! Storage backend implementations.
//!
//! [`s3::S3Backend`] implements [`CsiIdentity`](crate::CsiIdentity) and
//! [`CsiController`](crate::CsiController) over any
//! [`ObjectStoreProvider`](crate::store::ObjectStoreProvider).

pub mod locks;
pub mod s3;
