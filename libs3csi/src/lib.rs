//! # libs3csi: S3-backed CSI controller over QUIC for RK8s
//!
//! `libs3csi` is a [CSI][csi] controller that provisions volumes on an
//! S3-compatible object store. Each volume is a bucket, or a prefix inside a
//! shared bucket, carrying a small `.metadata.json` record. Requests travel as JSON over QUIC (via
//! [`quinn`]) instead of gRPC, following the RK8s conventions (Tokio,
//! `tracing`, `thiserror`).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, `Secrets`, capabilities, requests. |
//! | [`error`] | [`CsiError`] and its [`ErrorCode`] mapping. |
//! | [`volume_id`] | Name → volume id derivation and bucket/prefix split. |
//! | [`meta`] | [`FsMeta`](meta::FsMeta) record stored next to each volume. |
//! | [`store`] | [`ObjectStore`](store::ObjectStore) trait, S3 and in-memory stores. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: create/delete/validate/expand. |
//! | [`backend`] | [`S3Backend`] controller and per-volume locking. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod error;
pub mod identity;
pub mod message;
pub mod meta;
pub mod store;
pub mod transport;
pub mod types;
pub mod volume_id;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::s3::S3Backend;
pub use controller::CsiController;
pub use error::{CsiError, ErrorCode};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use types::*;
