//! QUIC transport layer for CSI messages.
//!
//! This module provides [`client::CsiClient`] and [`server::CsiServer`] that
//! exchange [`CsiMessage`](crate::CsiMessage) values as JSON over QUIC
//! bi-directional streams using `quinn`.

pub mod client;
pub mod server;

/// Upper bound on a single serialized request or response.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
