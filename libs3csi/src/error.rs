//! CSI error types.
//!
//! All errors in the `libs3csi` crate are represented by the [`CsiError`]
//! enum, which derives [`thiserror::Error`] for ergonomic error handling and
//! also implements [`Serialize`]/[`Deserialize`] so errors can travel across
//! the QUIC transport layer.  Callers that need the CSI status class of an
//! error use [`CsiError::code`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// A volume with the same name but an incompatible size already exists.
    #[error("volume {0} already exists")]
    VolumeAlreadyExists(String),

    /// The requested volume was not found.
    #[error("volume {0} not found")]
    VolumeNotFound(String),

    /// The operation is not implemented by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The object-storage backend returned an error.
    #[error("backend error: {0}")]
    BackendError(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Status class surfaced to CSI callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Client specified an invalid argument.
    InvalidArgument,
    /// Some entity that we attempted to create already exists.
    AlreadyExists,
    /// Some requested entity was not found.
    NotFound,
    /// Operation is not implemented or not supported.
    Unimplemented,
    /// Backend, transport or otherwise unhandled failure.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl CsiError {
    /// Create a [`CsiError::BackendError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn backend<E: fmt::Display>(e: E) -> Self {
        Self::BackendError(e.to_string())
    }

    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Prefix a backend error with the operation that produced it, e.g.
    /// `"create bucket my-volume"`.  Other variants are returned unchanged.
    #[must_use]
    pub fn context(self, ctx: impl fmt::Display) -> Self {
        match self {
            Self::BackendError(msg) => Self::BackendError(format!("{ctx}: {msg}")),
            other => other,
        }
    }

    /// The status class this error is reported with.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::VolumeAlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::VolumeNotFound(_) => ErrorCode::NotFound,
            Self::Unimplemented(_) => ErrorCode::Unimplemented,
            Self::BackendError(_) | Self::TransportError(_) | Self::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }
}
