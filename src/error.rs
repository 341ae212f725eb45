//! Error taxonomy shared by every layer of a mesh service.
//!
//! # Design Decisions
//! - One enum for infrastructure and capability failures so `?` works across layers
//! - Wrapping a failure with a capability name never changes its kind
//! - `FlushTimeout` exists for logging only; nothing escalates it

use std::time::Duration;

use thiserror::Error;

use crate::rpc::status::{Code, Status};

/// Coarse classification of a [`MeshError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    Unreachable,
    BindFailed,
    Cancelled,
    DeadlineExceeded,
    DownstreamFailure,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    Unimplemented,
    Internal,
    FlushTimeout,
    ListenerFailed,
}

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("{target} unreachable at {address}: {reason}")]
    Unreachable {
        target: String,
        address: String,
        reason: String,
    },

    #[error("failed to bind {listener} listener on {address}: {source}")]
    BindFailed {
        listener: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The downstream service answered with a non-OK status.
    #[error("{method} failed: {status}")]
    Downstream { method: String, status: Status },

    /// A failure annotated with the capability that was running when it happened.
    #[error("{capability}: {source}")]
    Capability {
        capability: &'static str,
        #[source]
        source: Box<MeshError>,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("unknown method {0}")]
    Unimplemented(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("span flush did not finish within {0:?}")]
    FlushTimeout(Duration),

    #[error("{listener} listener failed: {reason}")]
    ListenerFailed {
        listener: &'static str,
        reason: String,
    },
}

impl MeshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MeshError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            MeshError::Unreachable { .. } => ErrorKind::Unreachable,
            MeshError::BindFailed { .. } => ErrorKind::BindFailed,
            MeshError::Cancelled => ErrorKind::Cancelled,
            MeshError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            MeshError::Downstream { .. } => ErrorKind::DownstreamFailure,
            MeshError::Capability { source, .. } => source.kind(),
            MeshError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            MeshError::NotFound(_) => ErrorKind::NotFound,
            MeshError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            MeshError::Unimplemented(_) => ErrorKind::Unimplemented,
            MeshError::Internal(_) => ErrorKind::Internal,
            MeshError::FlushTimeout(_) => ErrorKind::FlushTimeout,
            MeshError::ListenerFailed { .. } => ErrorKind::ListenerFailed,
        }
    }

    /// Wire code for this error. A downstream status keeps the code it arrived with.
    pub fn code(&self) -> Code {
        match self {
            MeshError::Cancelled => Code::Cancelled,
            MeshError::DeadlineExceeded => Code::DeadlineExceeded,
            MeshError::Unreachable { .. } => Code::Unavailable,
            MeshError::Downstream { status, .. } => status.code,
            MeshError::Capability { source, .. } => source.code(),
            MeshError::InvalidArgument(_) => Code::InvalidArgument,
            MeshError::NotFound(_) => Code::NotFound,
            MeshError::AlreadyExists(_) => Code::AlreadyExists,
            MeshError::Unimplemented(_) => Code::Unimplemented,
            MeshError::ConfigInvalid(_)
            | MeshError::BindFailed { .. }
            | MeshError::Internal(_)
            | MeshError::FlushTimeout(_)
            | MeshError::ListenerFailed { .. } => Code::Internal,
        }
    }

    pub fn to_status(&self) -> Status {
        Status::new(self.code(), self.to_string())
    }

    /// Annotate the error with the capability it surfaced through.
    pub fn within(self, capability: &'static str) -> MeshError {
        MeshError::Capability {
            capability,
            source: Box::new(self),
        }
    }

    /// True for the errors a caller should expect while the process is draining.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
            || matches!(self.code(), Code::Cancelled | Code::DeadlineExceeded)
    }
}
