// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Types representing the errors that can be returned.

use crate::resource::ResourceName;
use machina_rpcs::{Code, Status};

/// The error type returned from every client operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The client is not connected to the machine: the connection was lost or
    /// is still being (re)established. Safe to retry.
    #[error("not connected to the machine")]
    Disconnected,
    /// The resource name is not present in the machine's current catalog.
    #[error("resource not found in machine catalog: {0}")]
    ResourceNotFound(ResourceName),
    /// An RPC-level status, propagated verbatim.
    #[error("rpc error: {0}")]
    Status(#[from] Status),
    /// Cannot serialize a request or deserialize a response.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A string could not be parsed into a [`ResourceName`] or
    /// [`crate::resource::Api`].
    #[error("invalid resource name: {0}")]
    InvalidResourceName(String),
    /// The machine address could not be parsed or uses a scheme that was not
    /// permitted.
    #[error("invalid machine address: {0}")]
    InvalidAddress(String),
    /// The client has been closed.
    #[error("client closed")]
    Closed,
}

impl Error {
    /// Whether this error indicates the machine is (currently) unreachable,
    /// in which case the operation may be retried later.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Disconnected | Error::Closed => true,
            Error::Status(s) => s.code() == Code::Unavailable,
            _ => false,
        }
    }

    /// Whether this error reports a resource missing from the catalog.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound(_))
    }

    pub(crate) fn is_unimplemented(&self) -> bool {
        matches!(self, Error::Status(s) if s.code() == Code::Unimplemented)
    }

    pub(crate) fn is_session_expired(&self) -> bool {
        matches!(self, Error::Status(s) if s.is_session_expired())
    }

    pub(crate) fn is_cancellation(&self) -> bool {
        matches!(
            self,
            Error::Status(s) if matches!(s.code(), Code::Cancelled | Code::DeadlineExceeded)
        )
    }
}
