// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The status vocabulary shared by every RPC call.

use serde::{Deserialize, Serialize};

/// The message carried by the well known "session expired" status. A status
/// is treated as a session expiration only on an exact code + message match.
pub const SESSION_EXPIRED_MESSAGE: &str = "SESSION_EXPIRED";

/// The message used by transports to signal that the underlying connection
/// has been closed. See [`Status::is_disconnection`].
pub const CONNECTION_CLOSED_MESSAGE: &str = "connection closed";

/// RPC status codes. The numbering follows the common gRPC assignment so that
/// transports can map their own codes across losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

/// A failed RPC call: a [`Code`] plus a human readable message. This is the
/// error type of everything crossing the [`crate::Transport`] boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("rpc status {code:?}: {message}")]
pub struct Status {
    code: Code,
    message: String,
}

impl Status {
    /// Construct a new [`Status`] from a code and message.
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Status {
            code,
            message: message.into(),
        }
    }

    /// The status code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The status message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// An `Unavailable` status.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Status::new(Code::Unavailable, message)
    }

    /// A `NotFound` status.
    pub fn not_found(message: impl Into<String>) -> Self {
        Status::new(Code::NotFound, message)
    }

    /// An `Unimplemented` status.
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Status::new(Code::Unimplemented, message)
    }

    /// An `InvalidArgument` status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Status::new(Code::InvalidArgument, message)
    }

    /// A `DeadlineExceeded` status.
    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Status::new(Code::DeadlineExceeded, message)
    }

    /// A `Cancelled` status.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Status::new(Code::Cancelled, message)
    }

    /// An `Internal` status.
    pub fn internal(message: impl Into<String>) -> Self {
        Status::new(Code::Internal, message)
    }

    /// The status a transport reports when the connection it was issued on is
    /// gone. This is the explicit disconnection sentinel; see
    /// [`Status::is_disconnection`].
    pub fn disconnected() -> Self {
        Status::unavailable(CONNECTION_CLOSED_MESSAGE)
    }

    /// The well known status a server responds with when the session id
    /// attached to a call no longer names a live session.
    pub fn session_expired() -> Self {
        Status::invalid_argument(SESSION_EXPIRED_MESSAGE)
    }

    /// Whether this status is evidence that the underlying transport
    /// connection is gone, rather than a call-level failure.
    ///
    /// Matches the explicit sentinel produced by [`Status::disconnected`], and
    /// additionally any error text mentioning a closed pipe, which is what
    /// leaks out of transports that surface raw IO errors.
    pub fn is_disconnection(&self) -> bool {
        (self.code == Code::Unavailable && self.message == CONNECTION_CLOSED_MESSAGE)
            || self.message.contains("closed pipe")
    }

    /// Whether this status is the well known "session expired" signal. The
    /// code and message are matched exactly; a server producing the same code
    /// with different text is reporting something else.
    pub fn is_session_expired(&self) -> bool {
        self.code == Code::InvalidArgument && self.message == SESSION_EXPIRED_MESSAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnection_detection() {
        assert!(Status::disconnected().is_disconnection());
        assert!(Status::internal("io error: write on closed pipe").is_disconnection());
        assert!(!Status::unavailable("server busy").is_disconnection());
        // The sentinel message only counts on the sentinel code.
        assert!(!Status::internal(CONNECTION_CLOSED_MESSAGE).is_disconnection());
    }

    #[test]
    fn session_expiry_is_matched_exactly() {
        assert!(Status::session_expired().is_session_expired());
        assert!(!Status::invalid_argument("session expired").is_session_expired());
        assert!(!Status::unavailable(SESSION_EXPIRED_MESSAGE).is_session_expired());
    }
}
