// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Establishing new transport connections.

use crate::{BoxFuture, Metadata, Status, Transport};
use std::{sync::Arc, time::Duration};

/// The transport families a dialer can be asked for.
///
/// Streaming-capable transports are preferred on every dial: once one has
/// been obtained, the client never falls back to a plain transport again, so
/// that high-throughput streaming workloads don't silently degrade across a
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// A transport suited to high-throughput media streaming.
    Streaming,
    /// A plain request/response transport.
    Plain,
}

/// Options passed through to the dialer on every dial attempt. The client
/// core treats these as opaque.
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// How long a single dial attempt may take before it is abandoned.
    pub connect_timeout: Option<Duration>,
    /// Credentials presented during connection setup, if any.
    pub credentials: Option<Credentials>,
    /// Extra headers presented during connection setup.
    pub headers: Metadata,
    /// Permit plaintext addresses. Off by default.
    pub allow_insecure: bool,
}

/// An opaque credential handed to the transport during connection setup.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// The credential type, interpreted by the server.
    pub kind: String,
    /// The credential payload.
    pub payload: String,
}

/// A trait describing how connections to a machine are established. Concrete
/// dialers (direct gRPC, WebRTC with signalling, ...) live alongside the
/// transports they produce.
pub trait Dialer: Send + Sync + 'static {
    /// Dial `address`, producing a connection of the requested kind. A dialer
    /// that cannot provide the requested kind at all should fail with an
    /// `Unimplemented` status; connection failures use `Unavailable`.
    fn dial<'a>(
        &'a self,
        address: &'a str,
        kind: TransportKind,
        options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, Status>>;
}

impl<T: Dialer> Dialer for Arc<T> {
    fn dial<'a>(
        &'a self,
        address: &'a str,
        kind: TransportKind,
        options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, Status>> {
        (**self).dial(address, kind, options)
    }
}
