// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The object safe surface a connection exposes to the client.

use crate::{Metadata, Status};
use std::sync::Arc;

// Re-exporting for simplicity since it's used a bunch in the trait definition.
pub use serde_json::value::RawValue;

/// A boxed future, as returned from the [`Transport`] methods.
pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// A trait describing a single connection to a machine. Implementations of
/// this are handed out by a [`crate::Dialer`] and driven via [`crate::Channel`].
///
/// This is a low level interface whose methods expect an already-serialized
/// request body and hand back a still-serialized reply, deferring
/// deserialization to the caller. This is the case because we want the
/// methods to be object-safe (which prohibits generics), and want per-resource
/// clients to share one trait object across reconnects.
pub trait Transport: Send + Sync + 'static {
    /// Issue a unary call: one request message in, one reply out. `method` is
    /// the full method path (`/package.Service/Method`), and `metadata` is
    /// sent as the call's outgoing headers.
    fn unary<'a>(
        &'a self,
        method: &'a str,
        request: Box<RawValue>,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<Reply, Status>>;

    /// Open a bidirectional stream on `method`. The returned [`StreamReply`]
    /// carries the response headers and the message stream itself.
    fn open_stream<'a>(
        &'a self,
        method: &'a str,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<StreamReply, Status>>;

    /// Tear the connection down. Pending calls fail with a disconnection
    /// status.
    fn close(&self) -> BoxFuture<'_, Result<(), Status>>;
}

/// The reply to a unary call.
#[derive(Debug)]
pub struct Reply {
    /// The serialized response message.
    pub message: Box<RawValue>,
    /// Response headers reported by the server for this call.
    pub headers: Metadata,
}

/// An open bidirectional stream.
pub struct StreamReply {
    /// Response headers reported by the server when the stream was accepted.
    pub headers: Metadata,
    /// The message stream.
    pub stream: Box<dyn TransportStream>,
}

/// The send/receive surface of one open stream.
pub trait TransportStream: Send {
    /// Send a message to the server.
    fn send(&mut self, message: Box<RawValue>) -> BoxFuture<'_, Result<(), Status>>;

    /// Signal that no further messages will be sent. Receiving remains
    /// possible.
    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Status>>;

    /// Receive the next message. `Ok(None)` means the server has finished the
    /// stream cleanly.
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Box<RawValue>>, Status>>;
}

impl<T: Transport> Transport for Arc<T> {
    fn unary<'a>(
        &'a self,
        method: &'a str,
        request: Box<RawValue>,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<Reply, Status>> {
        (**self).unary(method, request, metadata)
    }

    fn open_stream<'a>(
        &'a self,
        method: &'a str,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<StreamReply, Status>> {
        (**self).open_stream(method, metadata)
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Status>> {
        (**self).close()
    }
}

impl<T: Transport> Transport for Box<T> {
    fn unary<'a>(
        &'a self,
        method: &'a str,
        request: Box<RawValue>,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<Reply, Status>> {
        (**self).unary(method, request, metadata)
    }

    fn open_stream<'a>(
        &'a self,
        method: &'a str,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<StreamReply, Status>> {
        (**self).open_stream(method, metadata)
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Status>> {
        (**self).close()
    }
}
