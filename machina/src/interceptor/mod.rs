// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The per-call interceptor pipeline.
//!
//! Every call (whether issued by the client façade, a typed method wrapper
//! or a per-resource stub) flows through a fixed stack of layers, each a
//! decorator over an inner [`Invoker`]. Outermost to innermost:
//!
//! 1. [`DisconnectLayer`]: fail fast while the supervisor believes the
//!    connection is down, and translate late-detected disconnection errors.
//! 2. [`OperationLayer`]: mint/propagate the operation id and relay
//!    safety-monitored resource names from response headers.
//! 3. [`SessionLayer`]: attach the session id and transparently recover from
//!    session expiration. Sits outside retry so a session restart is never
//!    conflated with a transport-level retry, and inside the operation layer
//!    so the restart carries the same operation id.
//! 4. [`RetryLayer`]: bounded retry of transiently-failed calls.
//! 5. [`ChannelInvoker`]: version metadata, per-call logging and deadline,
//!    then the channel itself.

mod disconnect;
mod invoke;
mod operation;
mod retry;
mod session_layer;

pub(crate) use disconnect::DisconnectLayer;
pub(crate) use invoke::ChannelInvoker;
pub(crate) use operation::OperationLayer;
pub(crate) use retry::RetryLayer;
pub(crate) use session_layer::SessionLayer;

use crate::{context::CallContext, error::Error, session::SessionManager};
use machina_rpcs::{
    transport::{RawValue, Reply},
    BoxFuture, Channel, Metadata,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::client::connect::ConnectionFlags;

/// The internal call interface each pipeline layer implements.
pub(crate) trait Invoker: Send + Sync + 'static {
    fn unary<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        request: Box<RawValue>,
    ) -> BoxFuture<'a, Result<Reply, Error>>;

    fn open_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
    ) -> BoxFuture<'a, Result<CallStream, Error>>;
}

/// Assemble the full pipeline over a channel. The session manager is handed
/// a view of the stack *below* the session layer, so that session work
/// re-entering the pipeline skips the layers above it.
pub(crate) fn build_pipeline(
    channel: Channel,
    flags: Arc<ConnectionFlags>,
    session: SessionManager,
    remote_name: Option<String>,
) -> Arc<dyn Invoker> {
    let inner: Arc<dyn Invoker> = Arc::new(RetryLayer::new(ChannelInvoker::new(channel)));
    let session_layer = SessionLayer::new(inner, session);
    let operation = OperationLayer::new(session_layer, remote_name);
    Arc::new(DisconnectLayer::new(operation, flags))
}

/// A cheaply cloneable handle issuing calls through the full interceptor
/// pipeline. Per-resource stubs and the typed method wrappers are built over
/// this; like the channel underneath, it stays valid across reconnects.
#[derive(Clone)]
pub struct CallHandle {
    invoker: Arc<dyn Invoker>,
}

impl CallHandle {
    pub(crate) fn new(invoker: Arc<dyn Invoker>) -> Self {
        CallHandle { invoker }
    }

    /// Issue a unary call, serializing the request and deserializing the
    /// reply message.
    pub async fn unary<Req, Res>(
        &self,
        ctx: &CallContext,
        method: &str,
        request: &Req,
    ) -> Result<Res, Error>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let raw = serde_json::value::to_raw_value(request)?;
        let reply = self.invoker.unary(ctx, method, raw).await?;
        serde_json::from_str(reply.message.get()).map_err(Error::Serialization)
    }

    /// Issue a unary call with an already-serialized request, handing back
    /// the raw reply (message and headers).
    pub async fn unary_raw(
        &self,
        ctx: &CallContext,
        method: &str,
        request: Box<RawValue>,
    ) -> Result<Reply, Error> {
        self.invoker.unary(ctx, method, request).await
    }

    /// Open a bidirectional stream.
    pub async fn open_stream(&self, ctx: &CallContext, method: &str) -> Result<CallStream, Error> {
        self.invoker.open_stream(ctx, method).await
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CallHandle").finish()
    }
}

/// An open bidirectional stream, as handed to callers. Messages are JSON
/// values; the typed `send`/`recv` helpers (de)serialize at the boundary.
pub struct CallStream {
    pub(crate) headers: Metadata,
    pub(crate) inner: Box<dyn MessageStream>,
}

impl CallStream {
    /// The response headers reported when the stream was accepted.
    pub fn headers(&self) -> &Metadata {
        &self.headers
    }

    /// Serialize and send one message.
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<(), Error> {
        let raw = serde_json::value::to_raw_value(message)?;
        self.inner.send(raw).await
    }

    /// Send one already-serialized message.
    pub async fn send_raw(&mut self, message: Box<RawValue>) -> Result<(), Error> {
        self.inner.send(message).await
    }

    /// Signal that no further messages will be sent.
    pub async fn close_send(&mut self) -> Result<(), Error> {
        self.inner.close_send().await
    }

    /// Receive and deserialize the next message. `Ok(None)` is a clean end
    /// of stream.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, Error> {
        match self.inner.recv().await? {
            Some(raw) => serde_json::from_str(raw.get())
                .map(Some)
                .map_err(Error::Serialization),
            None => Ok(None),
        }
    }

    /// Receive the next message without deserializing it.
    pub async fn recv_raw(&mut self) -> Result<Option<Box<RawValue>>, Error> {
        self.inner.recv().await
    }
}

impl std::fmt::Debug for CallStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallStream")
            .field("headers", &self.headers)
            .finish()
    }
}

/// The internal message-stream surface layers wrap and adapt.
pub(crate) trait MessageStream: Send {
    fn send(&mut self, message: Box<RawValue>) -> BoxFuture<'_, Result<(), Error>>;
    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Error>>;
    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Box<RawValue>>, Error>>;
}
