// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

use super::{CallStream, Invoker};
use crate::{client::connect::ConnectionFlags, context::CallContext, error::Error, methods};
use machina_rpcs::{
    transport::{RawValue, Reply},
    BoxFuture,
};
use std::sync::Arc;

/// The outermost pipeline layer. While the supervisor believes the
/// connection is down, non-exempt calls fail immediately rather than timing
/// out against a dead transport; the exempt set is exactly the set of
/// methods that must keep working while (re)connecting. On completion,
/// disconnection evidence that surfaced mid-call is translated into the
/// client's unavailable error.
pub(crate) struct DisconnectLayer<I> {
    inner: I,
    flags: Arc<ConnectionFlags>,
}

impl<I> DisconnectLayer<I> {
    pub(crate) fn new(inner: I, flags: Arc<ConnectionFlags>) -> Self {
        DisconnectLayer { inner, flags }
    }
}

fn translate(error: Error) -> Error {
    match error {
        Error::Status(s) if s.is_disconnection() => Error::Disconnected,
        other => other,
    }
}

impl<I: Invoker> Invoker for DisconnectLayer<I> {
    fn unary<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        request: Box<RawValue>,
    ) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            if !self.flags.connected() && !methods::is_session_exempt(method) {
                return Err(Error::Disconnected);
            }
            self.inner.unary(ctx, method, request).await.map_err(translate)
        })
    }

    fn open_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
    ) -> BoxFuture<'a, Result<CallStream, Error>> {
        Box::pin(async move {
            if !self.flags.connected() && !methods::is_session_exempt(method) {
                return Err(Error::Disconnected);
            }
            self.inner.open_stream(ctx, method).await.map_err(translate)
        })
    }
}
