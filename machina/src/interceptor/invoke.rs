// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

use super::{CallStream, Invoker, MessageStream};
use crate::{context::CallContext, error::Error};
use machina_rpcs::{
    metadata::CLIENT_VERSION_KEY,
    transport::{RawValue, Reply, TransportStream},
    BoxFuture, Channel, Code, Status,
};

const LOG_TARGET: &str = "machina-call";

/// The API version this client speaks.
const API_VERSION: &str = "v1";

/// The innermost pipeline layer: stamps the client version metadata, emits
/// the per-call log entry, applies the per-call deadline and issues the call
/// on the channel.
pub(crate) struct ChannelInvoker {
    channel: Channel,
    version_value: String,
}

impl ChannelInvoker {
    pub(crate) fn new(channel: Channel) -> Self {
        ChannelInvoker {
            channel,
            version_value: format!("rust;{};{API_VERSION}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Invoker for ChannelInvoker {
    fn unary<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        request: Box<RawValue>,
    ) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            let mut metadata = ctx.metadata.clone();
            metadata.insert(CLIENT_VERSION_KEY, self.version_value.clone());
            tracing::debug!(target: LOG_TARGET, %method, "unary call");

            let call = self.channel.unary(method, request, &metadata);
            let res = match ctx.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, call).await {
                    Ok(res) => res,
                    Err(_) => Err(Status::deadline_exceeded("call deadline exceeded")),
                },
                None => call.await,
            };

            res.map_err(|status| {
                tracing::debug!(target: LOG_TARGET, %method, error = %status, "unary call failed");
                map_status(status)
            })
        })
    }

    fn open_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
    ) -> BoxFuture<'a, Result<CallStream, Error>> {
        Box::pin(async move {
            let mut metadata = ctx.metadata.clone();
            metadata.insert(CLIENT_VERSION_KEY, self.version_value.clone());
            tracing::debug!(target: LOG_TARGET, %method, "opening stream");

            let open = self.channel.open_stream(method, &metadata);
            let res = match ctx.timeout {
                Some(timeout) => match tokio::time::timeout(timeout, open).await {
                    Ok(res) => res,
                    Err(_) => Err(Status::deadline_exceeded("stream open deadline exceeded")),
                },
                None => open.await,
            };

            let reply = res.map_err(|status| {
                tracing::debug!(target: LOG_TARGET, %method, error = %status, "stream open failed");
                map_status(status)
            })?;

            Ok(CallStream {
                headers: reply.headers,
                inner: Box::new(TransportMessageStream {
                    inner: reply.stream,
                }),
            })
        })
    }
}

// An empty channel slot reports "not connected"; everything else propagates
// as a plain status for the outer layers to interpret.
fn map_status(status: Status) -> Error {
    if status.code() == Code::Unavailable && status.message() == "not connected" {
        Error::Disconnected
    } else {
        Error::Status(status)
    }
}

// Adapts the transport's stream surface to the pipeline's, lifting status
// errors into client errors.
struct TransportMessageStream {
    inner: Box<dyn TransportStream>,
}

impl MessageStream for TransportMessageStream {
    fn send(&mut self, message: Box<RawValue>) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { self.inner.send(message).await.map_err(Error::Status) })
    }

    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move { self.inner.close_send().await.map_err(Error::Status) })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Box<RawValue>>, Error>> {
        Box::pin(async move { self.inner.recv().await.map_err(Error::Status) })
    }
}
