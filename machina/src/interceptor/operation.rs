// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

use super::{CallStream, Invoker};
use crate::{context::CallContext, error::Error, resource::ResourceName};
use machina_rpcs::{
    metadata::{OPERATION_ID_KEY, SAFETY_MONITORED_RESOURCES_KEY},
    transport::{RawValue, Reply},
    BoxFuture,
};
use uuid::Uuid;

const LOG_TARGET: &str = "machina-call";

/// Propagates the per-operation id: the ambient one when the context carries
/// it, a freshly minted one otherwise. Sits outside the session layer so
/// that a session restart retries the call under the same operation id.
///
/// On the way out, safety-monitored resource names reported on response
/// headers are relayed to the context's safety monitor, prefixed with this
/// client's remote name when it has one.
pub(crate) struct OperationLayer<I> {
    inner: I,
    remote_name: Option<String>,
}

impl<I> OperationLayer<I> {
    pub(crate) fn new(inner: I, remote_name: Option<String>) -> Self {
        OperationLayer { inner, remote_name }
    }

    fn relay_safety_monitored(&self, ctx: &CallContext, reply: &Reply) {
        let Some(monitor) = &ctx.safety_monitor else {
            return;
        };
        for raw in reply.headers.get_all(SAFETY_MONITORED_RESOURCES_KEY) {
            match raw.parse::<ResourceName>() {
                Ok(name) => {
                    let name = match &self.remote_name {
                        Some(remote) => name.prefixed_with(remote),
                        None => name,
                    };
                    monitor.monitor(name);
                }
                Err(_) => {
                    tracing::warn!(
                        target: LOG_TARGET,
                        name = %raw,
                        "undecodable safety-monitored resource name in response headers"
                    );
                }
            }
        }
    }
}

fn with_operation_id(ctx: &CallContext) -> CallContext {
    let mut ctx = ctx.clone();
    let id = ctx.operation_id.unwrap_or_else(Uuid::new_v4);
    ctx.operation_id = Some(id);
    ctx.metadata.insert(OPERATION_ID_KEY, id.to_string());
    ctx
}

impl<I: Invoker> Invoker for OperationLayer<I> {
    fn unary<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        request: Box<RawValue>,
    ) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            let ctx = with_operation_id(ctx);
            let reply = self.inner.unary(&ctx, method, request).await?;
            self.relay_safety_monitored(&ctx, &reply);
            Ok(reply)
        })
    }

    fn open_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
    ) -> BoxFuture<'a, Result<CallStream, Error>> {
        Box::pin(async move {
            let ctx = with_operation_id(ctx);
            self.inner.open_stream(&ctx, method).await
        })
    }
}
