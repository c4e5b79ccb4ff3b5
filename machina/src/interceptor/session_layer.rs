// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

use super::{CallHandle, CallStream, Invoker, MessageStream};
use crate::{
    context::CallContext, error::Error, methods::SessionMethods, session::SessionManager,
};
use machina_rpcs::{
    metadata::SESSION_ID_KEY,
    transport::{RawValue, Reply},
    BoxFuture,
};
use std::sync::Arc;

const LOG_TARGET: &str = "machina-session";

/// Attaches the current session id to non-exempt calls (starting a session
/// first when support is still undiscovered), and transparently recovers
/// when the server reports the session expired:
///
/// - A unary call is retried exactly once under a freshly started session.
/// - A stream records its sent messages until the first receive succeeds;
///   if that first receive reports expiration, the stream is reopened under
///   a fresh session, the sends are replayed, and the receive is performed
///   on the new stream. The server only re-reads the session id from the
///   first request, so the first response is the only place expiration can
///   show up.
///
/// Session work issued from in here re-enters the pipeline below this layer
/// with the re-entrancy marker set, so it never recurses into session
/// handling itself.
pub(crate) struct SessionLayer {
    inner: Arc<dyn Invoker>,
    session: SessionManager,
    methods: SessionMethods,
}

impl SessionLayer {
    pub(crate) fn new(inner: Arc<dyn Invoker>, session: SessionManager) -> Self {
        let methods = SessionMethods::new(CallHandle::new(inner.clone()));
        SessionLayer {
            inner,
            session,
            methods,
        }
    }
}

impl Invoker for SessionLayer {
    fn unary<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        request: Box<RawValue>,
    ) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            if !self.session.should_attach(ctx, method) {
                return self.inner.unary(ctx, method, request).await;
            }
            let Some(id) = self.session.attach_id(&self.methods, ctx).await? else {
                return self.inner.unary(ctx, method, request).await;
            };

            let mut sctx = ctx.clone();
            sctx.metadata.insert(SESSION_ID_KEY, id);
            match self.inner.unary(&sctx, method, request.clone()).await {
                Err(e) if e.is_session_expired() => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        %method,
                        "session expired; restarting and retrying call"
                    );
                    self.session.reset().await;
                    let id = self.session.attach_id(&self.methods, ctx).await?;
                    let mut sctx = ctx.clone();
                    if let Some(id) = id {
                        sctx.metadata.insert(SESSION_ID_KEY, id);
                    }
                    self.inner.unary(&sctx, method, request).await
                }
                other => other,
            }
        })
    }

    fn open_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
    ) -> BoxFuture<'a, Result<CallStream, Error>> {
        Box::pin(async move {
            if !self.session.should_attach(ctx, method) {
                return self.inner.open_stream(ctx, method).await;
            }
            let Some(id) = self.session.attach_id(&self.methods, ctx).await? else {
                return self.inner.open_stream(ctx, method).await;
            };

            let mut sctx = ctx.clone();
            sctx.metadata.insert(SESSION_ID_KEY, id);
            let stream = self.inner.open_stream(&sctx, method).await?;
            Ok(CallStream {
                headers: stream.headers,
                inner: Box::new(SessionStream {
                    inner: stream.inner,
                    invoker: self.inner.clone(),
                    session: self.session.clone(),
                    methods: self.methods.clone(),
                    ctx: ctx.clone(),
                    method: method.to_string(),
                    recorded: Some(Vec::new()),
                    sent_close: false,
                }),
            })
        })
    }
}

// Wraps a session-carrying stream for first-receive recovery. `recorded` is
// `Some` until the first receive has succeeded; after that the stream is
// either healthy or the transport itself has died, and recovery is over.
struct SessionStream {
    inner: Box<dyn MessageStream>,
    invoker: Arc<dyn Invoker>,
    session: SessionManager,
    methods: SessionMethods,
    ctx: CallContext,
    method: String,
    recorded: Option<Vec<Box<RawValue>>>,
    sent_close: bool,
}

impl SessionStream {
    async fn replay(&mut self) -> Result<Option<Box<RawValue>>, Error> {
        tracing::debug!(
            target: LOG_TARGET,
            method = %self.method,
            "session expired on first response; replaying stream on a fresh session"
        );
        self.session.reset().await;
        let id = self.session.attach_id(&self.methods, &self.ctx).await?;
        let mut sctx = self.ctx.clone();
        if let Some(id) = id {
            sctx.metadata.insert(SESSION_ID_KEY, id);
        }

        let fresh = self.invoker.open_stream(&sctx, &self.method).await?;
        self.inner = fresh.inner;

        let recorded = self.recorded.clone().unwrap_or_default();
        for message in recorded {
            self.inner.send(message).await?;
        }
        if self.sent_close {
            self.inner.close_send().await?;
        }

        let first = self.inner.recv().await;
        if first.is_ok() {
            self.recorded = None;
        }
        first
    }
}

impl MessageStream for SessionStream {
    fn send(&mut self, message: Box<RawValue>) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            if let Some(recorded) = &mut self.recorded {
                recorded.push(message.clone());
            }
            self.inner.send(message).await
        })
    }

    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Error>> {
        Box::pin(async move {
            self.sent_close = true;
            self.inner.close_send().await
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Box<RawValue>>, Error>> {
        Box::pin(async move {
            if self.recorded.is_none() {
                return self.inner.recv().await;
            }
            match self.inner.recv().await {
                Err(e) if e.is_session_expired() => self.replay().await,
                Ok(message) => {
                    self.recorded = None;
                    Ok(message)
                }
                Err(e) => Err(e),
            }
        })
    }
}
