// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

use super::{CallStream, Invoker};
use crate::{context::CallContext, error::Error};
use machina_rpcs::{
    transport::{RawValue, Reply},
    BoxFuture, Code,
};
use std::time::Duration;

const LOG_TARGET: &str = "machina-call";

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Bounded transport-level retry. Only transiently-unavailable statuses are
/// retried; disconnection evidence is surfaced immediately so the layers
/// above (and the connection supervisor) see it without delay. Session
/// expiration is never handled here.
pub(crate) struct RetryLayer<I> {
    inner: I,
}

impl<I> RetryLayer<I> {
    pub(crate) fn new(inner: I) -> Self {
        RetryLayer { inner }
    }
}

fn retryable(error: &Error) -> bool {
    matches!(
        error,
        Error::Status(s) if s.code() == Code::Unavailable && !s.is_disconnection()
    )
}

impl<I: Invoker> Invoker for RetryLayer<I> {
    fn unary<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
        request: Box<RawValue>,
    ) -> BoxFuture<'a, Result<Reply, Error>> {
        Box::pin(async move {
            let mut attempt = 1;
            loop {
                match self.inner.unary(ctx, method, request.clone()).await {
                    Err(e) if attempt < MAX_ATTEMPTS && retryable(&e) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            %method,
                            attempt,
                            error = %e,
                            "retrying unary call"
                        );
                        attempt += 1;
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    other => return other,
                }
            }
        })
    }

    fn open_stream<'a>(
        &'a self,
        ctx: &'a CallContext,
        method: &'a str,
    ) -> BoxFuture<'a, Result<CallStream, Error>> {
        Box::pin(async move {
            let mut attempt = 1;
            loop {
                match self.inner.open_stream(ctx, method).await {
                    Err(e) if attempt < MAX_ATTEMPTS && retryable(&e) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            %method,
                            attempt,
                            error = %e,
                            "retrying stream open"
                        );
                        attempt += 1;
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                    other => return other,
                }
            }
        })
    }
}
