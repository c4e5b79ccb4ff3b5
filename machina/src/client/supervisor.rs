// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The connection supervisor: health probing and reconnection.

use super::{connect, ClientInner};
use crate::error::Error;
use std::sync::Arc;

const LOG_TARGET: &str = "machina-supervisor";

// A probe retries spurious failures this many times before the connection is
// declared lost. Disconnection evidence skips the retries.
const PROBE_ATTEMPTS: u32 = 3;

/// The supervisor is a single loop with a dynamic wait: the check interval
/// while connected, the reconnect interval while disconnected. A disabled
/// reconnect interval makes it exit on the first disconnect; a disabled
/// check interval leaves connection loss undetected.
pub(crate) async fn supervisor_loop(inner: Arc<ClientInner>) {
    loop {
        let connected = inner.flags.connected();
        let wait = if connected {
            inner.options.check_interval
        } else {
            inner.options.reconnect_interval
        };

        match wait {
            Some(wait) => {
                tokio::select! {
                    _ = inner.cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            None if connected => {
                // Health checking disabled; nothing flips the flag, so park
                // until shutdown.
                inner.cancel.cancelled().await;
                return;
            }
            None => {
                tracing::debug!(target: LOG_TARGET, "reconnect disabled; supervisor exiting");
                return;
            }
        }

        if inner.flags.connected() {
            if let Err(e) = probe(&inner).await {
                tracing::info!(
                    target: LOG_TARGET,
                    error = %e,
                    "health check failed; marking machine disconnected"
                );
                inner.flags.set_connected(false);
                // Invoked with no client lock held: the callback is allowed
                // to re-enter the client.
                inner.notify_parent();
            }
        } else {
            reconnect(&inner).await;
        }
    }
}

/// The separate refresh loop, spawned only when the refresh interval is
/// enabled and differs from the check interval (otherwise the probe performs
/// the refresh).
pub(crate) async fn refresh_loop(inner: Arc<ClientInner>) {
    let Some(interval) = inner.options.refresh_interval else {
        return;
    };
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        if !inner.flags.connected() {
            continue;
        }
        if let Err(e) = inner.refresh_catalog().await {
            tracing::debug!(target: LOG_TARGET, error = %e, "periodic catalog refresh failed");
        }
    }
}

// Probe the connection by listing resource names; when the check and
// refresh intervals coincide the probe *is* the refresh. Spurious failures
// are retried; disconnection evidence fails the probe immediately.
async fn probe(inner: &Arc<ClientInner>) -> Result<(), Error> {
    let combined = inner.options.check_interval.is_some()
        && inner.options.check_interval == inner.options.refresh_interval;

    let mut last = Ok(());
    for attempt in 1..=PROBE_ATTEMPTS {
        let res = if combined {
            inner.refresh_catalog().await
        } else {
            inner
                .machine
                .resource_names(&inner.catalog_ctx())
                .await
                .map(|_| ())
        };
        match res {
            Ok(()) => return Ok(()),
            Err(Error::Disconnected) => return Err(Error::Disconnected),
            Err(e) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    attempt,
                    error = %e,
                    "connection probe attempt failed"
                );
                last = Err(e);
            }
        }
    }
    last
}

async fn reconnect(inner: &Arc<ClientInner>) {
    // The old transport is done for; close it and ignore whatever it says.
    if let Some(old) = inner.channel.take() {
        let _ = old.close().await;
    }

    let transport = match connect::dial_transport(
        &inner.dialer,
        &inner.address,
        &inner.options.dial_options,
        &inner.flags,
    )
    .await
    {
        Ok(transport) => transport,
        Err(e) => {
            tracing::debug!(target: LOG_TARGET, error = %e, "reconnect dial failed");
            return;
        }
    };

    inner.channel.replace(transport);

    // Re-sync the inventory before announcing the connection, so stub
    // holders observing the transition see a coherent catalog. The listing
    // and reflection calls involved are all exempt from the connected check.
    if inner.catalog.has_stubs().await {
        if let Err(e) = inner.refresh_catalog().await {
            tracing::warn!(
                target: LOG_TARGET,
                error = %e,
                "catalog refresh after reconnect failed"
            );
        }
    }

    tracing::info!(target: LOG_TARGET, address = %inner.address, "machine reconnected");
    inner.flags.set_connected(true);
}
