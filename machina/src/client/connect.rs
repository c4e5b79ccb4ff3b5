// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Connection state flags and the dial policy.

use crate::error::Error;
use machina_rpcs::{DialOptions, Dialer, Transport, TransportKind};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex,
};
use tokio::sync::watch;

const LOG_TARGET: &str = "machina-connect";

/// Shared connection state: the `connected` flag every call reads, the
/// sticky transport preference, and the change-notification channel.
pub(crate) struct ConnectionFlags {
    connected: AtomicBool,
    // Once a streaming-capable transport has been obtained, never fall back
    // to a plain one.
    streaming_sticky: AtomicBool,
    change: StdMutex<Option<watch::Sender<bool>>>,
}

impl Default for ConnectionFlags {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(false);
        ConnectionFlags {
            connected: AtomicBool::new(false),
            streaming_sticky: AtomicBool::new(false),
            change: StdMutex::new(Some(tx)),
        }
    }
}

impl ConnectionFlags {
    pub(crate) fn new() -> Self {
        ConnectionFlags::default()
    }

    pub(crate) fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Flip the connected flag and publish the transition on the change
    /// channel. Publishing never blocks; a listener that isn't reading
    /// simply observes the latest state when it next looks.
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
        let change = self.change.lock().expect("change lock poisoned");
        if let Some(tx) = &*change {
            tx.send_replace(connected);
        }
    }

    /// A receiver observing every connection-state transition.
    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        let change = self.change.lock().expect("change lock poisoned");
        match &*change {
            Some(tx) => tx.subscribe(),
            // The client has closed; hand back an already-closed channel
            // holding the final state.
            None => {
                let (tx, rx) = watch::channel(self.connected());
                drop(tx);
                rx
            }
        }
    }

    /// Close the change channel. Receivers see the channel end; done exactly
    /// once, on client close.
    pub(crate) fn close_change(&self) {
        self.change.lock().expect("change lock poisoned").take();
    }

    pub(crate) fn streaming_sticky(&self) -> bool {
        self.streaming_sticky.load(Ordering::SeqCst)
    }

    pub(crate) fn set_streaming_sticky(&self) {
        self.streaming_sticky.store(true, Ordering::SeqCst);
    }
}

/// Dial with preferred-transport stickiness: always try the
/// streaming-capable transport first, and only permit falling back to a
/// plain transport while a streaming one has never been obtained.
pub(crate) async fn dial_transport(
    dialer: &Arc<dyn Dialer>,
    address: &str,
    options: &DialOptions,
    flags: &ConnectionFlags,
) -> Result<Arc<dyn Transport>, Error> {
    match dialer.dial(address, TransportKind::Streaming, options).await {
        Ok(transport) => {
            flags.set_streaming_sticky();
            Ok(transport)
        }
        Err(e) if flags.streaming_sticky() => {
            // Fallback is disabled: a streaming workload must not silently
            // degrade across a reconnect. The dial fails and is retried.
            tracing::debug!(
                target: LOG_TARGET,
                error = %e,
                "streaming transport unreachable and fallback disabled"
            );
            Err(Error::Status(e))
        }
        Err(e) => {
            tracing::debug!(
                target: LOG_TARGET,
                error = %e,
                "streaming transport unavailable; falling back to plain transport"
            );
            dialer
                .dial(address, TransportKind::Plain, options)
                .await
                .map_err(Error::Status)
        }
    }
}

/// Validate a machine address. Addresses with an explicit scheme must be
/// secure (or loopback) unless insecure dialing was opted into; bare
/// `host:port` forms are left to the dialer to interpret.
pub(crate) fn validate_address(address: &str, allow_insecure: bool) -> Result<(), Error> {
    if address.is_empty() {
        return Err(Error::InvalidAddress("empty address".to_string()));
    }
    if !address.contains("://") {
        return Ok(());
    }
    let url = url::Url::parse(address)
        .map_err(|e| Error::InvalidAddress(format!("{address}: {e}")))?;
    let secure = matches!(url.scheme(), "https" | "wss" | "grpcs");
    let loopback = url.host().is_some_and(|host| match host {
        url::Host::Domain(d) => d == "localhost",
        url::Host::Ipv4(ip) => ip.is_loopback(),
        url::Host::Ipv6(ip) => ip.is_loopback(),
    });
    if secure || loopback || allow_insecure {
        Ok(())
    } else {
        Err(Error::InvalidAddress(format!(
            "{address}: insecure scheme (enable insecure dialing to permit this)"
        )))
    }
}
