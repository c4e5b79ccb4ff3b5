// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Session discovery, start/resume, heartbeating and expiration recovery.

use crate::{context::CallContext, error::Error, methods, methods::SessionMethods};
use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "machina-session";

// The session id is refreshed this many times per server heartbeat window.
const HEARTBEATS_PER_WINDOW: u32 = 5;

/// Whether the server supports sessions. Discovered on the first non-exempt
/// call; `No` is sticky and never re-probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Supported {
    Unknown,
    Yes,
    No,
}

#[derive(Debug, Clone)]
struct Session {
    id: String,
    heartbeat_interval: Duration,
}

struct SessionState {
    supported: Supported,
    current: Option<Session>,
    // Kept across resets so a restart can ask the server to resume.
    last_id: Option<String>,
}

struct SessionShared {
    state: Mutex<SessionState>,
    cancel: CancellationToken,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
}

/// Owns the client's session state; a cheaply cloneable handle. At most one
/// session is held at a time; starting one is serialized under the state
/// lock, so concurrent calls that all discover a missing session produce a
/// single `StartSession`.
#[derive(Clone)]
pub(crate) struct SessionManager {
    disabled: bool,
    shared: Arc<SessionShared>,
}

impl SessionManager {
    pub(crate) fn new(disabled: bool, cancel: CancellationToken) -> Self {
        SessionManager {
            disabled,
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState {
                    supported: Supported::Unknown,
                    current: None,
                    last_id: None,
                }),
                cancel,
                heartbeat: StdMutex::new(None),
            }),
        }
    }

    /// Whether session handling applies to this call at all. Consulted
    /// before any session work is done.
    pub(crate) fn should_attach(&self, ctx: &CallContext, method: &str) -> bool {
        !self.disabled && !ctx.skip_session && !methods::is_session_exempt(method)
    }

    /// The session id to attach to an outgoing call, starting or resuming a
    /// session first if support is undiscovered or the previous session is
    /// gone. `None` means the server doesn't support sessions.
    pub(crate) async fn attach_id(
        &self,
        session_methods: &SessionMethods,
        ctx: &CallContext,
    ) -> Result<Option<String>, Error> {
        let mut state = self.shared.state.lock().await;
        if state.supported == Supported::No {
            return Ok(None);
        }
        if let Some(session) = &state.current {
            return Ok(Some(session.id.clone()));
        }
        self.start_locked(&mut state, session_methods, ctx).await
    }

    async fn start_locked(
        &self,
        state: &mut SessionState,
        session_methods: &SessionMethods,
        ctx: &CallContext,
    ) -> Result<Option<String>, Error> {
        let resume = state.last_id.clone().unwrap_or_default();
        let sctx = ctx.clone().for_session_work();
        match session_methods.start_session(&sctx, resume).await {
            Ok(response) => {
                let interval =
                    Duration::from_millis(response.heartbeat_window_ms) / HEARTBEATS_PER_WINDOW;
                let session = Session {
                    id: response.id.clone(),
                    heartbeat_interval: interval,
                };
                tracing::debug!(
                    target: LOG_TARGET,
                    id = %session.id,
                    interval_ms = interval.as_millis() as u64,
                    "session started"
                );
                state.supported = Supported::Yes;
                state.current = Some(session.clone());
                state.last_id = Some(response.id.clone());
                self.spawn_heartbeat(session_methods.clone(), session);
                Ok(Some(response.id))
            }
            Err(e) if e.is_unimplemented() => {
                tracing::debug!(target: LOG_TARGET, "server does not support sessions");
                state.supported = Supported::No;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Forget the current session and make the next call re-discover
    /// support. The sticky "unsupported" answer is never reset.
    pub(crate) async fn reset(&self) {
        let mut state = self.shared.state.lock().await;
        state.current = None;
        if state.supported != Supported::No {
            state.supported = Supported::Unknown;
        }
    }

    #[cfg(test)]
    pub(crate) async fn current_id(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .await
            .current
            .as_ref()
            .map(|s| s.id.clone())
    }

    #[cfg(test)]
    pub(crate) async fn supported(&self) -> Supported {
        self.shared.state.lock().await.supported
    }

    /// Await the heartbeat task, after the shared cancellation token has
    /// been cancelled.
    pub(crate) async fn shutdown(&self) {
        let handle = self
            .shared
            .heartbeat
            .lock()
            .expect("heartbeat lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // One heartbeat loop per live session. A loop that observes a different
    // current session id exits; across a restart race a stale loop may
    // briefly coexist with its replacement, which is harmless since both
    // only heartbeat the id they were started for.
    fn spawn_heartbeat(&self, session_methods: SessionMethods, session: Session) {
        let manager = self.clone();
        let cancel = self.shared.cancel.clone();
        let handle = tokio::spawn(async move {
            let id = session.id;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(session.heartbeat_interval) => {}
                }

                // Stale-loop check: a newer session owns heartbeating now.
                {
                    let state = manager.shared.state.lock().await;
                    match &state.current {
                        Some(current) if current.id == id => {}
                        _ => return,
                    }
                }

                let ctx = CallContext::new()
                    .with_timeout(session.heartbeat_interval)
                    .for_session_work();
                match session_methods
                    .send_session_heartbeat(&ctx, id.clone())
                    .await
                {
                    Ok(()) => {}
                    Err(e) if e.is_unavailable() => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            id = %id,
                            "machine unavailable; abandoning session"
                        );
                        manager.reset().await;
                        return;
                    }
                    Err(e) if e.is_cancellation() => return,
                    Err(e) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            id = %id,
                            error = %e,
                            "heartbeat failed; next call will re-establish the session"
                        );
                        return;
                    }
                }
            }
        });

        let previous = self
            .shared
            .heartbeat
            .lock()
            .expect("heartbeat lock poisoned")
            .replace(handle);
        // The replaced loop (if any) exits on its own via the stale check.
        drop(previous);
    }
}
