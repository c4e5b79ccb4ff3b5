// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The machine client façade and its lifecycle.

pub(crate) mod connect;
mod supervisor;

#[cfg(test)]
mod tests;

use crate::{
    catalog::Catalog,
    config::ClientOptions,
    context::CallContext,
    error::Error,
    interceptor::{build_pipeline, CallHandle},
    methods::{
        CloudMetadata, Discovery, DiscoveryQuery, FrameSystemConfig, LogEntry,
        MachineMethods, MachineState, MachineStatus, PoseInFrame, StopExtra, Transform,
        VersionInfo,
    },
    reflection::ReflectionClient,
    resource::{ApiDescriptor, ResourceName, ResourceStub},
    session::SessionManager,
};
use connect::ConnectionFlags;
use machina_rpcs::{Channel, Code, Dialer};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "machina-client";

// The default deadline on catalog operations, suppressed in testing mode.
const CATALOG_CALL_TIMEOUT: Duration = Duration::from_secs(5);

// How often `open` re-asks an initializing machine for its status.
const INITIALIZING_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A callback invoked when the client detects it has lost its connection.
/// Always invoked with no client lock held, so it may re-enter the client.
pub type ParentNotifier = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct ClientInner {
    pub(crate) address: String,
    pub(crate) options: ClientOptions,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) channel: Channel,
    pub(crate) handle: CallHandle,
    pub(crate) machine: MachineMethods,
    pub(crate) flags: Arc<ConnectionFlags>,
    pub(crate) catalog: Catalog,
    pub(crate) reflection: ReflectionClient,
    pub(crate) session: SessionManager,
    pub(crate) parent_notifier: StdMutex<Option<ParentNotifier>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) tasks: StdMutex<Vec<JoinHandle<()>>>,
    pub(crate) closed: AtomicBool,
}

impl ClientInner {
    pub(crate) fn catalog_ctx(&self) -> CallContext {
        if self.options.test_mode {
            CallContext::new()
        } else {
            CallContext::new().with_timeout(CATALOG_CALL_TIMEOUT)
        }
    }

    pub(crate) async fn refresh_catalog(&self) -> Result<(), Error> {
        self.catalog
            .refresh(&self.machine, &self.reflection, &self.catalog_ctx())
            .await
    }

    pub(crate) fn notify_parent(&self) {
        let notifier = self
            .parent_notifier
            .lock()
            .expect("notifier lock poisoned")
            .clone();
        if let Some(notify) = notifier {
            notify();
        }
    }

    async fn wait_until_running(&self) -> Result<(), Error> {
        loop {
            match self.machine.get_machine_status(&self.catalog_ctx()).await {
                Ok(status) if status.state == MachineState::Running => return Ok(()),
                Ok(_) => {}
                Err(e) if e.is_unimplemented() => return Ok(()),
                Err(e) => return Err(e),
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Closed),
                _ = tokio::time::sleep(INITIALIZING_POLL_INTERVAL) => {}
            }
        }
    }
}

/// A client of one machine. Cheap to clone; all clones share the same
/// connection, catalog and session.
///
/// Construct with [`MachineClient::open`], destroy with
/// [`MachineClient::close`]. Between the two, the client keeps itself
/// healthy: the connection is probed and transparently re-established, the
/// resource catalog follows the machine's inventory, and an expired session
/// is restarted without surfacing to callers.
#[derive(Clone)]
pub struct MachineClient {
    inner: Arc<ClientInner>,
}

impl MachineClient {
    /// Connect to the machine at `address` and return a client for it.
    ///
    /// The initial dial honours the configured attempt limit; once it
    /// succeeds the supervisor owns the connection, and `open` hydrates the
    /// resource catalog before returning (in testing mode it first waits for
    /// an initializing machine to report itself running).
    pub async fn open(
        address: impl Into<String>,
        dialer: impl Dialer,
        options: ClientOptions,
    ) -> Result<MachineClient, Error> {
        let address = address.into();
        connect::validate_address(&address, options.dial_options.allow_insecure)?;

        let dialer: Arc<dyn Dialer> = Arc::new(dialer);
        let flags = Arc::new(ConnectionFlags::new());

        let transport = {
            let mut attempt: u32 = 0;
            loop {
                match connect::dial_transport(&dialer, &address, &options.dial_options, &flags)
                    .await
                {
                    Ok(transport) => break transport,
                    Err(e) => {
                        attempt += 1;
                        let exhausted = options
                            .initial_dial_attempts
                            .is_some_and(|max| attempt >= max.max(1));
                        if exhausted {
                            return Err(e);
                        }
                        let backoff = options
                            .reconnect_interval
                            .unwrap_or(Duration::from_secs(1));
                        tracing::debug!(
                            target: LOG_TARGET,
                            %address,
                            attempt,
                            error = %e,
                            "initial dial failed; retrying"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        };

        let channel = Channel::from_transport(transport);
        let cancel = CancellationToken::new();
        let session = SessionManager::new(options.sessions_disabled, cancel.clone());
        let invoker = build_pipeline(
            channel.clone(),
            flags.clone(),
            session.clone(),
            options.remote_name.clone(),
        );
        let handle = CallHandle::new(invoker);
        let machine = MachineMethods::new(handle.clone());
        let reflection = ReflectionClient::new(handle.clone());
        let catalog = Catalog::new(options.registry.clone());

        let inner = Arc::new(ClientInner {
            address,
            options,
            dialer,
            channel,
            handle,
            machine,
            flags,
            catalog,
            reflection,
            session,
            parent_notifier: StdMutex::new(None),
            cancel,
            tasks: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        inner.flags.set_connected(true);

        let client = MachineClient { inner };

        if client.inner.options.test_mode {
            if let Err(e) = client.inner.wait_until_running().await {
                let _ = client.close().await;
                return Err(e);
            }
        }

        // Initial catalog hydration, so resources resolve immediately.
        if let Err(e) = client.inner.refresh_catalog().await {
            let _ = client.close().await;
            return Err(e);
        }

        client.spawn_background();
        Ok(client)
    }

    fn spawn_background(&self) {
        let mut tasks = self.inner.tasks.lock().expect("tasks lock poisoned");
        tasks.push(tokio::spawn(supervisor::supervisor_loop(
            self.inner.clone(),
        )));
        // When the check and refresh intervals coincide, the supervisor's
        // probe performs the refresh and no separate loop exists.
        let separate_refresh = self.inner.options.refresh_interval.is_some()
            && self.inner.options.refresh_interval != self.inner.options.check_interval;
        if separate_refresh {
            tasks.push(tokio::spawn(supervisor::refresh_loop(self.inner.clone())));
        }
    }

    /// Whether the client currently believes it is connected.
    pub fn connected(&self) -> bool {
        self.inner.flags.connected()
    }

    /// A receiver observing connection-state transitions: it yields the new
    /// value of [`connected`](Self::connected) on every transition, and ends
    /// when the client closes. Transitions are published without blocking; a
    /// slow reader observes the latest state rather than a backlog.
    pub fn changed(&self) -> watch::Receiver<bool> {
        self.inner.flags.subscribe()
    }

    /// Install (or clear) the callback invoked when the client detects a
    /// lost connection. The callback runs with no client lock held and may
    /// re-enter the client.
    pub fn set_parent_notifier(&self, notifier: Option<ParentNotifier>) {
        *self
            .inner
            .parent_notifier
            .lock()
            .expect("notifier lock poisoned") = notifier;
    }

    /// A handle issuing calls through this client's interceptor pipeline.
    /// Typed per-resource stubs are built over this.
    pub fn call_handle(&self) -> CallHandle {
        self.inner.handle.clone()
    }

    /// Re-fetch the machine's resource inventory now.
    pub async fn refresh(&self) -> Result<(), Error> {
        self.ensure_usable()?;
        self.inner.refresh_catalog().await
    }

    /// A snapshot of the machine's resource names. Empty while disconnected.
    pub async fn resource_names(&self) -> Vec<ResourceName> {
        if !self.connected() {
            return Vec::new();
        }
        self.inner.catalog.names().await
    }

    /// A snapshot of the machine's API descriptors. Empty while
    /// disconnected.
    pub async fn resource_rpc_apis(&self) -> Vec<ApiDescriptor> {
        if !self.connected() {
            return Vec::new();
        }
        self.inner.catalog.descriptors().await
    }

    /// The stub for a resource, creating it on first use. Short names (with
    /// `remote/` prefixes stripped) resolve as long as they are unambiguous.
    pub async fn resource_by_name(
        &self,
        name: &ResourceName,
    ) -> Result<Arc<dyn ResourceStub>, Error> {
        self.ensure_usable()?;
        self.inner
            .catalog
            .resource_by_name(&self.inner.handle, name)
            .await
    }

    /// Stop every resource on the machine that can move.
    pub async fn stop_all(&self, ctx: &CallContext, extra: Vec<StopExtra>) -> Result<(), Error> {
        self.inner.machine.stop_all(ctx, extra).await
    }

    /// The machine's overall status. Servers predating the status API are
    /// reported as running.
    pub async fn machine_status(&self, ctx: &CallContext) -> Result<MachineStatus, Error> {
        match self.inner.machine.get_machine_status(ctx).await {
            Err(e) if e.is_unimplemented() => Ok(MachineStatus {
                state: MachineState::Running,
            }),
            other => other,
        }
    }

    /// The machine's frame system configuration.
    pub async fn frame_system_config(
        &self,
        ctx: &CallContext,
        additional_transforms: Vec<Transform>,
    ) -> Result<Vec<FrameSystemConfig>, Error> {
        self.inner
            .machine
            .frame_system_config(ctx, additional_transforms)
            .await
    }

    /// Re-express a pose in another reference frame.
    pub async fn transform_pose(
        &self,
        ctx: &CallContext,
        source: PoseInFrame,
        destination: impl Into<String>,
        supplemental_transforms: Vec<Transform>,
    ) -> Result<PoseInFrame, Error> {
        self.inner
            .machine
            .transform_pose(ctx, source, destination, supplemental_transforms)
            .await
    }

    /// Re-express a PCD-encoded point cloud in another reference frame.
    pub async fn transform_point_cloud(
        &self,
        ctx: &CallContext,
        point_cloud_pcd: &[u8],
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<Vec<u8>, Error> {
        self.inner
            .machine
            .transform_point_cloud(ctx, point_cloud_pcd, source, destination)
            .await
    }

    /// Probe the machine for configurable components.
    pub async fn discover_components(
        &self,
        ctx: &CallContext,
        queries: Vec<DiscoveryQuery>,
    ) -> Result<Vec<Discovery>, Error> {
        self.inner.machine.discover_components(ctx, queries).await
    }

    /// Forward log entries to the machine's logger.
    pub async fn log(&self, ctx: &CallContext, entries: Vec<LogEntry>) -> Result<(), Error> {
        self.inner.machine.log(ctx, entries).await
    }

    /// Ask the machine to shut down. A machine that goes away mid-call has
    /// done what was asked, so unavailability and a missed deadline count as
    /// success here.
    pub async fn shutdown(&self, ctx: &CallContext) -> Result<(), Error> {
        match self.inner.machine.shutdown(ctx).await {
            Err(e) if e.is_unavailable() => Ok(()),
            Err(Error::Status(s)) if s.code() == Code::DeadlineExceeded => Ok(()),
            other => other,
        }
    }

    /// Restart a module on the machine. Restarting the module that serves
    /// this very connection drops it, so unavailability counts as success;
    /// anything else is surfaced.
    pub async fn restart_module(
        &self,
        ctx: &CallContext,
        module_name: impl Into<String>,
    ) -> Result<(), Error> {
        match self.inner.machine.restart_module(ctx, module_name).await {
            Err(e) if e.is_unavailable() => Ok(()),
            other => other,
        }
    }

    /// The server's version information.
    pub async fn version(&self, ctx: &CallContext) -> Result<VersionInfo, Error> {
        self.inner.machine.get_version(ctx).await
    }

    /// The machine's cloud identity.
    pub async fn cloud_metadata(&self, ctx: &CallContext) -> Result<CloudMetadata, Error> {
        self.inner.machine.get_cloud_metadata(ctx).await
    }

    /// Direct access to the machine service method wrappers.
    pub fn machine_methods(&self) -> &MachineMethods {
        &self.inner.machine
    }

    /// Tear the client down: cancel and await all background work, close
    /// every stub, reset the reflection cache, close the change channel and
    /// the transport. Idempotent; returns the error of the final transport
    /// close, if it produced one.
    pub async fn close(&self) -> Result<(), Error> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(target: LOG_TARGET, address = %self.inner.address, "closing machine client");

        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = {
            let mut tasks = self.inner.tasks.lock().expect("tasks lock poisoned");
            tasks.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.session.shutdown().await;

        self.inner.flags.set_connected(false);
        self.inner.flags.close_change();

        self.inner.catalog.close_all().await;
        self.inner.reflection.reset().await;

        self.inner.channel.close().await.map_err(Error::Status)
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if !self.inner.flags.connected() {
            return Err(Error::Disconnected);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MachineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineClient")
            .field("address", &self.inner.address)
            .field("connected", &self.connected())
            .finish()
    }
}
