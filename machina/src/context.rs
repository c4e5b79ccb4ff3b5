// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The explicit per-call context threaded through every operation.

use crate::resource::ResourceName;
use machina_rpcs::Metadata;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

/// Everything ambient to one call: caller metadata, an optional deadline, the
/// operation id correlating this call with related ones, and the markers the
/// interceptor pipeline consults. Cheap to clone.
///
/// Cancellation follows the usual async convention: dropping the call future
/// abandons the call.
#[derive(Clone, Default)]
pub struct CallContext {
    pub(crate) metadata: Metadata,
    pub(crate) timeout: Option<Duration>,
    pub(crate) operation_id: Option<Uuid>,
    pub(crate) skip_session: bool,
    pub(crate) safety_monitor: Option<Arc<dyn SafetyMonitor>>,
}

impl CallContext {
    /// An empty context.
    pub fn new() -> Self {
        CallContext::default()
    }

    /// Attach extra outgoing metadata to the call.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.merge(&metadata);
        self
    }

    /// Bound how long the call may take.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Correlate this call with an existing operation rather than minting a
    /// fresh operation id.
    pub fn with_operation_id(mut self, id: Uuid) -> Self {
        self.operation_id = Some(id);
        self
    }

    /// Register a sink for the safety-monitored resource names the server
    /// reports on this call's response headers.
    pub fn with_safety_monitor(mut self, monitor: Arc<dyn SafetyMonitor>) -> Self {
        self.safety_monitor = Some(monitor);
        self
    }

    /// The operation id this call will carry, if one has been set.
    pub fn operation_id(&self) -> Option<Uuid> {
        self.operation_id
    }

    // Marks a call made on behalf of session management itself, so the
    // session layer does not recurse into session work for it.
    pub(crate) fn for_session_work(mut self) -> Self {
        self.skip_session = true;
        self
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("metadata", &self.metadata)
            .field("timeout", &self.timeout)
            .field("operation_id", &self.operation_id)
            .field("skip_session", &self.skip_session)
            .finish()
    }
}

/// A sink for safety-monitored resource names. When a server reports that a
/// resource participated in a call, the client (prepending its own remote
/// name, if configured) hands the name to the ambient session object via this
/// trait, so the resource can be safety-stopped if that session dies.
pub trait SafetyMonitor: Send + Sync + 'static {
    /// Record that `name` participated in the current operation.
    fn monitor(&self, name: ResourceName);
}
