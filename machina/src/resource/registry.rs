// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The registry mapping API identities to per-resource stub constructors,
//! and the foreign-resource fallback stub.

use super::{Api, ResourceName, ServiceDescriptor};
use crate::{context::CallContext, error::Error, interceptor::CallHandle, CallStream};
use machina_rpcs::{transport::RawValue, BoxFuture, Status};
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// A constructor producing a stub for one resource. Stubs capture the
/// [`CallHandle`] they are given; it remains valid across reconnects.
pub type StubConstructor =
    Arc<dyn Fn(ResourceName, CallHandle) -> Arc<dyn ResourceStub> + Send + Sync>;

/// A per-resource client. Concrete stub types (arm, camera, ...) implement
/// this and are registered by API identity; resources with no registration
/// are served by the [`ForeignStub`] fallback.
pub trait ResourceStub: Send + Sync + fmt::Debug + 'static {
    /// The resource this stub talks to.
    fn name(&self) -> &ResourceName;

    /// Release anything held by the stub. Called exactly once, when the
    /// resource disappears from the catalog or the client closes.
    fn close(&self) -> BoxFuture<'_, Result<(), Error>>;

    /// Downcast support, so callers can recover the concrete stub type.
    fn as_any(&self) -> &dyn Any;
}

/// Maps API identities to stub constructors.
#[derive(Clone, Default)]
pub struct Registry {
    constructors: HashMap<Api, StubConstructor>,
}

impl Registry {
    /// Create an empty [`Registry`].
    pub fn new() -> Self {
        Registry::default()
    }

    /// Install a constructor for an API, replacing any previous registration.
    pub fn register<F>(&mut self, api: Api, constructor: F)
    where
        F: Fn(ResourceName, CallHandle) -> Arc<dyn ResourceStub> + Send + Sync + 'static,
    {
        self.constructors.insert(api, Arc::new(constructor));
    }

    /// Whether a constructor is registered for `api`.
    pub fn contains(&self, api: &Api) -> bool {
        self.constructors.contains_key(api)
    }

    pub(crate) fn create(
        &self,
        name: ResourceName,
        handle: CallHandle,
        descriptor: Option<ServiceDescriptor>,
    ) -> Arc<dyn ResourceStub> {
        match self.constructors.get(&name.api) {
            Some(constructor) => constructor(name, handle),
            None => Arc::new(ForeignStub::new(name, handle, descriptor)),
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("apis", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The fallback stub used for resources whose API has no local registration.
/// It forwards raw calls by method name, addressed via the reflected
/// [`ServiceDescriptor`].
pub struct ForeignStub {
    name: ResourceName,
    handle: CallHandle,
    descriptor: Option<ServiceDescriptor>,
}

impl ForeignStub {
    pub(crate) fn new(
        name: ResourceName,
        handle: CallHandle,
        descriptor: Option<ServiceDescriptor>,
    ) -> Self {
        ForeignStub {
            name,
            handle,
            descriptor,
        }
    }

    /// The reflected descriptor this stub addresses calls through, if the
    /// remote's reflection service provided one.
    pub fn descriptor(&self) -> Option<&ServiceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Issue a unary call on the resource's service by bare method name.
    pub async fn invoke(
        &self,
        ctx: &CallContext,
        method: &str,
        request: Box<RawValue>,
    ) -> Result<Box<RawValue>, Error> {
        let path = self.method_path(method)?;
        let reply = self.handle.unary_raw(ctx, &path, request).await?;
        Ok(reply.message)
    }

    /// Open a bidirectional stream on the resource's service by bare method
    /// name.
    pub async fn open_stream(
        &self,
        ctx: &CallContext,
        method: &str,
    ) -> Result<CallStream, Error> {
        let path = self.method_path(method)?;
        self.handle.open_stream(ctx, &path).await
    }

    fn method_path(&self, method: &str) -> Result<String, Error> {
        let descriptor = self.descriptor.as_ref().ok_or_else(|| {
            Error::Status(Status::unimplemented(format!(
                "no service descriptor known for api {}",
                self.name.api
            )))
        })?;
        if !descriptor.methods.iter().any(|m| m.name == method) {
            return Err(Error::Status(Status::unimplemented(format!(
                "method {method} not found on {}",
                descriptor.service
            ))));
        }
        Ok(format!("/{}/{method}", descriptor.service))
    }
}

impl fmt::Debug for ForeignStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignStub")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl ResourceStub for ForeignStub {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Error>> {
        // Nothing beyond the captured handle to release.
        Box::pin(async { Ok(()) })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
