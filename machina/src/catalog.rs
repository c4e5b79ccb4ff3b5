// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! The resource catalog: the client's view of the machine's inventory, the
//! per-resource stubs built over it, and short-name aliasing.

use crate::{
    context::CallContext,
    error::Error,
    interceptor::CallHandle,
    methods::MachineMethods,
    reflection::ReflectionClient,
    resource::{ApiDescriptor, Registry, ResourceName, ResourceStub},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::{Mutex, RwLock};

const LOG_TARGET: &str = "machina-catalog";

#[derive(Default)]
struct CatalogState {
    names: Vec<ResourceName>,
    descriptors: Vec<ApiDescriptor>,
    stubs: HashMap<ResourceName, Arc<dyn ResourceStub>>,
    // Unambiguous short forms only; a short name claimed by two full names
    // is absent here and therefore inaccessible.
    short_names: HashMap<ResourceName, ResourceName>,
}

/// The client's resource catalog. Lookups take shared access; refresh and
/// stub insertion take exclusive access. Refreshes are additionally
/// serialized among themselves, so an overlapping supervisor probe and a
/// caller-initiated refresh cannot interleave their steps.
pub(crate) struct Catalog {
    state: RwLock<CatalogState>,
    refresh_gate: Mutex<()>,
    // The server told us it cannot list rpc subtypes; never ask again.
    subtypes_unimplemented: AtomicBool,
    registry: Registry,
}

impl Catalog {
    pub(crate) fn new(registry: Registry) -> Self {
        Catalog {
            state: RwLock::new(CatalogState::default()),
            refresh_gate: Mutex::new(()),
            subtypes_unimplemented: AtomicBool::new(false),
            registry,
        }
    }

    /// Re-fetch the machine's inventory, diff it against the cached stubs,
    /// and rebuild the short-name aliases.
    pub(crate) async fn refresh(
        &self,
        machine: &MachineMethods,
        reflection: &ReflectionClient,
        ctx: &CallContext,
    ) -> Result<(), Error> {
        let _gate = self.refresh_gate.lock().await;

        let names = match machine.resource_names(ctx).await {
            Ok(names) => Some(names),
            // An old server; keep whatever inventory we already have.
            Err(e) if e.is_unimplemented() => None,
            Err(e) => return Err(e),
        };

        let descriptors = if self.subtypes_unimplemented.load(Ordering::SeqCst) {
            None
        } else {
            match machine.resource_rpc_subtypes(ctx).await {
                Ok(subtypes) => {
                    let mut out = Vec::with_capacity(subtypes.len());
                    for subtype in subtypes {
                        match reflection.resolve(ctx, &subtype.proto_service).await {
                            Ok(descriptor) => out.push(ApiDescriptor {
                                api: subtype.api,
                                descriptor,
                            }),
                            // Expected for remotes-of-remotes, whose services
                            // are not registered with our direct peer.
                            Err(e) => {
                                tracing::debug!(
                                    target: LOG_TARGET,
                                    service = %subtype.proto_service,
                                    error = %e,
                                    "skipping unresolvable rpc subtype"
                                );
                            }
                        }
                    }
                    Some(out)
                }
                Err(e) if e.is_unimplemented() => {
                    self.subtypes_unimplemented.store(true, Ordering::SeqCst);
                    None
                }
                Err(e) => return Err(e),
            }
        };

        let mut state = self.state.write().await;
        if let Some(descriptors) = descriptors {
            state.descriptors = descriptors;
        }
        if let Some(names) = names {
            let fresh: HashSet<&ResourceName> = names.iter().collect();
            let removed: Vec<ResourceName> = state
                .stubs
                .keys()
                .filter(|name| !fresh.contains(name))
                .cloned()
                .collect();
            for name in removed {
                if let Some(stub) = state.stubs.remove(&name) {
                    tracing::debug!(target: LOG_TARGET, %name, "closing stub for removed resource");
                    if let Err(e) = stub.close().await {
                        tracing::warn!(target: LOG_TARGET, %name, error = %e, "error closing stub");
                    }
                }
            }
            state.short_names = build_short_names(&names);
            state.names = names;
        }
        Ok(())
    }

    /// Look a resource up, lazily creating its stub. For any name in the
    /// catalog the same stub instance is returned until the name disappears.
    pub(crate) async fn resource_by_name(
        &self,
        handle: &CallHandle,
        name: &ResourceName,
    ) -> Result<Arc<dyn ResourceStub>, Error> {
        // Fast path under shared access.
        {
            let state = self.state.read().await;
            let resolved = state.short_names.get(name).unwrap_or(name);
            if let Some(stub) = state.stubs.get(resolved) {
                return Ok(stub.clone());
            }
        }

        // Re-check under exclusive access; a racing caller may have created
        // the stub in the meantime, in which case theirs wins.
        let mut state = self.state.write().await;
        let resolved = state.short_names.get(name).unwrap_or(name).clone();
        if let Some(stub) = state.stubs.get(&resolved) {
            return Ok(stub.clone());
        }
        if !state.names.contains(&resolved) {
            return Err(Error::ResourceNotFound(resolved));
        }
        let descriptor = state
            .descriptors
            .iter()
            .find(|d| d.api == resolved.api)
            .map(|d| d.descriptor.clone());
        let stub = self
            .registry
            .create(resolved.clone(), handle.clone(), descriptor);
        state.stubs.insert(resolved, stub.clone());
        Ok(stub)
    }

    pub(crate) async fn names(&self) -> Vec<ResourceName> {
        self.state.read().await.names.clone()
    }

    pub(crate) async fn descriptors(&self) -> Vec<ApiDescriptor> {
        self.state.read().await.descriptors.clone()
    }

    pub(crate) async fn has_stubs(&self) -> bool {
        !self.state.read().await.stubs.is_empty()
    }

    /// Close every stub and forget the inventory. Used on client close.
    pub(crate) async fn close_all(&self) {
        let mut state = self.state.write().await;
        for (name, stub) in state.stubs.drain() {
            if let Err(e) = stub.close().await {
                tracing::warn!(target: LOG_TARGET, %name, error = %e, "error closing stub");
            }
        }
        state.names.clear();
        state.descriptors.clear();
        state.short_names.clear();
    }
}

fn build_short_names(names: &[ResourceName]) -> HashMap<ResourceName, ResourceName> {
    let mut counts: HashMap<ResourceName, usize> = HashMap::new();
    for name in names {
        *counts.entry(name.to_short()).or_default() += 1;
    }
    names
        .iter()
        .filter(|name| name.is_remote())
        .filter_map(|name| {
            let short = name.to_short();
            (counts.get(&short) == Some(&1)).then(|| (short, name.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Api;

    fn arm(name: &str) -> ResourceName {
        ResourceName::new(Api::new("machina", "component", "arm"), name)
    }

    #[test]
    fn short_names_require_uniqueness() {
        let names = vec![arm("remote1/arm1"), arm("remote2/arm1"), arm("remote1/arm2")];
        let map = build_short_names(&names);
        assert!(!map.contains_key(&arm("arm1")));
        assert_eq!(map.get(&arm("arm2")), Some(&arm("remote1/arm2")));
    }

    #[test]
    fn local_names_shadow_their_own_short_form() {
        // A local `arm1` and a remote `remote1/arm1` collide on the short
        // form, making it unusable as an alias; the local name is still
        // reachable directly as a catalog entry.
        let names = vec![arm("arm1"), arm("remote1/arm1")];
        let map = build_short_names(&names);
        assert!(!map.contains_key(&arm("arm1")));
    }
}
