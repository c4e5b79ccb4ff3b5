// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A small caching client for the machine's reflection service.

use crate::{
    context::CallContext, error::Error, interceptor::CallHandle, methods::ReflectionMethods,
    resource::ServiceDescriptor,
};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Resolves proto symbols to service descriptors, caching results until the
/// client reconnects or closes.
pub(crate) struct ReflectionClient {
    methods: ReflectionMethods,
    cache: Mutex<HashMap<String, ServiceDescriptor>>,
}

impl ReflectionClient {
    pub(crate) fn new(handle: CallHandle) -> Self {
        ReflectionClient {
            methods: ReflectionMethods::new(handle),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn resolve(
        &self,
        ctx: &CallContext,
        symbol: &str,
    ) -> Result<ServiceDescriptor, Error> {
        if let Some(descriptor) = self.cache.lock().await.get(symbol) {
            return Ok(descriptor.clone());
        }
        let descriptor = self.methods.resolve_service(ctx, symbol).await?;
        self.cache
            .lock()
            .await
            .insert(symbol.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Drop every cached descriptor.
    pub(crate) async fn reset(&self) {
        self.cache.lock().await.clear();
    }
}
