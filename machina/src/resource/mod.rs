// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Structured resource identity: APIs, resource names and the descriptors
//! used to talk to resources whose API is unknown locally.

mod registry;

pub use registry::{ForeignStub, Registry, ResourceStub, StubConstructor};

use crate::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

/// The path segment marking a name as coming from a remote. A resource
/// reachable through a chain of remotes carries one prefix per hop, e.g.
/// `gantry-machine/arm1`.
const REMOTE_SEPARATOR: char = '/';

/// The triple identifying a family of resources. It determines which stub
/// constructor is used when a per-resource client is built.
///
/// Renders as `namespace:type:subtype`, e.g. `machina:component:arm`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Api {
    /// The organization namespace the API lives in.
    pub namespace: String,
    /// The broad kind of resource (`component`, `service`, ...).
    pub resource_type: String,
    /// The concrete subtype (`arm`, `camera`, ...).
    pub subtype: String,
}

impl Api {
    /// Construct an [`Api`] from its three parts.
    pub fn new(
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        subtype: impl Into<String>,
    ) -> Self {
        Api {
            namespace: namespace.into(),
            resource_type: resource_type.into(),
            subtype: subtype.into(),
        }
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.namespace, self.resource_type, self.subtype
        )
    }
}

impl FromStr for Api {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(ty), Some(sub), None)
                if !ns.is_empty() && !ty.is_empty() && !sub.is_empty() =>
            {
                Ok(Api::new(ns, ty, sub))
            }
            _ => Err(Error::InvalidResourceName(s.to_string())),
        }
    }
}

/// A structured resource identifier: an [`Api`] plus a name, where the name
/// may be prefixed by one or more `remote/` segments. Two equal
/// [`ResourceName`]s are indistinguishable.
///
/// Renders as `namespace:type:subtype/remote…/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceName {
    /// The API family this resource belongs to.
    pub api: Api,
    /// The (possibly remote-prefixed) name.
    pub name: String,
}

impl ResourceName {
    /// Construct a [`ResourceName`] from an API and name.
    pub fn new(api: Api, name: impl Into<String>) -> Self {
        ResourceName {
            api,
            name: name.into(),
        }
    }

    /// The name with every remote prefix stripped.
    pub fn short_name(&self) -> &str {
        self.name
            .rsplit(REMOTE_SEPARATOR)
            .next()
            .unwrap_or(&self.name)
    }

    /// Whether the name carries at least one remote prefix.
    pub fn is_remote(&self) -> bool {
        self.name.contains(REMOTE_SEPARATOR)
    }

    /// The remote chain, outermost first, empty for a local resource.
    pub fn remotes(&self) -> impl Iterator<Item = &str> {
        let mut parts: Vec<&str> = self.name.split(REMOTE_SEPARATOR).collect();
        parts.pop();
        parts.into_iter()
    }

    /// This name with the remote prefixes dropped.
    pub fn to_short(&self) -> ResourceName {
        ResourceName::new(self.api.clone(), self.short_name())
    }

    /// This name as seen from one more remote hop away.
    pub fn prefixed_with(&self, remote: &str) -> ResourceName {
        ResourceName::new(
            self.api.clone(),
            format!("{remote}{REMOTE_SEPARATOR}{}", self.name),
        )
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{REMOTE_SEPARATOR}{}", self.api, self.name)
    }
}

impl FromStr for ResourceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (api, name) = s
            .split_once(REMOTE_SEPARATOR)
            .ok_or_else(|| Error::InvalidResourceName(s.to_string()))?;
        if name.is_empty() {
            return Err(Error::InvalidResourceName(s.to_string()));
        }
        Ok(ResourceName::new(api.parse()?, name))
    }
}

// Both identifiers travel over the wire in their string form.
macro_rules! impl_string_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

impl_string_serde!(Api);
impl_string_serde!(ResourceName);

/// The service-level description of an API unknown to the local registry,
/// obtained by reflection against the remote. This is the minimum surface a
/// [`ForeignStub`] needs to address raw calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// The fully qualified proto service name, e.g.
    /// `acme.gizmo.v1.GizmoService`.
    pub service: String,
    /// The methods the service exposes.
    pub methods: Vec<MethodDescriptor>,
}

/// One method of a [`ServiceDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// The bare method name.
    pub name: String,
    /// Whether the client sends a stream of messages.
    pub client_streaming: bool,
    /// Whether the server responds with a stream of messages.
    pub server_streaming: bool,
}

/// An API identity paired with its reflected service descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiDescriptor {
    /// The API this descriptor describes.
    pub api: Api,
    /// The reflected service descriptor.
    pub descriptor: ServiceDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm_api() -> Api {
        Api::new("machina", "component", "arm")
    }

    #[test]
    fn display_and_parse_round_trip() {
        let name = ResourceName::new(arm_api(), "gantry-machine/arm1");
        let s = name.to_string();
        assert_eq!(s, "machina:component:arm/gantry-machine/arm1");
        assert_eq!(s.parse::<ResourceName>().unwrap(), name);
    }

    #[test]
    fn short_names_strip_every_remote_prefix() {
        let local = ResourceName::new(arm_api(), "arm1");
        assert_eq!(local.short_name(), "arm1");
        assert!(!local.is_remote());

        let nested = ResourceName::new(arm_api(), "outer/inner/arm1");
        assert_eq!(nested.short_name(), "arm1");
        assert!(nested.is_remote());
        assert_eq!(nested.remotes().collect::<Vec<_>>(), vec!["outer", "inner"]);
        assert_eq!(nested.to_short(), local);
    }

    #[test]
    fn prefixing_adds_one_hop() {
        let name = ResourceName::new(arm_api(), "arm1").prefixed_with("gantry-machine");
        assert_eq!(name.name, "gantry-machine/arm1");
        assert_eq!(name.short_name(), "arm1");
    }

    #[test]
    fn invalid_forms_are_rejected() {
        assert!("machina:component/arm1".parse::<ResourceName>().is_err());
        assert!("machina:component:arm".parse::<ResourceName>().is_err());
        assert!(":component:arm".parse::<Api>().is_err());
        assert!("a:b:c:d".parse::<Api>().is_err());
    }

    #[test]
    fn serde_uses_the_string_form() {
        let name = ResourceName::new(arm_api(), "arm1");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, r#""machina:component:arm/arm1""#);
        assert_eq!(serde_json::from_str::<ResourceName>(&json).unwrap(), name);
    }
}
