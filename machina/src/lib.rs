// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! A resilient client for machina machines (robot control servers).
//!
//! A [`client::MachineClient`] maintains a long-lived connection to one
//! machine over a request/response plus streaming RPC transport. On top of
//! the raw connection it provides:
//!
//! - **Connection supervision**: health probing, transparent reconnection and
//!   preferred-transport stickiness, behind a stable channel handle that
//!   survives reconnects (see [`machina_rpcs::Channel`]).
//! - **A resource catalog**: the machine's resource inventory is refreshed
//!   periodically, per-resource client stubs are created lazily and closed
//!   when their resource disappears, and unambiguous short names resolve
//!   without their `remote/` prefixes.
//! - **Sessions**: if the server supports sessions the client holds one,
//!   heartbeats it, and transparently restarts it (retrying the failed call)
//!   when it expires.
//! - **An interceptor pipeline** applying disconnection checks, operation id
//!   propagation, session attachment and bounded transport retry to every
//!   call, including those made by resource stubs.
//!
//! Concrete transports and dialers are external; anything implementing
//! [`machina_rpcs::Transport`] and [`machina_rpcs::Dialer`] can carry a
//! client.

pub mod client;
pub mod config;
pub mod error;
pub mod methods;
pub mod resource;

mod catalog;
mod context;
mod interceptor;
mod reflection;
mod session;

// Expose the most common things at the top level:
pub use client::MachineClient;
pub use config::ClientOptions;
pub use context::{CallContext, SafetyMonitor};
pub use error::Error;
pub use interceptor::{CallHandle, CallStream};
pub use resource::{Api, ResourceName};

// The low level transport surface this client is built on.
pub use machina_rpcs as rpcs;
