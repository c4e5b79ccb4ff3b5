// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! This crate provides the low level RPC transport surface that `machina`
//! machine clients are built on:
//!
//! - [`Status`] and [`Code`]: the wire-level status vocabulary that every call
//!   can fail with.
//! - [`Metadata`]: per-call key/value headers travelling in both directions.
//! - [`Transport`]: an object safe trait describing the two operations the
//!   client needs from a connection (unary calls and bidirectional streams).
//!   Concrete transports (gRPC, WebRTC, ...) live elsewhere and implement it.
//! - [`Dialer`]: how new connections are established, including the
//!   streaming-capable/plain transport distinction.
//! - [`Channel`]: a stable, cheaply cloneable handle over a replaceable
//!   transport, so that everything holding the handle survives reconnects.

pub mod channel;
pub mod dial;
pub mod metadata;
pub mod status;
pub mod transport;

#[cfg(feature = "mock-transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock-transport")))]
pub mod mock;

// Expose the most common things at the top level:
pub use channel::Channel;
pub use dial::{DialOptions, Dialer, TransportKind};
pub use metadata::Metadata;
pub use status::{Code, Status};
pub use transport::{BoxFuture, Reply, StreamReply, Transport, TransportStream};
