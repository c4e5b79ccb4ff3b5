// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! Client configuration.

use crate::resource::Registry;
use machina_rpcs::DialOptions;
use std::time::Duration;

/// Options recognized by [`crate::MachineClient::open`]. Interval options use
/// `None` to mean "disabled".
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How often the resource catalog is refreshed. `None` disables the
    /// refresh loop. When equal to [`check_interval`](Self::check_interval),
    /// the health probe performs the refresh and no separate loop runs.
    ///
    /// Default: 10 seconds.
    pub refresh_interval: Option<Duration>,
    /// How often the connection is health-checked while connected. `None`
    /// disables health checking, in which case a lost connection goes
    /// unnoticed until a call fails.
    ///
    /// Default: 10 seconds.
    pub check_interval: Option<Duration>,
    /// How long to wait between reconnect attempts while disconnected.
    /// `None` disables reconnecting entirely: the supervisor exits on the
    /// first disconnect.
    ///
    /// Default: 1 second.
    pub reconnect_interval: Option<Duration>,
    /// The name this client is known by on the machine it connects to, when
    /// it is itself acting as a remote. Prepended to safety-monitored
    /// resource names reported by the server.
    pub remote_name: Option<String>,
    /// Never hold a session, even if the server supports them.
    ///
    /// Default: `false`.
    pub sessions_disabled: bool,
    /// How many times the initial dial in `open` may be attempted before
    /// giving up. `None` retries forever.
    ///
    /// Default: 3.
    pub initial_dial_attempts: Option<u32>,
    /// Options passed through, opaquely, to the dialer on every dial.
    pub dial_options: DialOptions,
    /// Testing mode: suppresses the default per-call timeout on catalog
    /// operations, and makes `open` wait for an initializing machine to
    /// report itself running.
    ///
    /// Default: `false`.
    pub test_mode: bool,
    /// The registry of per-resource stub constructors. APIs without a
    /// registration fall back to [`crate::resource::ForeignStub`].
    pub registry: Registry,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            refresh_interval: Some(Duration::from_secs(10)),
            check_interval: Some(Duration::from_secs(10)),
            reconnect_interval: Some(Duration::from_secs(1)),
            remote_name: None,
            sessions_disabled: false,
            initial_dial_attempts: Some(3),
            dial_options: DialOptions::default(),
            test_mode: false,
            registry: Registry::new(),
        }
    }
}

impl ClientOptions {
    /// Options with every default in place.
    pub fn new() -> Self {
        ClientOptions::default()
    }

    /// Set [`refresh_interval`](Self::refresh_interval).
    pub fn refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set [`check_interval`](Self::check_interval).
    pub fn check_interval(mut self, interval: Option<Duration>) -> Self {
        self.check_interval = interval;
        self
    }

    /// Set [`reconnect_interval`](Self::reconnect_interval).
    pub fn reconnect_interval(mut self, interval: Option<Duration>) -> Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set [`remote_name`](Self::remote_name).
    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    /// Set [`sessions_disabled`](Self::sessions_disabled).
    pub fn sessions_disabled(mut self, disabled: bool) -> Self {
        self.sessions_disabled = disabled;
        self
    }

    /// Set [`initial_dial_attempts`](Self::initial_dial_attempts).
    pub fn initial_dial_attempts(mut self, attempts: Option<u32>) -> Self {
        self.initial_dial_attempts = attempts;
        self
    }

    /// Set [`dial_options`](Self::dial_options).
    pub fn dial_options(mut self, options: DialOptions) -> Self {
        self.dial_options = options;
        self
    }

    /// Set [`test_mode`](Self::test_mode).
    pub fn test_mode(mut self, test_mode: bool) -> Self {
        self.test_mode = test_mode;
        self
    }

    /// Set [`registry`](Self::registry).
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }
}
