// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

use super::*;
use crate::methods::{machine, reflection, session};
use crate::resource::{Api, ForeignStub, Registry, ResourceStub};
use assert_matches::assert_matches;
use machina_rpcs::{
    metadata,
    mock::{MockDialer, MockStream, MockTransport},
    transport::{RawValue, Reply, StreamReply},
    BoxFuture, Code, Metadata, Status, TransportKind,
};
use serde_json::json;
use std::{
    any::Any,
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

// A server-streaming method used by the replay tests; not part of the fixed
// machine service surface, just something non-exempt to stream on.
const STREAM_TICKS: &str = "/machina.v1.MachineService/StreamTicks";

// A foreign API the local registry knows nothing about; served only when the
// fake machine is told to report it.
const GIZMO_SERVICE: &str = "acme.gizmo.v1.GizmoService";
const GIZMO_POKE: &str = "/acme.gizmo.v1.GizmoService/Poke";
const GIZMO_WATCH: &str = "/acme.gizmo.v1.GizmoService/Watch";

fn arm_api() -> Api {
    Api::new("machina", "component", "arm")
}

fn arm(name: &str) -> ResourceName {
    ResourceName::new(arm_api(), name)
}

fn gizmo_api() -> Api {
    Api::new("acme", "component", "gizmo")
}

fn gizmo(name: &str) -> ResourceName {
    ResourceName::new(gizmo_api(), name)
}

fn raw(value: serde_json::Value) -> Box<RawValue> {
    RawValue::from_string(value.to_string()).expect("valid JSON")
}

fn ok_reply(value: serde_json::Value) -> Result<Reply, Status> {
    Ok(Reply {
        message: raw(value),
        headers: Metadata::new(),
    })
}

/// A scriptable machine shared by every transport a dialer hands out, so
/// state survives reconnects.
#[derive(Clone)]
struct FakeMachine {
    names: Arc<StdMutex<Vec<ResourceName>>>,
    calls: Arc<StdMutex<Vec<(String, Metadata)>>>,
    sessions_started: Arc<AtomicU64>,
    expired: Arc<StdMutex<HashSet<String>>>,
    heartbeats: Arc<AtomicU64>,
    heartbeat_unavailable: Arc<AtomicBool>,
    sessions_unimplemented: Arc<AtomicBool>,
    drop_connection: Arc<AtomicBool>,
    dial_fail_streaming: Arc<AtomicBool>,
    serve_gizmo_api: Arc<AtomicBool>,
    heartbeat_window_ms: u64,
    stream_send_logs: Arc<StdMutex<Vec<Arc<StdMutex<Vec<String>>>>>>,
}

impl FakeMachine {
    fn new(names: Vec<ResourceName>) -> Self {
        FakeMachine {
            names: Arc::new(StdMutex::new(names)),
            calls: Arc::new(StdMutex::new(Vec::new())),
            sessions_started: Arc::new(AtomicU64::new(0)),
            expired: Arc::new(StdMutex::new(HashSet::new())),
            heartbeats: Arc::new(AtomicU64::new(0)),
            heartbeat_unavailable: Arc::new(AtomicBool::new(false)),
            sessions_unimplemented: Arc::new(AtomicBool::new(false)),
            drop_connection: Arc::new(AtomicBool::new(false)),
            dial_fail_streaming: Arc::new(AtomicBool::new(false)),
            serve_gizmo_api: Arc::new(AtomicBool::new(false)),
            heartbeat_window_ms: 60_000,
            stream_send_logs: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    fn transport(&self) -> MockTransport {
        let unary = self.clone();
        let stream = self.clone();
        MockTransport::from_handlers(
            move |method: String, _req: Box<RawValue>, md: Metadata| unary.handle_unary(&method, md),
            move |method: String, md: Metadata| stream.handle_stream(&method, md),
        )
    }

    fn dialer(&self) -> Arc<MockDialer> {
        let machine = self.clone();
        Arc::new(MockDialer::new(move |kind| {
            if kind == TransportKind::Streaming
                && machine.dial_fail_streaming.load(Ordering::SeqCst)
            {
                return Err(Status::unavailable("streaming transport unreachable"));
            }
            Ok(Arc::new(machine.transport()))
        }))
    }

    fn handle_unary(&self, method: &str, md: Metadata) -> Result<Reply, Status> {
        self.calls.lock().unwrap().push((method.to_string(), md.clone()));
        if self.drop_connection.load(Ordering::SeqCst) {
            return Err(Status::disconnected());
        }
        match method {
            machine::RESOURCE_NAMES => {
                let names = self.names.lock().unwrap().clone();
                ok_reply(json!({ "resources": names }))
            }
            machine::RESOURCE_RPC_SUBTYPES => {
                if self.serve_gizmo_api.load(Ordering::SeqCst) {
                    ok_reply(json!({
                        "subtypes": [
                            { "api": "acme:component:gizmo", "proto_service": GIZMO_SERVICE },
                        ],
                    }))
                } else {
                    Err(Status::unimplemented("rpc subtypes not supported"))
                }
            }
            reflection::RESOLVE_SERVICE => ok_reply(json!({
                "service": GIZMO_SERVICE,
                "methods": [
                    { "name": "Poke", "client_streaming": false, "server_streaming": false },
                    { "name": "Watch", "client_streaming": true, "server_streaming": true },
                ],
            })),
            GIZMO_POKE => ok_reply(json!({ "poked": true })),
            session::START_SESSION => {
                if self.sessions_unimplemented.load(Ordering::SeqCst) {
                    return Err(Status::unimplemented("sessions not supported"));
                }
                let n = self.sessions_started.fetch_add(1, Ordering::SeqCst) + 1;
                ok_reply(json!({
                    "id": format!("s{n}"),
                    "heartbeat_window_ms": self.heartbeat_window_ms,
                }))
            }
            session::SEND_SESSION_HEARTBEAT => {
                self.heartbeats.fetch_add(1, Ordering::SeqCst);
                if self.heartbeat_unavailable.load(Ordering::SeqCst) {
                    Err(Status::unavailable("going away"))
                } else {
                    ok_reply(json!({}))
                }
            }
            machine::STOP_ALL => {
                let dead_session = md
                    .get(metadata::SESSION_ID_KEY)
                    .is_some_and(|sid| self.expired.lock().unwrap().contains(sid));
                if dead_session {
                    return Err(Status::session_expired());
                }
                ok_reply(json!({}))
            }
            machine::GET_MACHINE_STATUS => ok_reply(json!({ "state": "running" })),
            machine::GET_VERSION => ok_reply(json!({
                "platform": "machina-server",
                "version": "0.9.0",
                "api_version": "v1",
            })),
            other => Err(Status::unimplemented(format!("{other} not implemented"))),
        }
    }

    fn handle_stream(&self, method: &str, md: Metadata) -> Result<StreamReply, Status> {
        self.calls
            .lock()
            .unwrap()
            .push((format!("stream:{method}"), md.clone()));
        let send_log = Arc::new(StdMutex::new(Vec::new()));
        self.stream_send_logs.lock().unwrap().push(send_log.clone());

        let expired = md
            .get(metadata::SESSION_ID_KEY)
            .is_some_and(|sid| self.expired.lock().unwrap().contains(sid));
        let stream = if expired {
            MockStream::from_replies([Err(Status::session_expired())])
        } else {
            MockStream::from_replies([Ok(raw(json!({ "tick": 1 }))), Ok(raw(json!({ "tick": 2 })))])
        }
        .with_send_log(send_log);

        Ok(StreamReply {
            headers: Metadata::new(),
            stream: Box::new(stream),
        })
    }

    fn calls_to(&self, method: &str) -> Vec<Metadata> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, md)| md.clone())
            .collect()
    }
}

// Options that keep every background loop quiet, for tests that drive the
// client by hand.
fn manual_options() -> ClientOptions {
    ClientOptions::new()
        .refresh_interval(None)
        .check_interval(None)
        .reconnect_interval(None)
}

#[derive(Debug)]
struct ClosingStub {
    name: ResourceName,
    closed: Arc<StdMutex<Vec<String>>>,
}

impl ResourceStub for ClosingStub {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Error>> {
        let log = self.closed.clone();
        let name = self.name.name.clone();
        Box::pin(async move {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn closing_registry(log: Arc<StdMutex<Vec<String>>>) -> Registry {
    let mut registry = Registry::new();
    registry.register(arm_api(), move |name, _handle| {
        Arc::new(ClosingStub {
            name,
            closed: log.clone(),
        })
    });
    registry
}

#[tokio::test]
async fn catalog_diff_closes_removed_stubs_and_keeps_survivors() {
    let machine = FakeMachine::new(vec![arm("arm1"), arm("arm3")]);
    let closed = Arc::new(StdMutex::new(Vec::new()));
    let options = manual_options().registry(closing_registry(closed.clone()));
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();

    let arm1 = client.resource_by_name(&arm("arm1")).await.unwrap();
    let _arm3 = client.resource_by_name(&arm("arm3")).await.unwrap();

    *machine.names.lock().unwrap() = vec![arm("arm1"), arm("arm2")];
    client.refresh().await.unwrap();

    // arm3's stub was closed exactly once and is gone from the catalog.
    assert_eq!(closed.lock().unwrap().clone(), vec!["arm3".to_string()]);
    let names = client.resource_names().await;
    assert!(names.contains(&arm("arm2")));
    assert!(!names.contains(&arm("arm3")));
    assert_matches!(
        client.resource_by_name(&arm("arm3")).await,
        Err(Error::ResourceNotFound(_))
    );

    // arm1's stub survived the refresh with its identity intact; arm2 gets
    // one lazily.
    let arm1_again = client.resource_by_name(&arm("arm1")).await.unwrap();
    assert!(Arc::ptr_eq(&arm1, &arm1_again));
    assert!(client.resource_by_name(&arm("arm2")).await.is_ok());

    client.close().await.unwrap();
}

#[tokio::test]
async fn repeated_lookup_returns_the_same_stub() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    let a = client.resource_by_name(&arm("arm1")).await.unwrap();
    let b = client.resource_by_name(&arm("arm1")).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));

    client.close().await.unwrap();
}

#[tokio::test]
async fn colliding_short_names_are_inaccessible() {
    let machine = FakeMachine::new(vec![arm("remote1/arm1"), arm("remote2/arm1")]);
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    assert_matches!(
        client.resource_by_name(&arm("arm1")).await,
        Err(Error::ResourceNotFound(_))
    );
    assert!(client.resource_by_name(&arm("remote1/arm1")).await.is_ok());

    client.close().await.unwrap();
}

#[tokio::test]
async fn unambiguous_short_name_resolves_to_the_full_name() {
    let machine = FakeMachine::new(vec![arm("remote1/arm1")]);
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    let by_short = client.resource_by_name(&arm("arm1")).await.unwrap();
    let by_full = client.resource_by_name(&arm("remote1/arm1")).await.unwrap();
    assert!(Arc::ptr_eq(&by_short, &by_full));
    assert_eq!(by_short.name(), &arm("remote1/arm1"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn expired_session_restarts_transparently() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    // The first session the server hands out is already dead.
    machine.expired.lock().unwrap().insert("s1".to_string());
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    // The caller sees a single successful response.
    client.stop_all(&CallContext::new(), Vec::new()).await.unwrap();

    // Underneath: s1 attached and rejected, a fresh s2 started, the call
    // retried exactly once, under the same operation id.
    assert_eq!(machine.sessions_started.load(Ordering::SeqCst), 2);
    let stop_calls = machine.calls_to(machine::STOP_ALL);
    assert_eq!(stop_calls.len(), 2);
    assert_eq!(stop_calls[0].get(metadata::SESSION_ID_KEY), Some("s1"));
    assert_eq!(stop_calls[1].get(metadata::SESSION_ID_KEY), Some("s2"));
    let op_ids: Vec<_> = stop_calls
        .iter()
        .map(|md| md.get(metadata::OPERATION_ID_KEY).unwrap().to_string())
        .collect();
    assert_eq!(op_ids[0], op_ids[1]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn streams_replay_their_sends_after_session_expiry() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    machine.expired.lock().unwrap().insert("s1".to_string());
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    let mut stream = client
        .call_handle()
        .open_stream(&CallContext::new(), STREAM_TICKS)
        .await
        .unwrap();
    stream.send(&json!({ "req": 1 })).await.unwrap();
    stream.send(&json!({ "req": 2 })).await.unwrap();

    // First receive hits the dead session; the client restarts the session,
    // reopens the stream, replays both sends and hands back the first
    // message of the new stream. No error escapes.
    let first: serde_json::Value = stream.recv().await.unwrap().unwrap();
    assert_eq!(first, json!({ "tick": 1 }));

    let opens = machine.calls_to(&format!("stream:{STREAM_TICKS}"));
    assert_eq!(opens.len(), 2);
    assert_eq!(opens[0].get(metadata::SESSION_ID_KEY), Some("s1"));
    assert_eq!(opens[1].get(metadata::SESSION_ID_KEY), Some("s2"));

    let logs = machine.stream_send_logs.lock().unwrap().clone();
    assert_eq!(logs.len(), 2);
    let replayed: Vec<String> = logs[1].lock().unwrap().clone();
    assert_eq!(replayed, vec![r#"{"req":1}"#.to_string(), r#"{"req":2}"#.to_string()]);

    // The stream keeps going on the new session afterwards.
    let second: serde_json::Value = stream.recv().await.unwrap().unwrap();
    assert_eq!(second, json!({ "tick": 2 }));

    client.close().await.unwrap();
}

#[tokio::test]
async fn session_support_discovery_is_sticky() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    machine.sessions_unimplemented.store(true, Ordering::SeqCst);
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    client.stop_all(&CallContext::new(), Vec::new()).await.unwrap();
    client.stop_all(&CallContext::new(), Vec::new()).await.unwrap();

    // One discovery attempt, then never again; no session id attached.
    assert_eq!(machine.calls_to(session::START_SESSION).len(), 1);
    assert_eq!(
        client.inner.session.supported().await,
        crate::session::Supported::No
    );
    for md in machine.calls_to(machine::STOP_ALL) {
        assert_eq!(md.get(metadata::SESSION_ID_KEY), None);
    }
    assert_eq!(machine.heartbeats.load(Ordering::SeqCst), 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn disabled_sessions_do_no_session_work() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let options = manual_options().sessions_disabled(true);
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();

    client.stop_all(&CallContext::new(), Vec::new()).await.unwrap();

    assert!(machine.calls_to(session::START_SESSION).is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn heartbeats_keep_the_session_and_unavailability_resets_it() {
    let mut machine = FakeMachine::new(vec![arm("arm1")]);
    // 100ms window → 20ms heartbeat interval.
    machine.heartbeat_window_ms = 100;
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    client.stop_all(&CallContext::new(), Vec::new()).await.unwrap();
    assert_eq!(client.inner.session.current_id().await, Some("s1".to_string()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(machine.heartbeats.load(Ordering::SeqCst) >= 2);

    // An unavailable machine abandons the session so the next call can
    // rediscover it.
    machine.heartbeat_unavailable.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(client.inner.session.current_id().await, None);

    machine.heartbeat_unavailable.store(false, Ordering::SeqCst);
    client.stop_all(&CallContext::new(), Vec::new()).await.unwrap();
    assert_eq!(client.inner.session.current_id().await, Some("s2".to_string()));

    client.close().await.unwrap();
}

#[tokio::test]
async fn reconnect_never_falls_back_once_streaming_succeeded() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let dialer = machine.dialer();
    let options = ClientOptions::new()
        .refresh_interval(None)
        .check_interval(Some(Duration::from_millis(25)))
        .reconnect_interval(Some(Duration::from_millis(25)));
    let client = MachineClient::open("machine.local:8080", dialer.clone(), options)
        .await
        .unwrap();
    let mut changes = client.changed();

    // Kill the connection and the streaming dial with it.
    machine.dial_fail_streaming.store(true, Ordering::SeqCst);
    machine.drop_connection.store(true, Ordering::SeqCst);

    changes.changed().await.unwrap();
    assert!(!*changes.borrow_and_update());
    assert!(!client.connected());

    // Let several reconnect attempts fail.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let attempts = dialer.attempts();
    assert!(attempts.len() >= 3);
    assert!(
        attempts.iter().all(|kind| *kind == TransportKind::Streaming),
        "a sticky streaming preference must never fall back: {attempts:?}"
    );

    // Once the streaming transport is reachable again, the client heals.
    machine.drop_connection.store(false, Ordering::SeqCst);
    machine.dial_fail_streaming.store(false, Ordering::SeqCst);
    changes.changed().await.unwrap();
    assert!(*changes.borrow_and_update());
    assert!(client.connected());

    client.close().await.unwrap();
}

#[tokio::test]
async fn first_dial_may_fall_back_to_the_plain_transport() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    machine.dial_fail_streaming.store(true, Ordering::SeqCst);
    let dialer = machine.dialer();
    let client = MachineClient::open("machine.local:8080", dialer.clone(), manual_options())
        .await
        .unwrap();

    assert_eq!(
        dialer.attempts(),
        vec![TransportKind::Streaming, TransportKind::Plain]
    );
    assert!(client.connected());

    client.close().await.unwrap();
}

#[tokio::test]
async fn disabled_reconnect_leaves_the_client_disconnected() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let dialer = machine.dialer();
    let options = ClientOptions::new()
        .refresh_interval(None)
        .check_interval(Some(Duration::from_millis(20)))
        .reconnect_interval(None);
    let client = MachineClient::open("machine.local:8080", dialer.clone(), options)
        .await
        .unwrap();

    let dials_before = dialer.attempts().len();
    machine.drop_connection.store(true, Ordering::SeqCst);

    let mut changes = client.changed();
    changes.changed().await.unwrap();
    assert!(!client.connected());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dialer.attempts().len(), dials_before);
    assert!(!client.connected());

    client.close().await.unwrap();
}

#[tokio::test]
async fn parent_notifier_may_reenter_the_client() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let options = ClientOptions::new()
        .refresh_interval(None)
        .check_interval(Some(Duration::from_millis(20)))
        .reconnect_interval(Some(Duration::from_millis(20)));
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let reentrant = client.clone();
    client.set_parent_notifier(Some(Arc::new(move || {
        // Both of these grab client-internal locks; the notifier must be
        // invoked with none of them held.
        reentrant.set_parent_notifier(None);
        let names_probe = reentrant.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let names = names_probe.resource_names().await;
            let _ = tx.send(names);
        });
    })));

    machine.drop_connection.store(true, Ordering::SeqCst);

    let names = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("parent notifier was not invoked")
        .expect("notifier channel closed");
    // Disconnected, so the snapshot is empty rather than stale.
    assert!(names.is_empty());

    client.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_fails_further_calls() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let closed = Arc::new(StdMutex::new(Vec::new()));
    let options = manual_options().registry(closing_registry(closed.clone()));
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();
    let _stub = client.resource_by_name(&arm("arm1")).await.unwrap();
    let mut changes = client.changed();

    client.close().await.unwrap();
    client.close().await.unwrap();

    // Stubs were closed, the change channel ended, and further lookups
    // report the client unusable.
    assert_eq!(closed.lock().unwrap().clone(), vec!["arm1".to_string()]);
    assert!(changes.changed().await.is_err() || !*changes.borrow());
    assert_matches!(client.resource_by_name(&arm("arm1")).await, Err(Error::Closed));
    assert_matches!(
        client.stop_all(&CallContext::new(), Vec::new()).await,
        Err(Error::Disconnected)
    );
    assert!(client.resource_names().await.is_empty());
}

#[tokio::test]
async fn equal_intervals_collapse_probe_and_refresh_into_one_loop() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let interval = Some(Duration::from_millis(25));
    let options = ClientOptions::new()
        .refresh_interval(interval)
        .check_interval(interval)
        .reconnect_interval(Some(Duration::from_millis(25)));
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();

    // Only the supervisor runs; its probe doubles as the refresh.
    assert_eq!(client.inner.tasks.lock().unwrap().len(), 1);

    *machine.names.lock().unwrap() = vec![arm("arm1"), arm("arm2")];
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(client.resource_names().await.contains(&arm("arm2")));

    client.close().await.unwrap();
}

#[tokio::test]
async fn distinct_intervals_run_a_separate_refresh_loop() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let options = ClientOptions::new()
        .refresh_interval(Some(Duration::from_millis(25)))
        .check_interval(Some(Duration::from_millis(40)))
        .reconnect_interval(Some(Duration::from_millis(25)));
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();

    assert_eq!(client.inner.tasks.lock().unwrap().len(), 2);

    *machine.names.lock().unwrap() = vec![arm("arm1"), arm("arm2")];
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(client.resource_names().await.contains(&arm("arm2")));

    client.close().await.unwrap();
}

#[tokio::test]
async fn refresh_is_idempotent_against_a_steady_catalog() {
    let machine = FakeMachine::new(vec![arm("arm1")]);
    let closed = Arc::new(StdMutex::new(Vec::new()));
    let options = manual_options().registry(closing_registry(closed.clone()));
    let client = MachineClient::open("machine.local:8080", machine.dialer(), options)
        .await
        .unwrap();

    let stub = client.resource_by_name(&arm("arm1")).await.unwrap();
    client.refresh().await.unwrap();
    client.refresh().await.unwrap();

    let again = client.resource_by_name(&arm("arm1")).await.unwrap();
    assert!(Arc::ptr_eq(&stub, &again));
    assert!(closed.lock().unwrap().is_empty());
    assert_eq!(client.resource_names().await, vec![arm("arm1")]);

    client.close().await.unwrap();
}

#[tokio::test]
async fn foreign_resources_forward_raw_calls_by_method_name() {
    let machine = FakeMachine::new(vec![gizmo("gizmo1")]);
    machine.serve_gizmo_api.store(true, Ordering::SeqCst);
    let client = MachineClient::open("machine.local:8080", machine.dialer(), manual_options())
        .await
        .unwrap();

    // No constructor is registered for the gizmo API, so the catalog falls
    // back to the foreign stub, addressed through the reflected descriptor.
    let stub = client.resource_by_name(&gizmo("gizmo1")).await.unwrap();
    let foreign = stub
        .as_any()
        .downcast_ref::<ForeignStub>()
        .expect("unregistered api resolves to the foreign fallback stub");
    assert_eq!(foreign.descriptor().unwrap().service, GIZMO_SERVICE);

    // Unary calls go out by bare method name on the descriptor's service,
    // through the full pipeline (note the session id attached underneath).
    let reply = foreign
        .invoke(&CallContext::new(), "Poke", raw(json!({ "target": 1 })))
        .await
        .unwrap();
    assert_eq!(reply.get(), r#"{"poked":true}"#);
    let pokes = machine.calls_to(GIZMO_POKE);
    assert_eq!(pokes.len(), 1);
    assert_eq!(pokes[0].get(metadata::SESSION_ID_KEY), Some("s1"));

    // Methods the descriptor doesn't list are rejected before anything is
    // sent.
    assert_matches!(
        foreign.invoke(&CallContext::new(), "Zap", raw(json!({}))).await,
        Err(Error::Status(s)) if s.code() == Code::Unimplemented
    );
    assert!(machine.calls_to("/acme.gizmo.v1.GizmoService/Zap").is_empty());

    // Streams forward the same way.
    let mut stream = foreign
        .open_stream(&CallContext::new(), "Watch")
        .await
        .unwrap();
    stream.send(&json!({ "watch": true })).await.unwrap();
    let first: serde_json::Value = stream.recv().await.unwrap().unwrap();
    assert_eq!(first, json!({ "tick": 1 }));
    assert_eq!(machine.calls_to(&format!("stream:{GIZMO_WATCH}")).len(), 1);

    client.close().await.unwrap();
}
