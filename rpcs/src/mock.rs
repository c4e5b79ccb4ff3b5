// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! This module exposes a [`MockTransport`], [`MockStream`] and [`MockDialer`],
//! which are useful for testing.

use crate::{
    transport::{RawValue, Reply, StreamReply},
    BoxFuture, Dialer, DialOptions, Metadata, Status, Transport, TransportKind, TransportStream,
};
use core::future::Future;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

type UnaryHandlerFn =
    Box<dyn Fn(String, Box<RawValue>, Metadata) -> BoxFuture<'static, Result<Reply, Status>> + Send + Sync>;
type StreamHandlerFn =
    Box<dyn Fn(String, Metadata) -> BoxFuture<'static, Result<StreamReply, Status>> + Send + Sync>;

/// A mock transport that responds programmatically to calls.
pub struct MockTransport {
    unary_handler: UnaryHandlerFn,
    stream_handler: StreamHandlerFn,
    closed: Arc<AtomicBool>,
    close_error: Option<Status>,
}

impl MockTransport {
    /// Create a [`MockTransport`] by providing a function to handle unary
    /// calls and a function to handle stream opens. Either can be sync or
    /// async, and can return anything implementing the respective
    /// `Into*Response` trait.
    pub fn from_handlers<U, S, UA, SA>(unary_handler: U, stream_handler: S) -> MockTransport
    where
        U: IntoUnaryHandler<UA>,
        S: IntoStreamHandler<SA>,
    {
        MockTransport {
            unary_handler: unary_handler.into_unary_handler(),
            stream_handler: stream_handler.into_stream_handler(),
            closed: Arc::new(AtomicBool::new(false)),
            close_error: None,
        }
    }

    /// Make [`Transport::close`] fail with the given status. The transport
    /// still marks itself closed.
    pub fn with_close_error(mut self, status: Status) -> Self {
        self.close_error = Some(status);
        self
    }

    /// A flag that flips to `true` once the transport has been closed. Clone
    /// it out before installing the transport to observe the close later.
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn unary<'a>(
        &'a self,
        method: &'a str,
        request: Box<RawValue>,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<Reply, Status>> {
        if self.is_closed() {
            return Box::pin(async { Err(Status::disconnected()) });
        }
        (self.unary_handler)(method.to_string(), request, metadata.clone())
    }

    fn open_stream<'a>(
        &'a self,
        method: &'a str,
        metadata: &'a Metadata,
    ) -> BoxFuture<'a, Result<StreamReply, Status>> {
        if self.is_closed() {
            return Box::pin(async { Err(Status::disconnected()) });
        }
        (self.stream_handler)(method.to_string(), metadata.clone())
    }

    fn close(&self) -> BoxFuture<'_, Result<(), Status>> {
        self.closed.store(true, Ordering::SeqCst);
        let res = match &self.close_error {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        };
        Box::pin(async move { res })
    }
}

/// A stream handler for transports that never accept streams.
pub fn no_streams(_method: String, _metadata: Metadata) -> Result<StreamReply, Status> {
    Err(Status::unimplemented("streams not supported"))
}

/// A scriptable [`TransportStream`]: hands back a fixed sequence of replies
/// and records what the client sends.
pub struct MockStream {
    replies: VecDeque<Result<Box<RawValue>, Status>>,
    sent: Arc<Mutex<Vec<String>>>,
    send_closed: Arc<AtomicBool>,
}

impl MockStream {
    /// Create a stream producing the given receive results in order. Once
    /// they are exhausted, `recv` reports a clean end of stream.
    pub fn from_replies(
        replies: impl IntoIterator<Item = Result<Box<RawValue>, Status>>,
    ) -> MockStream {
        MockStream {
            replies: replies.into_iter().collect(),
            sent: Arc::new(Mutex::new(Vec::new())),
            send_closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record sent messages (as their raw JSON text) into the given log.
    pub fn with_send_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.sent = log;
        self
    }

    /// Record `close_send` into the given flag.
    pub fn with_close_send_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.send_closed = flag;
        self
    }

    /// The messages sent so far, as raw JSON text.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("send log lock poisoned").clone()
    }
}

impl TransportStream for MockStream {
    fn send(&mut self, message: Box<RawValue>) -> BoxFuture<'_, Result<(), Status>> {
        self.sent
            .lock()
            .expect("send log lock poisoned")
            .push(message.get().to_string());
        Box::pin(async { Ok(()) })
    }

    fn close_send(&mut self) -> BoxFuture<'_, Result<(), Status>> {
        self.send_closed.store(true, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }

    fn recv(&mut self) -> BoxFuture<'_, Result<Option<Box<RawValue>>, Status>> {
        let next = self.replies.pop_front();
        Box::pin(async move {
            match next {
                Some(Ok(msg)) => Ok(Some(msg)),
                Some(Err(status)) => Err(status),
                None => Ok(None),
            }
        })
    }
}

/// A [`Dialer`] driven by a handler function, recording every dial attempt so
/// tests can assert on transport-preference stickiness.
pub struct MockDialer {
    handler: Box<dyn Fn(TransportKind) -> Result<Arc<dyn Transport>, Status> + Send + Sync>,
    attempts: Mutex<Vec<TransportKind>>,
}

impl MockDialer {
    /// Create a [`MockDialer`] from a handler deciding the outcome of each
    /// dial by transport kind.
    pub fn new<F>(handler: F) -> MockDialer
    where
        F: Fn(TransportKind) -> Result<Arc<dyn Transport>, Status> + Send + Sync + 'static,
    {
        MockDialer {
            handler: Box::new(handler),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Every dial attempt so far, in order.
    pub fn attempts(&self) -> Vec<TransportKind> {
        self.attempts.lock().expect("attempts lock poisoned").clone()
    }
}

impl Dialer for MockDialer {
    fn dial<'a>(
        &'a self,
        _address: &'a str,
        kind: TransportKind,
        _options: &'a DialOptions,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, Status>> {
        self.attempts
            .lock()
            .expect("attempts lock poisoned")
            .push(kind);
        let res = (self.handler)(kind);
        Box::pin(async move { res })
    }
}

/// Return responses wrapped in this to have them serialized to JSON.
pub struct Json<T>(pub T);

/// Anything that can be converted into a valid unary handler response
/// implements this.
pub trait IntoUnaryResponse {
    /// Convert self into a handler response.
    fn into_unary_response(self) -> Result<Reply, Status>;
}

impl IntoUnaryResponse for Reply {
    fn into_unary_response(self) -> Result<Reply, Status> {
        Ok(self)
    }
}

impl IntoUnaryResponse for Box<RawValue> {
    fn into_unary_response(self) -> Result<Reply, Status> {
        Ok(Reply {
            message: self,
            headers: Metadata::new(),
        })
    }
}

impl IntoUnaryResponse for serde_json::Value {
    fn into_unary_response(self) -> Result<Reply, Status> {
        serialize_to_raw_value(&self).map(|message| Reply {
            message,
            headers: Metadata::new(),
        })
    }
}

impl<T: serde::Serialize> IntoUnaryResponse for Json<T> {
    fn into_unary_response(self) -> Result<Reply, Status> {
        serialize_to_raw_value(&self.0).map(|message| Reply {
            message,
            headers: Metadata::new(),
        })
    }
}

impl<R: IntoUnaryResponse> IntoUnaryResponse for Result<R, Status> {
    fn into_unary_response(self) -> Result<Reply, Status> {
        self.and_then(|r| r.into_unary_response())
    }
}

/// Anything that can be converted into a valid stream handler response
/// implements this.
pub trait IntoStreamResponse {
    /// Convert self into a handler response.
    fn into_stream_response(self) -> Result<StreamReply, Status>;
}

impl IntoStreamResponse for StreamReply {
    fn into_stream_response(self) -> Result<StreamReply, Status> {
        Ok(self)
    }
}

impl IntoStreamResponse for MockStream {
    fn into_stream_response(self) -> Result<StreamReply, Status> {
        Ok(StreamReply {
            headers: Metadata::new(),
            stream: Box::new(self),
        })
    }
}

impl<R: IntoStreamResponse> IntoStreamResponse for Result<R, Status> {
    fn into_stream_response(self) -> Result<StreamReply, Status> {
        self.and_then(|r| r.into_stream_response())
    }
}

fn serialize_to_raw_value<T: serde::Serialize>(val: &T) -> Result<Box<RawValue>, Status> {
    let res = serde_json::to_string(val)
        .map_err(|e| Status::internal(format!("mock serialization: {e}")))?;
    RawValue::from_string(res).map_err(|e| Status::internal(format!("mock serialization: {e}")))
}

/// Anything that is a valid unary handler implements this trait.
pub trait IntoUnaryHandler<A> {
    /// Convert self into a unary handler function.
    fn into_unary_handler(self) -> UnaryHandlerFn;
}

#[doc(hidden)]
pub enum SyncUnaryHandler {}
impl<F, R> IntoUnaryHandler<SyncUnaryHandler> for F
where
    F: Fn(String, Box<RawValue>, Metadata) -> R + Send + Sync + 'static,
    R: IntoUnaryResponse + Send + 'static,
{
    fn into_unary_handler(self) -> UnaryHandlerFn {
        Box::new(move |method, request, metadata| {
            let res = self(method, request, metadata);
            Box::pin(async move { res.into_unary_response() })
        })
    }
}

#[doc(hidden)]
pub enum AsyncUnaryHandler {}
impl<F, Fut, R> IntoUnaryHandler<AsyncUnaryHandler> for F
where
    F: Fn(String, Box<RawValue>, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoUnaryResponse + Send + 'static,
{
    fn into_unary_handler(self) -> UnaryHandlerFn {
        Box::new(move |method, request, metadata| {
            let fut = self(method, request, metadata);
            Box::pin(async move { fut.await.into_unary_response() })
        })
    }
}

/// Anything that is a valid stream handler implements this trait.
pub trait IntoStreamHandler<A> {
    /// Convert self into a stream handler function.
    fn into_stream_handler(self) -> StreamHandlerFn;
}

#[doc(hidden)]
pub enum SyncStreamHandler {}
impl<F, R> IntoStreamHandler<SyncStreamHandler> for F
where
    F: Fn(String, Metadata) -> R + Send + Sync + 'static,
    R: IntoStreamResponse + Send + 'static,
{
    fn into_stream_handler(self) -> StreamHandlerFn {
        Box::new(move |method, metadata| {
            let res = self(method, metadata);
            Box::pin(async move { res.into_stream_response() })
        })
    }
}

#[doc(hidden)]
pub enum AsyncStreamHandler {}
impl<F, Fut, R> IntoStreamHandler<AsyncStreamHandler> for F
where
    F: Fn(String, Metadata) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoStreamResponse + Send + 'static,
{
    fn into_stream_handler(self) -> StreamHandlerFn {
        Box::new(move |method, metadata| {
            let fut = self(method, metadata);
            Box::pin(async move { fut.await.into_stream_response() })
        })
    }
}
