//! Server runtime.
//!
//! The runtime owns one transport connection. It reads client frames,
//! demultiplexes them by call id, and runs each accepted call as its own
//! task through the executor.
//!
//! # Overview
//!
//! For every `Start` frame the runtime:
//! 1. Rejects the call with `RESOURCE_EXHAUSTED` if too many calls are open
//! 2. Resolves a handler through the [`Dispatcher`], answering
//!    `UNIMPLEMENTED` when no provider claims the method
//! 3. Registers the call and spawns its executor
//!
//! Later `Message`, `HalfClose` and `Cancel` frames are routed to the
//! registered call. When the connection closes every open call is
//! cancelled.

use crate::builder::ServerConfig;
use crate::context::{CallContext, Peer};
use crate::executor;
use crate::handler::RequestStream;
use crate::router::Dispatcher;
use bytes::Bytes;
use futures::future::BoxFuture;
use rpckit_core::error::{RpcError, TransportContext};
use rpckit_core::metadata::Metadata;
use rpckit_core::protocol::{CallId, ClientFrame, Frame, ServerFrame};
use rpckit_core::status::{Code, Status};
use rpckit_transport::Transport;
use rpckit_transport::runtime::{UnboundedSender, unbounded_channel};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// A call the runtime is currently serving.
struct ActiveCall {
    /// Feeds the handler's [`RequestStream`]. `None` after half-close.
    requests: Option<UnboundedSender<Bytes>>,
    context: CallContext,
}

/// The call table for one connection.
#[derive(Default)]
pub struct ServerState {
    calls: RwLock<HashMap<CallId, ActiveCall>>,
}

impl ServerState {
    /// Create an empty call table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls currently open.
    pub fn active_calls(&self) -> usize {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether a call with this id is open.
    pub fn is_active(&self, call_id: CallId) -> bool {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&call_id)
    }

    fn register(&self, call_id: CallId, call: ActiveCall) {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_id, call);
    }

    fn remove(&self, call_id: CallId) -> Option<CallContext> {
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&call_id)
            .map(|call| call.context)
    }

    /// Forward a request payload. Returns `false` if the call is unknown or
    /// already half-closed.
    fn forward(&self, call_id: CallId, payload: Bytes) -> bool {
        let calls = self.calls.read().unwrap_or_else(PoisonError::into_inner);
        match calls.get(&call_id).and_then(|call| call.requests.as_ref()) {
            // The handler may have finished and dropped its stream.
            Some(requests) => requests.send(payload).is_ok(),
            None => false,
        }
    }

    fn half_close(&self, call_id: CallId) -> bool {
        let mut calls = self.calls.write().unwrap_or_else(PoisonError::into_inner);
        match calls.get_mut(&call_id) {
            Some(call) => {
                call.requests = None;
                true
            }
            None => false,
        }
    }

    /// Cancel one call. Returns `false` if it was not open.
    pub fn cancel_call(&self, call_id: CallId, status: Status) -> bool {
        match self.remove(call_id) {
            Some(context) => {
                context.cancel_with(status);
                true
            }
            None => false,
        }
    }

    /// Cancel every open call.
    pub fn cancel_all(&self, status: &Status) {
        let drained: Vec<_> = self
            .calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (call_id, call) in drained {
            tracing::debug!(call_id = %call_id, "Cancelling call");
            call.context.cancel_with(status.clone());
        }
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("active_calls", &self.active_calls())
            .finish()
    }
}

/// A peer that writes frames to a transport.
pub struct TransportPeer<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> TransportPeer<T> {
    /// Create a new transport peer.
    pub const fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }
}

impl<T> Peer for TransportPeer<T>
where
    T: Transport + 'static,
    T::Error: Into<RpcError>,
{
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(async move {
            let call_id = frame.call_id();
            self.transport.send(frame).await.map_err(|err| {
                let metadata = self.transport.metadata();
                let err: RpcError = err.into();
                err.with_transport_context(
                    TransportContext::new(metadata.transport_type.clone())
                        .with_peer(metadata.peer())
                        .with_call(call_id),
                )
            })
        })
    }

    fn describe(&self) -> String {
        self.transport.metadata().peer()
    }
}

/// Server runtime that handles the frame loop for one connection.
pub struct ServerRuntime<Tr>
where
    Tr: Transport,
{
    dispatcher: Dispatcher,
    transport: Arc<Tr>,
    peer: Arc<dyn Peer>,
    state: Arc<ServerState>,
    config: ServerConfig,
}

impl<Tr> ServerRuntime<Tr>
where
    Tr: Transport + 'static,
    Tr::Error: Into<RpcError>,
{
    /// Create a runtime over a transport.
    pub fn new(dispatcher: Dispatcher, transport: Tr, config: ServerConfig) -> Self {
        let transport = Arc::new(transport);
        Self {
            dispatcher,
            peer: Arc::new(TransportPeer::new(Arc::clone(&transport))),
            transport,
            state: Arc::new(ServerState::new()),
            config,
        }
    }

    /// Get the call table.
    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Run the frame loop.
    ///
    /// Returns when the connection closes, after cancelling every open call.
    ///
    /// # Errors
    ///
    /// Returns the transport error if receiving fails.
    pub async fn run(&self) -> Result<(), RpcError> {
        let result = loop {
            match self.transport.recv().await {
                Ok(Some(frame)) => self.handle_frame(frame),
                Ok(None) => {
                    tracing::info!("Connection closed");
                    break Ok(());
                }
                Err(e) => {
                    let err: RpcError = e.into();
                    tracing::error!(error = %err, "Transport error");
                    break Err(err);
                }
            }
        };

        self.state
            .cancel_all(&Status::cancelled("connection closed"));
        result
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Request { call_id, frame } => match frame {
                ClientFrame::Start {
                    method,
                    metadata,
                    timeout,
                } => self.start_call(call_id, method, metadata, timeout),
                ClientFrame::Message(payload) => {
                    if !self.state.forward(call_id, payload) {
                        tracing::debug!(call_id = %call_id, "Dropping message for closed call");
                    }
                }
                ClientFrame::HalfClose => {
                    if self.state.half_close(call_id) {
                        tracing::trace!(call_id = %call_id, "Client finished writing");
                    }
                }
                ClientFrame::Cancel => {
                    if self
                        .state
                        .cancel_call(call_id, Status::cancelled("cancelled by client"))
                    {
                        tracing::debug!(call_id = %call_id, "Client cancelled call");
                    }
                }
            },
            Frame::Response { call_id, .. } => {
                tracing::warn!(call_id = %call_id, "Received unexpected response frame");
            }
        }
    }

    fn start_call(
        &self,
        call_id: CallId,
        method: String,
        metadata: Metadata,
        timeout: Option<Duration>,
    ) {
        tracing::debug!(call_id = %call_id, method = %method, "Starting call");

        if self.state.is_active(call_id) {
            tracing::warn!(call_id = %call_id, "Ignoring start for a call id already in use");
            return;
        }

        if self.state.active_calls() >= self.config.max_concurrent_calls {
            tracing::warn!(
                call_id = %call_id,
                limit = self.config.max_concurrent_calls,
                "Rejecting call over the concurrency limit"
            );
            let status = Status::new(Code::ResourceExhausted, "too many concurrent calls");
            self.reject(call_id, status);
            return;
        }

        let Some(handler) = self.dispatcher.resolve(&method, &metadata) else {
            tracing::debug!(call_id = %call_id, method = %method, "No handler for method");
            let status = RpcError::unimplemented(&method).to_status();
            self.reject(call_id, status);
            return;
        };

        let context = CallContext::new(call_id, method, metadata, Arc::clone(&self.peer), timeout);
        let (requests_tx, requests_rx) = unbounded_channel();
        let requests = RequestStream::new(requests_rx, context.clone());
        self.state.register(
            call_id,
            ActiveCall {
                requests: Some(requests_tx),
                context: context.clone(),
            },
        );

        let state = Arc::clone(&self.state);
        rpckit_transport::runtime::spawn(async move {
            executor::execute(handler, context, requests).await;
            state.remove(call_id);
        });
    }

    /// Answer a call with a trailers-only response.
    ///
    /// The write runs on its own task so the frame loop keeps draining the
    /// client while the transport is full.
    fn reject(&self, call_id: CallId, status: Status) {
        let trailers = ServerFrame::Trailers {
            status,
            metadata: Metadata::new(),
        };
        let peer = Arc::clone(&self.peer);
        rpckit_transport::runtime::spawn(async move {
            if let Err(err) = peer.send(Frame::response(call_id, trailers)).await {
                tracing::debug!(call_id = %call_id, error = %err, "Failed to send rejection");
            }
        });
    }
}

impl<Tr: Transport> std::fmt::Debug for ServerRuntime<Tr> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRuntime")
            .field("dispatcher", &self.dispatcher)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::MethodRegistry;
    use rpckit_transport::MemoryTransport;

    fn runtime(registry: MethodRegistry, config: ServerConfig) -> (MemoryTransport, Arc<ServerRuntime<MemoryTransport>>) {
        let (client, server) = MemoryTransport::pair();
        let dispatcher = Dispatcher::new(vec![Arc::new(registry)]);
        (client, Arc::new(ServerRuntime::new(dispatcher, server, config)))
    }

    async fn next_response(client: &MemoryTransport) -> (CallId, ServerFrame) {
        match client.recv().await.unwrap() {
            Some(Frame::Response { call_id, frame }) => (call_id, frame),
            other => panic!("expected response frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_method_is_trailers_only_unimplemented() {
        let (client, runtime) = runtime(MethodRegistry::new(), ServerConfig::default());
        let server = Arc::clone(&runtime);
        tokio::spawn(async move { server.run().await });

        client
            .send(Frame::request(CallId(7), ClientFrame::start("/test/Missing", Metadata::new())))
            .await
            .unwrap();

        let (call_id, frame) = next_response(&client).await;
        assert_eq!(call_id, CallId(7));
        match frame {
            ServerFrame::Trailers { status, metadata } => {
                assert_eq!(status.code, Code::Unimplemented);
                assert!(metadata.is_empty());
            }
            other => panic!("expected trailers, got {other:?}"),
        }
        assert_eq!(runtime.state().active_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let registry = MethodRegistry::new().stream_unary("/test/Hold", |mut requests: RequestStream, _ctx| async move {
            while requests.message().await?.is_some() {}
            Ok(Bytes::new())
        });
        let (client, runtime) = runtime(registry, ServerConfig::default().max_concurrent_calls(1));
        let server = Arc::clone(&runtime);
        tokio::spawn(async move { server.run().await });

        client
            .send(Frame::request(CallId(1), ClientFrame::start("/test/Hold", Metadata::new())))
            .await
            .unwrap();
        client
            .send(Frame::request(CallId(2), ClientFrame::start("/test/Hold", Metadata::new())))
            .await
            .unwrap();

        let (call_id, frame) = next_response(&client).await;
        assert_eq!(call_id, CallId(2));
        assert!(matches!(
            frame,
            ServerFrame::Trailers { status, .. } if status.code == Code::ResourceExhausted
        ));

        client
            .send(Frame::request(CallId(1), ClientFrame::HalfClose))
            .await
            .unwrap();
        let (call_id, frame) = next_response(&client).await;
        assert_eq!(call_id, CallId(1));
        assert_eq!(frame, ServerFrame::Headers(Metadata::new()));
    }

    #[tokio::test]
    async fn test_connection_close_cancels_calls() {
        let registry = MethodRegistry::new().unary_unary("/test/Wait", |_request: Bytes, ctx: CallContext| async move {
            ctx.cancelled().await;
            Ok(Bytes::new())
        });
        let (client, runtime) = runtime(registry, ServerConfig::default());
        let server = Arc::clone(&runtime);
        let task = tokio::spawn(async move { server.run().await });

        client
            .send(Frame::request(CallId(1), ClientFrame::start("/test/Wait", Metadata::new())))
            .await
            .unwrap();
        client
            .send(Frame::request(CallId(1), ClientFrame::Message(Bytes::from_static(b"x"))))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        client.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(runtime.state().active_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejections_do_not_stall_the_frame_loop() {
        const CALLS: u64 = 200;

        let (client, server) = MemoryTransport::pair_with_capacity(1);
        let dispatcher = Dispatcher::new(vec![Arc::new(MethodRegistry::new())]);
        let runtime = Arc::new(ServerRuntime::new(dispatcher, server, ServerConfig::default()));
        let server = Arc::clone(&runtime);
        tokio::spawn(async move { server.run().await });

        // Nothing reads responses until every start frame is written.
        tokio::time::timeout(Duration::from_secs(5), async {
            for id in 0..CALLS {
                client
                    .send(Frame::request(CallId(id), ClientFrame::start("/test/Missing", Metadata::new())))
                    .await
                    .unwrap();
            }
        })
        .await
        .expect("server stopped reading while rejections were pending");

        let mut rejected = Vec::new();
        for _ in 0..CALLS {
            let (call_id, frame) = tokio::time::timeout(Duration::from_secs(5), next_response(&client))
                .await
                .unwrap();
            assert!(matches!(
                frame,
                ServerFrame::Trailers { status, .. } if status.code == Code::Unimplemented
            ));
            rejected.push(call_id.0);
        }
        rejected.sort_unstable();
        assert_eq!(rejected, (0..CALLS).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_send_failure_carries_transport_context() {
        let (client, server) = MemoryTransport::pair();
        let peer = TransportPeer::new(Arc::new(server));
        client.close().await.unwrap();

        let err = peer
            .send(Frame::response(CallId(9), ServerFrame::Headers(Metadata::new())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable);
        match err {
            RpcError::Transport(details) => {
                assert_eq!(details.context.to_string(), "memory to memory:peer-0 (call #9)");
            }
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_unknown_call() {
        let state = ServerState::new();
        assert!(!state.cancel_call(CallId(3), Status::cancelled("client")));
        assert!(!state.forward(CallId(3), Bytes::new()));
        assert!(!state.half_close(CallId(3)));
    }
}
