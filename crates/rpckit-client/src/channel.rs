//! Client channel.
//!
//! A [`Channel`] multiplexes calls over one transport connection. It
//! handles:
//!
//! - Call id allocation and `Start` frames carrying invocation metadata
//! - Routing server frames to the call they belong to
//! - Client deadlines
//! - Connection loss, which ends every open call with `UNAVAILABLE`

use crate::builder::{CallOptions, ChannelConfig};
use crate::call::{
    BidiStreamingCall, CallCore, ClientStreamingCall, ServerStreamingCall, UnaryCall,
};
use bytes::Bytes;
use rpckit_core::error::{RpcError, TransportContext};
use rpckit_core::protocol::{CallId, CallShape, ClientFrame, Frame};
use rpckit_core::status::Status;
use rpckit_transport::Transport;
use rpckit_transport::runtime::{AsyncRwLock, CancellationToken, Receiver, Sender, channel};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

type CallTable = Arc<AsyncRwLock<HashMap<CallId, Arc<CallCore>>>>;

/// A client connection to one server.
///
/// Cloning is cheap; clones share the connection.
///
/// # Example
///
/// ```rust
/// use rpckit_client::{CallOptions, Channel};
/// use rpckit_transport::MemoryTransport;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (client_end, _server_end) = MemoryTransport::pair();
/// let channel = Channel::connect(client_end);
///
/// let unary = channel.unary_unary("/test/UnaryUnary");
/// assert_eq!(unary.method(), "/test/UnaryUnary");
/// assert!(channel.is_connected());
/// # }
/// ```
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    outgoing: Sender<Frame>,
    calls: CallTable,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    config: ChannelConfig,
    peer: String,
}

impl Channel {
    /// Connect over a transport with the default configuration.
    ///
    /// Must be called within a Tokio runtime; the frame router runs as a
    /// background task.
    pub fn connect<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        Self::with_config(transport, ChannelConfig::default())
    }

    /// Connect over a transport with a custom configuration.
    pub fn with_config<T>(transport: T, config: ChannelConfig) -> Self
    where
        T: Transport + 'static,
    {
        let peer = transport.metadata().peer();
        let transport = Arc::new(transport);
        let calls: CallTable = Arc::new(AsyncRwLock::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let (outgoing_tx, outgoing_rx) = channel::<Frame>(config.outgoing_buffer.max(1));

        tokio::spawn(route_frames(
            transport,
            Arc::clone(&calls),
            Arc::clone(&running),
            shutdown.clone(),
            outgoing_rx,
        ));

        Self {
            inner: Arc::new(ChannelInner {
                outgoing: outgoing_tx,
                calls,
                next_id: AtomicU64::new(1),
                running,
                shutdown,
                config,
                peer,
            }),
        }
    }

    /// A unary-unary method on this channel.
    #[must_use]
    pub fn unary_unary(&self, method: impl Into<String>) -> UnaryUnary {
        UnaryUnary {
            channel: self.clone(),
            method: method.into(),
        }
    }

    /// A unary-stream method on this channel.
    #[must_use]
    pub fn unary_stream(&self, method: impl Into<String>) -> UnaryStream {
        UnaryStream {
            channel: self.clone(),
            method: method.into(),
        }
    }

    /// A stream-unary method on this channel.
    #[must_use]
    pub fn stream_unary(&self, method: impl Into<String>) -> StreamUnary {
        StreamUnary {
            channel: self.clone(),
            method: method.into(),
        }
    }

    /// A stream-stream method on this channel.
    #[must_use]
    pub fn stream_stream(&self, method: impl Into<String>) -> StreamStream {
        StreamStream {
            channel: self.clone(),
            method: method.into(),
        }
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Description of the server end, e.g. `memory:peer-1`.
    #[must_use]
    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    /// The channel configuration.
    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Number of calls that have not completed.
    pub async fn active_calls(&self) -> usize {
        self.inner.calls.read().await.len()
    }

    /// Close the connection. Open calls end with `UNAVAILABLE`.
    pub fn close(&self) {
        if self.inner.shutdown.cancel() {
            debug!(peer = %self.inner.peer, "Closing channel");
        }
    }

    /// Open a call: register it, send `Start`, and arm its deadline.
    async fn start(
        &self,
        method: &str,
        shape: CallShape,
        options: CallOptions,
    ) -> Result<Arc<CallCore>, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::Status(Status::unavailable("channel closed")));
        }

        let call_id = CallId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let timeout = options.timeout.or(self.inner.config.default_timeout);
        let core = Arc::new(CallCore::new(
            call_id,
            method,
            shape,
            self.inner.outgoing.clone(),
        ));

        trace!(call_id = %call_id, method = %method, %shape, "Starting call");
        self.inner
            .calls
            .write()
            .await
            .insert(call_id, Arc::clone(&core));

        let start = ClientFrame::Start {
            method: method.to_string(),
            metadata: options.metadata,
            timeout,
        };
        if let Err(err) = core.send(start).await {
            self.inner.calls.write().await.remove(&call_id);
            return Err(err);
        }

        if let Some(timeout) = timeout {
            let core = Arc::clone(&core);
            rpckit_transport::runtime::spawn(async move {
                tokio::select! {
                    () = rpckit_transport::runtime::sleep(timeout) => {
                        if core.expire() {
                            debug!(call_id = %core.call_id(), ?timeout, "Call deadline exceeded");
                        }
                    }
                    () = core.wait_done() => {}
                }
            });
        }

        Ok(core)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("peer", &self.inner.peer)
            .field("connected", &self.is_connected())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Background task moving frames between the calls and the transport.
///
/// Runs until the transport closes, [`Channel::close`] is called, or every
/// channel and call handle is dropped.
async fn route_frames<T: Transport>(
    transport: Arc<T>,
    calls: CallTable,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    mut outgoing_rx: Receiver<Frame>,
) {
    debug!("Starting client frame router");

    // The writer stays pinned across iterations so reads continue while a
    // send is waiting for transport capacity.
    let writer = write_frames(&*transport, &mut outgoing_rx);
    tokio::pin!(writer);

    let reason = loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                if let Err(e) = transport.close().await {
                    warn!(error = %e, "Failed to close transport");
                }
                break "channel closed";
            }

            reason = &mut writer => break reason,

            incoming = transport.recv() => {
                match incoming {
                    Ok(Some(Frame::Response { call_id, frame })) => {
                        let core = calls.read().await.get(&call_id).cloned();
                        match core {
                            Some(core) => {
                                if core.deliver(frame) {
                                    calls.write().await.remove(&call_id);
                                }
                            }
                            None => trace!(call_id = %call_id, "Dropping frame for unknown call"),
                        }
                    }
                    Ok(Some(Frame::Request { call_id, .. })) => {
                        warn!(call_id = %call_id, "Received unexpected request frame");
                    }
                    Ok(None) => {
                        info!("Connection closed by server");
                        break "connection closed";
                    }
                    Err(e) => {
                        error!(error = %e, "Transport error in frame router");
                        break "transport error";
                    }
                }
            }
        }
    };

    running.store(false, Ordering::SeqCst);
    let open: Vec<_> = calls.write().await.drain().map(|(_, core)| core).collect();
    for core in open {
        core.finish_locally(Status::unavailable(reason));
    }
    debug!(reason, "Frame router stopped");
}

/// Write queued call frames to the transport until the queue or the
/// transport fails. Returns the reason the router should stop.
async fn write_frames<T: Transport>(transport: &T, outgoing_rx: &mut Receiver<Frame>) -> &'static str {
    while let Some(frame) = outgoing_rx.recv().await {
        let call_id = frame.call_id();
        trace!(call_id = %call_id, kind = frame.kind(), "Sending frame");
        if let Err(e) = transport.send(frame).await {
            let metadata = transport.metadata();
            let context = TransportContext::new(metadata.transport_type.clone())
                .with_peer(metadata.peer())
                .with_call(call_id);
            error!(error = %e, transport = %context, "Failed to send frame");
            return "send failed";
        }
    }
    let _ = transport.close().await;
    "channel dropped"
}

/// A unary-unary method bound to a channel.
#[derive(Debug, Clone)]
pub struct UnaryUnary {
    channel: Channel,
    method: String,
}

impl UnaryUnary {
    /// The method path.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Start a call with one request.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if the channel is closed.
    pub async fn call(
        &self,
        request: impl Into<Bytes>,
        options: impl Into<CallOptions>,
    ) -> Result<UnaryCall, RpcError> {
        let core = self
            .channel
            .start(&self.method, CallShape::UnaryUnary, options.into())
            .await?;
        core.write(request.into()).await?;
        core.done_writing().await?;
        Ok(UnaryCall::from_core(core))
    }

    /// Make a call and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Status`] if the call ends with a non-OK status.
    pub async fn invoke(
        &self,
        request: impl Into<Bytes>,
        options: impl Into<CallOptions>,
    ) -> Result<Bytes, RpcError> {
        self.call(request, options).await?.response().await
    }
}

/// A unary-stream method bound to a channel.
#[derive(Debug, Clone)]
pub struct UnaryStream {
    channel: Channel,
    method: String,
}

impl UnaryStream {
    /// The method path.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Start a call with one request.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if the channel is closed.
    pub async fn call(
        &self,
        request: impl Into<Bytes>,
        options: impl Into<CallOptions>,
    ) -> Result<ServerStreamingCall, RpcError> {
        let core = self
            .channel
            .start(&self.method, CallShape::UnaryStream, options.into())
            .await?;
        core.write(request.into()).await?;
        core.done_writing().await?;
        Ok(ServerStreamingCall::from_core(core))
    }
}

/// A stream-unary method bound to a channel.
#[derive(Debug, Clone)]
pub struct StreamUnary {
    channel: Channel,
    method: String,
}

impl StreamUnary {
    /// The method path.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Start a call. Requests are written through the returned handle.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if the channel is closed.
    pub async fn call(
        &self,
        options: impl Into<CallOptions>,
    ) -> Result<ClientStreamingCall, RpcError> {
        let core = self
            .channel
            .start(&self.method, CallShape::StreamUnary, options.into())
            .await?;
        Ok(ClientStreamingCall::from_core(core))
    }

    /// Start a call, write every request, and finish writing.
    ///
    /// # Errors
    ///
    /// Returns the first error from starting the call or writing a request.
    pub async fn call_with<I>(
        &self,
        requests: I,
        options: impl Into<CallOptions>,
    ) -> Result<ClientStreamingCall, RpcError>
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        let call = self.call(options).await?;
        for request in requests {
            call.write(request).await?;
        }
        call.done_writing().await?;
        Ok(call)
    }
}

/// A stream-stream method bound to a channel.
#[derive(Debug, Clone)]
pub struct StreamStream {
    channel: Channel,
    method: String,
}

impl StreamStream {
    /// The method path.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Start a call. Requests are written through the returned handle.
    ///
    /// # Errors
    ///
    /// Returns `UNAVAILABLE` if the channel is closed.
    pub async fn call(
        &self,
        options: impl Into<CallOptions>,
    ) -> Result<BidiStreamingCall, RpcError> {
        let core = self
            .channel
            .start(&self.method, CallShape::StreamStream, options.into())
            .await?;
        Ok(BidiStreamingCall::from_core(core))
    }
}
