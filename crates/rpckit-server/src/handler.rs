//! Method handlers for the four call shapes.
//!
//! A [`MethodHandler`] wraps an async function for one call shape:
//!
//! | Shape | Handler signature |
//! |-------|-------------------|
//! | unary-unary | `Fn(Bytes, CallContext) -> Result<Bytes>` |
//! | unary-stream | `Fn(Bytes, CallContext, ResponseSink) -> Result<()>` |
//! | stream-unary | `Fn(RequestStream, CallContext) -> Result<Bytes>` |
//! | stream-stream | `Fn(RequestStream, CallContext, ResponseSink) -> Result<()>` |
//!
//! Streaming handlers consume requests from a [`RequestStream`] and produce
//! responses through a [`ResponseSink`].
//!
//! # Example
//!
//! ```rust
//! use rpckit_server::{CallContext, MethodHandler, RequestStream, ResponseSink};
//! use rpckit_core::error::RpcError;
//! use rpckit_core::protocol::CallShape;
//!
//! let echo = MethodHandler::stream_stream(
//!     |mut requests: RequestStream, _ctx: CallContext, responses: ResponseSink| async move {
//!         while let Some(request) = requests.message().await? {
//!             responses.send(request).await?;
//!         }
//!         Ok::<_, RpcError>(())
//!     },
//! );
//! assert_eq!(echo.shape(), CallShape::StreamStream);
//! ```

use crate::context::{CallContext, CallPhase};
use bytes::Bytes;
use futures::Stream;
use futures::future::BoxFuture;
use rpckit_core::error::RpcError;
use rpckit_core::protocol::{CallShape, ServerFrame};
use rpckit_transport::runtime::UnboundedReceiver;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

type UnaryUnaryFn =
    Arc<dyn Fn(Bytes, CallContext) -> BoxFuture<'static, Result<Bytes, RpcError>> + Send + Sync>;
type UnaryStreamFn = Arc<
    dyn Fn(Bytes, CallContext, ResponseSink) -> BoxFuture<'static, Result<(), RpcError>>
        + Send
        + Sync,
>;
type StreamUnaryFn = Arc<
    dyn Fn(RequestStream, CallContext) -> BoxFuture<'static, Result<Bytes, RpcError>>
        + Send
        + Sync,
>;
type StreamStreamFn = Arc<
    dyn Fn(RequestStream, CallContext, ResponseSink) -> BoxFuture<'static, Result<(), RpcError>>
        + Send
        + Sync,
>;

/// A handler for one method, tagged with its call shape.
#[derive(Clone)]
pub enum MethodHandler {
    /// One request, one response.
    UnaryUnary(UnaryUnaryFn),
    /// One request, a stream of responses.
    UnaryStream(UnaryStreamFn),
    /// A stream of requests, one response.
    StreamUnary(StreamUnaryFn),
    /// Streams in both directions.
    StreamStream(StreamStreamFn),
}

impl MethodHandler {
    /// Wrap a unary-unary handler.
    pub fn unary_unary<F, Fut>(handler: F) -> Self
    where
        F: Fn(Bytes, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
    {
        Self::UnaryUnary(Arc::new(move |request, ctx| Box::pin(handler(request, ctx))))
    }

    /// Wrap a unary-stream handler.
    pub fn unary_stream<F, Fut>(handler: F) -> Self
    where
        F: Fn(Bytes, CallContext, ResponseSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        Self::UnaryStream(Arc::new(move |request, ctx, sink| {
            Box::pin(handler(request, ctx, sink))
        }))
    }

    /// Wrap a stream-unary handler.
    pub fn stream_unary<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestStream, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
    {
        Self::StreamUnary(Arc::new(move |requests, ctx| Box::pin(handler(requests, ctx))))
    }

    /// Wrap a stream-stream handler.
    pub fn stream_stream<F, Fut>(handler: F) -> Self
    where
        F: Fn(RequestStream, CallContext, ResponseSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        Self::StreamStream(Arc::new(move |requests, ctx, sink| {
            Box::pin(handler(requests, ctx, sink))
        }))
    }

    /// The call shape this handler serves.
    #[must_use]
    pub const fn shape(&self) -> CallShape {
        match self {
            Self::UnaryUnary(_) => CallShape::UnaryUnary,
            Self::UnaryStream(_) => CallShape::UnaryStream,
            Self::StreamUnary(_) => CallShape::StreamUnary,
            Self::StreamStream(_) => CallShape::StreamStream,
        }
    }
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodHandler").field(&self.shape()).finish()
    }
}

/// Sends streamed responses to the client.
///
/// The first `send` implicitly sends empty initial metadata if the handler
/// has not sent any. `send` suspends while the transport is full.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    ctx: CallContext,
}

impl ResponseSink {
    pub(crate) const fn new(ctx: CallContext) -> Self {
        Self { ctx }
    }

    /// Send one response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Cancelled`] if the call was cancelled, or a
    /// transport error if the frame could not be sent.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), RpcError> {
        if self.ctx.is_cancelled() {
            return Err(self.ctx.cancellation_error());
        }
        self.ctx.ensure_initial_metadata_sent().await?;
        self.ctx.advance(CallPhase::Streaming);
        self.ctx
            .send_frame(ServerFrame::Message(payload.into()))
            .await
    }
}

/// Streamed requests from the client, in the order they were written.
///
/// Ends when the client finishes writing. Implements [`Stream`], and
/// [`message`](Self::message) reads one request at a time.
#[derive(Debug)]
pub struct RequestStream {
    receiver: UnboundedReceiver<Bytes>,
    ctx: CallContext,
    reported_cancel: bool,
}

impl RequestStream {
    pub(crate) const fn new(receiver: UnboundedReceiver<Bytes>, ctx: CallContext) -> Self {
        Self {
            receiver,
            ctx,
            reported_cancel: false,
        }
    }

    /// Read the next request, or `None` once the client is done writing.
    ///
    /// # Errors
    ///
    /// Returns the cancellation error if the call is cancelled while
    /// waiting.
    pub async fn message(&mut self) -> Result<Option<Bytes>, RpcError> {
        let request = tokio::select! {
            biased;
            () = self.ctx.cancelled() => return Err(self.ctx.cancellation_error()),
            request = self.receiver.recv() => request,
        };
        if request.is_some() {
            self.ctx.record_request();
        }
        Ok(request)
    }
}

impl Stream for RequestStream {
    type Item = Result<Bytes, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ctx.is_cancelled() {
            if self.reported_cancel {
                return Poll::Ready(None);
            }
            self.reported_cancel = true;
            return Poll::Ready(Some(Err(self.ctx.cancellation_error())));
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(Some(request)) => {
                self.ctx.record_request();
                Poll::Ready(Some(Ok(request)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
