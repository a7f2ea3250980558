//! Client-side call handles.
//!
//! Each call shape has its own handle type:
//!
//! | Shape | Handle | Requests | Responses |
//! |-------|--------|----------|-----------|
//! | unary-unary | [`UnaryCall`] | sent at start | [`response`](UnaryCall::response) |
//! | unary-stream | [`ServerStreamingCall`] | sent at start | [`message`](ServerStreamingCall::message), [`responses`](ServerStreamingCall::responses) |
//! | stream-unary | [`ClientStreamingCall`] | [`write`](ClientStreamingCall::write) | [`response`](ClientStreamingCall::response) |
//! | stream-stream | [`BidiStreamingCall`] | [`write`](BidiStreamingCall::write) | [`message`](BidiStreamingCall::message), [`responses`](BidiStreamingCall::responses) |
//!
//! All handles expose `initial_metadata()`, `trailing_metadata()`,
//! `status()` and `code()`. Each of these suspends until the value is
//! known: initial metadata no later than the first response, trailing
//! metadata and status only once the call has completed.

use bytes::Bytes;
use event_listener::Event;
use futures::stream::{BoxStream, Stream, StreamExt};
use rpckit_core::error::RpcError;
use rpckit_core::metadata::Metadata;
use rpckit_core::protocol::{CallId, CallShape, ClientFrame, Frame, ServerFrame};
use rpckit_core::status::{Code, Status};
use rpckit_transport::runtime::Sender;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc::error::TrySendError;

/// How a call ended.
#[derive(Debug, Clone)]
struct Outcome {
    status: Status,
    trailing_metadata: Metadata,
}

/// What the client has observed of a call so far.
#[derive(Debug, Default)]
struct CallRecord {
    initial_metadata: Option<Metadata>,
    responses: VecDeque<Bytes>,
    outcome: Option<Outcome>,
}

/// State shared between a call handle and the channel's router.
pub(crate) struct CallCore {
    call_id: CallId,
    method: String,
    shape: CallShape,
    outgoing: Sender<Frame>,
    record: Mutex<CallRecord>,
    changed: Event,
    done_writing: AtomicBool,
    responses_taken: AtomicBool,
}

impl CallCore {
    pub(crate) fn new(
        call_id: CallId,
        method: impl Into<String>,
        shape: CallShape,
        outgoing: Sender<Frame>,
    ) -> Self {
        Self {
            call_id,
            method: method.into(),
            shape,
            outgoing,
            record: Mutex::new(CallRecord::default()),
            changed: Event::new(),
            done_writing: AtomicBool::new(false),
            responses_taken: AtomicBool::new(false),
        }
    }

    pub(crate) const fn call_id(&self) -> CallId {
        self.call_id
    }

    fn record(&self) -> std::sync::MutexGuard<'_, CallRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspend until `check` yields a value.
    async fn wait_for<R>(&self, mut check: impl FnMut(&mut CallRecord) -> Option<R>) -> R {
        loop {
            if let Some(value) = check(&mut self.record()) {
                return value;
            }
            // Register before re-checking so a concurrent update is not missed.
            let listener = self.changed.listen();
            if let Some(value) = check(&mut self.record()) {
                return value;
            }
            listener.await;
        }
    }

    /// Apply a frame from the server. Returns `true` once the call is over.
    pub(crate) fn deliver(&self, frame: ServerFrame) -> bool {
        let mut record = self.record();
        if record.outcome.is_some() {
            tracing::trace!(call_id = %self.call_id, "Ignoring frame for finished call");
            return true;
        }
        let finished = match frame {
            ServerFrame::Headers(metadata) => {
                if record.initial_metadata.is_some() {
                    tracing::warn!(call_id = %self.call_id, "Ignoring repeated initial metadata");
                } else {
                    record.initial_metadata = Some(metadata);
                }
                false
            }
            ServerFrame::Message(payload) => {
                record.initial_metadata.get_or_insert_with(Metadata::new);
                record.responses.push_back(payload);
                false
            }
            ServerFrame::Trailers { status, metadata } => {
                tracing::debug!(call_id = %self.call_id, method = %self.method, code = %status.code, "Call completed");
                record.initial_metadata.get_or_insert_with(Metadata::new);
                record.outcome = Some(Outcome {
                    status,
                    trailing_metadata: metadata,
                });
                true
            }
        };
        drop(record);
        self.changed.notify(usize::MAX);
        finished
    }

    /// End the call on the client side. Responses not yet read are
    /// discarded. Returns `false` if the call had already ended.
    pub(crate) fn finish_locally(&self, status: Status) -> bool {
        let mut record = self.record();
        if record.outcome.is_some() {
            return false;
        }
        tracing::debug!(call_id = %self.call_id, method = %self.method, code = %status.code, "Call ended locally");
        record.initial_metadata.get_or_insert_with(Metadata::new);
        record.responses.clear();
        record.outcome = Some(Outcome {
            status,
            trailing_metadata: Metadata::new(),
        });
        drop(record);
        self.changed.notify(usize::MAX);
        true
    }

    /// Cancel the call and tell the server.
    pub(crate) fn cancel(&self) -> bool {
        self.abort(Status::cancelled("cancelled by client"))
    }

    /// Fail the call with `DEADLINE_EXCEEDED` and tell the server.
    pub(crate) fn expire(&self) -> bool {
        self.abort(Status::deadline_exceeded("deadline exceeded"))
    }

    fn abort(&self, status: Status) -> bool {
        if !self.finish_locally(status) {
            return false;
        }
        let frame = Frame::request(self.call_id, ClientFrame::Cancel);
        match self.outgoing.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Closed(_)) => {
                tracing::trace!(call_id = %self.call_id, "Cancel not sent, channel closed");
            }
            Err(TrySendError::Full(frame)) => {
                let call_id = self.call_id;
                let outgoing = self.outgoing.clone();
                rpckit_transport::runtime::spawn(async move {
                    if outgoing.send(frame).await.is_err() {
                        tracing::trace!(call_id = %call_id, "Cancel not sent, channel closed");
                    }
                });
            }
        }
        true
    }

    pub(crate) fn is_done(&self) -> bool {
        self.record().outcome.is_some()
    }

    pub(crate) async fn wait_done(&self) {
        self.wait_for(|record| record.outcome.as_ref().map(|_| ()))
            .await;
    }

    pub(crate) async fn send(&self, frame: ClientFrame) -> Result<(), RpcError> {
        self.outgoing
            .send(Frame::request(self.call_id, frame))
            .await
            .map_err(|_| RpcError::Status(Status::unavailable("channel closed")))
    }

    /// Error for an operation attempted on a finished call.
    fn finished_error(&self) -> RpcError {
        match self.record().outcome.as_ref() {
            Some(outcome) if !outcome.status.is_ok() => RpcError::Status(outcome.status.clone()),
            _ => RpcError::usage("call already completed"),
        }
    }

    pub(crate) async fn write(&self, payload: Bytes) -> Result<(), RpcError> {
        if self.done_writing.load(Ordering::SeqCst) {
            return Err(RpcError::usage("write after done_writing"));
        }
        if self.is_done() {
            return Err(self.finished_error());
        }
        self.send(ClientFrame::Message(payload)).await
    }

    pub(crate) async fn done_writing(&self) -> Result<(), RpcError> {
        if self.done_writing.swap(true, Ordering::SeqCst) || self.is_done() {
            return Ok(());
        }
        self.send(ClientFrame::HalfClose).await
    }

    pub(crate) async fn initial_metadata(&self) -> Metadata {
        self.wait_for(|record| record.initial_metadata.clone())
            .await
    }

    pub(crate) async fn trailing_metadata(&self) -> Metadata {
        self.wait_for(|record| {
            record
                .outcome
                .as_ref()
                .map(|outcome| outcome.trailing_metadata.clone())
        })
        .await
    }

    pub(crate) async fn status(&self) -> Status {
        self.wait_for(|record| record.outcome.as_ref().map(|outcome| outcome.status.clone()))
            .await
    }

    /// The single response of a unary-response call.
    pub(crate) async fn unary_response(&self) -> Result<Bytes, RpcError> {
        self.wait_for(|record| {
            let outcome = record.outcome.as_ref()?;
            if !outcome.status.is_ok() {
                return Some(Err(RpcError::Status(outcome.status.clone())));
            }
            Some(
                record
                    .responses
                    .pop_front()
                    .ok_or_else(|| RpcError::internal("server sent no response message")),
            )
        })
        .await
    }

    /// The next streamed response, or `None` after a successful end.
    pub(crate) async fn next_message(&self) -> Result<Option<Bytes>, RpcError> {
        self.wait_for(|record| {
            if let Some(payload) = record.responses.pop_front() {
                return Some(Ok(Some(payload)));
            }
            let outcome = record.outcome.as_ref()?;
            if outcome.status.is_ok() {
                Some(Ok(None))
            } else {
                Some(Err(RpcError::Status(outcome.status.clone())))
            }
        })
        .await
    }

    fn take_responses(self: &Arc<Self>) -> Result<ResponseStream, RpcError> {
        if self.responses_taken.swap(true, Ordering::SeqCst) {
            return Err(RpcError::usage("responses() may only be taken once"));
        }
        Ok(ResponseStream::new(Arc::clone(self)))
    }
}

impl std::fmt::Debug for CallCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallCore")
            .field("call_id", &self.call_id)
            .field("method", &self.method)
            .field("shape", &self.shape)
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

/// The streamed responses of a call.
///
/// Yields responses in the order the server produced them. A failed call
/// yields one error item and then ends.
pub struct ResponseStream {
    inner: BoxStream<'static, Result<Bytes, RpcError>>,
}

impl ResponseStream {
    fn new(core: Arc<CallCore>) -> Self {
        let inner = futures::stream::unfold(Some(core), |core| async move {
            let core = core?;
            match core.next_message().await {
                Ok(Some(payload)) => Some((Ok(payload), Some(core))),
                Ok(None) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
        .boxed();
        Self { inner }
    }
}

impl Stream for ResponseStream {
    type Item = Result<Bytes, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream").finish_non_exhaustive()
    }
}

/// Accessors shared by every call handle.
macro_rules! impl_call_accessors {
    ($($handle:ident),+ $(,)?) => {
        $(
            impl $handle {
                pub(crate) const fn from_core(core: Arc<CallCore>) -> Self {
                    Self { core }
                }

                /// The call identifier on this channel.
                #[must_use]
                pub fn call_id(&self) -> CallId {
                    self.core.call_id
                }

                /// The method path of the call.
                #[must_use]
                pub fn method(&self) -> &str {
                    &self.core.method
                }

                /// Initial metadata sent by the server.
                ///
                /// Suspends until the server sends it, the first response
                /// arrives, or the call ends. Calls that end without initial
                /// metadata report it as empty.
                pub async fn initial_metadata(&self) -> Metadata {
                    self.core.initial_metadata().await
                }

                /// Trailing metadata sent by the server. Suspends until the
                /// call ends.
                pub async fn trailing_metadata(&self) -> Metadata {
                    self.core.trailing_metadata().await
                }

                /// The terminal status. Suspends until the call ends.
                pub async fn status(&self) -> Status {
                    self.core.status().await
                }

                /// The terminal status code. Suspends until the call ends.
                pub async fn code(&self) -> Code {
                    self.core.status().await.code
                }

                /// Cancel the call.
                ///
                /// Returns `true` if the call was still active. Pending and
                /// later accessors then report `CANCELLED`.
                pub fn cancel(&self) -> bool {
                    self.core.cancel()
                }

                /// Whether the call has ended.
                #[must_use]
                pub fn is_done(&self) -> bool {
                    self.core.is_done()
                }
            }

            impl std::fmt::Debug for $handle {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.debug_tuple(stringify!($handle)).field(&self.core).finish()
                }
            }
        )+
    };
}

/// A unary-unary call.
pub struct UnaryCall {
    core: Arc<CallCore>,
}

impl UnaryCall {
    /// The response. Suspends until the call ends.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Status`] with the terminal status if the call did
    /// not end with `OK`.
    pub async fn response(&self) -> Result<Bytes, RpcError> {
        self.core.unary_response().await
    }
}

/// A unary-stream call.
pub struct ServerStreamingCall {
    core: Arc<CallCore>,
}

impl ServerStreamingCall {
    /// The next response, or `None` once the call ends with `OK`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Status`] once buffered responses are drained if the
    /// call ended with a non-OK status.
    pub async fn message(&self) -> Result<Option<Bytes>, RpcError> {
        self.core.next_message().await
    }

    /// Take the responses as a [`Stream`].
    ///
    /// # Errors
    ///
    /// Returns a usage error if the responses were already taken.
    pub fn responses(&self) -> Result<ResponseStream, RpcError> {
        self.core.take_responses()
    }
}

/// A stream-unary call.
pub struct ClientStreamingCall {
    core: Arc<CallCore>,
}

impl ClientStreamingCall {
    /// Send one request. Suspends while the transport is full.
    ///
    /// # Errors
    ///
    /// Returns a usage error after [`done_writing`](Self::done_writing), and
    /// the terminal status if the call already ended.
    pub async fn write(&self, request: impl Into<Bytes>) -> Result<(), RpcError> {
        self.core.write(request.into()).await
    }

    /// Signal that no more requests follow. Idempotent.
    pub async fn done_writing(&self) -> Result<(), RpcError> {
        self.core.done_writing().await
    }

    /// The response. Suspends until the call ends.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Status`] with the terminal status if the call did
    /// not end with `OK`.
    pub async fn response(&self) -> Result<Bytes, RpcError> {
        self.core.unary_response().await
    }
}

/// A stream-stream call.
pub struct BidiStreamingCall {
    core: Arc<CallCore>,
}

impl BidiStreamingCall {
    /// Send one request. Suspends while the transport is full.
    ///
    /// # Errors
    ///
    /// Returns a usage error after [`done_writing`](Self::done_writing), and
    /// the terminal status if the call already ended.
    pub async fn write(&self, request: impl Into<Bytes>) -> Result<(), RpcError> {
        self.core.write(request.into()).await
    }

    /// Signal that no more requests follow. Idempotent.
    pub async fn done_writing(&self) -> Result<(), RpcError> {
        self.core.done_writing().await
    }

    /// The next response, or `None` once the call ends with `OK`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Status`] once buffered responses are drained if the
    /// call ended with a non-OK status.
    pub async fn message(&self) -> Result<Option<Bytes>, RpcError> {
        self.core.next_message().await
    }

    /// Take the responses as a [`Stream`].
    ///
    /// # Errors
    ///
    /// Returns a usage error if the responses were already taken.
    pub fn responses(&self) -> Result<ResponseStream, RpcError> {
        self.core.take_responses()
    }
}

impl_call_accessors!(UnaryCall, ServerStreamingCall, ClientStreamingCall, BidiStreamingCall);

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rpckit_transport::runtime::{Receiver, channel};
    use tokio_test::{assert_pending, assert_ready, task};

    fn core(shape: CallShape) -> (Arc<CallCore>, Receiver<Frame>) {
        let (tx, rx) = channel(8);
        (Arc::new(CallCore::new(CallId(1), "/test/Method", shape, tx)), rx)
    }

    fn trailers(code: Code, trailing: Metadata) -> ServerFrame {
        ServerFrame::Trailers {
            status: Status::new(code, ""),
            metadata: trailing,
        }
    }

    #[test]
    fn test_accessors_pending_until_frames_arrive() {
        let (core, _rx) = core(CallShape::UnaryUnary);
        let call = UnaryCall::from_core(Arc::clone(&core));

        let mut initial = task::spawn(call.initial_metadata());
        let mut status = task::spawn(call.status());
        assert_pending!(initial.poll());
        assert_pending!(status.poll());

        let headers = Metadata::new().with("server-to-client", "going").unwrap();
        assert!(!core.deliver(ServerFrame::Headers(headers.clone())));
        assert!(initial.is_woken());
        assert_eq!(assert_ready!(initial.poll()), headers);
        assert_pending!(status.poll());

        assert!(core.deliver(trailers(Code::Ok, Metadata::new())));
        assert!(assert_ready!(status.poll()).is_ok());
    }

    #[tokio::test]
    async fn test_unary_response_after_trailers() {
        let (core, _rx) = core(CallShape::UnaryUnary);
        let trailing = Metadata::new().with("server-to-client-trailing", "completed").unwrap();

        core.deliver(ServerFrame::Headers(Metadata::new()));
        core.deliver(ServerFrame::Message(Bytes::from_static(b"\x00\x00\x00")));
        core.deliver(trailers(Code::Ok, trailing.clone()));

        let call = UnaryCall::from_core(core);
        assert_eq!(call.response().await.unwrap(), Bytes::from_static(b"\x00\x00\x00"));
        assert_eq!(call.trailing_metadata().await, trailing);
        assert_eq!(call.code().await, Code::Ok);
        assert!(call.is_done());
    }

    #[tokio::test]
    async fn test_trailers_only_reports_empty_initial_metadata() {
        let (core, _rx) = core(CallShape::UnaryStream);
        core.deliver(trailers(Code::Unimplemented, Metadata::new()));

        let call = ServerStreamingCall::from_core(core);
        assert!(call.initial_metadata().await.is_empty());
        let err = call.message().await.unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[tokio::test]
    async fn test_messages_before_failure_are_delivered() {
        let (core, _rx) = core(CallShape::StreamStream);
        core.deliver(ServerFrame::Message(Bytes::from_static(b"a")));
        core.deliver(trailers(Code::Internal, Metadata::new()));

        let call = BidiStreamingCall::from_core(core);
        assert_eq!(call.message().await.unwrap(), Some(Bytes::from_static(b"a")));
        assert_eq!(call.message().await.unwrap_err().code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_responses_taken_once() {
        let (core, _rx) = core(CallShape::UnaryStream);
        let call = ServerStreamingCall::from_core(Arc::clone(&core));

        let stream = call.responses().unwrap();
        assert!(matches!(call.responses(), Err(RpcError::Usage { .. })));

        core.deliver(ServerFrame::Message(Bytes::from_static(b"1")));
        core.deliver(ServerFrame::Message(Bytes::from_static(b"2")));
        core.deliver(trailers(Code::Ok, Metadata::new()));

        let collected: Vec<_> = stream.map(Result::unwrap).collect().await;
        assert_eq!(collected, vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]);
    }

    #[tokio::test]
    async fn test_failed_stream_yields_one_error() {
        let (core, _rx) = core(CallShape::UnaryStream);
        core.deliver(trailers(Code::Unknown, Metadata::new()));

        let call = ServerStreamingCall::from_core(core);
        let items: Vec<_> = call.responses().unwrap().collect().await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    #[tokio::test]
    async fn test_cancel_sends_cancel_frame_once() {
        let (core, mut rx) = core(CallShape::StreamStream);
        let call = BidiStreamingCall::from_core(Arc::clone(&core));

        assert!(call.cancel());
        assert!(!call.cancel());
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(
            rx.recv().await,
            Some(Frame::request(CallId(1), ClientFrame::Cancel))
        );

        // Frames arriving after a local cancel are ignored.
        assert!(core.deliver(ServerFrame::Message(Bytes::from_static(b"late"))));
        assert_eq!(call.message().await.unwrap_err().code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_waits_for_room_in_a_full_queue() {
        let (tx, mut rx) = channel(1);
        let queued = Frame::request(CallId(1), ClientFrame::HalfClose);
        tx.try_send(queued.clone()).unwrap();
        let core = Arc::new(CallCore::new(CallId(1), "/test/Method", CallShape::StreamStream, tx));
        let call = BidiStreamingCall::from_core(core);

        assert!(call.cancel());
        assert_eq!(call.code().await, Code::Cancelled);
        assert_eq!(rx.recv().await, Some(queued));
        assert_eq!(
            rx.recv().await,
            Some(Frame::request(CallId(1), ClientFrame::Cancel))
        );
    }

    #[tokio::test]
    async fn test_cancel_after_router_stopped() {
        let (core, rx) = core(CallShape::UnaryStream);
        drop(rx);
        let call = ServerStreamingCall::from_core(core);

        assert!(call.cancel());
        assert_eq!(call.code().await, Code::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiters() {
        let (core, _rx) = core(CallShape::StreamUnary);
        let call = Arc::new(ClientStreamingCall::from_core(core));

        let waiter = {
            let call = Arc::clone(&call);
            tokio::spawn(async move { call.response().await })
        };
        tokio::task::yield_now().await;
        call.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_write_after_done_writing_fails() {
        let (core, mut rx) = core(CallShape::StreamUnary);
        let call = ClientStreamingCall::from_core(core);

        call.write(Bytes::from_static(b"\x01")).await.unwrap();
        call.done_writing().await.unwrap();
        call.done_writing().await.unwrap();

        let err = call.write(Bytes::from_static(b"\x02")).await.unwrap_err();
        assert!(matches!(err, RpcError::Usage { .. }));

        assert_eq!(
            rx.recv().await,
            Some(Frame::request(CallId(1), ClientFrame::Message(Bytes::from_static(b"\x01"))))
        );
        assert_eq!(
            rx.recv().await,
            Some(Frame::request(CallId(1), ClientFrame::HalfClose))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_after_failure_reports_status() {
        let (core, _rx) = core(CallShape::StreamStream);
        core.deliver(trailers(Code::PermissionDenied, Metadata::new()));

        let call = BidiStreamingCall::from_core(core);
        let err = call.write(Bytes::new()).await.unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn test_unary_response_missing_is_internal() {
        let (core, _rx) = core(CallShape::UnaryUnary);
        core.deliver(trailers(Code::Ok, Metadata::new()));

        let call = UnaryCall::from_core(core);
        assert_eq!(call.response().await.unwrap_err().code(), Code::Internal);
    }
}
