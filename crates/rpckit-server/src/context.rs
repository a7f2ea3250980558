//! Per-call context for handlers.
//!
//! A [`CallContext`] is created when a call starts and handed to the handler.
//! It exposes the invocation metadata and lets the handler send initial
//! metadata and set trailing metadata.
//!
//! # Key Features
//!
//! - **Initial metadata** is sent at most once. If the handler never sends
//!   it, empty initial metadata goes out before the first response.
//! - **Trailing metadata** can be replaced any number of times; the last
//!   value is sent with the terminal status.
//! - **Cancellation**: handlers can poll or await cancellation of the call.
//!
//! # Example
//!
//! ```rust
//! use rpckit_core::metadata::Metadata;
//! use rpckit_core::protocol::CallId;
//! use rpckit_server::{CallContext, NoOpPeer};
//! use std::sync::Arc;
//!
//! let ctx = CallContext::new(
//!     CallId(1),
//!     "/test/UnaryUnary",
//!     Metadata::new().with("client-to-server", "question").unwrap(),
//!     Arc::new(NoOpPeer),
//!     None,
//! );
//!
//! assert_eq!(ctx.method(), "/test/UnaryUnary");
//! assert!(ctx.invocation_metadata().contains_key("client-to-server"));
//! assert!(!ctx.is_cancelled());
//! ```

use futures::future::BoxFuture;
use rpckit_core::error::RpcError;
use rpckit_core::metadata::{IntoMetadata, Metadata};
use rpckit_core::protocol::{CallId, Frame, ServerFrame};
use rpckit_core::status::Status;
use rpckit_transport::runtime::{AsyncMutex, CancellationToken};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Trait for sending frames back to the client.
///
/// This trait abstracts over the transport layer so a context can be driven
/// without knowing the underlying transport.
pub trait Peer: Send + Sync {
    /// Send a frame to the client.
    fn send(&self, frame: Frame) -> BoxFuture<'_, Result<(), RpcError>>;

    /// Describe the remote end, e.g. `memory:peer-0`.
    fn describe(&self) -> String;
}

/// A peer that accepts all frames without sending them anywhere.
#[derive(Debug, Clone, Copy)]
pub struct NoOpPeer;

impl Peer for NoOpPeer {
    fn send(&self, _frame: Frame) -> BoxFuture<'_, Result<(), RpcError>> {
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}

/// Whether a call's initial metadata has gone out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialMetadataState {
    /// Nothing sent yet.
    NotSent,
    /// Initial metadata was sent, explicitly or implicitly.
    Sent,
}

/// Where a call is in its lifecycle.
///
/// The phase follows the response side and only moves forward. Request
/// consumption interleaves with it, so it is counted separately by
/// [`CallContext::requests_received`]; a call reports `ReceivingRequests`
/// only until it sends anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallPhase {
    /// The call was accepted and its handler started.
    Received,
    /// The handler has consumed at least one streamed request.
    ReceivingRequests,
    /// Initial metadata has been sent.
    SentInitialMetadata,
    /// At least one streamed response has been sent.
    Streaming,
    /// The terminal status has been sent.
    Completed,
}

/// Context for one call, shared between the handler and the executor.
///
/// Cloning is cheap; all clones refer to the same call.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<CallInner>,
}

struct CallInner {
    call_id: CallId,
    method: String,
    invocation_metadata: Metadata,
    peer: Arc<dyn Peer>,
    // Held across the Headers send so nothing overtakes it.
    initial: AsyncMutex<InitialMetadataState>,
    trailing: Mutex<Metadata>,
    phase: Mutex<CallPhase>,
    requests_received: AtomicUsize,
    cancel: CancellationToken,
    cancel_status: Mutex<Option<Status>>,
    deadline: Option<Instant>,
}

impl CallContext {
    /// Create a context for a call.
    #[must_use]
    pub fn new(
        call_id: CallId,
        method: impl Into<String>,
        invocation_metadata: Metadata,
        peer: Arc<dyn Peer>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(CallInner {
                call_id,
                method: method.into(),
                invocation_metadata,
                peer,
                initial: AsyncMutex::new(InitialMetadataState::NotSent),
                trailing: Mutex::new(Metadata::new()),
                phase: Mutex::new(CallPhase::Received),
                requests_received: AtomicUsize::new(0),
                cancel: CancellationToken::new(),
                cancel_status: Mutex::new(None),
                deadline: timeout.map(|t| Instant::now() + t),
            }),
        }
    }

    /// The call identifier.
    #[must_use]
    pub fn call_id(&self) -> CallId {
        self.inner.call_id
    }

    /// The method path of the call.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Metadata the client sent with the call.
    #[must_use]
    pub fn invocation_metadata(&self) -> &Metadata {
        &self.inner.invocation_metadata
    }

    /// Description of the client connection.
    #[must_use]
    pub fn peer(&self) -> String {
        self.inner.peer.describe()
    }

    /// Send initial metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::DuplicateInitialMetadata`] if initial metadata was
    /// already sent, explicitly or because a response went out first, and
    /// [`RpcError::InvalidMetadata`] if `metadata` fails validation.
    pub async fn send_initial_metadata(&self, metadata: impl IntoMetadata) -> Result<(), RpcError> {
        let metadata = metadata.into_metadata()?;
        let mut state = self.inner.initial.lock().await;
        if *state == InitialMetadataState::Sent {
            return Err(RpcError::duplicate_initial_metadata(self.method()));
        }
        self.send_headers(metadata).await?;
        *state = InitialMetadataState::Sent;
        Ok(())
    }

    /// Send empty initial metadata unless some was already sent.
    pub(crate) async fn ensure_initial_metadata_sent(&self) -> Result<(), RpcError> {
        let mut state = self.inner.initial.lock().await;
        if *state == InitialMetadataState::NotSent {
            self.send_headers(Metadata::new()).await?;
            *state = InitialMetadataState::Sent;
        }
        Ok(())
    }

    async fn send_headers(&self, metadata: Metadata) -> Result<(), RpcError> {
        tracing::trace!(call_id = %self.call_id(), entries = metadata.len(), "Sending initial metadata");
        self.send_frame(ServerFrame::Headers(metadata)).await?;
        self.advance(CallPhase::SentInitialMetadata);
        Ok(())
    }

    /// Replace the trailing metadata sent with the terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidMetadata`] if `metadata` fails validation;
    /// the previous trailing metadata is kept in that case.
    pub fn set_trailing_metadata(&self, metadata: impl IntoMetadata) -> Result<(), RpcError> {
        let metadata = metadata.into_metadata()?;
        *self
            .inner
            .trailing
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = metadata;
        Ok(())
    }

    /// The trailing metadata currently set.
    #[must_use]
    pub fn trailing_metadata(&self) -> Metadata {
        self.inner
            .trailing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        let phase = *self.inner.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase == CallPhase::Received && self.requests_received() > 0 {
            CallPhase::ReceivingRequests
        } else {
            phase
        }
    }

    /// Number of streamed requests the handler has consumed.
    #[must_use]
    pub fn requests_received(&self) -> usize {
        self.inner.requests_received.load(Ordering::SeqCst)
    }

    pub(crate) fn record_request(&self) {
        self.inner.requests_received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn advance(&self, to: CallPhase) {
        let mut phase = self.inner.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if to > *phase {
            *phase = to;
        }
    }

    /// Check if the call has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Wait until the call is cancelled.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// The cancellation token for this call.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Time left before the client's deadline, if the client set one.
    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Cancel the call, recording the status it terminates with.
    ///
    /// Only the first cancellation is recorded.
    pub(crate) fn cancel_with(&self, status: Status) {
        let mut slot = self
            .inner
            .cancel_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(status);
        }
        drop(slot);
        self.inner.cancel.cancel();
    }

    /// The error a cancelled call terminates with.
    pub(crate) fn cancellation_error(&self) -> RpcError {
        self.inner
            .cancel_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .map_or_else(|| RpcError::cancelled("call cancelled"), RpcError::Status)
    }

    pub(crate) async fn send_frame(&self, frame: ServerFrame) -> Result<(), RpcError> {
        self.inner
            .peer
            .send(Frame::response(self.call_id(), frame))
            .await
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("call_id", &self.inner.call_id)
            .field("method", &self.inner.method)
            .field("invocation_metadata", &self.inner.invocation_metadata)
            .field("phase", &self.phase())
            .field("is_cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
