//! In-memory transport.
//!
//! Connects a client and a server living in the same process through a pair
//! of bounded channels. Used by the test suites and for in-process services.
//!
//! # Example
//!
//! ```rust
//! use rpckit_transport::{MemoryTransport, Transport};
//!
//! // Create a pair of connected transports
//! let (client_transport, server_transport) = MemoryTransport::pair();
//!
//! // Both transports are connected
//! assert!(client_transport.is_connected());
//! assert!(server_transport.is_connected());
//! ```

use crate::error::TransportError;
use crate::runtime::AsyncMutex;
use crate::traits::{Transport, TransportMetadata};
use futures::channel::mpsc;
use rpckit_core::protocol::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default number of frames buffered in each direction.
pub const DEFAULT_CAPACITY: usize = 32;

/// An in-memory transport using channels.
///
/// `send` suspends while the peer's buffer is full, which gives callers real
/// backpressure. Closing or dropping either end ends both directions.
pub struct MemoryTransport {
    sender: mpsc::Sender<Frame>,
    // Handle on our own inbound channel, kept only so `close` can end it.
    inbox: mpsc::Sender<Frame>,
    receiver: AsyncMutex<mpsc::Receiver<Frame>>,
    connected: Arc<AtomicBool>,
    metadata: TransportMetadata,
}

impl MemoryTransport {
    /// Create a connected pair of memory transports.
    ///
    /// Frames sent on the first transport are received on the second,
    /// and vice versa.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        Self::pair_with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a connected pair with a specific buffer capacity.
    #[must_use]
    pub fn pair_with_capacity(capacity: usize) -> (Self, Self) {
        let (tx1, rx1) = mpsc::channel(capacity);
        let (tx2, rx2) = mpsc::channel(capacity);

        let connected1 = Arc::new(AtomicBool::new(true));
        let connected2 = Arc::clone(&connected1);

        let transport1 = Self {
            sender: tx2.clone(),
            inbox: tx1.clone(),
            receiver: AsyncMutex::new(rx1),
            connected: connected1,
            metadata: TransportMetadata::new("memory")
                .remote_addr("peer-1")
                .local_addr("peer-0")
                .connected_now(),
        };

        let transport2 = Self {
            sender: tx1,
            inbox: tx2,
            receiver: AsyncMutex::new(rx2),
            connected: connected2,
            metadata: TransportMetadata::new("memory")
                .remote_addr("peer-0")
                .local_addr("peer-1")
                .connected_now(),
        };

        (transport1, transport2)
    }

    fn shutdown(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::trace!(local = ?self.metadata.local_addr, "memory transport closed");
        }
        // Closing from any sender handle closes the channel for all of them.
        self.sender.clone().close_channel();
        self.inbox.clone().close_channel();
    }
}

impl Transport for MemoryTransport {
    type Error = TransportError;

    async fn send(&self, frame: Frame) -> Result<(), Self::Error> {
        use futures::SinkExt;

        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut sender = self.sender.clone();
        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Option<Frame>, Self::Error> {
        use futures::StreamExt;

        let mut receiver = self.receiver.lock().await;
        if let Some(frame) = receiver.next().await {
            Ok(Some(frame))
        } else {
            self.connected.store(false, Ordering::SeqCst);
            Ok(None)
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.shutdown();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn metadata(&self) -> TransportMetadata {
        self.metadata.clone()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Tests
// =============================================================================
