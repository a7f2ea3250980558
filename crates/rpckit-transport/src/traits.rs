//! Transport traits.
//!
//! A transport moves [`Frame`]s between one client and one server. It knows
//! nothing about calls: multiplexing by call id and the call lifecycle live in
//! the client and server crates.

use rpckit_core::protocol::Frame;
use std::future::Future;
use std::time::Instant;

/// Metadata about a transport connection.
#[derive(Debug, Clone, Default)]
pub struct TransportMetadata {
    /// Transport type identifier (e.g., "memory").
    pub transport_type: String,
    /// Remote address, if applicable.
    pub remote_addr: Option<String>,
    /// Local address, if applicable.
    pub local_addr: Option<String>,
    /// When the connection was established.
    pub connected_at: Option<Instant>,
}

impl TransportMetadata {
    /// Create new metadata for a transport type.
    #[must_use]
    pub fn new(transport_type: impl Into<String>) -> Self {
        Self {
            transport_type: transport_type.into(),
            remote_addr: None,
            local_addr: None,
            connected_at: None,
        }
    }

    /// Set the remote address.
    #[must_use]
    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Set the local address.
    #[must_use]
    pub fn local_addr(mut self, addr: impl Into<String>) -> Self {
        self.local_addr = Some(addr.into());
        self
    }

    /// Mark the connection time.
    #[must_use]
    pub fn connected_now(mut self) -> Self {
        self.connected_at = Some(Instant::now());
        self
    }

    /// Describe the remote end, e.g. `memory:peer-0`.
    #[must_use]
    pub fn peer(&self) -> String {
        match &self.remote_addr {
            Some(addr) => format!("{}:{addr}", self.transport_type),
            None => self.transport_type.clone(),
        }
    }
}

/// Core transport trait.
///
/// Transports provide bidirectional frame passing between a client and a
/// server. Implementations must be `Send + Sync`; `send` and `recv` are
/// independent and may be called from different tasks at the same time.
///
/// # Example Implementation
///
/// ```ignore
/// struct MyTransport { /* ... */ }
///
/// impl Transport for MyTransport {
///     type Error = MyError;
///
///     fn send(&self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send {
///         async move {
///             // Send the frame
///             Ok(())
///         }
///     }
///
///     fn recv(&self) -> impl Future<Output = Result<Option<Frame>, Self::Error>> + Send {
///         async move {
///             // Receive a frame, return None on EOF
///             Ok(None)
///         }
///     }
///
///     // ... other methods
/// }
/// ```
pub trait Transport: Send + Sync {
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a frame over the transport.
    ///
    /// Suspends while the transport has no capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame could not be sent (e.g., connection
    /// closed).
    fn send(&self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receive a frame from the transport.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    ///
    /// # Errors
    ///
    /// Returns an error if receiving failed.
    fn recv(&self) -> impl Future<Output = Result<Option<Frame>, Self::Error>> + Send;

    /// Close the transport connection.
    ///
    /// Pending and future `recv` calls on both ends return `Ok(None)` once
    /// already-buffered frames are drained.
    ///
    /// # Errors
    ///
    /// Returns an error if the close operation failed.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Check if the transport is still connected.
    fn is_connected(&self) -> bool;

    /// Get metadata about the transport.
    fn metadata(&self) -> TransportMetadata;
}
