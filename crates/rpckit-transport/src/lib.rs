//! Transport abstractions for rpckit.
//!
//! A transport carries call frames between one client and one server. This
//! crate defines the [`Transport`] trait, an in-process [`MemoryTransport`],
//! transport errors, and the runtime helpers (locks, channels, timers,
//! cancellation) that the client and server crates build on.
//!
//! # Example
//!
//! ```rust
//! use rpckit_core::metadata::Metadata;
//! use rpckit_core::protocol::{CallId, ClientFrame, Frame};
//! use rpckit_transport::{MemoryTransport, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rpckit_transport::TransportError> {
//! let (client, server) = MemoryTransport::pair();
//!
//! let start = Frame::request(CallId(1), ClientFrame::start("/test/UnaryUnary", Metadata::new()));
//! client.send(start.clone()).await?;
//!
//! assert_eq!(server.recv().await?, Some(start));
//! client.close().await?;
//! assert_eq!(server.recv().await?, None);
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod error;
pub mod memory;
pub mod runtime;
pub mod traits;

// Re-export commonly used types
pub use error::TransportError;
pub use memory::MemoryTransport;
pub use runtime::CancellationToken;
pub use traits::{Transport, TransportMetadata};

// Re-export bytes for payload handling
pub use bytes::Bytes;
