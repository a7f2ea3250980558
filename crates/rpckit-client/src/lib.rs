//! Client implementation for rpckit.
//!
//! This crate provides the client side of rpckit: a [`Channel`] that
//! multiplexes calls over one transport, method objects for the four call
//! shapes, and call handles through which responses, metadata and status
//! are observed.
//!
//! # Overview
//!
//! A client:
//!
//! - Connects a [`Channel`] over a transport, optionally through
//!   [`ChannelBuilder`]
//! - Binds a method path with [`Channel::unary_unary`] and friends
//! - Starts calls, passing invocation metadata in [`CallOptions`]
//! - Reads initial metadata, responses, trailing metadata and status from
//!   the call handle
//!
//! # Example
//!
//! ```rust
//! use rpckit_client::Channel;
//! use rpckit_core::metadata::Metadata;
//! use rpckit_transport::MemoryTransport;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rpckit_core::error::RpcError> {
//! let (client_end, _server_end) = MemoryTransport::pair();
//! let channel = Channel::connect(client_end);
//!
//! let metadata = Metadata::new().with("client-to-server", "question")?;
//! let call = channel
//!     .stream_unary("/test/StreamUnary")
//!     .call(metadata)
//!     .await?;
//!
//! call.write(vec![0u8; 3]).await?;
//! call.done_writing().await?;
//! assert!(!call.is_done());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod call;
pub mod channel;

// Re-export commonly used types
pub use builder::{CallOptions, ChannelBuilder, ChannelConfig};
pub use call::{BidiStreamingCall, ClientStreamingCall, ResponseStream, ServerStreamingCall, UnaryCall};
pub use channel::{Channel, StreamStream, StreamUnary, UnaryStream, UnaryUnary};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::builder::{CallOptions, ChannelBuilder, ChannelConfig};
    pub use crate::call::{
        BidiStreamingCall, ClientStreamingCall, ResponseStream, ServerStreamingCall, UnaryCall,
    };
    pub use crate::channel::Channel;
}
