//! # rpckit - metadata-carrying RPC calls
//!
//! A call layer where every call carries metadata in both directions:
//! invocation metadata from the client, initial metadata before the first
//! response, and trailing metadata alongside the final status.
//!
//! ## Features
//!
//! - **Four call shapes**: unary-unary, unary-stream, stream-unary and
//!   stream-stream
//! - **Validated metadata** with text and binary (`-bin`) values
//! - **Composable dispatch** through an ordered list of generic handlers
//! - **Cancellation and deadlines** that reach the handler
//! - **Rich error handling** with miette diagnostics
//!
//! ## Quick Start
//!
//! ```rust
//! use rpckit::prelude::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), RpcError> {
//! let methods = MethodRegistry::new().unary_unary(
//!     "/test/Echo",
//!     |request: Bytes, ctx: CallContext| async move {
//!         ctx.send_initial_metadata([("server-to-client", "answer")]).await?;
//!         ctx.set_trailing_metadata([("a-trailing-metadata", "done")])?;
//!         Ok(request)
//!     },
//! );
//! let server = ServerBuilder::new().add_generic_handler(methods).build();
//!
//! let (client_end, server_end) = MemoryTransport::pair();
//! tokio::spawn(async move { server.serve(server_end).await });
//! let channel = Channel::connect(client_end);
//!
//! let options = CallOptions::new().try_metadata([("client-to-server", "question")])?;
//! let call = channel.unary_unary("/test/Echo").call(&b"ping"[..], options).await?;
//!
//! assert_eq!(call.response().await?, Bytes::from_static(b"ping"));
//! assert!(call.initial_metadata().await.contains_key("server-to-client"));
//! assert!(call.trailing_metadata().await.contains_key("a-trailing-metadata"));
//! assert_eq!(call.code().await, Code::Ok);
//! # Ok(())
//! # }
//! ```
//!
//! ## Crate Organization
//!
//! - [`rpckit_core`] - Metadata, status and frame types (no async runtime)
//! - [`rpckit_transport`] - Transport abstraction and in-memory transport
//! - [`mod@rpckit_server`] - Dispatch, call context and handler execution
//! - [`rpckit_client`] - Channels and call handles

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

// Re-export all public items from core
pub use rpckit_core::*;

// Re-export server types
#[cfg(feature = "server")]
pub use rpckit_server::{
    CallContext, CallPhase, GenericHandler, HandlerCallDetails, MethodHandler, MethodRegistry,
    RequestStream, ResponseSink, Server, ServerBuilder, ServerConfig, generic_handler,
};

// Re-export client types
#[cfg(feature = "client")]
pub use rpckit_client::{
    BidiStreamingCall, CallOptions, Channel, ChannelBuilder, ChannelConfig, ClientStreamingCall,
    ResponseStream, ServerStreamingCall, UnaryCall,
};

// Re-export transport types
pub use rpckit_transport::{MemoryTransport, Transport, TransportError, TransportMetadata};

pub mod prelude;

/// Server module re-exports
#[cfg(feature = "server")]
pub mod server {
    //! Server implementation types.
    pub use rpckit_server::*;
}

/// Transport module re-exports
pub mod transport {
    //! Transport layer types.
    pub use rpckit_transport::*;
}

/// Client module re-exports
#[cfg(feature = "client")]
pub mod client {
    //! Client implementation types.
    pub use rpckit_client::*;
}
