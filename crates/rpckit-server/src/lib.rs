//! Server implementation for rpckit.
//!
//! This crate serves calls of all four shapes over any
//! [`Transport`](rpckit_transport::Transport). Handlers receive a
//! [`CallContext`] through which they read invocation metadata, send initial
//! metadata, and set trailing metadata.
//!
//! # Overview
//!
//! Building a server involves:
//!
//! 1. Registering handlers in a [`MethodRegistry`], or writing a custom
//!    [`GenericHandler`] that resolves calls itself
//! 2. Using [`ServerBuilder`] to collect providers and configuration
//! 3. Running [`Server::serve`] on a transport
//!
//! # Example
//!
//! ```rust
//! use rpckit_server::{CallContext, MethodRegistry, ServerBuilder};
//! use bytes::Bytes;
//!
//! let methods = MethodRegistry::new().unary_unary(
//!     "/test/UnaryUnary",
//!     |request: Bytes, ctx: CallContext| async move {
//!         ctx.set_trailing_metadata([("server-to-client-trailing", "completed")])?;
//!         Ok(request)
//!     },
//! );
//!
//! let server = ServerBuilder::new().add_generic_handler(methods).build();
//! assert_eq!(server.dispatcher().len(), 1);
//! ```
//!
//! # Call lifecycle
//!
//! Every call ends with exactly one trailers frame carrying the status and
//! the trailing metadata. Initial metadata always precedes the first response
//! payload; if the handler never sends it, empty initial metadata is sent
//! for it. A handler that fails before producing any payload produces a
//! trailers-only response.

#![deny(missing_docs)]

pub mod builder;
pub mod context;
mod executor;
pub mod handler;
pub mod router;
pub mod server;

// Re-export commonly used types
pub use builder::{Server, ServerBuilder, ServerConfig};
pub use context::{CallContext, CallPhase, InitialMetadataState, NoOpPeer, Peer};
pub use handler::{MethodHandler, RequestStream, ResponseSink};
pub use router::{
    Dispatcher, FnHandler, GenericHandler, HandlerCallDetails, MethodRegistry, generic_handler,
};
pub use server::{ServerRuntime, ServerState, TransportPeer};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::builder::{Server, ServerBuilder, ServerConfig};
    pub use crate::context::CallContext;
    pub use crate::handler::{MethodHandler, RequestStream, ResponseSink};
    pub use crate::router::{GenericHandler, HandlerCallDetails, MethodRegistry, generic_handler};
}
