//! Prelude module for convenient imports.
//!
//! ```rust
//! use rpckit::prelude::*;
//!
//! let metadata = Metadata::new().with("client-to-server", "question").unwrap();
//! assert!(seen_subset(&metadata, &metadata));
//! ```
//!
//! ## Included Types
//!
//! - Core: `Metadata`, `MetadataValue`, `IntoMetadata`, `Status`, `Code`,
//!   `RpcError`, `CallShape`
//! - Server: `ServerBuilder`, `Server`, `MethodRegistry`, `CallContext`,
//!   the request and response stream types
//! - Client: `Channel`, `CallOptions` and the call handles
//! - Transport: `Transport`, `MemoryTransport`

// Core types
pub use rpckit_core::prelude::*;

// Server types
#[cfg(feature = "server")]
pub use rpckit_server::{
    CallContext, GenericHandler, HandlerCallDetails, MethodHandler, MethodRegistry,
    RequestStream, ResponseSink, Server, ServerBuilder, generic_handler,
};

// Client types
#[cfg(feature = "client")]
pub use rpckit_client::{
    BidiStreamingCall, CallOptions, Channel, ChannelBuilder, ClientStreamingCall,
    ServerStreamingCall, UnaryCall,
};

// Transport types
pub use rpckit_transport::{MemoryTransport, Transport};
