//! # rpckit-core
//!
//! Core types for the rpckit call layer.
//!
//! This crate provides the runtime-independent building blocks:
//!
//! - **Metadata**: validated, ordered key/value collections with text and
//!   binary values
//! - **Status**: the closed set of terminal status codes
//! - **Error handling**: unified `RpcError` type with rich diagnostics
//! - **Protocol**: call identifiers, call shapes and the frames a call is
//!   made of
//!
//! This crate does not depend on any async runtime.
//!
//! # Example
//!
//! ```rust
//! use rpckit_core::{Metadata, MetadataValue, RpcError, Status};
//!
//! let metadata = Metadata::try_from_pairs([
//!     ("server-to-client", MetadataValue::from("going")),
//!     ("server-to-client-bin", MetadataValue::from(b"\x08\x08\x08")),
//! ])?;
//! assert_eq!(metadata.len(), 2);
//!
//! let err = RpcError::handler("oops");
//! assert_eq!(err.to_status().code, rpckit_core::Code::Unknown);
//! assert!(Status::ok().is_ok());
//! # Ok::<(), rpckit_core::metadata::InvalidMetadata>(())
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod metadata;
pub mod protocol;
pub mod status;

// Re-export commonly used types at the crate root
pub use error::{RpcError, TransportContext, TransportErrorKind};
pub use metadata::{
    seen_subset, InvalidMetadata, IntoMetadata, Metadata, MetadataEntry, MetadataValue,
};
pub use protocol::{CallId, CallShape, ClientFrame, Frame, ServerFrame};
pub use status::{Code, Status};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use rpckit_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::RpcError;
    pub use crate::metadata::{seen_subset, IntoMetadata, Metadata, MetadataValue};
    pub use crate::protocol::CallShape;
    pub use crate::status::{Code, Status};
}
