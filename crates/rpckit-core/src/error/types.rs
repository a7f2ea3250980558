//! The primary error type for rpckit.

use miette::Diagnostic;
use thiserror::Error;

use super::details::TransportDetails;
use super::transport::TransportContext;
use crate::metadata::InvalidMetadata;
use crate::status::{Code, Status};

/// The primary error type for rpckit.
///
/// Every error maps to a wire [`Status`] through [`RpcError::to_status`].
/// Large variants are boxed to keep `Result<T, RpcError>` small.
#[derive(Error, Diagnostic, Debug)]
pub enum RpcError {
    // ========================================================================
    // Metadata Errors
    // ========================================================================
    /// Metadata failed validation. Never crosses the transport.
    #[error("Invalid metadata: {0}")]
    #[diagnostic(
        code(rpc::metadata::invalid),
        help("Keys use 0-9, a-z, '_', '-' and '.'; keys ending in -bin take bytes, all others take printable ASCII")
    )]
    InvalidMetadata(#[from] InvalidMetadata),

    /// Initial metadata was sent more than once for the same call.
    #[error("Initial metadata already sent for {method}")]
    #[diagnostic(
        code(rpc::call::duplicate_initial_metadata),
        help("Send initial metadata at most once, before the first response")
    )]
    DuplicateInitialMetadata {
        /// Method path of the call.
        method: String,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// No registered handler accepted the method.
    #[error("Method not implemented: {method}")]
    #[diagnostic(code(rpc::dispatch::unimplemented))]
    Unimplemented {
        /// The method path that was requested.
        method: String,
    },

    // ========================================================================
    // Call Outcome Errors
    // ========================================================================
    /// A handler failed.
    #[error("Handler failed: {message}")]
    #[diagnostic(code(rpc::handler::failed))]
    Handler {
        /// Human-readable error message.
        message: String,
    },

    /// The call was cancelled.
    #[error("Call cancelled: {reason}")]
    #[diagnostic(code(rpc::call::cancelled))]
    Cancelled {
        /// Why the call was cancelled.
        reason: String,
    },

    /// The call terminated with an explicit non-OK status.
    #[error("Call failed with status {0}")]
    #[diagnostic(code(rpc::call::status))]
    Status(Status),

    /// The API was used in a way the call lifecycle does not allow.
    #[error("Usage error: {message}")]
    #[diagnostic(code(rpc::usage))]
    Usage {
        /// Human-readable error message.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport-level error (details boxed to reduce enum size).
    #[error("{0}")]
    #[diagnostic(code(rpc::transport::error))]
    Transport(#[source] Box<TransportDetails>),

    // ========================================================================
    // Internal Errors
    // ========================================================================
    /// An internal invariant was broken.
    #[error("Internal error: {message}")]
    #[diagnostic(code(rpc::internal), severity(error))]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

// ============================================================================
// Error Construction Helpers
// ============================================================================

impl RpcError {
    /// Create a duplicate initial metadata error.
    pub fn duplicate_initial_metadata(method: impl Into<String>) -> Self {
        Self::DuplicateInitialMetadata {
            method: method.into(),
        }
    }

    /// Create an unimplemented method error.
    pub fn unimplemented(method: impl Into<String>) -> Self {
        Self::Unimplemented {
            method: method.into(),
        }
    }

    /// Create a handler failure.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Create an error carrying an explicit status.
    pub fn status(code: Code, details: impl Into<String>) -> Self {
        Self::Status(Status::new(code, details))
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Record where a transport error was observed.
    ///
    /// Errors other than [`RpcError::Transport`] are returned unchanged.
    #[must_use]
    pub fn with_transport_context(mut self, context: TransportContext) -> Self {
        if let Self::Transport(details) = &mut self {
            details.context = context;
        }
        self
    }

    /// The status code this error terminates a call with.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidMetadata(_)
            | Self::DuplicateInitialMetadata { .. }
            | Self::Usage { .. }
            | Self::Internal { .. } => Code::Internal,
            Self::Unimplemented { .. } => Code::Unimplemented,
            Self::Handler { .. } => Code::Unknown,
            Self::Cancelled { .. } => Code::Cancelled,
            Self::Status(status) => status.code,
            Self::Transport(_) => Code::Unavailable,
        }
    }

    /// The wire status for this error.
    #[must_use]
    pub fn to_status(&self) -> Status {
        match self {
            Self::Status(status) => status.clone(),
            Self::Cancelled { reason } => Status::cancelled(reason.clone()),
            other => Status::new(other.code(), other.to_string()),
        }
    }

    /// Whether the call ended by cancellation or deadline expiry.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.code(), Code::Cancelled | Code::DeadlineExceeded)
    }
}

// ============================================================================
// Standard Error Conversions
// ============================================================================

impl From<Status> for RpcError {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}
