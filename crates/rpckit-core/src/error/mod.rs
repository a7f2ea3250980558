//! Unified error handling for rpckit.
//!
//! All fallible operations return [`RpcError`]. Each variant maps onto one of
//! the wire status codes, so a server can always turn a failure into a
//! terminal status and a client can always surface one.
//!
//! | Variant | Status code |
//! |---------|-------------|
//! | `InvalidMetadata`, `DuplicateInitialMetadata`, `Usage`, `Internal` | `INTERNAL` |
//! | `Unimplemented` | `UNIMPLEMENTED` |
//! | `Handler` | `UNKNOWN` |
//! | `Cancelled` | `CANCELLED` |
//! | `Status(s)` | `s.code` |
//! | `Transport` | `UNAVAILABLE` |
//!
//! A handler that wants a specific code returns [`RpcError::status`]:
//!
//! ```rust
//! use rpckit_core::error::RpcError;
//! use rpckit_core::status::Code;
//!
//! fn lookup(id: u32) -> Result<String, RpcError> {
//!     if id == 0 {
//!         return Err(RpcError::status(Code::InvalidArgument, "id must be non-zero"));
//!     }
//!     Ok(format!("user-{id}"))
//! }
//!
//! assert_eq!(lookup(0).unwrap_err().code(), Code::InvalidArgument);
//! ```

mod details;
mod transport;
mod types;

pub use details::{BoxError, TransportDetails};
pub use transport::{TransportContext, TransportErrorKind};
pub use types::RpcError;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InvalidMetadata;
    use crate::protocol::CallId;
    use crate::status::{Code, Status};

    #[test]
    fn test_error_size_is_small() {
        let size = std::mem::size_of::<RpcError>();
        assert!(
            size <= 64,
            "RpcError is {size} bytes, should be <= 64 bytes. Consider boxing more variants."
        );

        let result_size = std::mem::size_of::<Result<(), RpcError>>();
        assert!(
            result_size <= 72,
            "Result<(), RpcError> is {result_size} bytes, should be <= 72 bytes."
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            RpcError::from(InvalidMetadata::NotASequence).code(),
            Code::Internal
        );
        assert_eq!(
            RpcError::duplicate_initial_metadata("/svc/M").code(),
            Code::Internal
        );
        assert_eq!(RpcError::usage("test").code(), Code::Internal);
        assert_eq!(RpcError::internal("test").code(), Code::Internal);
        assert_eq!(RpcError::unimplemented("/svc/M").code(), Code::Unimplemented);
        assert_eq!(RpcError::handler("boom").code(), Code::Unknown);
        assert_eq!(RpcError::cancelled("client").code(), Code::Cancelled);
        assert_eq!(
            RpcError::status(Code::PermissionDenied, "no").code(),
            Code::PermissionDenied
        );
    }

    #[test]
    fn test_to_status_preserves_explicit_status() {
        let status = Status::deadline_exceeded("too slow");
        let err = RpcError::from(status.clone());
        assert_eq!(err.to_status(), status);
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_to_status_carries_message() {
        let status = RpcError::handler("division by zero").to_status();
        assert_eq!(status.code, Code::Unknown);
        assert!(status.details.contains("division by zero"));

        let status = RpcError::cancelled("cancelled by client").to_status();
        assert_eq!(status, Status::cancelled("cancelled by client"));
    }

    fn closed_transport() -> RpcError {
        RpcError::Transport(Box::new(TransportDetails {
            kind: TransportErrorKind::ConnectionClosed,
            message: "Connection closed".to_string(),
            context: TransportContext::default(),
            source: None,
        }))
    }

    #[test]
    fn test_transport_error_code() {
        assert_eq!(closed_transport().code(), Code::Unavailable);
        assert_eq!(
            closed_transport().to_string(),
            "Transport error (connection closed): Connection closed"
        );
    }

    #[test]
    fn test_transport_context_display() {
        let err = closed_transport().with_transport_context(
            TransportContext::new("memory")
                .with_peer("memory:server")
                .with_call(CallId(7)),
        );
        assert_eq!(
            err.to_string(),
            "Transport error (connection closed) on memory to memory:server (call #7): Connection closed"
        );
        if let RpcError::Transport(details) = &err {
            assert_eq!(details.context.call_id, Some(CallId(7)));
        }
    }

    #[test]
    fn test_transport_context_ignored_for_other_errors() {
        let err = RpcError::handler("boom").with_transport_context(TransportContext::new("memory"));
        assert!(matches!(err, RpcError::Handler { .. }));
    }
}
