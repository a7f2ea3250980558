//! Transport error types.

use rpckit_core::error::{RpcError, TransportContext, TransportDetails, TransportErrorKind};
use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Transport is not connected.
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Get the transport error kind.
    #[must_use]
    pub const fn kind(&self) -> TransportErrorKind {
        match self {
            Self::ConnectionClosed => TransportErrorKind::ConnectionClosed,
            Self::NotConnected => TransportErrorKind::ConnectionFailed,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        Self::Transport(Box::new(TransportDetails {
            kind: err.kind(),
            message: err.to_string(),
            context: TransportContext::default(),
            source: Some(Box::new(err)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpckit_core::status::Code;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            TransportError::ConnectionClosed.kind(),
            TransportErrorKind::ConnectionClosed
        );
        assert_eq!(
            TransportError::NotConnected.kind(),
            TransportErrorKind::ConnectionFailed
        );
    }

    #[test]
    fn test_rpc_error_conversion() {
        let err = TransportError::ConnectionClosed;
        let rpc_err: RpcError = err.into();

        assert_eq!(rpc_err.code(), Code::Unavailable);
        match rpc_err {
            RpcError::Transport(details) => {
                assert_eq!(details.kind, TransportErrorKind::ConnectionClosed);
                assert!(details.context.transport_type.is_none());
            }
            _ => panic!("Expected Transport error"),
        }
    }
}
