//! Call framing.
//!
//! Many calls share one transport. Every [`Frame`] names the call it belongs
//! to by [`CallId`], and frames of one call are delivered in order.
//!
//! # Call lifecycle
//!
//! ```text
//! client                                   server
//!   | -- Start { method, metadata } -------> |
//!   | -- Message* -------------------------> |
//!   | -- HalfClose ------------------------> |
//!   | <------------------ Headers(metadata)  |
//!   | <----------------------------- Message*|
//!   | <------- Trailers { status, metadata } |
//! ```
//!
//! `Headers` always precedes the first response `Message`, and `Trailers`
//! is the last frame of a call. A server that rejects a call before running
//! a handler answers with `Trailers` alone. The client may send `Cancel` at
//! any point to abandon the call.
//!
//! # Example
//!
//! ```rust
//! use rpckit_core::metadata::Metadata;
//! use rpckit_core::protocol::{CallId, ClientFrame, Frame};
//!
//! let frame = Frame::request(CallId(1), ClientFrame::start("/test/UnaryUnary", Metadata::new()));
//! assert_eq!(frame.call_id(), CallId(1));
//! assert!(frame.is_request());
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::metadata::Metadata;
use crate::status::Status;

/// Identifier of a call within one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for CallId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// The four request/response cardinalities of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    /// One request, one response.
    UnaryUnary,
    /// One request, a stream of responses.
    UnaryStream,
    /// A stream of requests, one response.
    StreamUnary,
    /// Streams in both directions.
    StreamStream,
}

impl CallShape {
    /// Whether the client sends a stream of requests.
    #[must_use]
    pub const fn client_streaming(self) -> bool {
        matches!(self, Self::StreamUnary | Self::StreamStream)
    }

    /// Whether the server sends a stream of responses.
    #[must_use]
    pub const fn server_streaming(self) -> bool {
        matches!(self, Self::UnaryStream | Self::StreamStream)
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnaryUnary => write!(f, "unary-unary"),
            Self::UnaryStream => write!(f, "unary-stream"),
            Self::StreamUnary => write!(f, "stream-unary"),
            Self::StreamStream => write!(f, "stream-stream"),
        }
    }
}

/// Frames sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Opens a call.
    Start {
        /// Method path, e.g. `/test/UnaryUnary`.
        method: String,
        /// Invocation metadata.
        metadata: Metadata,
        /// Time the client is willing to wait, if bounded.
        timeout: Option<Duration>,
    },
    /// One request payload.
    Message(Bytes),
    /// The client will send no more requests.
    HalfClose,
    /// The client abandoned the call.
    Cancel,
}

impl ClientFrame {
    /// A `Start` frame without a timeout.
    #[must_use]
    pub fn start(method: impl Into<String>, metadata: Metadata) -> Self {
        Self::Start {
            method: method.into(),
            metadata,
            timeout: None,
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Initial metadata.
    Headers(Metadata),
    /// One response payload.
    Message(Bytes),
    /// Terminal status and trailing metadata. Always the last frame.
    Trailers {
        /// Terminal status.
        status: Status,
        /// Trailing metadata.
        metadata: Metadata,
    },
}

/// A frame on the wire, tagged with its call and direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Client to server.
    Request {
        /// The call this frame belongs to.
        call_id: CallId,
        /// The frame.
        frame: ClientFrame,
    },
    /// Server to client.
    Response {
        /// The call this frame belongs to.
        call_id: CallId,
        /// The frame.
        frame: ServerFrame,
    },
}

impl Frame {
    /// Wrap a client frame.
    #[must_use]
    pub const fn request(call_id: CallId, frame: ClientFrame) -> Self {
        Self::Request { call_id, frame }
    }

    /// Wrap a server frame.
    #[must_use]
    pub const fn response(call_id: CallId, frame: ServerFrame) -> Self {
        Self::Response { call_id, frame }
    }

    /// The call this frame belongs to.
    #[must_use]
    pub const fn call_id(&self) -> CallId {
        match self {
            Self::Request { call_id, .. } | Self::Response { call_id, .. } => *call_id,
        }
    }

    /// Whether this frame travels client to server.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self, Self::Request { .. })
    }

    /// Short frame name for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Request { frame, .. } => match frame {
                ClientFrame::Start { .. } => "start",
                ClientFrame::Message(_) => "request_message",
                ClientFrame::HalfClose => "half_close",
                ClientFrame::Cancel => "cancel",
            },
            Self::Response { frame, .. } => match frame {
                ServerFrame::Headers(_) => "headers",
                ServerFrame::Message(_) => "response_message",
                ServerFrame::Trailers { .. } => "trailers",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_shape_directions() {
        assert!(!CallShape::UnaryUnary.client_streaming());
        assert!(!CallShape::UnaryUnary.server_streaming());
        assert!(CallShape::UnaryStream.server_streaming());
        assert!(CallShape::StreamUnary.client_streaming());
        assert!(CallShape::StreamStream.client_streaming());
        assert!(CallShape::StreamStream.server_streaming());
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::response(
            CallId(7),
            ServerFrame::Trailers {
                status: Status::ok(),
                metadata: Metadata::new(),
            },
        );
        assert_eq!(frame.call_id(), CallId(7));
        assert!(!frame.is_request());
        assert_eq!(frame.kind(), "trailers");
        assert_eq!(CallId(7).to_string(), "#7");
    }
}
