//! Classification and context for transport-level errors.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::CallId;

/// Classification of transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    /// Connection could not be established.
    ConnectionFailed,
    /// Connection was closed, locally or by the peer.
    ConnectionClosed,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed => write!(f, "connection failed"),
            Self::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

/// Where a transport error was observed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportContext {
    /// Transport type, e.g. `memory`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<String>,
    /// Description of the remote end, as reported by the transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    /// The call whose frame was in flight, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<CallId>,
}

impl TransportContext {
    /// Context for a transport type.
    #[must_use]
    pub fn new(transport_type: impl Into<String>) -> Self {
        Self {
            transport_type: Some(transport_type.into()),
            ..Default::default()
        }
    }

    /// Set the peer description.
    #[must_use]
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Set the call the error belongs to.
    #[must_use]
    pub const fn with_call(mut self, call_id: CallId) -> Self {
        self.call_id = Some(call_id);
        self
    }
}

impl fmt::Display for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.transport_type.as_deref().unwrap_or("transport"))?;
        if let Some(peer) = &self.peer {
            write!(f, " to {peer}")?;
        }
        if let Some(call_id) = self.call_id {
            write!(f, " (call {call_id})")?;
        }
        Ok(())
    }
}
