//! Channel builder and per-call options.
//!
//! The [`ChannelBuilder`] provides a fluent API for configuring a
//! [`Channel`] before connecting it.

use crate::channel::Channel;
use rpckit_core::error::RpcError;
use rpckit_core::metadata::{IntoMetadata, Metadata};
use rpckit_transport::Transport;
use std::time::Duration;

/// Channel configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Frames queued for sending before writers suspend.
    pub outgoing_buffer: usize,
    /// Timeout applied to calls that do not set their own.
    pub default_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            outgoing_buffer: 256,
            default_timeout: None,
        }
    }
}

/// Builder for constructing a [`Channel`].
///
/// # Example
///
/// ```rust
/// use rpckit_client::ChannelBuilder;
/// use rpckit_transport::MemoryTransport;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (client_end, _server_end) = MemoryTransport::pair();
/// let channel = ChannelBuilder::new()
///     .outgoing_buffer(16)
///     .default_timeout(Duration::from_secs(5))
///     .connect(client_end);
///
/// assert_eq!(channel.config().outgoing_buffer, 16);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ChannelBuilder {
    config: ChannelConfig,
}

impl ChannelBuilder {
    /// Create a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the outgoing frame buffer size.
    pub fn outgoing_buffer(mut self, frames: usize) -> Self {
        self.config.outgoing_buffer = frames;
        self
    }

    /// Set the timeout for calls that do not set their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect the channel over the given transport.
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect<T: Transport + 'static>(self, transport: T) -> Channel {
        Channel::with_config(transport, self.config)
    }
}

/// Options for a single call.
///
/// `Metadata` converts into options directly, so
/// `method.call(request, metadata)` works for the common case.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Invocation metadata sent with the call.
    pub metadata: Metadata,
    /// How long the client waits before failing the call with
    /// `DEADLINE_EXCEEDED`.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Options with no metadata and no timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invocation metadata.
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Validate and set the invocation metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidMetadata`] if validation fails.
    pub fn try_metadata(mut self, metadata: impl IntoMetadata) -> Result<Self, RpcError> {
        self.metadata = metadata.into_metadata()?;
        Ok(self)
    }

    /// Set the call timeout.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl From<Metadata> for CallOptions {
    fn from(metadata: Metadata) -> Self {
        Self::new().metadata(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.outgoing_buffer, 256);
        assert!(config.default_timeout.is_none());
    }

    #[test]
    fn test_builder_fluent() {
        let builder = ChannelBuilder::new()
            .outgoing_buffer(4)
            .default_timeout(Duration::from_millis(250));

        assert_eq!(builder.config.outgoing_buffer, 4);
        assert_eq!(builder.config.default_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_call_options() {
        let options = CallOptions::new()
            .try_metadata([("client-to-server", "question")])
            .unwrap()
            .timeout(Duration::from_secs(1));
        assert!(options.metadata.contains_key("client-to-server"));
        assert_eq!(options.timeout, Some(Duration::from_secs(1)));

        let invalid = CallOptions::new().try_metadata([("key-bin", "text")]);
        assert!(matches!(invalid, Err(RpcError::InvalidMetadata(_))));

        let from_metadata: CallOptions = Metadata::new().with("k", "v").unwrap().into();
        assert!(from_metadata.timeout.is_none());
        assert_eq!(from_metadata.metadata.len(), 1);
    }
}
