//! Fluent server builder.
//!
//! A server is an ordered list of [`GenericHandler`] providers plus a
//! [`ServerConfig`]. Providers are consulted in the order they were added.
//!
//! # Example
//!
//! ```rust
//! use rpckit_server::{MethodRegistry, ServerBuilder, ServerConfig};
//! use bytes::Bytes;
//!
//! let methods = MethodRegistry::new()
//!     .unary_unary("/test/UnaryUnary", |request: Bytes, _ctx| async move { Ok(request) });
//!
//! let server = ServerBuilder::new()
//!     .add_generic_handler(methods)
//!     .config(ServerConfig::default().max_concurrent_calls(16))
//!     .build();
//!
//! assert_eq!(server.config().max_concurrent_calls, 16);
//! assert!(server.dispatcher().resolve("/test/UnaryUnary", &Default::default()).is_some());
//! ```

use crate::router::{Dispatcher, GenericHandler};
use crate::server::ServerRuntime;
use rpckit_core::error::RpcError;
use rpckit_transport::Transport;
use std::sync::Arc;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of calls served at once on one connection. Calls over
    /// the limit fail with `RESOURCE_EXHAUSTED`.
    pub max_concurrent_calls: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 100,
        }
    }
}

impl ServerConfig {
    /// Set the concurrency limit.
    pub const fn max_concurrent_calls(mut self, limit: usize) -> Self {
        self.max_concurrent_calls = limit;
        self
    }
}

/// Builder for [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    providers: Vec<Arc<dyn GenericHandler>>,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a builder with no providers and the default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler provider.
    pub fn add_generic_handler(mut self, handler: impl GenericHandler + 'static) -> Self {
        self.providers.push(Arc::new(handler));
        self
    }

    /// Replace the configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the server.
    #[must_use]
    pub fn build(self) -> Server {
        Server {
            dispatcher: Dispatcher::new(self.providers),
            config: self.config,
        }
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("providers", &self.providers.len())
            .field("config", &self.config)
            .finish()
    }
}

/// A configured server, ready to serve connections.
///
/// Cloning is cheap and clones share the same providers, so one server can
/// serve several connections at once.
#[derive(Debug, Clone)]
pub struct Server {
    dispatcher: Dispatcher,
    config: ServerConfig,
}

impl Server {
    /// The handler dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// The server configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Create a runtime for one connection without running it.
    pub fn runtime<Tr>(&self, transport: Tr) -> ServerRuntime<Tr>
    where
        Tr: Transport + 'static,
        Tr::Error: Into<RpcError>,
    {
        ServerRuntime::new(self.dispatcher.clone(), transport, self.config.clone())
    }

    /// Serve one connection until it closes.
    ///
    /// # Errors
    ///
    /// Returns the transport error if receiving fails.
    pub async fn serve<Tr>(&self, transport: Tr) -> Result<(), RpcError>
    where
        Tr: Transport + 'static,
        Tr::Error: Into<RpcError>,
    {
        self.runtime(transport).run().await
    }
}
