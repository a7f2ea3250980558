//! An in-process server and channel wired together over memory.

use crate::fixtures::test_server;
use rpckit_client::{Channel, ChannelBuilder, ChannelConfig};
use rpckit_core::error::RpcError;
use rpckit_server::{Server, ServerState};
use rpckit_transport::MemoryTransport;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// A running server with a connected channel.
///
/// Dropping the harness closes the channel, which ends the server's
/// connection loop.
///
/// # Example
///
/// ```rust
/// use rpckit_testing::TestHarness;
/// use rpckit_testing::fixtures::{client_to_server_metadata, CLIENT_TO_SERVER, REQUEST, RESPONSE};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let harness = TestHarness::start();
/// let response = harness
///     .channel()
///     .unary_unary(CLIENT_TO_SERVER)
///     .invoke(REQUEST, client_to_server_metadata())
///     .await
///     .unwrap();
/// assert_eq!(&response[..], RESPONSE);
/// # }
/// ```
#[derive(Debug)]
pub struct TestHarness {
    channel: Channel,
    state: Arc<ServerState>,
    server_task: JoinHandle<Result<(), RpcError>>,
}

impl TestHarness {
    /// Serve the metadata fixture methods.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn start() -> Self {
        Self::with_server(test_server())
    }

    /// Serve the given server with the default channel configuration.
    #[must_use]
    pub fn with_server(server: Server) -> Self {
        Self::with_config(server, ChannelConfig::default())
    }

    /// Serve the given server and connect a channel with `config`.
    #[must_use]
    pub fn with_config(server: Server, config: ChannelConfig) -> Self {
        let (client_end, server_end) = MemoryTransport::pair();
        let runtime = server.runtime(server_end);
        let state = Arc::clone(runtime.state());
        let server_task = tokio::spawn(async move { runtime.run().await });
        let channel = ChannelBuilder::new().config(config).connect(client_end);
        Self {
            channel,
            state,
            server_task,
        }
    }

    /// The connected channel.
    #[must_use]
    pub const fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Server-side bookkeeping for the connection.
    #[must_use]
    pub const fn server_state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Close the channel and wait for the server loop to finish.
    ///
    /// # Errors
    ///
    /// Returns the error the server loop ended with.
    pub async fn shutdown(self) -> Result<(), RpcError> {
        self.channel.close();
        match self.server_task.await {
            Ok(result) => result,
            Err(err) => Err(RpcError::internal(format!("server task failed: {err}"))),
        }
    }
}
