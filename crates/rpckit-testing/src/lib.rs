//! Testing utilities for rpckit.
//!
//! This crate provides fixtures, a harness, and assertions for testing
//! rpckit servers and clients. It includes:
//!
//! - The metadata conformance fixtures: payloads, metadata sets, and a
//!   server that serves every call shape
//! - [`TestHarness`], a server and channel connected over memory
//! - Assertions for metadata and call status
//! - Async helpers for awaiting calls with timeouts
//!
//! # Overview
//!
//! ```rust
//! use rpckit_testing::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let harness = TestHarness::start();
//! let call = harness
//!     .channel()
//!     .unary_unary(SERVER_TO_CLIENT)
//!     .call(REQUEST, client_to_server_metadata())
//!     .await
//!     .unwrap();
//!
//! assert_metadata_seen!(server_to_client_metadata(), call.initial_metadata().await);
//! # }
//! ```

#![deny(missing_docs)]

pub mod assertions;
pub mod async_helpers;
pub mod fixtures;
pub mod harness;

// Re-export commonly used types
pub use assertions::{assert_seen, assert_status_code};
pub use async_helpers::{DEFAULT_TIMEOUT, with_default_timeout, with_timeout};
pub use harness::TestHarness;

/// Install a `tracing` subscriber for tests.
///
/// Output goes through the test writer so it is captured per test. The
/// filter comes from `RUST_LOG` and defaults to `rpckit=debug`. Safe to
/// call from every test; only the first call installs the subscriber.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rpckit=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::assertions::{assert_seen, assert_status_code};
    pub use crate::async_helpers::{with_default_timeout, with_timeout};
    pub use crate::fixtures::*;
    pub use crate::harness::TestHarness;
    pub use crate::init_tracing;
    pub use crate::{assert_call_failed, assert_metadata_seen};
}
