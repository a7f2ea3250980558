//! Test fixtures for rpckit testing.
//!
//! This module provides the payloads, metadata sets and handlers of the
//! metadata conformance scenarios, plus a ready-made [`Server`] that serves
//! all of them.
//!
//! Handlers check what they receive and fail the call with an `UNKNOWN`
//! status when a request or the invocation metadata is not what the
//! scenario expects.

use bytes::Bytes;
use rpckit_core::error::RpcError;
use rpckit_core::metadata::{Metadata, MetadataValue, seen_subset};
use rpckit_server::{
    CallContext, GenericHandler, HandlerCallDetails, MethodHandler, MethodRegistry, RequestStream,
    ResponseSink, Server, ServerBuilder, generic_handler,
};

/// Unary-unary method that checks client-to-server metadata.
pub const CLIENT_TO_SERVER: &str = "/test/TestClientToServer";
/// Unary-unary method that sends server-to-client initial metadata.
pub const SERVER_TO_CLIENT: &str = "/test/TestServerToClient";
/// Unary-unary method that sets trailing metadata.
pub const TRAILING_METADATA: &str = "/test/TestTrailingMetadata";
/// Unary-unary method that echoes invocation metadata as initial metadata.
pub const ECHO_INITIAL_METADATA: &str = "/test/TestEchoInitialMetadata";
/// Method served only by the metadata-gated generic handler.
pub const GENERIC_HANDLER: &str = "/test/TestGenericHandler";
/// Unary-stream method.
pub const UNARY_STREAM: &str = "/test/TestUnaryStream";
/// Stream-unary method.
pub const STREAM_UNARY: &str = "/test/TestStreamUnary";
/// Stream-stream method.
pub const STREAM_STREAM: &str = "/test/TestStreamStream";

/// The request payload every scenario sends.
pub const REQUEST: &[u8] = b"\x00\x00\x00";
/// The response payload every scenario returns.
pub const RESPONSE: &[u8] = b"\x01\x01\x01";

fn metadata<const N: usize>(pairs: [(&str, MetadataValue); N]) -> Metadata {
    Metadata::try_from_pairs(pairs).expect("fixture metadata is valid")
}

/// Invocation metadata sent by the client.
#[must_use]
pub fn client_to_server_metadata() -> Metadata {
    metadata([
        ("client-to-server", MetadataValue::text("question")),
        ("client-to-server-bin", MetadataValue::binary(&b"\x07\x07\x07"[..])),
    ])
}

/// Initial metadata sent by the server.
#[must_use]
pub fn server_to_client_metadata() -> Metadata {
    metadata([
        ("server-to-client", MetadataValue::text("answer")),
        ("server-to-client-bin", MetadataValue::binary(&b"\x06\x06\x06"[..])),
    ])
}

/// Trailing metadata set by the server.
#[must_use]
pub fn trailing_metadata() -> Metadata {
    metadata([
        ("a-trailing-metadata", MetadataValue::text("stack-trace")),
        ("a-trailing-metadata-bin", MetadataValue::binary(&b"\x05\x05\x05"[..])),
    ])
}

/// Metadata the generic handler requires before it serves a call.
#[must_use]
pub fn generic_handler_metadata() -> Metadata {
    metadata([("a-must-have-key", MetadataValue::text("secret"))])
}

/// Malformed invocation metadata, as JSON, that validation must reject.
#[must_use]
pub fn invalid_metadata_cases() -> Vec<serde_json::Value> {
    vec![
        serde_json::json!([[42, 42]]),
        serde_json::json!([[{}, {}]]),
        serde_json::json!([["normal", {}]]),
        serde_json::json!({}),
        serde_json::json!([{}]),
    ]
}

fn check_request(request: &[u8]) -> Result<(), RpcError> {
    if request == REQUEST {
        Ok(())
    } else {
        Err(RpcError::handler(format!("unexpected request {request:02x?}")))
    }
}

fn check_seen(expected: &Metadata, ctx: &CallContext) -> Result<(), RpcError> {
    if seen_subset(expected, ctx.invocation_metadata()) {
        Ok(())
    } else {
        Err(RpcError::handler(format!(
            "expected invocation metadata {expected:?}, got {:?}",
            ctx.invocation_metadata()
        )))
    }
}

async fn drain_requests(requests: &mut RequestStream) -> Result<usize, RpcError> {
    let mut seen = 0;
    while let Some(request) = requests.message().await? {
        check_request(&request)?;
        seen += 1;
    }
    Ok(seen)
}

/// The per-method routing table of the metadata scenarios.
#[must_use]
pub fn test_methods() -> MethodRegistry {
    MethodRegistry::new()
        .unary_unary(CLIENT_TO_SERVER, |request: Bytes, ctx: CallContext| async move {
            check_request(&request)?;
            check_seen(&client_to_server_metadata(), &ctx)?;
            Ok(Bytes::from_static(RESPONSE))
        })
        .unary_unary(SERVER_TO_CLIENT, |request: Bytes, ctx: CallContext| async move {
            check_request(&request)?;
            ctx.send_initial_metadata(server_to_client_metadata()).await?;
            Ok(Bytes::from_static(RESPONSE))
        })
        .unary_unary(TRAILING_METADATA, |request: Bytes, ctx: CallContext| async move {
            check_request(&request)?;
            ctx.set_trailing_metadata(trailing_metadata())?;
            Ok(Bytes::from_static(RESPONSE))
        })
        .unary_unary(ECHO_INITIAL_METADATA, |request: Bytes, ctx: CallContext| async move {
            ctx.send_initial_metadata(ctx.invocation_metadata()).await?;
            Ok(request)
        })
        .unary_stream(
            UNARY_STREAM,
            |request: Bytes, ctx: CallContext, responses: ResponseSink| async move {
                check_request(&request)?;
                check_seen(&client_to_server_metadata(), &ctx)?;
                ctx.send_initial_metadata(server_to_client_metadata()).await?;
                responses.send(Bytes::from_static(RESPONSE)).await?;
                ctx.set_trailing_metadata(trailing_metadata())?;
                Ok(())
            },
        )
        .stream_unary(
            STREAM_UNARY,
            |mut requests: RequestStream, ctx: CallContext| async move {
                check_seen(&client_to_server_metadata(), &ctx)?;
                ctx.send_initial_metadata(server_to_client_metadata()).await?;
                let seen = drain_requests(&mut requests).await?;
                if seen != 1 {
                    return Err(RpcError::handler(format!("expected one request, got {seen}")));
                }
                ctx.set_trailing_metadata(trailing_metadata())?;
                Ok(Bytes::from_static(RESPONSE))
            },
        )
        .stream_stream(
            STREAM_STREAM,
            |mut requests: RequestStream, ctx: CallContext, responses: ResponseSink| async move {
                check_seen(&client_to_server_metadata(), &ctx)?;
                ctx.send_initial_metadata(server_to_client_metadata()).await?;
                drain_requests(&mut requests).await?;
                responses.send(Bytes::from_static(RESPONSE)).await?;
                ctx.set_trailing_metadata(trailing_metadata())?;
                Ok(())
            },
        )
}

/// A provider that serves any method, but only for calls carrying
/// [`generic_handler_metadata`].
#[must_use]
pub fn metadata_gated_handler() -> impl GenericHandler {
    generic_handler(|details: &HandlerCallDetails| {
        if !seen_subset(&generic_handler_metadata(), &details.invocation_metadata) {
            return None;
        }
        Some(MethodHandler::unary_unary(|request: Bytes, _ctx| async move {
            check_request(&request)?;
            Ok(Bytes::from_static(RESPONSE))
        }))
    })
}

/// A server with [`test_methods`] followed by [`metadata_gated_handler`].
#[must_use]
pub fn test_server() -> Server {
    ServerBuilder::new()
        .add_generic_handler(test_methods())
        .add_generic_handler(metadata_gated_handler())
        .build()
}
