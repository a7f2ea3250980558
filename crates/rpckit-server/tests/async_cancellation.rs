//! Async cancellation tests.
//!
//! Frame-level tests verifying that cancellation reaches handlers: client
//! cancel frames, client deadlines, and connection loss.

use bytes::Bytes;
use rpckit_core::metadata::Metadata;
use rpckit_core::protocol::{CallId, ClientFrame, Frame, ServerFrame};
use rpckit_core::status::Code;
use rpckit_server::{CallContext, MethodRegistry, RequestStream, ResponseSink, ServerBuilder};
use rpckit_transport::{MemoryTransport, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(2);

fn serve(registry: MethodRegistry) -> MemoryTransport {
    let (client, server_end) = MemoryTransport::pair();
    let server = ServerBuilder::new().add_generic_handler(registry).build();
    tokio::spawn(async move { server.serve(server_end).await });
    client
}

/// Counts how many handler futures were dropped.
struct DropCounter(Arc<AtomicU32>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

async fn send(client: &MemoryTransport, call_id: u64, frame: ClientFrame) {
    client
        .send(Frame::request(CallId(call_id), frame))
        .await
        .expect("send failed");
}

async fn recv(client: &MemoryTransport) -> (CallId, ServerFrame) {
    match tokio::time::timeout(TIMEOUT, client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("transport error")
    {
        Some(Frame::Response { call_id, frame }) => (call_id, frame),
        other => panic!("expected response frame, got {other:?}"),
    }
}

// =============================================================================
// Client Cancel Tests
// =============================================================================

#[tokio::test]
async fn test_cancel_frame_stops_blocked_handler() {
    let dropped = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&dropped);
    let registry = MethodRegistry::new().stream_stream(
        "/test/StreamStream",
        move |mut requests: RequestStream, _ctx: CallContext, _sink: ResponseSink| {
            let guard = DropCounter(Arc::clone(&counter));
            async move {
                let _guard = guard;
                while requests.message().await?.is_some() {}
                Ok(())
            }
        },
    );
    let client = serve(registry);

    send(&client, 1, ClientFrame::start("/test/StreamStream", Metadata::new())).await;
    tokio::task::yield_now().await;
    send(&client, 1, ClientFrame::Cancel).await;

    let (call_id, frame) = recv(&client).await;
    assert_eq!(call_id, CallId(1));
    assert!(matches!(
        frame,
        ServerFrame::Trailers { status, .. } if status.code == Code::Cancelled
    ));
    assert_eq!(dropped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancel_unknown_call_is_ignored() {
    let client = serve(MethodRegistry::new().unary_unary(
        "/test/UnaryUnary",
        |request: Bytes, _ctx| async move { Ok(request) },
    ));

    send(&client, 9, ClientFrame::Cancel).await;
    send(&client, 1, ClientFrame::start("/test/UnaryUnary", Metadata::new())).await;
    send(&client, 1, ClientFrame::Message(Bytes::from_static(b"\x00"))).await;
    send(&client, 1, ClientFrame::HalfClose).await;

    let (call_id, frame) = recv(&client).await;
    assert_eq!(call_id, CallId(1));
    assert_eq!(frame, ServerFrame::Headers(Metadata::new()));
}

#[tokio::test]
async fn test_cancellation_does_not_affect_other_calls() {
    let registry = MethodRegistry::new()
        .unary_unary("/test/Wait", |_request: Bytes, ctx: CallContext| async move {
            ctx.cancelled().await;
            Ok(Bytes::new())
        })
        .unary_unary("/test/Echo", |request: Bytes, _ctx| async move { Ok(request) });
    let client = serve(registry);

    send(&client, 1, ClientFrame::start("/test/Wait", Metadata::new())).await;
    send(&client, 1, ClientFrame::Message(Bytes::from_static(b"w"))).await;
    send(&client, 2, ClientFrame::start("/test/Echo", Metadata::new())).await;
    send(&client, 2, ClientFrame::Message(Bytes::from_static(b"e"))).await;
    send(&client, 2, ClientFrame::HalfClose).await;

    let mut echo = Vec::new();
    while echo.len() < 3 {
        let (call_id, frame) = recv(&client).await;
        assert_eq!(call_id, CallId(2), "the waiting call must not finish yet");
        echo.push(frame);
    }
    assert_eq!(echo[1], ServerFrame::Message(Bytes::from_static(b"e")));

    send(&client, 1, ClientFrame::Cancel).await;
    let (call_id, frame) = recv(&client).await;
    assert_eq!(call_id, CallId(1));
    assert!(matches!(
        frame,
        ServerFrame::Trailers { status, .. } if status.code == Code::Cancelled
    ));
}

// =============================================================================
// Deadline Tests
// =============================================================================

#[tokio::test]
async fn test_start_timeout_cancels_handler() {
    let registry = MethodRegistry::new().unary_stream(
        "/test/UnaryStream",
        |_request: Bytes, ctx: CallContext, sink: ResponseSink| async move {
            sink.send(Bytes::from_static(b"first")).await?;
            ctx.cancelled().await;
            Ok(())
        },
    );
    let client = serve(registry);

    let start = ClientFrame::Start {
        method: "/test/UnaryStream".to_string(),
        metadata: Metadata::new(),
        timeout: Some(Duration::from_millis(50)),
    };
    send(&client, 1, start).await;
    send(&client, 1, ClientFrame::Message(Bytes::from_static(b"go"))).await;
    send(&client, 1, ClientFrame::HalfClose).await;

    let (_, headers) = recv(&client).await;
    assert_eq!(headers, ServerFrame::Headers(Metadata::new()));
    let (_, first) = recv(&client).await;
    assert_eq!(first, ServerFrame::Message(Bytes::from_static(b"first")));
    let (_, trailers) = recv(&client).await;
    assert!(matches!(
        trailers,
        ServerFrame::Trailers { status, .. } if status.code == Code::DeadlineExceeded
    ));
}

// =============================================================================
// Connection Loss Tests
// =============================================================================

#[tokio::test]
async fn test_connection_loss_cancels_handlers() {
    let dropped = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&dropped);
    let registry = MethodRegistry::new().stream_unary(
        "/test/StreamUnary",
        move |_requests: RequestStream, ctx: CallContext| {
            let guard = DropCounter(Arc::clone(&counter));
            async move {
                let _guard = guard;
                ctx.cancelled().await;
                Ok(Bytes::new())
            }
        },
    );
    let client = serve(registry);

    for call_id in 1..=3 {
        send(&client, call_id, ClientFrame::start("/test/StreamUnary", Metadata::new())).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.close().await.expect("close failed");

    tokio::time::timeout(TIMEOUT, async {
        while dropped.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handlers were not cancelled");
}
