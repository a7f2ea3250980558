//! Drives one call from handler start to terminal status.
//!
//! The executor feeds the handler its request(s), races it against
//! cancellation and the call deadline, and then completes the call:
//! initial metadata if still owed, the unary response if any, and finally
//! trailers carrying the status and trailing metadata.

use crate::context::{CallContext, CallPhase};
use crate::handler::{MethodHandler, RequestStream, ResponseSink};
use bytes::Bytes;
use futures::FutureExt;
use rpckit_core::error::RpcError;
use rpckit_core::protocol::ServerFrame;
use rpckit_core::status::Status;
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// Run `handler` for the call described by `ctx` to completion.
pub(crate) async fn execute(handler: MethodHandler, ctx: CallContext, requests: RequestStream) {
    let shape = handler.shape();
    tracing::debug!(call_id = %ctx.call_id(), method = %ctx.method(), %shape, "Executing call");

    let guarded = AssertUnwindSafe(run_handler(handler, ctx.clone(), requests)).catch_unwind();
    let deadline = async {
        match ctx.deadline() {
            Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
            None => futures::future::pending().await,
        }
    };

    let outcome = tokio::select! {
        biased;
        () = ctx.cancelled() => Err(ctx.cancellation_error()),
        () = deadline => {
            ctx.cancel_with(Status::deadline_exceeded("deadline exceeded"));
            Err(ctx.cancellation_error())
        }
        result = guarded => result.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            tracing::error!(call_id = %ctx.call_id(), method = %ctx.method(), panic = %message, "Handler panicked");
            Err(RpcError::handler(format!("handler panicked: {message}")))
        }),
    };

    let status = match finish(&ctx, outcome).await {
        Ok(status) => status,
        Err(err) => {
            // The response could not be delivered; report that instead.
            tracing::debug!(call_id = %ctx.call_id(), error = %err, "Failed to send response");
            err.to_status()
        }
    };

    let trailers = ServerFrame::Trailers {
        status: status.clone(),
        metadata: ctx.trailing_metadata(),
    };
    if let Err(err) = ctx.send_frame(trailers).await {
        tracing::debug!(call_id = %ctx.call_id(), error = %err, "Failed to send trailers");
    }
    ctx.advance(CallPhase::Completed);
    tracing::debug!(call_id = %ctx.call_id(), method = %ctx.method(), code = %status.code, "Call completed");
}

/// Deliver a successful outcome, or map a failure to its status.
async fn finish(ctx: &CallContext, outcome: Result<Option<Bytes>, RpcError>) -> Result<Status, RpcError> {
    match outcome {
        Ok(response) => {
            ctx.ensure_initial_metadata_sent().await?;
            if let Some(response) = response {
                ctx.send_frame(ServerFrame::Message(response)).await?;
            }
            Ok(Status::ok())
        }
        Err(err) => {
            let status = err.to_status();
            tracing::debug!(call_id = %ctx.call_id(), method = %ctx.method(), error = %err, "Handler failed");
            Ok(status)
        }
    }
}

async fn run_handler(
    handler: MethodHandler,
    ctx: CallContext,
    mut requests: RequestStream,
) -> Result<Option<Bytes>, RpcError> {
    match handler {
        MethodHandler::UnaryUnary(handler) => {
            let request = single_request(&mut requests).await?;
            handler(request, ctx).await.map(Some)
        }
        MethodHandler::UnaryStream(handler) => {
            let request = single_request(&mut requests).await?;
            let sink = ResponseSink::new(ctx.clone());
            handler(request, ctx, sink).await.map(|()| None)
        }
        MethodHandler::StreamUnary(handler) => handler(requests, ctx).await.map(Some),
        MethodHandler::StreamStream(handler) => {
            let sink = ResponseSink::new(ctx.clone());
            handler(requests, ctx, sink).await.map(|()| None)
        }
    }
}

async fn single_request(requests: &mut RequestStream) -> Result<Bytes, RpcError> {
    requests
        .message()
        .await?
        .ok_or_else(|| RpcError::internal("client sent no request message"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
