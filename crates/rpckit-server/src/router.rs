//! Handler resolution.
//!
//! Incoming calls are routed by asking each registered [`GenericHandler`], in
//! registration order, for a handler. The first provider to answer wins; if
//! none does, the call fails with `UNIMPLEMENTED`.
//!
//! Providers see the method path and the invocation metadata, so routing can
//! depend on either:
//!
//! ```rust
//! use rpckit_server::{generic_handler, Dispatcher, HandlerCallDetails, MethodHandler};
//! use rpckit_core::metadata::Metadata;
//! use bytes::Bytes;
//!
//! let canary = generic_handler(|details: &HandlerCallDetails| {
//!     details
//!         .invocation_metadata
//!         .contains_key("x-canary")
//!         .then(|| MethodHandler::unary_unary(|_req: Bytes, _ctx| async { Ok(Bytes::from_static(b"canary")) }))
//! });
//!
//! let dispatcher = Dispatcher::new(vec![std::sync::Arc::new(canary)]);
//! let flagged = Metadata::new().with("x-canary", "1").unwrap();
//! assert!(dispatcher.resolve("/svc/Any", &flagged).is_some());
//! assert!(dispatcher.resolve("/svc/Any", &Metadata::new()).is_none());
//! ```

use crate::context::CallContext;
use crate::handler::{MethodHandler, RequestStream, ResponseSink};
use bytes::Bytes;
use rpckit_core::error::RpcError;
use rpckit_core::metadata::Metadata;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// What a provider sees when asked to resolve a call.
#[derive(Debug, Clone)]
pub struct HandlerCallDetails {
    /// The method path, e.g. `/test/UnaryUnary`.
    pub method: String,
    /// Metadata the client sent with the call.
    pub invocation_metadata: Metadata,
}

/// A provider of method handlers.
pub trait GenericHandler: Send + Sync {
    /// Return a handler for the call, or `None` to let the next provider try.
    fn service(&self, details: &HandlerCallDetails) -> Option<MethodHandler>;
}

impl<T: GenericHandler + ?Sized> GenericHandler for Arc<T> {
    fn service(&self, details: &HandlerCallDetails) -> Option<MethodHandler> {
        (**self).service(details)
    }
}

/// A provider backed by a closure. Created by [`generic_handler`].
pub struct FnHandler<F> {
    resolve: F,
}

impl<F> GenericHandler for FnHandler<F>
where
    F: Fn(&HandlerCallDetails) -> Option<MethodHandler> + Send + Sync,
{
    fn service(&self, details: &HandlerCallDetails) -> Option<MethodHandler> {
        (self.resolve)(details)
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Adapt a closure into a [`GenericHandler`].
pub const fn generic_handler<F>(resolve: F) -> FnHandler<F>
where
    F: Fn(&HandlerCallDetails) -> Option<MethodHandler> + Send + Sync,
{
    FnHandler { resolve }
}

/// A routing table from method path to handler.
///
/// # Example
///
/// ```rust
/// use rpckit_server::MethodRegistry;
/// use bytes::Bytes;
///
/// let registry = MethodRegistry::new()
///     .unary_unary("/test/UnaryUnary", |request: Bytes, _ctx| async move { Ok(request) });
///
/// assert!(registry.contains("/test/UnaryUnary"));
/// assert!(!registry.contains("/test/Other"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, MethodHandler>,
}

impl MethodRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a method path, replacing any previous one.
    #[must_use]
    pub fn add(mut self, method: impl Into<String>, handler: MethodHandler) -> Self {
        let method = method.into();
        if self.methods.insert(method.clone(), handler).is_some() {
            tracing::warn!(method = %method, "Replacing registered handler");
        }
        self
    }

    /// Register a unary-unary handler.
    #[must_use]
    pub fn unary_unary<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Bytes, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
    {
        self.add(method, MethodHandler::unary_unary(handler))
    }

    /// Register a unary-stream handler.
    #[must_use]
    pub fn unary_stream<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Bytes, CallContext, ResponseSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.add(method, MethodHandler::unary_stream(handler))
    }

    /// Register a stream-unary handler.
    #[must_use]
    pub fn stream_unary<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestStream, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Bytes, RpcError>> + Send + 'static,
    {
        self.add(method, MethodHandler::stream_unary(handler))
    }

    /// Register a stream-stream handler.
    #[must_use]
    pub fn stream_stream<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RequestStream, CallContext, ResponseSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        self.add(method, MethodHandler::stream_stream(handler))
    }

    /// Whether a handler is registered for `method`.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    /// Registered method paths, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<_> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

impl GenericHandler for MethodRegistry {
    fn service(&self, details: &HandlerCallDetails) -> Option<MethodHandler> {
        self.methods.get(&details.method).cloned()
    }
}

/// Resolves calls against an ordered list of providers.
///
/// Immutable once built, so it can be shared by every call task.
#[derive(Clone, Default)]
pub struct Dispatcher {
    providers: Vec<Arc<dyn GenericHandler>>,
}

impl Dispatcher {
    /// Create a dispatcher over providers, consulted in order.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn GenericHandler>>) -> Self {
        Self { providers }
    }

    /// Find the handler for a call.
    #[must_use]
    pub fn resolve(&self, method: &str, invocation_metadata: &Metadata) -> Option<MethodHandler> {
        let details = HandlerCallDetails {
            method: method.to_string(),
            invocation_metadata: invocation_metadata.clone(),
        };
        self.resolve_details(&details)
    }

    /// Find the handler for already-built call details.
    #[must_use]
    pub fn resolve_details(&self, details: &HandlerCallDetails) -> Option<MethodHandler> {
        self.providers
            .iter()
            .find_map(|provider| provider.service(details))
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether no providers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("providers", &self.providers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpckit_core::protocol::CallShape;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo() -> MethodHandler {
        MethodHandler::unary_unary(|request: Bytes, _ctx| async move { Ok(request) })
    }

    #[test]
    fn test_registry_routes_by_path() {
        let registry = MethodRegistry::new()
            .add("/test/UnaryUnary", echo())
            .stream_stream("/test/StreamStream", |_requests, _ctx, _sink| async { Ok(()) });

        let details = |method: &str| HandlerCallDetails {
            method: method.to_string(),
            invocation_metadata: Metadata::new(),
        };

        assert_eq!(
            registry.service(&details("/test/StreamStream")).map(|h| h.shape()),
            Some(CallShape::StreamStream)
        );
        assert!(registry.service(&details("/test/Missing")).is_none());
        assert_eq!(registry.methods(), ["/test/StreamStream", "/test/UnaryUnary"]);
    }

    #[test]
    fn test_first_matching_provider_wins() {
        let first_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first_calls);
        let declines = generic_handler(move |_details: &HandlerCallDetails| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });
        let streams = generic_handler(|_details: &HandlerCallDetails| {
            Some(MethodHandler::unary_stream(|_req, _ctx, _sink| async { Ok(()) }))
        });
        let unary = MethodRegistry::new().add("/svc/M", echo());

        let dispatcher = Dispatcher::new(vec![
            Arc::new(declines),
            Arc::new(streams),
            Arc::new(unary),
        ]);

        let handler = dispatcher.resolve("/svc/M", &Metadata::new()).unwrap();
        assert_eq!(handler.shape(), CallShape::UnaryStream);
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.len(), 3);
    }

    #[test]
    fn test_provider_sees_invocation_metadata() {
        let provider = generic_handler(|details: &HandlerCallDetails| {
            (details.invocation_metadata.get("tenant")
                == Some(&rpckit_core::metadata::MetadataValue::from("a")))
            .then(echo)
        });
        let dispatcher = Dispatcher::new(vec![Arc::new(provider)]);

        let tenant_a = Metadata::new().with("tenant", "a").unwrap();
        let tenant_b = Metadata::new().with("tenant", "b").unwrap();
        assert!(dispatcher.resolve("/svc/M", &tenant_a).is_some());
        assert!(dispatcher.resolve("/svc/M", &tenant_b).is_none());
    }

    #[test]
    fn test_empty_dispatcher_resolves_nothing() {
        let dispatcher = Dispatcher::default();
        assert!(dispatcher.is_empty());
        assert!(dispatcher.resolve("/svc/M", &Metadata::new()).is_none());
    }
}
