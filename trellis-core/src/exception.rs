//! Exception resolution chain
//!
//! An insertion-ordered list of `(exception class, handler)` pairs. Resolution
//! scans the list in registration order and picks the first entry whose class
//! the thrown class is assignable to, exactly like ordered `catch` clauses.
//! The first match wins, not the closest one by inheritance distance.
//!
//! Because of that, registering a class that an earlier entry already covers
//! would produce a handler that can never fire. Registration rejects it with
//! [`Error::UnreachableHandler`]: narrower classes must be registered before
//! broader ones.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::exception::{ExceptionChain, StatusHandler};
//! use trellis_core::types::{TypeDescriptor, TypeGraph};
//!
//! let mut graph = TypeGraph::with_builtins();
//! graph.declare("NotFound", &["Exception"]).unwrap();
//!
//! let mut chain = ExceptionChain::new(Arc::new(graph));
//! chain.register("NotFound".into(), StatusHandler::new(404)).unwrap();
//! chain.register("Exception".into(), StatusHandler::new(500)).unwrap();
//!
//! // Registering a narrower class after a broader one is rejected.
//! assert!(chain.register("ConversionError".into(), StatusHandler::new(400)).is_err());
//!
//! let handler = chain.resolve(&TypeDescriptor::named("NotFound")).unwrap();
//! assert_eq!(handler.name(), "StatusHandler(404)");
//! ```

use crate::error::{Error, Result};
use crate::http::HttpResponse;
use crate::outcome::{Failure, ResponseAction};
use crate::seal::Seal;
use crate::types::{TypeDescriptor, TypeGraph};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Exception Handler Trait
// ============================================================================

/// Whether a handler dealt with the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handling {
    /// The response has been written; the failure is consumed.
    Handled,
    /// The failure must keep propagating.
    NotHandled,
}

/// Handles failures of the class it is registered for.
#[async_trait]
pub trait ExceptionHandler: Send + Sync + 'static {
    /// Handle the failure, typically by mutating the response.
    async fn handle(&self, failure: &Failure, response: &mut HttpResponse) -> Handling;

    /// Get the handler's name for debugging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Produces the handler for a chain entry. Invoked at most once per entry.
pub type HandlerProvider = Arc<dyn Fn() -> Arc<dyn ExceptionHandler> + Send + Sync>;

// ============================================================================
// Built-in Handlers
// ============================================================================

/// Redirects to a fixed location and reports the failure as handled.
pub struct RedirectHandler {
    location: String,
}

impl RedirectHandler {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }
}

#[async_trait]
impl ExceptionHandler for RedirectHandler {
    async fn handle(&self, _failure: &Failure, response: &mut HttpResponse) -> Handling {
        response.set_redirect(&self.location);
        Handling::Handled
    }

    fn name(&self) -> &str {
        "RedirectHandler"
    }
}

/// Runs an arbitrary response mutation and reports the failure as handled.
pub struct ResponseActionHandler {
    action: ResponseAction,
}

impl ResponseActionHandler {
    pub fn new<F>(action: F) -> Self
    where
        F: Fn(&mut HttpResponse) + Send + Sync + 'static,
    {
        Self::from_action(Arc::new(action))
    }

    pub fn from_action(action: ResponseAction) -> Self {
        Self { action }
    }
}

#[async_trait]
impl ExceptionHandler for ResponseActionHandler {
    async fn handle(&self, _failure: &Failure, response: &mut HttpResponse) -> Handling {
        (self.action)(response);
        Handling::Handled
    }

    fn name(&self) -> &str {
        "ResponseActionHandler"
    }
}

/// Writes a status code and a JSON error body.
pub struct StatusHandler {
    status: u16,
    expose_message: bool,
    name: String,
}

impl StatusHandler {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            expose_message: status < 500,
            name: format!("StatusHandler({})", status),
        }
    }

    /// Include the failure message in the body even for server errors.
    pub fn expose_message(mut self, expose: bool) -> Self {
        self.expose_message = expose;
        self
    }
}

#[async_trait]
impl ExceptionHandler for StatusHandler {
    async fn handle(&self, failure: &Failure, response: &mut HttpResponse) -> Handling {
        let message = if self.expose_message {
            failure.message()
        } else {
            "An internal server error occurred"
        };
        let body = serde_json::json!({
            "status": self.status,
            "error": failure.class().to_string(),
            "message": message,
        });

        response.status = self.status;
        response
            .headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        response.body = body.to_string().into_bytes();
        Handling::Handled
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A function-based exception handler for simple cases.
pub struct FnExceptionHandler<F>
where
    F: Fn(&Failure, &mut HttpResponse) -> Handling + Send + Sync + 'static,
{
    handler: F,
    name: String,
}

impl<F> FnExceptionHandler<F>
where
    F: Fn(&Failure, &mut HttpResponse) -> Handling + Send + Sync + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            name: "FnExceptionHandler".to_string(),
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F> ExceptionHandler for FnExceptionHandler<F>
where
    F: Fn(&Failure, &mut HttpResponse) -> Handling + Send + Sync + 'static,
{
    async fn handle(&self, failure: &Failure, response: &mut HttpResponse) -> Handling {
        (self.handler)(failure, response)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Exception Chain
// ============================================================================

/// A registered exception class and its handler provider.
pub struct ExceptionHandlerEntry {
    exception_class: TypeDescriptor,
    provider: HandlerProvider,
    instance: OnceCell<Arc<dyn ExceptionHandler>>,
}

impl ExceptionHandlerEntry {
    fn new(exception_class: TypeDescriptor, provider: HandlerProvider) -> Self {
        Self {
            exception_class,
            provider,
            instance: OnceCell::new(),
        }
    }

    pub fn exception_class(&self) -> &TypeDescriptor {
        &self.exception_class
    }

    /// The entry's handler, created on first use.
    pub fn handler(&self) -> Arc<dyn ExceptionHandler> {
        self.instance.get_or_init(|| (self.provider)()).clone()
    }
}

/// Result of running a failure through the chain.
pub enum Resolution {
    /// A handler wrote the response.
    Handled { handler: Arc<dyn ExceptionHandler> },
    /// No handler matched, or the matching handler declined.
    Propagate(Failure),
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Handled { handler } => f
                .debug_struct("Handled")
                .field("handler", &handler.name())
                .finish(),
            Resolution::Propagate(failure) => f.debug_tuple("Propagate").field(failure).finish(),
        }
    }
}

/// Ordered exception-class → handler mapping resolved by first match.
pub struct ExceptionChain {
    types: Arc<TypeGraph>,
    entries: Vec<ExceptionHandlerEntry>,
    seal: Seal,
}

impl ExceptionChain {
    /// Create an empty chain over the given type graph.
    pub fn new(types: Arc<TypeGraph>) -> Self {
        Self {
            types,
            entries: Vec::new(),
            seal: Seal::new("exception chain"),
        }
    }

    /// Register a handler instance for `exception_class`.
    pub fn register<H: ExceptionHandler>(
        &mut self,
        exception_class: TypeDescriptor,
        handler: H,
    ) -> Result<()> {
        let handler: Arc<dyn ExceptionHandler> = Arc::new(handler);
        self.register_provider(exception_class, Arc::new(move || handler.clone()))
    }

    /// Register a handler provider for `exception_class`.
    ///
    /// Re-registering a class replaces its handler in place. Registering a
    /// class that is assignable to an already registered class fails with
    /// [`Error::UnreachableHandler`].
    pub fn register_provider(
        &mut self,
        exception_class: TypeDescriptor,
        provider: HandlerProvider,
    ) -> Result<()> {
        self.seal.check()?;

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.exception_class == exception_class)
        {
            tracing::debug!(class = %exception_class, "Exception handler replaced");
            *entry = ExceptionHandlerEntry::new(exception_class, provider);
            return Ok(());
        }

        if let Some(shadowing) = self
            .entries
            .iter()
            .find(|entry| self.types.is_assignable(&exception_class, &entry.exception_class))
        {
            return Err(Error::UnreachableHandler {
                handler: exception_class.to_string(),
                shadowed_by: shadowing.exception_class.to_string(),
            });
        }

        tracing::debug!(
            class = %exception_class,
            position = self.entries.len(),
            "Exception handler registered"
        );
        self.entries
            .push(ExceptionHandlerEntry::new(exception_class, provider));
        Ok(())
    }

    /// Find the handler for a thrown class: the first registered entry whose
    /// class the thrown class is assignable to.
    pub fn resolve(&self, thrown: &TypeDescriptor) -> Option<Arc<dyn ExceptionHandler>> {
        self.entries
            .iter()
            .find(|entry| self.types.is_assignable(thrown, &entry.exception_class))
            .map(ExceptionHandlerEntry::handler)
    }

    /// Run a failure through the chain.
    ///
    /// A handler that declines leaves the response as it found it; anything
    /// it changed before returning [`Handling::NotHandled`] is rolled back.
    pub async fn handle(&self, failure: Failure, response: &mut HttpResponse) -> Resolution {
        let Some(handler) = self.resolve(failure.class()) else {
            tracing::debug!(class = %failure.class(), "No exception handler matched");
            return Resolution::Propagate(failure);
        };

        let snapshot = response.clone();
        match handler.handle(&failure, response).await {
            Handling::Handled => {
                tracing::debug!(
                    handler = handler.name(),
                    class = %failure.class(),
                    "Exception handled"
                );
                Resolution::Handled { handler }
            }
            Handling::NotHandled => {
                tracing::debug!(
                    handler = handler.name(),
                    class = %failure.class(),
                    "Exception handler declined"
                );
                *response = snapshot;
                Resolution::Propagate(failure)
            }
        }
    }

    /// Registered classes in resolution order.
    pub fn classes(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.entries.iter().map(ExceptionHandlerEntry::exception_class)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Refuse further registrations.
    pub fn seal(&self) {
        self.seal.seal();
    }

    pub fn is_sealed(&self) -> bool {
        self.seal.is_sealed()
    }
}

impl fmt::Debug for ExceptionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionChain")
            .field("classes", &self.classes().collect::<Vec<_>>())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn graph() -> Arc<TypeGraph> {
        let mut graph = TypeGraph::with_builtins();
        graph.declare("HttpError", &["Exception"]).unwrap();
        graph.declare("NotFound", &["HttpError"]).unwrap();
        graph.declare("Unauthorized", &["HttpError"]).unwrap();
        graph.declare("Unrelated", &[]).unwrap();
        Arc::new(graph)
    }

    #[test]
    fn test_narrower_after_broader_is_unreachable() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register("HttpError".into(), StatusHandler::new(500))
            .unwrap();

        let result = chain.register("NotFound".into(), StatusHandler::new(404));
        match result {
            Err(Error::UnreachableHandler {
                handler,
                shadowed_by,
            }) => {
                assert_eq!(handler, "NotFound");
                assert_eq!(shadowed_by, "HttpError");
            }
            other => panic!("expected UnreachableHandler, got {:?}", other),
        }
    }

    #[test]
    fn test_first_registered_match_wins() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register("NotFound".into(), StatusHandler::new(404))
            .unwrap();
        chain
            .register("HttpError".into(), StatusHandler::new(500))
            .unwrap();

        let handler = chain.resolve(&TypeDescriptor::named("NotFound")).unwrap();
        assert_eq!(handler.name(), "StatusHandler(404)");

        let handler = chain
            .resolve(&TypeDescriptor::named("Unauthorized"))
            .unwrap();
        assert_eq!(handler.name(), "StatusHandler(500)");

        assert!(chain.resolve(&TypeDescriptor::named("Unrelated")).is_none());
    }

    #[test]
    fn test_reregistering_replaces_in_place() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register("NotFound".into(), StatusHandler::new(404))
            .unwrap();
        chain
            .register("HttpError".into(), StatusHandler::new(500))
            .unwrap();
        chain
            .register("NotFound".into(), StatusHandler::new(410))
            .unwrap();

        let classes: Vec<_> = chain.classes().map(|c| c.to_string()).collect();
        assert_eq!(classes, vec!["NotFound", "HttpError"]);

        let handler = chain.resolve(&TypeDescriptor::named("NotFound")).unwrap();
        assert_eq!(handler.name(), "StatusHandler(410)");
    }

    #[test]
    fn test_provider_invoked_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut chain = ExceptionChain::new(graph());
        chain
            .register_provider(
                "HttpError".into(),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Arc::new(StatusHandler::new(500)) as Arc<dyn ExceptionHandler>
                }),
            )
            .unwrap();

        let first = chain.resolve(&TypeDescriptor::named("NotFound")).unwrap();
        let second = chain.resolve(&TypeDescriptor::named("NotFound")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redirect_handler() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register("Unauthorized".into(), RedirectHandler::new("/login"))
            .unwrap();

        let mut response = HttpResponse::ok();
        let resolution = chain
            .handle(Failure::new("Unauthorized", "no session"), &mut response)
            .await;

        assert!(matches!(resolution, Resolution::Handled { .. }));
        assert_eq!(response.status, 302);
        assert_eq!(response.headers.get("Location"), Some(&"/login".to_string()));
    }

    #[tokio::test]
    async fn test_response_action_handler() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register(
                "HttpError".into(),
                ResponseActionHandler::new(|response| {
                    response.status = 418;
                }),
            )
            .unwrap();

        let mut response = HttpResponse::ok();
        let resolution = chain
            .handle(Failure::new("NotFound", "gone"), &mut response)
            .await;
        assert!(matches!(resolution, Resolution::Handled { .. }));
        assert_eq!(response.status, 418);
    }

    #[tokio::test]
    async fn test_declining_handler_propagates() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register(
                "HttpError".into(),
                FnExceptionHandler::new(|_, _| Handling::NotHandled).with_name("Decliner"),
            )
            .unwrap();

        let mut response = HttpResponse::ok();
        let resolution = chain
            .handle(Failure::new("NotFound", "missing"), &mut response)
            .await;

        match resolution {
            Resolution::Propagate(failure) => assert_eq!(failure.message(), "missing"),
            other => panic!("expected Propagate, got {:?}", other),
        }
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_declining_handler_changes_are_rolled_back() {
        let mut chain = ExceptionChain::new(graph());
        chain
            .register(
                "HttpError".into(),
                FnExceptionHandler::new(|_, response| {
                    response.status = 503;
                    response.body = b"half written".to_vec();
                    response.headers.insert("Retry-After".to_string(), "5".to_string());
                    Handling::NotHandled
                }),
            )
            .unwrap();

        let mut response = HttpResponse::ok().with_body(b"original".to_vec());
        let resolution = chain
            .handle(Failure::new("NotFound", "missing"), &mut response)
            .await;

        assert!(matches!(resolution, Resolution::Propagate(_)));
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"original");
        assert!(response.headers.is_empty());
    }

    #[tokio::test]
    async fn test_status_handler_hides_server_messages() {
        let handler = StatusHandler::new(500);
        let mut response = HttpResponse::ok();
        handler
            .handle(&Failure::new("Exception", "db password wrong"), &mut response)
            .await;

        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(body["message"], "An internal server error occurred");
        assert_eq!(body["error"], "Exception");
    }

    #[test]
    fn test_sealed_chain_rejects_registration() {
        let mut chain = ExceptionChain::new(graph());
        chain.seal();
        let result = chain.register("NotFound".into(), StatusHandler::new(404));
        assert!(matches!(result, Err(Error::RegistrySealed(_))));
    }
}
