//! Runtime assembly and the per-request workflow
//!
//! A [`RuntimeBuilder`] owns the type graph and the registries while the
//! application registers its behaviors. [`RuntimeBuilder::build`] seals every
//! registry and returns a [`Runtime`] that request contexts share without
//! locking.
//!
//! ```
//! use trellis_core::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let mut builder = RuntimeBuilder::new(TypeGraph::with_builtins());
//! builder
//!     .register_handler("ConversionError".into(), StatusHandler::new(400))
//!     .unwrap();
//! let runtime = builder.build().unwrap();
//!
//! let mut scope = runtime.begin_request(HttpRequest::new("GET", "/"), Box::new(std::io::sink()));
//! let completion = runtime
//!     .complete(&mut scope, Outcome::redirect("/login"))
//!     .await
//!     .unwrap();
//! assert_eq!(completion.status(), Some(302));
//! # });
//! ```

use crate::cache::{Cache, CacheCapture, CacheFactory, ResponseStore};
use crate::config::RuntimeConfig;
use crate::container::Container;
use crate::converter::{Converter, ConverterRegistry};
use crate::error::Result;
use crate::exception::{ExceptionChain, ExceptionHandler, Resolution};
use crate::fetcher::{ArgumentBinder, MethodDescriptor};
use crate::http::{HttpRequest, HttpResponse, ResponseMetadata};
use crate::outcome::{Failure, Outcome, Reply};
use crate::types::{TypeDescriptor, TypeGraph};
use crate::view::{JsonViewRenderer, ViewRenderer, ViewRenderers};
use std::fmt;
use std::io::Write;
use std::sync::Arc;

/// Pattern the JSON renderer is registered under when enabled in config.
pub const JSON_VIEW_PATTERN: &str = r".*\.json";

// ============================================================================
// Builder
// ============================================================================

/// Registration-phase owner of the runtime's registries.
pub struct RuntimeBuilder {
    types: Arc<TypeGraph>,
    converters: ConverterRegistry,
    exceptions: ExceptionChain,
    views: ViewRenderers,
    container: Container,
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Start registration over a fully declared type graph.
    pub fn new(types: TypeGraph) -> Self {
        let types = Arc::new(types);
        Self {
            converters: ConverterRegistry::with_defaults(types.clone()),
            exceptions: ExceptionChain::new(types.clone()),
            views: ViewRenderers::new(),
            container: Container::new(),
            config: RuntimeConfig::default(),
            types,
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    pub fn types(&self) -> &Arc<TypeGraph> {
        &self.types
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn converters_mut(&mut self) -> &mut ConverterRegistry {
        &mut self.converters
    }

    pub fn exceptions_mut(&mut self) -> &mut ExceptionChain {
        &mut self.exceptions
    }

    pub fn views_mut(&mut self) -> &mut ViewRenderers {
        &mut self.views
    }

    pub fn register_converter<C: Converter>(
        &mut self,
        target_type: TypeDescriptor,
        converter: C,
        allows_subtype_construction: bool,
    ) -> Result<&mut Self> {
        self.converters
            .register(target_type, converter, allows_subtype_construction)?;
        Ok(self)
    }

    pub fn register_handler<H: ExceptionHandler>(
        &mut self,
        exception_class: TypeDescriptor,
        handler: H,
    ) -> Result<&mut Self> {
        self.exceptions.register(exception_class, handler)?;
        Ok(self)
    }

    pub fn register_view<R: ViewRenderer>(&mut self, pattern: &str, renderer: R) -> Result<&mut Self> {
        self.views.register(pattern, renderer)?;
        Ok(self)
    }

    /// End the registration phase.
    ///
    /// Adds the configured defaults after everything the application
    /// registered, so application entries keep priority, then seals every
    /// registry.
    pub fn build(mut self) -> Result<Runtime> {
        if self.config.views.register_json_views {
            self.views.register(JSON_VIEW_PATTERN, JsonViewRenderer::new())?;
        }

        let store = Arc::new(ResponseStore::new(
            self.config.cache.max_entries,
            self.config.cache.ttl(),
        ));
        if !self.container.has::<CacheFactory>() {
            self.container.register(CacheFactory::memory(store.clone()));
        }

        self.converters.seal();
        self.exceptions.seal();
        self.views.seal();

        tracing::info!(
            converters = self.converters.len(),
            exception_handlers = self.exceptions.len(),
            view_renderers = self.views.len(),
            "Runtime built"
        );

        Ok(Runtime {
            inner: Arc::new(RuntimeInner {
                types: self.types,
                converters: Arc::new(self.converters),
                exceptions: self.exceptions,
                views: self.views,
                container: self.container,
                store,
                config: self.config,
            }),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new(TypeGraph::with_builtins())
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("converters", &self.converters)
            .field("exceptions", &self.exceptions)
            .field("views", &self.views)
            .finish()
    }
}

// ============================================================================
// Runtime
// ============================================================================

struct RuntimeInner {
    types: Arc<TypeGraph>,
    converters: Arc<ConverterRegistry>,
    exceptions: ExceptionChain,
    views: ViewRenderers,
    container: Container,
    store: Arc<ResponseStore>,
    config: RuntimeConfig,
}

/// Sealed registries shared by all request contexts. Cheap to clone.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub fn types(&self) -> &Arc<TypeGraph> {
        &self.inner.types
    }

    pub fn converters(&self) -> &Arc<ConverterRegistry> {
        &self.inner.converters
    }

    pub fn exceptions(&self) -> &ExceptionChain {
        &self.inner.exceptions
    }

    pub fn views(&self) -> &ViewRenderers {
        &self.inner.views
    }

    pub fn container(&self) -> &Container {
        &self.inner.container
    }

    /// Store backing the default [`CacheFactory`].
    pub fn response_store(&self) -> &Arc<ResponseStore> {
        &self.inner.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Build the argument binder for a controller method. Fails on
    /// configuration errors such as an undeclared path variable.
    pub fn prepare(&self, method: &MethodDescriptor) -> Result<ArgumentBinder> {
        ArgumentBinder::prepare(method, &self.inner.converters)
    }

    /// Open the per-request context writing to `transport`.
    pub fn begin_request(&self, request: HttpRequest, transport: Box<dyn Write + Send>) -> RequestScope {
        tracing::trace!(method = %request.method, path = %request.path, "Request started");
        RequestScope {
            capture: CacheCapture::new(request.clone(), transport),
            container: self.inner.container.clone(),
            request,
            response: HttpResponse::ok(),
            finished: None,
        }
    }

    /// Turn a controller outcome into a written response.
    ///
    /// Views are rendered, redirects and response actions are applied, and
    /// failures (including rendering failures) run through the exception
    /// chain. When no handler takes the failure, nothing is written and the
    /// failure is returned as [`Completion::Propagated`]; the caller then
    /// writes its own response and calls [`RequestScope::finish`].
    pub async fn complete(&self, scope: &mut RequestScope, outcome: Outcome) -> Result<Completion> {
        let failure = match outcome {
            Outcome::Ok(reply) => self.write_reply(&mut scope.response, reply).await.err(),
            Outcome::Redirect(location) => {
                scope.response.set_redirect(&location);
                None
            }
            Outcome::ResponseAction(action) => {
                action(&mut scope.response);
                None
            }
            Outcome::Failure(failure) => Some(failure),
        };

        let handled_by = match failure {
            None => None,
            Some(failure) => match self.inner.exceptions.handle(failure, &mut scope.response).await {
                Resolution::Handled { handler } => Some(handler.name().to_string()),
                Resolution::Propagate(failure) => {
                    tracing::debug!(failure = %failure, "Failure propagated to caller");
                    return Ok(Completion::Propagated(failure));
                }
            },
        };

        let metadata = scope.finish().await?;
        Ok(Completion::Responded {
            metadata,
            handled_by,
        })
    }

    async fn write_reply(&self, response: &mut HttpResponse, reply: Reply) -> std::result::Result<(), Failure> {
        match reply {
            Reply::View { name, model } => {
                let rendered = self.inner.views.render(&name, &model).await?;
                response
                    .headers
                    .insert("Content-Type".to_string(), rendered.content_type);
                response.body = rendered.body;
            }
            Reply::Body { content_type, body } => {
                response
                    .headers
                    .insert("Content-Type".to_string(), content_type);
                response.body = body;
            }
            Reply::Empty => {
                response.body.clear();
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("converters", &self.inner.converters)
            .field("exceptions", &self.inner.exceptions)
            .field("views", &self.inner.views)
            .finish()
    }
}

// ============================================================================
// Request Scope
// ============================================================================

/// State owned by one request context.
pub struct RequestScope {
    request: HttpRequest,
    response: HttpResponse,
    capture: CacheCapture,
    container: Container,
    finished: Option<ResponseMetadata>,
}

impl RequestScope {
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut HttpResponse {
        &mut self.response
    }

    /// Bind a cache to this request. See [`CacheCapture::cache_request`].
    pub async fn cache_request(&mut self, cache: Option<Arc<dyn Cache>>) -> Result<Arc<dyn Cache>> {
        self.capture.cache_request(cache, &self.container).await
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Write the response body to the transport and let a bound cache save
    /// it. Only the first call writes; later calls return the same metadata.
    pub async fn finish(&mut self) -> Result<ResponseMetadata> {
        if let Some(metadata) = &self.finished {
            return Ok(metadata.clone());
        }

        self.capture.write_all(&self.response.body)?;
        let metadata = self.response.metadata();
        self.finished = Some(metadata.clone());
        self.capture.finish(&metadata).await?;

        tracing::trace!(
            status = metadata.status,
            bytes = metadata.content_length,
            "Request finished"
        );
        Ok(metadata)
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("request", &self.request.cache_key())
            .field("status", &self.response.status)
            .field("capture", &self.capture)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// How a request ended.
#[derive(Debug)]
pub enum Completion {
    /// The response was written. `handled_by` names the exception handler
    /// that produced it, if a failure occurred.
    Responded {
        metadata: ResponseMetadata,
        handled_by: Option<String>,
    },
    /// No handler took the failure; the caller decides what to write.
    Propagated(Failure),
}

impl Completion {
    pub fn status(&self) -> Option<u16> {
        match self {
            Completion::Responded { metadata, .. } => Some(metadata.status),
            Completion::Propagated(_) => None,
        }
    }

    pub fn handled_by(&self) -> Option<&str> {
        match self {
            Completion::Responded { handled_by, .. } => handled_by.as_deref(),
            Completion::Propagated(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedBuffer;
    use crate::error::Error;
    use crate::exception::StatusHandler;
    use crate::view::Model;
    use serde_json::json;

    fn scope(runtime: &Runtime, path: &str) -> (RequestScope, SharedBuffer) {
        let transport = SharedBuffer::new();
        let scope = runtime.begin_request(HttpRequest::new("GET", path), Box::new(transport.clone()));
        (scope, transport)
    }

    #[test]
    fn test_build_seals_registries() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        assert!(runtime.converters().is_sealed());
        assert!(runtime.exceptions().is_sealed());
        assert!(runtime.views().is_sealed());
        assert!(runtime.container().has::<CacheFactory>());
    }

    #[test]
    fn test_json_views_registered_last() {
        let mut builder = RuntimeBuilder::default();
        builder.register_view(".*", JsonViewRenderer::pretty()).unwrap();
        let runtime = builder.build().unwrap();

        let patterns: Vec<_> = runtime.views().patterns().collect();
        assert_eq!(patterns, vec![".*", JSON_VIEW_PATTERN]);
    }

    #[tokio::test]
    async fn test_view_outcome_is_rendered_and_written() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let (mut scope, transport) = scope(&runtime, "/users");

        let mut model = Model::new();
        model.insert("count".to_string(), json!(2));

        let completion = runtime
            .complete(&mut scope, Outcome::view("users.json", model))
            .await
            .unwrap();

        assert_eq!(completion.status(), Some(200));
        assert!(completion.handled_by().is_none());
        assert_eq!(transport.contents(), br#"{"count":2}"#.to_vec());
    }

    #[tokio::test]
    async fn test_missing_renderer_goes_through_chain() {
        let mut builder = RuntimeBuilder::default();
        builder
            .register_handler("ViewError".into(), StatusHandler::new(404).expose_message(true))
            .unwrap();
        let runtime = builder.build().unwrap();
        let (mut scope, _) = scope(&runtime, "/");

        let completion = runtime
            .complete(&mut scope, Outcome::view("home", Model::new()))
            .await
            .unwrap();

        assert_eq!(completion.status(), Some(404));
        assert_eq!(completion.handled_by(), Some("StatusHandler(404)"));
    }

    #[tokio::test]
    async fn test_unhandled_failure_propagates_without_writing() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let (mut scope, transport) = scope(&runtime, "/");

        let completion = runtime
            .complete(&mut scope, Outcome::failure(Failure::new("Exception", "boom")))
            .await
            .unwrap();

        match completion {
            Completion::Propagated(failure) => assert_eq!(failure.message(), "boom"),
            other => panic!("expected propagation, got {:?}", other),
        }
        assert!(!scope.is_finished());
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn test_response_action_outcome() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let (mut scope, transport) = scope(&runtime, "/");

        runtime
            .complete(
                &mut scope,
                Outcome::action(|response| {
                    response.status = 202;
                    response.body = b"queued".to_vec();
                }),
            )
            .await
            .unwrap();

        assert_eq!(scope.response().status, 202);
        assert_eq!(transport.contents(), b"queued");
    }

    #[tokio::test]
    async fn test_finish_writes_once() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let (mut scope, transport) = scope(&runtime, "/");
        scope.response_mut().body = b"once".to_vec();

        let first = scope.finish().await.unwrap();
        let second = scope.finish().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.contents(), b"once");
    }

    #[test]
    fn test_prepare_reports_configuration_errors() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let method = MethodDescriptor::new("UserController::show")
            .with_path_variables(["name"])
            .with_parameter(crate::fetcher::ParameterDescriptor::path("id", TypeDescriptor::integer()));

        assert!(matches!(
            runtime.prepare(&method),
            Err(Error::NoSuchPathVariable { .. })
        ));
    }

    struct RejectingSinkCache;

    #[async_trait::async_trait]
    impl Cache for RejectingSinkCache {
        async fn begin(&self, _request: &HttpRequest) -> Result<crate::cache::CacheSink> {
            struct Full;
            impl Write for Full {
                fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                    Err(std::io::Error::other("cache disk full"))
                }
                fn flush(&mut self) -> std::io::Result<()> {
                    Ok(())
                }
            }
            Ok(Box::new(Full))
        }

        async fn save(&self, _metadata: &ResponseMetadata) -> Result<()> {
            Err(Error::Cache("saved a detached cache".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failing_cache_does_not_corrupt_response() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let (mut scope, transport) = scope(&runtime, "/");
        scope.cache_request(Some(Arc::new(RejectingSinkCache))).await.unwrap();
        scope.response_mut().body = b"hello".to_vec();

        scope.finish().await.unwrap();
        scope.finish().await.unwrap();

        assert_eq!(transport.contents(), b"hello");
    }

    #[tokio::test]
    async fn test_cache_request_after_finish_fails() {
        let runtime = RuntimeBuilder::default().build().unwrap();
        let (mut scope, _) = scope(&runtime, "/");
        scope.finish().await.unwrap();

        let result = scope.cache_request(None).await;
        assert!(matches!(result, Err(Error::Cache(_))));
    }
}
