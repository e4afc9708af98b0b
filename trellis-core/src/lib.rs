// Extension runtime for the Trellis MVC framework
// Converters, argument binding, exception chains, view renderers and response caching

pub mod cache;
pub mod config;
pub mod container;
pub mod converter;
pub mod error;
pub mod exception;
pub mod fetcher;
pub mod http;
pub mod logging;
pub mod outcome;
pub mod runtime;
pub mod seal;
pub mod types;
pub mod value;
pub mod view;

// Re-export commonly used types
pub use cache::{Cache, CacheCapture, CacheFactory, CacheSink, MemoryCache, ResponseStore};
pub use config::RuntimeConfig;
pub use container::{Container, Provider};
pub use converter::{Converter, ConverterRegistry, FnConverter, FromStrConverter, ResolvedConverter};
pub use error::{BoxError, Error, ErrorKind, Result};
pub use exception::{
    ExceptionChain, ExceptionHandler, FnExceptionHandler, Handling, RedirectHandler, Resolution,
    ResponseActionHandler, StatusHandler,
};
pub use fetcher::{
    ArgumentBinder, ArgumentFetcher, MethodDescriptor, ParameterDescriptor, ParameterSource,
    RawValues,
};
pub use http::{HttpRequest, HttpResponse, ResponseMetadata};
pub use outcome::{Failure, Outcome, Reply, ResponseAction};
pub use runtime::{Completion, RequestScope, Runtime, RuntimeBuilder};
pub use types::{Primitive, TypeDescriptor, TypeGraph};
pub use value::{RawValue, Value};
pub use view::{FnViewRenderer, JsonViewRenderer, Model, Rendered, ViewRenderer, ViewRenderers};

/// Everything an application typically needs to register behaviors and
/// drive requests.
pub mod prelude {
    pub use crate::cache::{Cache, CacheFactory, MemoryCache, ResponseStore};
    pub use crate::config::RuntimeConfig;
    pub use crate::container::{Container, Provider};
    pub use crate::converter::{Converter, FnConverter, FromStrConverter};
    pub use crate::error::{Error, Result};
    pub use crate::exception::{
        ExceptionHandler, FnExceptionHandler, Handling, RedirectHandler, ResponseActionHandler,
        StatusHandler,
    };
    pub use crate::fetcher::{MethodDescriptor, ParameterDescriptor, RawValues};
    pub use crate::http::{HttpRequest, HttpResponse};
    pub use crate::outcome::{Failure, Outcome, Reply};
    pub use crate::runtime::{Completion, Runtime, RuntimeBuilder};
    pub use crate::types::{TypeDescriptor, TypeGraph};
    pub use crate::value::{RawValue, Value};
    pub use crate::view::{FnViewRenderer, JsonViewRenderer, Model, Rendered, ViewRenderer};
    pub use async_trait::async_trait;
}
