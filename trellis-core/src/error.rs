// Error types for the Trellis runtime

use thiserror::Error;

/// Boxed error returned by application-supplied strategies (renderers, caches).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the runtime.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (registration time)
    #[error("Unreachable exception handler: {handler} is always caught by {shadowed_by}")]
    UnreachableHandler {
        handler: String,
        shadowed_by: String,
    },

    #[error("No such path variable '{variable}' declared on {method}")]
    NoSuchPathVariable { variable: String, method: String },

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Registry is sealed: {0}")]
    RegistrySealed(&'static str),

    #[error("Invalid view pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Type graph error: {0}")]
    TypeGraph(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Conversion errors (per argument)
    #[error("No converter found for {0}")]
    NoConverterFound(String),

    #[error("Cannot convert a {found} value into {target}: source is not a string")]
    NotAString { target: String, found: &'static str },

    #[error("Cannot convert to primitive array {0}")]
    CannotConvertToPrimitive(String),

    #[error("Invalid value '{input}' for {target}: {reason}")]
    InvalidValue {
        target: String,
        input: String,
        reason: String,
    },

    #[error("Missing {source_kind} value '{key}'")]
    MissingValue {
        source_kind: &'static str,
        key: String,
    },

    // Internal consistency faults
    #[error("No such request parameter '{key}' for {method}")]
    NoSuchRequestParameter { key: String, method: String },

    // Resolution misses
    #[error("No renderer found for view '{0}'")]
    NoRendererFound(String),

    #[error("Failed to render view '{view}': {source}")]
    Rendering {
        view: String,
        #[source]
        source: BoxError,
    },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Raised while registering behaviors; fatal at startup.
    Configuration,
    /// Raised while converting a single argument; aborts the current request.
    Conversion,
    /// An expected lookup miss.
    ResolutionMiss,
    /// A state that prior validation should have made impossible.
    InternalFault,
    /// Transport or cache I/O failure.
    Io,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnreachableHandler { .. }
            | Error::NoSuchPathVariable { .. }
            | Error::ProviderNotFound(_)
            | Error::RegistrySealed(_)
            | Error::InvalidPattern { .. }
            | Error::TypeGraph(_)
            | Error::Config(_) => ErrorKind::Configuration,
            Error::NoConverterFound(_)
            | Error::NotAString { .. }
            | Error::CannotConvertToPrimitive(_)
            | Error::InvalidValue { .. }
            | Error::MissingValue { .. } => ErrorKind::Conversion,
            Error::NoSuchRequestParameter { .. } => ErrorKind::InternalFault,
            Error::NoRendererFound(_) | Error::Rendering { .. } => ErrorKind::ResolutionMiss,
            Error::Cache(_) | Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Check if this is a registration-time configuration error.
    pub fn is_configuration_error(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Name of the built-in exception class this error is raised as.
    ///
    /// These names are declared by [`TypeGraph::with_builtins`](crate::TypeGraph::with_builtins),
    /// so applications can register exception handlers against them.
    pub fn class_name(&self) -> &'static str {
        match self {
            Error::UnreachableHandler { .. } => "UnreachableHandler",
            Error::NoSuchPathVariable { .. } => "NoSuchPathVariable",
            Error::ProviderNotFound(_) => "ProviderNotFound",
            Error::RegistrySealed(_) => "RegistrySealed",
            Error::InvalidPattern { .. } => "InvalidPattern",
            Error::TypeGraph(_) => "TypeGraphError",
            Error::Config(_) => "ConfigurationError",
            Error::NoConverterFound(_) => "NoConverterFound",
            Error::NotAString { .. } => "NotAString",
            Error::CannotConvertToPrimitive(_) => "CannotConvertToPrimitive",
            Error::InvalidValue { .. } => "InvalidValue",
            Error::MissingValue { .. } => "MissingValue",
            Error::NoSuchRequestParameter { .. } => "NoSuchRequestParameter",
            Error::NoRendererFound(_) => "NoRendererFound",
            Error::Rendering { .. } => "RenderingFailure",
            Error::Cache(_) => "CacheError",
            Error::Io(_) => "IoError",
        }
    }

    /// HTTP status the error maps to when no handler claims it.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidValue { .. } | Error::MissingValue { .. } => 400,
            Error::NoRendererFound(_) => 404,
            _ => 500,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}
