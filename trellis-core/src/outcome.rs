// Controller invocation outcomes

use crate::error::{BoxError, Error};
use crate::http::HttpResponse;
use crate::types::TypeDescriptor;
use crate::view::Model;
use std::fmt;
use std::sync::Arc;

/// A deferred mutation of the response, run when the request completes.
pub type ResponseAction = Arc<dyn Fn(&mut HttpResponse) + Send + Sync>;

/// What a controller method produced.
///
/// Redirects and response actions are ordinary results rather than errors;
/// only [`Outcome::Failure`] goes through the exception chain.
pub enum Outcome {
    Ok(Reply),
    Redirect(String),
    ResponseAction(ResponseAction),
    Failure(Failure),
}

impl Outcome {
    pub fn view(name: impl Into<String>, model: Model) -> Self {
        Outcome::Ok(Reply::View {
            name: name.into(),
            model,
        })
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Outcome::Redirect(location.into())
    }

    pub fn action<F>(action: F) -> Self
    where
        F: Fn(&mut HttpResponse) + Send + Sync + 'static,
    {
        Outcome::ResponseAction(Arc::new(action))
    }

    pub fn failure(failure: impl Into<Failure>) -> Self {
        Outcome::Failure(failure.into())
    }
}

impl From<Result<Reply, Failure>> for Outcome {
    fn from(result: Result<Reply, Failure>) -> Self {
        match result {
            Ok(reply) => Outcome::Ok(reply),
            Err(failure) => Outcome::Failure(failure),
        }
    }
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Ok(reply) => f.debug_tuple("Ok").field(reply).finish(),
            Outcome::Redirect(location) => f.debug_tuple("Redirect").field(location).finish(),
            Outcome::ResponseAction(_) => write!(f, "ResponseAction(..)"),
            Outcome::Failure(failure) => f.debug_tuple("Failure").field(failure).finish(),
        }
    }
}

/// A successful controller result.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Render a named view with the given model.
    View { name: String, model: Model },
    /// Write a ready-made body.
    Body { content_type: String, body: Vec<u8> },
    /// Nothing to write.
    Empty,
}

/// A thrown exception: its class in the type graph, a message and the
/// underlying error, if any.
pub struct Failure {
    class: TypeDescriptor,
    message: String,
    source: Option<BoxError>,
}

impl Failure {
    pub fn new(class: impl Into<TypeDescriptor>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn class(&self) -> &TypeDescriptor {
        &self.class
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// The runtime error this failure was raised from, if any.
    pub fn runtime_error(&self) -> Option<&Error> {
        self.source.as_ref()?.downcast_ref::<Error>()
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure {
            class: TypeDescriptor::named(error.class_name()),
            message: error.to_string(),
            source: Some(Box::new(error)),
        }
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("class", &self.class)
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}
