//! Argument fetchers
//!
//! A fetcher is prepared once per controller-method parameter when the
//! method is registered, and run once per request. Preparing resolves the
//! parameter's converter from the [`ConverterRegistry`], so an unconvertible
//! declared type fails at registration. Every fetcher variant differs only
//! in where it finds its raw value.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::converter::ConverterRegistry;
//! use trellis_core::fetcher::{ArgumentBinder, MethodDescriptor, ParameterDescriptor, RawValues};
//! use trellis_core::types::{TypeDescriptor, TypeGraph};
//! use trellis_core::value::Value;
//!
//! let converters = Arc::new(ConverterRegistry::with_defaults(Arc::new(TypeGraph::with_builtins())));
//!
//! let method = MethodDescriptor::new("UserController::show")
//!     .with_path_variables(["id"])
//!     .with_parameter(ParameterDescriptor::path("id", TypeDescriptor::integer()));
//!
//! let binder = ArgumentBinder::prepare(&method, &converters).unwrap();
//! let args = binder.bind(&RawValues::new().with_path("id", "42")).unwrap();
//! assert_eq!(args, vec![Value::Int(42)]);
//! ```

use crate::converter::{ConverterRegistry, ResolvedConverter};
use crate::error::{Error, Result};
use crate::types::TypeDescriptor;
use crate::value::{RawValue, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Descriptors
// ============================================================================

/// Where a parameter's raw value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterSource {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParameterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterSource::Path => "path",
            ParameterSource::Query => "query",
            ParameterSource::Header => "header",
            ParameterSource::Cookie => "cookie",
            ParameterSource::Body => "body",
        }
    }
}

/// A declared controller-method parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub declared_type: TypeDescriptor,
    pub source: ParameterSource,
    /// Name of the raw value in its source. Unused for bodies.
    pub key: String,
}

impl ParameterDescriptor {
    pub fn new(source: ParameterSource, key: impl Into<String>, declared_type: TypeDescriptor) -> Self {
        Self {
            declared_type,
            source,
            key: key.into(),
        }
    }

    pub fn path(key: impl Into<String>, declared_type: TypeDescriptor) -> Self {
        Self::new(ParameterSource::Path, key, declared_type)
    }

    pub fn query(key: impl Into<String>, declared_type: TypeDescriptor) -> Self {
        Self::new(ParameterSource::Query, key, declared_type)
    }

    pub fn header(key: impl Into<String>, declared_type: TypeDescriptor) -> Self {
        Self::new(ParameterSource::Header, key, declared_type)
    }

    pub fn cookie(key: impl Into<String>, declared_type: TypeDescriptor) -> Self {
        Self::new(ParameterSource::Cookie, key, declared_type)
    }

    pub fn body(declared_type: TypeDescriptor) -> Self {
        Self::new(ParameterSource::Body, "", declared_type)
    }
}

/// A resolved controller method as the routing collaborator describes it.
#[derive(Debug, Clone, Default)]
pub struct MethodDescriptor {
    /// Human readable name, used in errors and logs.
    pub name: String,
    /// Path variables declared by the method's route template.
    pub path_variables: HashSet<String>,
    pub parameters: Vec<ParameterDescriptor>,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_path_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path_variables
            .extend(variables.into_iter().map(Into::into));
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterDescriptor) -> Self {
        self.parameters.push(parameter);
        self
    }
}

// ============================================================================
// Raw Values
// ============================================================================

/// Raw values already extracted from the current request.
#[derive(Debug, Clone, Default)]
pub struct RawValues {
    pub path: HashMap<String, RawValue>,
    pub query: HashMap<String, RawValue>,
    pub headers: HashMap<String, RawValue>,
    pub cookies: HashMap<String, RawValue>,
    pub body: Option<Vec<u8>>,
}

impl RawValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.path.insert(key.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.cookies.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Collect raw values from a request: headers, query parameters, cookies
    /// from the `Cookie` header, and the body when non-empty.
    ///
    /// Path variables come from the router and are passed separately.
    pub fn from_request(
        request: &crate::http::HttpRequest,
        path: HashMap<String, RawValue>,
    ) -> Self {
        let headers = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), RawValue::Text(v.clone())))
            .collect();
        let mut grouped: HashMap<String, Vec<RawValue>> = HashMap::new();
        for (k, v) in &request.query_params {
            grouped
                .entry(k.clone())
                .or_default()
                .push(RawValue::Text(v.clone()));
        }
        let query = grouped
            .into_iter()
            .map(|(k, mut values)| {
                let value = if values.len() == 1 {
                    values.remove(0)
                } else {
                    RawValue::List(values)
                };
                (k, value)
            })
            .collect();
        let cookies = request
            .header("cookie")
            .map(|header| parse_cookies(header))
            .unwrap_or_default();

        Self {
            path,
            query,
            headers,
            cookies,
            body: (!request.body.is_empty()).then(|| request.body.clone()),
        }
    }
}

fn parse_cookies(header: &str) -> HashMap<String, RawValue> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), RawValue::Text(value.trim().to_string())))
        })
        .collect()
}

// ============================================================================
// Fetchers
// ============================================================================

/// Locates one parameter's raw value and converts it.
pub trait ArgumentFetcher: Send + Sync {
    /// Produce the typed value for the current request.
    fn fetch_prepared(&self, raw: &RawValues) -> Result<Value>;

    /// The parameter this fetcher was prepared for.
    fn parameter(&self) -> &ParameterDescriptor;
}

/// State every fetcher captures when it is prepared.
struct Prepared {
    parameter: ParameterDescriptor,
    method: String,
    converter: ResolvedConverter,
}

impl Prepared {
    fn new(
        parameter: ParameterDescriptor,
        method: &MethodDescriptor,
        converters: &ConverterRegistry,
    ) -> Result<Self> {
        let converter = converters.resolve(&parameter.declared_type)?;
        Ok(Self {
            parameter,
            method: method.name.clone(),
            converter,
        })
    }

    fn convert(&self, raw: &RawValue) -> Result<Value> {
        self.converter.convert(raw)
    }

    fn missing(&self) -> Error {
        Error::MissingValue {
            source_kind: self.parameter.source.as_str(),
            key: self.parameter.key.clone(),
        }
    }
}

/// Fetches a named path variable.
pub struct PathVariableFetcher {
    prepared: Prepared,
}

impl PathVariableFetcher {
    /// Prepare the fetcher, failing if the owning route does not declare the
    /// variable or no converter can construct its type.
    pub fn new(
        parameter: ParameterDescriptor,
        method: &MethodDescriptor,
        converters: &ConverterRegistry,
    ) -> Result<Self> {
        if !method.path_variables.contains(&parameter.key) {
            return Err(Error::NoSuchPathVariable {
                variable: parameter.key,
                method: method.name.clone(),
            });
        }

        Ok(Self {
            prepared: Prepared::new(parameter, method, converters)?,
        })
    }
}

impl ArgumentFetcher for PathVariableFetcher {
    fn fetch_prepared(&self, raw: &RawValues) -> Result<Value> {
        let key = &self.prepared.parameter.key;
        match raw.path.get(key) {
            Some(value) => self.prepared.convert(value),
            None => {
                // The route declared this variable, so the router must have extracted it.
                tracing::error!(
                    method = %self.prepared.method,
                    variable = %key,
                    "Declared path variable missing from request"
                );
                Err(Error::NoSuchRequestParameter {
                    key: key.clone(),
                    method: self.prepared.method.clone(),
                })
            }
        }
    }

    fn parameter(&self) -> &ParameterDescriptor {
        &self.prepared.parameter
    }
}

/// Fetches a query string parameter.
pub struct QueryParamFetcher {
    prepared: Prepared,
}

impl ArgumentFetcher for QueryParamFetcher {
    fn fetch_prepared(&self, raw: &RawValues) -> Result<Value> {
        raw.query
            .get(&self.prepared.parameter.key)
            .ok_or_else(|| self.prepared.missing())
            .and_then(|value| self.prepared.convert(value))
    }

    fn parameter(&self) -> &ParameterDescriptor {
        &self.prepared.parameter
    }
}

/// Fetches a request header. Header names match case-insensitively.
pub struct HeaderFetcher {
    prepared: Prepared,
}

impl ArgumentFetcher for HeaderFetcher {
    fn fetch_prepared(&self, raw: &RawValues) -> Result<Value> {
        let key = &self.prepared.parameter.key;
        raw.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, value)| value)
            .ok_or_else(|| self.prepared.missing())
            .and_then(|value| self.prepared.convert(value))
    }

    fn parameter(&self) -> &ParameterDescriptor {
        &self.prepared.parameter
    }
}

/// Fetches a cookie.
pub struct CookieFetcher {
    prepared: Prepared,
}

impl ArgumentFetcher for CookieFetcher {
    fn fetch_prepared(&self, raw: &RawValues) -> Result<Value> {
        raw.cookies
            .get(&self.prepared.parameter.key)
            .ok_or_else(|| self.prepared.missing())
            .and_then(|value| self.prepared.convert(value))
    }

    fn parameter(&self) -> &ParameterDescriptor {
        &self.prepared.parameter
    }
}

/// Fetches the request body. UTF-8 bodies convert as text; anything else is
/// handed over as binary and rejected by the registry.
pub struct BodyFetcher {
    prepared: Prepared,
}

impl ArgumentFetcher for BodyFetcher {
    fn fetch_prepared(&self, raw: &RawValues) -> Result<Value> {
        let body = raw.body.as_ref().ok_or_else(|| self.prepared.missing())?;
        let raw = match std::str::from_utf8(body) {
            Ok(text) => RawValue::Text(text.to_string()),
            Err(_) => RawValue::Binary(body.clone()),
        };
        self.prepared.convert(&raw)
    }

    fn parameter(&self) -> &ParameterDescriptor {
        &self.prepared.parameter
    }
}

/// Prepare the fetcher for one parameter of `method`.
pub fn fetcher_for(
    parameter: &ParameterDescriptor,
    method: &MethodDescriptor,
    converters: &Arc<ConverterRegistry>,
) -> Result<Box<dyn ArgumentFetcher>> {
    let prepared = || Prepared::new(parameter.clone(), method, converters);

    let fetcher: Box<dyn ArgumentFetcher> = match parameter.source {
        ParameterSource::Path => Box::new(PathVariableFetcher::new(
            parameter.clone(),
            method,
            converters,
        )?),
        ParameterSource::Query => Box::new(QueryParamFetcher {
            prepared: prepared()?,
        }),
        ParameterSource::Header => Box::new(HeaderFetcher {
            prepared: prepared()?,
        }),
        ParameterSource::Cookie => Box::new(CookieFetcher {
            prepared: prepared()?,
        }),
        ParameterSource::Body => Box::new(BodyFetcher {
            prepared: prepared()?,
        }),
    };
    Ok(fetcher)
}

// ============================================================================
// Argument Binder
// ============================================================================

/// The prepared fetchers for one controller method, in parameter order.
pub struct ArgumentBinder {
    method: String,
    fetchers: Vec<Box<dyn ArgumentFetcher>>,
}

impl ArgumentBinder {
    /// Prepare fetchers for every parameter of `method`.
    ///
    /// Fails with the first configuration error, e.g. a path parameter bound
    /// to a variable the route does not declare.
    pub fn prepare(method: &MethodDescriptor, converters: &Arc<ConverterRegistry>) -> Result<Self> {
        let fetchers = method
            .parameters
            .iter()
            .map(|parameter| fetcher_for(parameter, method, converters))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            method = %method.name,
            parameters = fetchers.len(),
            "Argument fetchers prepared"
        );

        Ok(Self {
            method: method.name.clone(),
            fetchers,
        })
    }

    /// Produce the ordered argument values for one request.
    pub fn bind(&self, raw: &RawValues) -> Result<Vec<Value>> {
        self.fetchers
            .iter()
            .map(|fetcher| {
                fetcher.fetch_prepared(raw).inspect_err(|e| {
                    tracing::debug!(
                        method = %self.method,
                        source = fetcher.parameter().source.as_str(),
                        key = %fetcher.parameter().key,
                        error = %e,
                        "Argument binding failed"
                    );
                })
            })
            .collect()
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

impl fmt::Debug for ArgumentBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentBinder")
            .field("method", &self.method)
            .field("parameters", &self.fetchers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpRequest;
    use crate::types::TypeGraph;

    fn converters() -> Arc<ConverterRegistry> {
        Arc::new(ConverterRegistry::with_defaults(Arc::new(
            TypeGraph::with_builtins(),
        )))
    }

    fn show_user() -> MethodDescriptor {
        MethodDescriptor::new("UserController::show").with_path_variables(["id", "name"])
    }

    #[test]
    fn test_path_variable_declared() {
        let fetcher = PathVariableFetcher::new(
            ParameterDescriptor::path("id", TypeDescriptor::integer()),
            &show_user(),
            &converters(),
        );
        assert!(fetcher.is_ok());
    }

    #[test]
    fn test_path_variable_not_declared() {
        let method = MethodDescriptor::new("UserController::rename").with_path_variables(["name"]);
        let result = PathVariableFetcher::new(
            ParameterDescriptor::path("id", TypeDescriptor::integer()),
            &method,
            &converters(),
        );

        match result {
            Err(Error::NoSuchPathVariable { variable, method }) => {
                assert_eq!(variable, "id");
                assert_eq!(method, "UserController::rename");
            }
            _ => panic!("expected NoSuchPathVariable"),
        }
    }

    #[test]
    fn test_path_variable_missing_at_request_time() {
        let fetcher = PathVariableFetcher::new(
            ParameterDescriptor::path("id", TypeDescriptor::integer()),
            &show_user(),
            &converters(),
        )
        .unwrap();

        let result = fetcher.fetch_prepared(&RawValues::new());
        assert!(matches!(result, Err(Error::NoSuchRequestParameter { .. })));
    }

    #[test]
    fn test_query_and_header_fetchers() {
        let method = MethodDescriptor::new("UserController::list")
            .with_parameter(ParameterDescriptor::query("page", TypeDescriptor::integer()))
            .with_parameter(ParameterDescriptor::header("X-Trace", TypeDescriptor::string()));
        let binder = ArgumentBinder::prepare(&method, &converters()).unwrap();

        let raw = RawValues::new()
            .with_query("page", "3")
            .with_header("x-trace", "abc");
        let args = binder.bind(&raw).unwrap();
        assert_eq!(args, vec![Value::Int(3), Value::from("abc")]);
    }

    #[test]
    fn test_missing_query_value() {
        let method = MethodDescriptor::new("UserController::list")
            .with_parameter(ParameterDescriptor::query("page", TypeDescriptor::integer()));
        let binder = ArgumentBinder::prepare(&method, &converters()).unwrap();

        let result = binder.bind(&RawValues::new());
        assert!(matches!(
            result,
            Err(Error::MissingValue { source_kind: "query", .. })
        ));
    }

    #[test]
    fn test_multi_valued_query() {
        let method = MethodDescriptor::new("UserController::byIds").with_parameter(
            ParameterDescriptor::query("id", TypeDescriptor::array_of(TypeDescriptor::integer())),
        );
        let binder = ArgumentBinder::prepare(&method, &converters()).unwrap();

        let raw = RawValues::new().with_query("id", vec!["4".to_string(), "5".to_string()]);
        let args = binder.bind(&raw).unwrap();
        assert_eq!(args, vec![Value::Array(vec![Value::Int(4), Value::Int(5)])]);
    }

    #[test]
    fn test_body_fetcher() {
        let method = MethodDescriptor::new("UserController::create")
            .with_parameter(ParameterDescriptor::body(TypeDescriptor::json()));
        let binder = ArgumentBinder::prepare(&method, &converters()).unwrap();

        let args = binder
            .bind(&RawValues::new().with_body(br#"{"name":"ada"}"#.to_vec()))
            .unwrap();
        assert_eq!(args[0].as_json().unwrap()["name"], "ada");

        let result = binder.bind(&RawValues::new().with_body(vec![0xff, 0xfe]));
        assert!(matches!(result, Err(Error::NotAString { .. })));
    }

    #[test]
    fn test_from_request_parses_cookies() {
        let request = HttpRequest::new("GET", "/")
            .with_header("Cookie", "session=abc; theme=dark")
            .with_query("q", "rust");
        let raw = RawValues::from_request(&request, HashMap::new());

        assert_eq!(raw.cookies.get("theme"), Some(&RawValue::from("dark")));
        assert_eq!(raw.query.get("q"), Some(&RawValue::from("rust")));
        assert!(raw.body.is_none());
    }

    #[test]
    fn test_unconvertible_type_fails_at_prepare() {
        let method = MethodDescriptor::new("UserController::find")
            .with_parameter(ParameterDescriptor::query("filter", TypeDescriptor::named("Nope")));
        let result = ArgumentBinder::prepare(&method, &converters());
        assert!(matches!(result, Err(Error::NoConverterFound(name)) if name == "Nope"));

        let method = MethodDescriptor::new("UserController::byIds").with_parameter(
            ParameterDescriptor::query("id", TypeDescriptor::array_of(TypeDescriptor::named("Nope"))),
        );
        assert!(matches!(
            ArgumentBinder::prepare(&method, &converters()),
            Err(Error::NoConverterFound(_))
        ));
    }

    #[test]
    fn test_primitive_array_fails_at_prepare() {
        let method = MethodDescriptor::new("UserController::byIds").with_parameter(
            ParameterDescriptor::query(
                "id",
                TypeDescriptor::array_of(TypeDescriptor::primitive(crate::types::Primitive::Int)),
            ),
        );
        assert!(matches!(
            ArgumentBinder::prepare(&method, &converters()),
            Err(Error::CannotConvertToPrimitive(_))
        ));
    }

    #[test]
    fn test_from_request_groups_repeated_query_keys() {
        let request = HttpRequest::new("GET", "/users")
            .with_query("id", "4")
            .with_query("id", "5");
        let raw = RawValues::from_request(&request, HashMap::new());
        assert_eq!(raw.query.get("id"), Some(&RawValue::list(["4", "5"])));

        let method = MethodDescriptor::new("UserController::byIds").with_parameter(
            ParameterDescriptor::query("id", TypeDescriptor::array_of(TypeDescriptor::integer())),
        );
        let args = ArgumentBinder::prepare(&method, &converters())
            .unwrap()
            .bind(&raw)
            .unwrap();
        assert_eq!(args, vec![Value::Array(vec![Value::Int(4), Value::Int(5)])]);
    }

    #[test]
    fn test_binder_rejects_undeclared_path_variable() {
        let method = MethodDescriptor::new("UserController::show")
            .with_path_variables(["name"])
            .with_parameter(ParameterDescriptor::path("id", TypeDescriptor::integer()));

        let result = ArgumentBinder::prepare(&method, &converters());
        assert!(matches!(result, Err(Error::NoSuchPathVariable { .. })));
    }
}
