// HTTP request and response types seen by the runtime

use serde::Serialize;
use std::collections::HashMap;

/// Request data the transport hands to the runtime.
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    /// Query pairs in arrival order. A key may repeat.
    pub query_params: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Append a query pair. Repeating a name adds another value.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((name.into(), value.into()));
        self
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_all(name).next()
    }

    /// Every value of a query parameter, in arrival order.
    pub fn query_all<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + use<'a, 'b> {
        self.query_params
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Get a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    /// Stable identity of the request for caching: method, path and sorted query.
    pub fn cache_key(&self) -> String {
        let mut query: Vec<_> = self.query_params.iter().collect();
        // Stable sort keeps repeated values in arrival order.
        query.sort_by(|a, b| a.0.cmp(&b.0));

        let mut key = format!("{} {}", self.method.to_uppercase(), self.path);
        if !query.is_empty() {
            key.push('?');
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            key.push_str(&pairs.join("&"));
        }
        key
    }
}

/// Response under construction for the current request.
///
/// Status and headers are mutated by handlers; the body is buffered and
/// written through the request's response sink when the request completes.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    /// A `302 Found` redirect.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(302).with_header("Location", location)
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.body = serde_json::to_vec(value)?;
        self.headers
            .insert("Content-Type".to_string(), "application/json".to_string());
        Ok(self)
    }

    /// Turn this response into a redirect to `location`.
    pub fn set_redirect(&mut self, location: &str) {
        self.status = 302;
        self.headers
            .insert("Location".to_string(), location.to_string());
        self.body.clear();
    }

    pub fn metadata(&self) -> ResponseMetadata {
        ResponseMetadata {
            status: self.status,
            headers: self.headers.clone(),
            content_length: self.body.len(),
        }
    }
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::ok()
    }
}

/// Final response metadata handed to a bound cache once the body is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub content_length: usize,
}
