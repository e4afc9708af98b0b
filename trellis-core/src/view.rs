//! View renderer registry
//!
//! Renderers are registered against regular expressions that must match the
//! whole view name. The first pattern in registration order that matches
//! selects the renderer; when several patterns match the same name, the
//! earliest registration wins.
//!
//! ```
//! use trellis_core::view::{JsonViewRenderer, ViewRenderers};
//!
//! let mut views = ViewRenderers::new();
//! views.register(r".*\.json", JsonViewRenderer::new()).unwrap();
//!
//! assert!(views.resolve("users.json").is_some());
//! assert!(views.resolve("users.json.bak").is_none());
//! ```

use crate::error::{BoxError, Error, Result};
use crate::seal::Seal;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Materialized key/value model handed to a renderer.
pub type Model = serde_json::Map<String, serde_json::Value>;

/// Output of a renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Rendered {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::new("text/html; charset=utf-8", body.into().into_bytes())
    }
}

/// Turns a named view plus a model into output.
#[async_trait]
pub trait ViewRenderer: Send + Sync + 'static {
    async fn render(&self, view_name: &str, model: &Model) -> std::result::Result<Rendered, BoxError>;

    /// Get the renderer's name for debugging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Produces the renderer for a registry entry. Invoked at most once per entry.
pub type RendererProvider = Arc<dyn Fn() -> Arc<dyn ViewRenderer> + Send + Sync>;

// ============================================================================
// Built-in Renderers
// ============================================================================

/// Serializes the model as a JSON object.
#[derive(Debug, Clone, Default)]
pub struct JsonViewRenderer {
    pretty: bool,
}

impl JsonViewRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

#[async_trait]
impl ViewRenderer for JsonViewRenderer {
    async fn render(&self, _view_name: &str, model: &Model) -> std::result::Result<Rendered, BoxError> {
        let body = if self.pretty {
            serde_json::to_vec_pretty(model)?
        } else {
            serde_json::to_vec(model)?
        };
        Ok(Rendered::new("application/json", body))
    }

    fn name(&self) -> &str {
        "JsonViewRenderer"
    }
}

/// A function-based renderer for simple cases.
pub struct FnViewRenderer<F>
where
    F: Fn(&str, &Model) -> std::result::Result<Rendered, BoxError> + Send + Sync + 'static,
{
    render: F,
    name: String,
}

impl<F> FnViewRenderer<F>
where
    F: Fn(&str, &Model) -> std::result::Result<Rendered, BoxError> + Send + Sync + 'static,
{
    pub fn new(render: F) -> Self {
        Self {
            render,
            name: "FnViewRenderer".to_string(),
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<F> ViewRenderer for FnViewRenderer<F>
where
    F: Fn(&str, &Model) -> std::result::Result<Rendered, BoxError> + Send + Sync + 'static,
{
    async fn render(&self, view_name: &str, model: &Model) -> std::result::Result<Rendered, BoxError> {
        (self.render)(view_name, model)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A registered pattern and its renderer provider.
pub struct ViewRendererEntry {
    source: String,
    pattern: Regex,
    provider: RendererProvider,
    instance: OnceCell<Arc<dyn ViewRenderer>>,
}

impl ViewRendererEntry {
    /// The pattern as it was registered.
    pub fn pattern(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, view_name: &str) -> bool {
        self.pattern.is_match(view_name)
    }

    /// The entry's renderer, created on first use.
    pub fn renderer(&self) -> Arc<dyn ViewRenderer> {
        self.instance.get_or_init(|| (self.provider)()).clone()
    }
}

/// Pattern-keyed renderer lookup.
pub struct ViewRenderers {
    entries: Vec<ViewRendererEntry>,
    seal: Seal,
}

impl ViewRenderers {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            seal: Seal::new("view renderers"),
        }
    }

    /// Register a renderer instance for views fully matching `pattern`.
    pub fn register<R: ViewRenderer>(&mut self, pattern: &str, renderer: R) -> Result<()> {
        let renderer: Arc<dyn ViewRenderer> = Arc::new(renderer);
        self.register_provider(pattern, Arc::new(move || renderer.clone()))
    }

    /// Register a renderer provider for views fully matching `pattern`.
    pub fn register_provider(&mut self, pattern: &str, provider: RendererProvider) -> Result<()> {
        self.seal.check()?;

        let compiled = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(
            pattern,
            position = self.entries.len(),
            "View renderer registered"
        );
        self.entries.push(ViewRendererEntry {
            source: pattern.to_string(),
            pattern: compiled,
            provider,
            instance: OnceCell::new(),
        });
        Ok(())
    }

    /// Find the renderer of the first entry fully matching `view_name`.
    pub fn resolve(&self, view_name: &str) -> Option<Arc<dyn ViewRenderer>> {
        self.entries
            .iter()
            .find(|entry| entry.matches(view_name))
            .map(ViewRendererEntry::renderer)
    }

    /// Render a view with the selected renderer.
    pub async fn render(&self, view_name: &str, model: &Model) -> Result<Rendered> {
        let renderer = self.resolve(view_name).ok_or_else(|| {
            tracing::debug!(view = view_name, "No renderer matched view");
            Error::NoRendererFound(view_name.to_string())
        })?;

        tracing::trace!(view = view_name, renderer = renderer.name(), "Rendering view");
        renderer
            .render(view_name, model)
            .await
            .map_err(|source| Error::Rendering {
                view: view_name.to_string(),
                source,
            })
    }

    /// Registered patterns in resolution order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(ViewRendererEntry::pattern)
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

impl Default for ViewRenderers {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ViewRenderers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewRenderers")
            .field("patterns", &self.patterns().collect::<Vec<_>>())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
