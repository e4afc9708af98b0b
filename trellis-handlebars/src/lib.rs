//! Handlebars view renderer for Trellis
//!
//! Renders views whose name matches a registered pattern with the Handlebars
//! template of the same name. A leading `/` in the view name is ignored, so
//! the view `/users/list` renders `templates/users/list.hbs`.
//!
//! ```no_run
//! use trellis_core::prelude::*;
//! use trellis_handlebars::{HandlebarsConfig, HandlebarsViewRenderer};
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let renderer = HandlebarsViewRenderer::new(HandlebarsConfig::new("templates"))?;
//!
//! let mut builder = RuntimeBuilder::default();
//! builder.register_view("/pages/.*", renderer)?;
//! let runtime = builder.build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Built-in Helpers
//!
//! - **Comparison**: `eq`, `ne`
//! - **String**: `upper`, `lower`
//! - **Utility**: `len`, `json`, `default`

pub mod config;
pub mod engine;
pub mod error;
pub mod helpers;

pub use config::HandlebarsConfig;
pub use engine::HandlebarsEngine;
pub use error::{HandlebarsError, Result};

use async_trait::async_trait;
use trellis_core::error::BoxError;
use trellis_core::view::{Model, Rendered, ViewRenderer};

/// [`ViewRenderer`] backed by a [`HandlebarsEngine`].
#[derive(Clone, Debug)]
pub struct HandlebarsViewRenderer {
    engine: HandlebarsEngine,
}

impl HandlebarsViewRenderer {
    /// Load templates from the configured directory.
    pub fn new(config: HandlebarsConfig) -> Result<Self> {
        Ok(Self::from_engine(HandlebarsEngine::new(config)?))
    }

    pub fn from_engine(engine: HandlebarsEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &HandlebarsEngine {
        &self.engine
    }

    /// Template name for a view name.
    pub fn template_name(view_name: &str) -> &str {
        view_name.trim_start_matches('/')
    }
}

#[async_trait]
impl ViewRenderer for HandlebarsViewRenderer {
    async fn render(&self, view_name: &str, model: &Model) -> std::result::Result<Rendered, BoxError> {
        let engine = self.engine.clone();
        let template = Self::template_name(view_name).to_string();
        let model = model.clone();

        // Template rendering is CPU bound
        let html = tokio::task::spawn_blocking(move || engine.render(&template, &model))
            .await
            .map_err(|e| HandlebarsError::Render(e.to_string()))??;

        Ok(Rendered::new(
            self.engine.config().content_type.clone(),
            html.into_bytes(),
        ))
    }

    fn name(&self) -> &str {
        "HandlebarsViewRenderer"
    }
}
