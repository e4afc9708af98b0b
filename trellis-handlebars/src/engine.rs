//! Handlebars template registry loaded from disk

use crate::config::HandlebarsConfig;
use crate::error::{HandlebarsError, Result};
use crate::helpers;
use handlebars::Handlebars;
use parking_lot::RwLock;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Compiled templates, shared between clones.
#[derive(Clone)]
pub struct HandlebarsEngine {
    handlebars: Arc<RwLock<Handlebars<'static>>>,
    config: Arc<HandlebarsConfig>,
}

impl HandlebarsEngine {
    /// Create an engine and load every template under the configured directory.
    pub fn new(config: HandlebarsConfig) -> Result<Self> {
        let engine = Self::empty(config);
        engine.reload_templates()?;
        Ok(engine)
    }

    /// Create an engine without touching the filesystem. Templates are added
    /// with [`register_template`](Self::register_template).
    pub fn empty(config: HandlebarsConfig) -> Self {
        Self {
            handlebars: Arc::new(RwLock::new(Self::registry(&config))),
            config: Arc::new(config),
        }
    }

    /// A registry with the configured settings and helpers, but no templates.
    fn registry(config: &HandlebarsConfig) -> Handlebars<'static> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(config.strict_mode);
        if !config.escape_html {
            handlebars.register_escape_fn(handlebars::no_escape);
        }
        helpers::register_builtin_helpers(&mut handlebars);
        handlebars
    }

    fn load_templates(&self, handlebars: &mut Handlebars<'static>) -> Result<()> {
        let dir = &self.config.template_dir;
        if !dir.is_dir() {
            return Err(HandlebarsError::Config(format!(
                "template directory not found: {}",
                dir.display()
            )));
        }
        self.load_dir(handlebars, dir, dir)?;

        if let Some(partials) = &self.config.partials_dir
            && partials.is_dir()
        {
            self.load_partials(handlebars, partials)?;
        }

        tracing::debug!(
            dir = %dir.display(),
            templates = handlebars.get_templates().len(),
            "Handlebars templates loaded"
        );
        Ok(())
    }

    /// Register every template below `dir`, named by its path relative to
    /// `root` without extension, using `/` as separator.
    fn load_dir(&self, handlebars: &mut Handlebars<'static>, root: &Path, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.load_dir(handlebars, root, &path)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.config.extension()) {
                continue;
            }

            let name = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .with_extension("")
                .to_string_lossy()
                .replace('\\', "/");
            let content = fs::read_to_string(&path)?;
            handlebars.register_template_string(&name, content)?;
        }
        Ok(())
    }

    fn load_partials(&self, handlebars: &mut Handlebars<'static>, dir: &Path) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.config.extension()) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            handlebars.register_partial(name, content)?;
        }
        Ok(())
    }

    /// Render a registered template.
    pub fn render<T: Serialize>(&self, template: &str, data: &T) -> Result<String> {
        if self.config.dev_mode {
            self.reload_templates()?;
        }

        let handlebars = self.handlebars.read();
        if !handlebars.has_template(template) {
            return Err(HandlebarsError::TemplateNotFound(template.to_string()));
        }
        Ok(handlebars.render(template, data)?)
    }

    /// Render a template string that is not registered.
    pub fn render_template<T: Serialize>(&self, template: &str, data: &T) -> Result<String> {
        Ok(self.handlebars.read().render_template(template, data)?)
    }

    pub fn register_template(&self, name: &str, template: &str) -> Result<()> {
        Ok(self
            .handlebars
            .write()
            .register_template_string(name, template)?)
    }

    pub fn register_partial(&self, name: &str, template: &str) -> Result<()> {
        Ok(self.handlebars.write().register_partial(name, template)?)
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.read().has_template(name)
    }

    /// Names of all registered templates.
    pub fn templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlebars.read().get_templates().keys().cloned().collect();
        names.sort();
        names
    }

    /// Load every template from disk into a fresh registry and swap it in.
    ///
    /// Readers keep the previous registry until the new one is complete, so
    /// a concurrent render never sees a partially loaded set. Templates added
    /// with [`register_template`](Self::register_template) are dropped.
    pub fn reload_templates(&self) -> Result<()> {
        let mut fresh = Self::registry(&self.config);
        self.load_templates(&mut fresh)?;
        *self.handlebars.write() = fresh;
        Ok(())
    }

    pub fn config(&self) -> &HandlebarsConfig {
        &self.config
    }
}

impl std::fmt::Debug for HandlebarsEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlebarsEngine")
            .field("template_dir", &self.config.template_dir)
            .field("templates", &self.templates())
            .finish()
    }
}
