//! Configuration for the Handlebars view renderer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where templates live and how they are compiled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlebarsConfig {
    /// Directory scanned recursively for templates.
    pub template_dir: PathBuf,

    /// Template file extension, with or without the leading dot.
    pub template_extension: String,

    /// Reload templates from disk before every render.
    pub dev_mode: bool,

    /// Fail on missing variables instead of rendering them empty.
    pub strict_mode: bool,

    /// Extra directory of partials, registered by file stem.
    pub partials_dir: Option<PathBuf>,

    pub escape_html: bool,

    /// Content type of rendered output.
    pub content_type: String,
}

impl HandlebarsConfig {
    pub fn new(template_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_dir: template_dir.into(),
            template_extension: ".hbs".to_string(),
            dev_mode: false,
            strict_mode: false,
            partials_dir: None,
            escape_html: true,
            content_type: "text/html; charset=utf-8".to_string(),
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.template_extension = ext.into();
        self
    }

    pub fn with_dev_mode(mut self, enable: bool) -> Self {
        self.dev_mode = enable;
        self
    }

    pub fn with_strict_mode(mut self, enable: bool) -> Self {
        self.strict_mode = enable;
        self
    }

    pub fn with_partials_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.partials_dir = Some(dir.into());
        self
    }

    pub fn with_escape_html(mut self, enable: bool) -> Self {
        self.escape_html = enable;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Extension without the leading dot.
    pub(crate) fn extension(&self) -> &str {
        self.template_extension.trim_start_matches('.')
    }
}

impl Default for HandlebarsConfig {
    fn default() -> Self {
        Self::new("templates")
    }
}
