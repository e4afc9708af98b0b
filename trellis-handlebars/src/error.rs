//! Error types for the Handlebars renderer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HandlebarsError>;

#[derive(Error, Debug)]
pub enum HandlebarsError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template rendering error: {0}")]
    Render(String),

    #[error("Template parsing error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<handlebars::RenderError> for HandlebarsError {
    fn from(err: handlebars::RenderError) -> Self {
        HandlebarsError::Render(err.to_string())
    }
}

impl From<handlebars::TemplateError> for HandlebarsError {
    fn from(err: handlebars::TemplateError) -> Self {
        HandlebarsError::Parse(err.to_string())
    }
}
