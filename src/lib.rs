// Trellis - extension runtime for annotation-driven MVC web applications
//
// Typed argument binding through registered converters, ordered exception
// handling, pattern-matched view rendering and response caching.

// Re-export core functionality
pub use trellis_core::*;

// Re-export optional crates
#[cfg(feature = "handlebars")]
pub use trellis_handlebars;

// Prelude for common imports
pub mod prelude {
    pub use trellis_core::prelude::*;

    #[cfg(feature = "handlebars")]
    pub use trellis_handlebars::{HandlebarsConfig, HandlebarsViewRenderer};
}
