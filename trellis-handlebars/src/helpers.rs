//! Built-in template helpers

use handlebars::{Handlebars, handlebars_helper};
use serde_json::Value as Json;

handlebars_helper!(eq: |a: Json, b: Json| a == b);
handlebars_helper!(ne: |a: Json, b: Json| a != b);
handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());
handlebars_helper!(len: |v: Json| match &v {
    Json::Array(items) => items.len(),
    Json::Object(map) => map.len(),
    Json::String(s) => s.chars().count(),
    _ => 0,
});
handlebars_helper!(json: |v: Json| v.to_string());
handlebars_helper!(default: |v: Json, fallback: Json| if v.is_null() {
    fallback.clone()
} else {
    v.clone()
});

/// Register the built-in helpers: `eq`, `ne`, `upper`, `lower`, `len`,
/// `json` and `default`.
pub fn register_builtin_helpers(handlebars: &mut Handlebars<'_>) {
    handlebars.register_helper("eq", Box::new(eq));
    handlebars.register_helper("ne", Box::new(ne));
    handlebars.register_helper("upper", Box::new(upper));
    handlebars.register_helper("lower", Box::new(lower));
    handlebars.register_helper("len", Box::new(len));
    handlebars.register_helper("json", Box::new(json));
    handlebars.register_helper("default", Box::new(default));
}
