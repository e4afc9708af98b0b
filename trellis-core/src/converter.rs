//! Converter registry
//!
//! Maps a target type to a [`Converter`] able to build values of that type
//! from request strings.
//!
//! # Resolution
//!
//! 1. A converter registered for exactly the target type wins.
//! 2. Otherwise the target's ancestors are walked nearest first; a converter
//!    registered for an ancestor is used only if it was registered with
//!    `allows_subtype_construction`.
//! 3. Primitive targets resolve through their boxed type.
//!
//! Array targets are converted element-wise from [`RawValue::List`], recursing
//! for nested arrays. Arrays of primitives are rejected with
//! [`Error::CannotConvertToPrimitive`], and a list or binary source aimed at a
//! scalar target is rejected with [`Error::NotAString`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::converter::ConverterRegistry;
//! use trellis_core::types::{TypeDescriptor, TypeGraph};
//! use trellis_core::value::{RawValue, Value};
//!
//! let registry = ConverterRegistry::with_defaults(Arc::new(TypeGraph::with_builtins()));
//!
//! let target = TypeDescriptor::array_of(TypeDescriptor::integer());
//! let value = registry.convert(&RawValue::list(["1", "2", "3"]), &target).unwrap();
//! assert_eq!(value, Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
//! ```

use crate::error::{Error, Result};
use crate::seal::Seal;
use crate::types::{TypeDescriptor, TypeGraph};
use crate::value::{RawValue, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Converter Trait
// ============================================================================

/// Builds a typed value from a single request string.
pub trait Converter: Send + Sync + 'static {
    /// Convert `input` into a value of `target`.
    ///
    /// `target` is the type actually requested, which differs from the
    /// registered type when the converter allows subtype construction.
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value>;

    /// Get the converter's name for debugging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

fn invalid(input: &str, target: &TypeDescriptor, reason: impl fmt::Display) -> Error {
    Error::InvalidValue {
        target: target.to_string(),
        input: input.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// Built-in Converters
// ============================================================================

/// Parses decimal integers.
pub struct IntegerConverter;

impl Converter for IntegerConverter {
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value> {
        input
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| invalid(input, target, e))
    }

    fn name(&self) -> &str {
        "IntegerConverter"
    }
}

/// Parses floating point numbers.
pub struct FloatConverter;

impl Converter for FloatConverter {
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value> {
        input
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|e| invalid(input, target, e))
    }

    fn name(&self) -> &str {
        "FloatConverter"
    }
}

/// Parses `true/false`, `1/0`, `yes/no` and `on/off`, ignoring case.
pub struct BooleanConverter;

impl Converter for BooleanConverter {
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value> {
        match input.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(invalid(input, target, "expected a boolean")),
        }
    }

    fn name(&self) -> &str {
        "BooleanConverter"
    }
}

/// Passes the input through unchanged.
pub struct StringConverter;

impl Converter for StringConverter {
    fn convert(&self, input: &str, _target: &TypeDescriptor) -> Result<Value> {
        Ok(Value::Str(input.to_string()))
    }

    fn name(&self) -> &str {
        "StringConverter"
    }
}

/// Parses the input as a JSON document.
pub struct JsonConverter;

impl Converter for JsonConverter {
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value> {
        serde_json::from_str(input)
            .map(Value::Json)
            .map_err(|e| invalid(input, target, e))
    }

    fn name(&self) -> &str {
        "JsonConverter"
    }
}

/// Converter for any application type implementing [`FromStr`].
///
/// ```
/// use trellis_core::converter::{Converter, FromStrConverter};
/// use trellis_core::types::TypeDescriptor;
/// use std::net::IpAddr;
///
/// let converter = FromStrConverter::<IpAddr>::new();
/// let value = converter.convert("127.0.0.1", &TypeDescriptor::named("IpAddr")).unwrap();
/// assert!(value.downcast_ref::<IpAddr>().unwrap().is_loopback());
/// ```
pub struct FromStrConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> FromStrConverter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for FromStrConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Converter for FromStrConverter<T>
where
    T: FromStr + Send + Sync + 'static,
    T::Err: fmt::Display,
{
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value> {
        input
            .parse::<T>()
            .map(Value::object)
            .map_err(|e| invalid(input, target, e))
    }
}

/// A function-based converter for simple cases.
pub struct FnConverter<F>
where
    F: Fn(&str, &TypeDescriptor) -> Result<Value> + Send + Sync + 'static,
{
    convert: F,
    name: String,
}

impl<F> FnConverter<F>
where
    F: Fn(&str, &TypeDescriptor) -> Result<Value> + Send + Sync + 'static,
{
    pub fn new(convert: F) -> Self {
        Self {
            convert,
            name: "FnConverter".to_string(),
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<F> Converter for FnConverter<F>
where
    F: Fn(&str, &TypeDescriptor) -> Result<Value> + Send + Sync + 'static,
{
    fn convert(&self, input: &str, target: &TypeDescriptor) -> Result<Value> {
        (self.convert)(input, target)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// Registry
// ============================================================================

/// A registered converter and the type it was registered for.
#[derive(Clone)]
pub struct ConverterEntry {
    pub target_type: TypeDescriptor,
    pub converter: Arc<dyn Converter>,
    pub allows_subtype_construction: bool,
}

impl fmt::Debug for ConverterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterEntry")
            .field("target_type", &self.target_type)
            .field("converter", &self.converter.name())
            .field("allows_subtype_construction", &self.allows_subtype_construction)
            .finish()
    }
}

/// Process-wide map from target type to converter.
pub struct ConverterRegistry {
    types: Arc<TypeGraph>,
    entries: HashMap<TypeDescriptor, ConverterEntry>,
    seal: Seal,
}

impl ConverterRegistry {
    /// Create an empty registry over the given type graph.
    pub fn new(types: Arc<TypeGraph>) -> Self {
        Self {
            types,
            entries: HashMap::new(),
            seal: Seal::new("converter registry"),
        }
    }

    /// Create a registry with converters for the built-in scalar types.
    pub fn with_defaults(types: Arc<TypeGraph>) -> Self {
        let mut registry = Self::new(types);
        registry.insert(TypeDescriptor::string(), Arc::new(StringConverter), false);
        registry.insert(TypeDescriptor::integer(), Arc::new(IntegerConverter), false);
        registry.insert(TypeDescriptor::float(), Arc::new(FloatConverter), false);
        registry.insert(TypeDescriptor::boolean(), Arc::new(BooleanConverter), false);
        registry.insert(TypeDescriptor::json(), Arc::new(JsonConverter), false);
        registry
    }

    /// Register a converter for `target_type`.
    ///
    /// Registering the same type again replaces the previous converter.
    pub fn register<C: Converter>(
        &mut self,
        target_type: TypeDescriptor,
        converter: C,
        allows_subtype_construction: bool,
    ) -> Result<()> {
        self.register_arc(target_type, Arc::new(converter), allows_subtype_construction)
    }

    /// Register a converter as Arc.
    pub fn register_arc(
        &mut self,
        target_type: TypeDescriptor,
        converter: Arc<dyn Converter>,
        allows_subtype_construction: bool,
    ) -> Result<()> {
        self.seal.check()?;
        tracing::debug!(
            target_type = %target_type,
            converter = converter.name(),
            allows_subtype_construction,
            "Converter registered"
        );
        self.insert(target_type, converter, allows_subtype_construction);
        Ok(())
    }

    fn insert(
        &mut self,
        target_type: TypeDescriptor,
        converter: Arc<dyn Converter>,
        allows_subtype_construction: bool,
    ) {
        self.entries.insert(
            target_type.clone(),
            ConverterEntry {
                target_type,
                converter,
                allows_subtype_construction,
            },
        );
    }

    /// Find the converter able to construct `target`.
    pub fn lookup(&self, target: &TypeDescriptor) -> Result<Arc<dyn Converter>> {
        if let Some(entry) = self.entries.get(target) {
            return Ok(entry.converter.clone());
        }

        if let TypeDescriptor::Primitive(kind) = target {
            return self.lookup(&kind.boxed());
        }

        for ancestor in self.types.ancestors(target) {
            if let Some(entry) = self.entries.get(&ancestor)
                && entry.allows_subtype_construction
            {
                tracing::trace!(
                    target_type = %target,
                    via = %ancestor,
                    "Using supertype converter"
                );
                return Ok(entry.converter.clone());
            }
        }

        Err(Error::NoConverterFound(target.to_string()))
    }

    /// Check if a converter for exactly `target` is registered.
    pub fn contains(&self, target: &TypeDescriptor) -> bool {
        self.entries.contains_key(target)
    }

    /// Resolve the converter chain for `target` once, ahead of any request.
    ///
    /// Array targets resolve their component type; arrays of primitives
    /// fail with [`Error::CannotConvertToPrimitive`].
    pub fn resolve(&self, target: &TypeDescriptor) -> Result<ResolvedConverter> {
        match target {
            TypeDescriptor::Array(component) => {
                if let TypeDescriptor::Primitive(_) = **component {
                    return Err(Error::CannotConvertToPrimitive(target.to_string()));
                }
                Ok(ResolvedConverter::Array {
                    target: target.clone(),
                    component: Box::new(self.resolve(component)?),
                })
            }
            _ => Ok(ResolvedConverter::Scalar {
                target: target.clone(),
                converter: self.lookup(target)?,
            }),
        }
    }

    /// Convert a raw request value into `target`.
    pub fn convert(&self, raw: &RawValue, target: &TypeDescriptor) -> Result<Value> {
        self.resolve(target)?.convert(raw)
    }

    /// The type graph this registry resolves against.
    pub fn types(&self) -> &Arc<TypeGraph> {
        &self.types
    }

    /// Number of registered converters.
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

/// A converter bound to one declared type, with array components resolved.
#[derive(Clone)]
pub enum ResolvedConverter {
    Scalar {
        target: TypeDescriptor,
        converter: Arc<dyn Converter>,
    },
    Array {
        target: TypeDescriptor,
        component: Box<ResolvedConverter>,
    },
}

impl ResolvedConverter {
    pub fn target(&self) -> &TypeDescriptor {
        match self {
            ResolvedConverter::Scalar { target, .. } | ResolvedConverter::Array { target, .. } => target,
        }
    }

    /// Convert a raw request value.
    ///
    /// A single text value against an array target becomes a one-element
    /// array. Non-text values against a scalar target are rejected with
    /// [`Error::NotAString`].
    pub fn convert(&self, raw: &RawValue) -> Result<Value> {
        match (self, raw) {
            (ResolvedConverter::Array { component, .. }, RawValue::List(items)) => items
                .iter()
                .map(|item| component.convert(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            (ResolvedConverter::Array { component, .. }, RawValue::Text(_)) => {
                Ok(Value::Array(vec![component.convert(raw)?]))
            }
            (ResolvedConverter::Scalar { target, converter }, RawValue::Text(input)) => {
                converter.convert(input, target)
            }
            (_, RawValue::List(_) | RawValue::Binary(_)) => Err(Error::NotAString {
                target: self.target().to_string(),
                found: raw.kind(),
            }),
        }
    }
}

impl fmt::Debug for ResolvedConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedConverter::Scalar { target, converter } => f
                .debug_struct("Scalar")
                .field("target", target)
                .field("converter", &converter.name())
                .finish(),
            ResolvedConverter::Array { target, component } => f
                .debug_struct("Array")
                .field("target", target)
                .field("component", component)
                .finish(),
        }
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("entries", &self.entries.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}
