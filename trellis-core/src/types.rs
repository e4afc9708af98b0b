//! Type descriptors and the explicit type hierarchy.
//!
//! Converter lookup and exception resolution both need to answer
//! "is `T` a `S`?". Trellis does not rely on runtime reflection for this:
//! application types are declared up front in a [`TypeGraph`] together with
//! their direct supertypes, and the graph is walked at registration and
//! lookup time.
//!
//! ```
//! use trellis_core::types::{TypeDescriptor, TypeGraph};
//!
//! let mut graph = TypeGraph::new();
//! graph.declare("Exception", &[]).unwrap();
//! graph.declare("IoException", &["Exception"]).unwrap();
//! graph.declare("FileNotFound", &["IoException"]).unwrap();
//!
//! let fnf = TypeDescriptor::named("FileNotFound");
//! assert!(graph.is_assignable(&fnf, &TypeDescriptor::named("Exception")));
//! ```

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Type Descriptors
// ============================================================================

/// Primitive slot types. These have no identity of their own in the graph;
/// scalar conversion goes through their boxed counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Float,
    Bool,
    Char,
}

impl Primitive {
    /// Named type used to convert a scalar of this primitive.
    pub fn boxed(self) -> TypeDescriptor {
        match self {
            Primitive::Int => TypeDescriptor::integer(),
            Primitive::Float => TypeDescriptor::float(),
            Primitive::Bool => TypeDescriptor::boolean(),
            Primitive::Char => TypeDescriptor::string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Bool => "bool",
            Primitive::Char => "char",
        }
    }
}

/// Describes a declared parameter type, converter target or exception class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    /// A type declared in the [`TypeGraph`] by name.
    Named(Arc<str>),
    /// A primitive slot type.
    Primitive(Primitive),
    /// An array of the component type.
    Array(Box<TypeDescriptor>),
}

impl TypeDescriptor {
    pub fn named(name: impl AsRef<str>) -> Self {
        TypeDescriptor::Named(Arc::from(name.as_ref()))
    }

    pub fn primitive(kind: Primitive) -> Self {
        TypeDescriptor::Primitive(kind)
    }

    pub fn array_of(component: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(component))
    }

    pub fn string() -> Self {
        Self::named(builtin::STRING)
    }

    pub fn integer() -> Self {
        Self::named(builtin::INTEGER)
    }

    pub fn float() -> Self {
        Self::named(builtin::FLOAT)
    }

    pub fn boolean() -> Self {
        Self::named(builtin::BOOLEAN)
    }

    pub fn json() -> Self {
        Self::named(builtin::JSON)
    }

    /// Component type if this is an array.
    pub fn component(&self) -> Option<&TypeDescriptor> {
        match self {
            TypeDescriptor::Array(component) => Some(&**component),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeDescriptor::Array(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TypeDescriptor::Named(name) => Some(&**name),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDescriptor::Named(name) => write!(f, "{}", name),
            TypeDescriptor::Primitive(kind) => write!(f, "{}", kind.as_str()),
            TypeDescriptor::Array(component) => write!(f, "{}[]", component),
        }
    }
}

impl From<&str> for TypeDescriptor {
    fn from(name: &str) -> Self {
        TypeDescriptor::named(name)
    }
}

/// Names of the types declared by [`TypeGraph::with_builtins`].
pub mod builtin {
    pub const STRING: &str = "string";
    pub const INTEGER: &str = "integer";
    pub const FLOAT: &str = "float";
    pub const BOOLEAN: &str = "boolean";
    pub const JSON: &str = "json";

    pub const EXCEPTION: &str = "Exception";
    pub const CONVERSION_ERROR: &str = "ConversionError";
    pub const BINDING_ERROR: &str = "BindingError";
    pub const INTERNAL_FAULT: &str = "InternalFault";
    pub const VIEW_ERROR: &str = "ViewError";
    pub const RUNTIME_ERROR: &str = "RuntimeError";
}

// ============================================================================
// Type Graph
// ============================================================================

/// Explicit supertype graph of every type the registries reason about.
#[derive(Debug, Clone, Default)]
pub struct TypeGraph {
    /// Direct supertypes, in declaration order.
    parents: HashMap<Arc<str>, Vec<Arc<str>>>,
}

impl TypeGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a graph with the scalar types and the runtime's own error classes.
    pub fn with_builtins() -> Self {
        use builtin::*;

        let mut graph = Self::new();
        let declarations: &[(&str, &[&str])] = &[
            (STRING, &[]),
            (INTEGER, &[]),
            (FLOAT, &[]),
            (BOOLEAN, &[]),
            (JSON, &[]),
            (EXCEPTION, &[]),
            (CONVERSION_ERROR, &[EXCEPTION]),
            ("NoConverterFound", &[CONVERSION_ERROR]),
            ("NotAString", &[CONVERSION_ERROR]),
            ("CannotConvertToPrimitive", &[CONVERSION_ERROR]),
            ("InvalidValue", &[CONVERSION_ERROR]),
            (BINDING_ERROR, &[EXCEPTION]),
            ("MissingValue", &[BINDING_ERROR]),
            (INTERNAL_FAULT, &[EXCEPTION]),
            ("NoSuchRequestParameter", &[INTERNAL_FAULT]),
            (VIEW_ERROR, &[EXCEPTION]),
            ("NoRendererFound", &[VIEW_ERROR]),
            ("RenderingFailure", &[VIEW_ERROR]),
            (RUNTIME_ERROR, &[EXCEPTION]),
            ("CacheError", &[RUNTIME_ERROR]),
            ("IoError", &[RUNTIME_ERROR]),
            ("ProviderNotFound", &[RUNTIME_ERROR]),
            ("RegistrySealed", &[RUNTIME_ERROR]),
            ("UnreachableHandler", &[RUNTIME_ERROR]),
            ("NoSuchPathVariable", &[RUNTIME_ERROR]),
            ("InvalidPattern", &[RUNTIME_ERROR]),
            ("TypeGraphError", &[RUNTIME_ERROR]),
            ("ConfigurationError", &[RUNTIME_ERROR]),
        ];

        for (name, supertypes) in declarations {
            graph.insert(name, supertypes);
        }

        graph
    }

    /// Declare a named type with its direct supertypes.
    ///
    /// Supertypes that were not declared yet are declared as roots.
    /// Declaring an existing type again adds the new supertypes to it.
    pub fn declare(&mut self, name: &str, supertypes: &[&str]) -> Result<()> {
        for sup in supertypes {
            if *sup == name || self.is_named_assignable(sup, name) {
                return Err(Error::TypeGraph(format!(
                    "declaring {} as a subtype of {} would create a cycle",
                    name, sup
                )));
            }
        }

        self.insert(name, supertypes);
        tracing::trace!(type_name = name, supertypes = ?supertypes, "Declared type");
        Ok(())
    }

    fn insert(&mut self, name: &str, supertypes: &[&str]) {
        for sup in supertypes {
            self.parents.entry(Arc::from(*sup)).or_default();
        }

        let entry = self.parents.entry(Arc::from(name)).or_default();
        for sup in supertypes {
            if !entry.iter().any(|existing| &**existing == *sup) {
                entry.push(Arc::from(*sup));
            }
        }
    }

    /// Check if a named type has been declared.
    pub fn contains(&self, name: &str) -> bool {
        self.parents.contains_key(name)
    }

    /// Check if values of `sub` can be used where `sup` is expected.
    ///
    /// Named types follow the declared graph, arrays are covariant in their
    /// component, and primitives are only assignable to themselves.
    pub fn is_assignable(&self, sub: &TypeDescriptor, sup: &TypeDescriptor) -> bool {
        match (sub, sup) {
            (TypeDescriptor::Named(sub), TypeDescriptor::Named(sup)) => {
                self.is_named_assignable(sub, sup)
            }
            (TypeDescriptor::Array(sub), TypeDescriptor::Array(sup)) => {
                self.is_assignable(sub, sup)
            }
            (TypeDescriptor::Primitive(a), TypeDescriptor::Primitive(b)) => a == b,
            _ => false,
        }
    }

    fn is_named_assignable(&self, sub: &str, sup: &str) -> bool {
        sub == sup || self.walk(sub).any(|ancestor| &*ancestor == sup)
    }

    /// Strict ancestors of a type, nearest first.
    ///
    /// Breadth-first over direct supertypes in declaration order, each
    /// ancestor reported once.
    pub fn ancestors(&self, ty: &TypeDescriptor) -> Vec<TypeDescriptor> {
        match ty {
            TypeDescriptor::Named(name) => self.walk(name).map(TypeDescriptor::Named).collect(),
            _ => Vec::new(),
        }
    }

    fn walk<'a>(&'a self, start: &str) -> impl Iterator<Item = Arc<str>> + use<'a> {
        let mut queue: VecDeque<Arc<str>> = self
            .parents
            .get(start)
            .map(|parents| parents.iter().cloned().collect())
            .unwrap_or_default();
        let mut seen: HashSet<Arc<str>> = HashSet::new();

        std::iter::from_fn(move || {
            while let Some(next) = queue.pop_front() {
                if seen.insert(next.clone()) {
                    if let Some(parents) = self.parents.get(&next) {
                        queue.extend(parents.iter().cloned());
                    }
                    return Some(next);
                }
            }
            None
        })
    }
}
