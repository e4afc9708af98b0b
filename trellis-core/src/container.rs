// Dependency resolution for application-supplied collaborators

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Trait for types that can be provided by the container
pub trait Provider: Send + Sync + 'static {}

/// The dependency resolution container.
///
/// The runtime only needs `resolve(type) → instance`; registration happens
/// while the application is being assembled.
#[derive(Clone, Default)]
pub struct Container {
    providers: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl Container {
    pub fn new() -> Self {
        tracing::debug!("Creating new container");
        Self::default()
    }

    /// Register a provider instance
    pub fn register<T: Provider>(&self, instance: T) {
        self.register_arc(Arc::new(instance));
    }

    /// Register a shared provider instance
    pub fn register_arc<T: Provider>(&self, instance: Arc<T>) {
        let type_name = std::any::type_name::<T>();
        self.providers.write().insert(TypeId::of::<T>(), instance);
        tracing::debug!(provider = type_name, "Provider registered in container");
    }

    /// Resolve a provider by type
    pub fn resolve<T: Provider>(&self) -> Result<Arc<T>> {
        let type_name = std::any::type_name::<T>();
        tracing::trace!(provider = type_name, "Attempting to resolve provider");

        let resolved = self
            .providers
            .read()
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok());

        match resolved {
            Some(instance) => Ok(instance),
            None => {
                tracing::debug!(provider = type_name, "Provider not found in container");
                Err(Error::ProviderNotFound(type_name.to_string()))
            }
        }
    }

    /// Check if a provider is registered
    pub fn has<T: Provider>(&self) -> bool {
        self.providers.read().contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.providers.read().len())
            .finish()
    }
}
