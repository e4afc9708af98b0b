// One-way registration seal shared by the registries

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Marks the end of a registry's registration phase.
///
/// Once sealed, every mutation attempt fails with [`Error::RegistrySealed`].
/// Lookups never take a lock; they only ever observe a fully built registry.
#[derive(Debug)]
pub struct Seal {
    registry: &'static str,
    sealed: AtomicBool,
}

impl Seal {
    pub fn new(registry: &'static str) -> Self {
        Self {
            registry,
            sealed: AtomicBool::new(false),
        }
    }

    /// Seal the registry. Idempotent.
    pub fn seal(&self) {
        if !self.sealed.swap(true, Ordering::AcqRel) {
            tracing::debug!(registry = self.registry, "Registry sealed");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Fail if the registry has been sealed.
    pub fn check(&self) -> Result<()> {
        if self.is_sealed() {
            tracing::warn!(registry = self.registry, "Registration attempted after seal");
            return Err(Error::RegistrySealed(self.registry));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_is_one_way() {
        let seal = Seal::new("test registry");
        assert!(seal.check().is_ok());

        seal.seal();
        seal.seal();
        assert!(seal.is_sealed());
        assert!(matches!(seal.check(), Err(Error::RegistrySealed("test registry"))));
    }
}
