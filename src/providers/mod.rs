pub mod dataone;

use tracing::debug;

use crate::domain::{DataMapEntry, DatasetIdentifier, ImportedItem};
use crate::error::RegistrarError;

/// An external repository network that can turn identifiers into data maps
/// and enumerate the files behind a data map.
pub trait RepositoryAdapter: Send + Sync {
    /// Label written to registered folders as their `provider`.
    fn label(&self) -> &str;

    fn lookup(&self, identifier: &DatasetIdentifier) -> Result<DataMapEntry, RegistrarError>;

    /// Importable member files of the resource map `data_id`, in catalog order.
    fn members(&self, data_id: &str) -> Result<Vec<ImportedItem>, RegistrarError>;

    /// Resolves every identifier in input order. The first identifier that
    /// cannot be resolved fails the whole batch.
    fn resolve(
        &self,
        identifiers: &[DatasetIdentifier],
    ) -> Result<Vec<DataMapEntry>, RegistrarError> {
        identifiers
            .iter()
            .map(|identifier| {
                debug!(repository = self.label(), %identifier, "resolve");
                self.lookup(identifier)
            })
            .collect()
    }
}

#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn RepositoryAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an adapter; a later adapter with the same label replaces the earlier one.
    pub fn with(mut self, adapter: impl RepositoryAdapter + 'static) -> Self {
        self.adapters
            .retain(|existing| existing.label() != adapter.label());
        self.adapters.push(Box::new(adapter));
        self
    }

    pub fn get(&self, label: &str) -> Result<&dyn RepositoryAdapter, RegistrarError> {
        self.adapters
            .iter()
            .find(|adapter| adapter.label() == label)
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| {
                RegistrarError::ConfigurationError(format!(
                    "no adapter for repository {label} (known: {})",
                    self.labels().join(", ")
                ))
            })
    }

    /// The first registered adapter, used when a lookup names no repository.
    pub fn primary(&self) -> Result<&dyn RepositoryAdapter, RegistrarError> {
        self.adapters
            .first()
            .map(|adapter| adapter.as_ref())
            .ok_or_else(|| {
                RegistrarError::ConfigurationError("no repository adapters configured".to_string())
            })
    }

    fn labels(&self) -> Vec<&str> {
        self.adapters.iter().map(|adapter| adapter.label()).collect()
    }
}
