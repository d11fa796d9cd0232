use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::StoreSettings;
use crate::domain::{
    DataMapEntry, DatasetIdentifier, FolderId, ImportedItem, META_IDENTIFIER, OwnerId,
    RegisteredRoot,
};
use crate::error::RegistrarError;
use crate::ledger::Ledger;
use crate::providers::AdapterRegistry;
use crate::registrar::Registrar;
use crate::storage::{AccessLevel, StorageBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Registered,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntryOutcome {
    pub doi: String,
    pub status: EntryStatus,
    pub root: Option<RegisteredRoot>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub owner: OwnerId,
    pub entries: Vec<EntryOutcome>,
}

impl RegistrationReport {
    pub fn registered(&self) -> Vec<&RegisteredRoot> {
        self.entries
            .iter()
            .filter_map(|entry| entry.root.as_ref())
            .collect()
    }

    pub fn failures(&self) -> Vec<&EntryOutcome> {
        self.entries
            .iter()
            .filter(|entry| entry.status == EntryStatus::Failed)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisteredList {
    pub owner: OwnerId,
    pub roots: Vec<RegisteredRoot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemList {
    pub folder_id: FolderId,
    pub items: Vec<ImportedItem>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Engine surface: lookup, registration and listing of registered roots.
pub struct App<S: StorageBackend> {
    storage: Arc<S>,
    adapters: Arc<AdapterRegistry>,
    ledger: Arc<Ledger<S>>,
    registrar: Registrar<S>,
}

impl<S: StorageBackend> App<S> {
    pub fn new(storage: S, adapters: AdapterRegistry, settings: &StoreSettings) -> Self {
        let storage = Arc::new(storage);
        let adapters = Arc::new(adapters);
        let ledger = Arc::new(Ledger::new(storage.clone(), settings.workspace.clone()));
        let registrar = Registrar::new(storage.clone(), ledger.clone(), adapters.clone())
            .with_public(settings.public);
        Self {
            storage,
            adapters,
            ledger,
            registrar,
        }
    }

    /// Resolves identifiers with the primary repository adapter.
    pub fn lookup(
        &self,
        identifiers: &[DatasetIdentifier],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<DataMapEntry>, RegistrarError> {
        let adapter = self.adapters.primary()?;
        self.lookup_in(adapter.label(), identifiers, sink)
    }

    pub fn lookup_in(
        &self,
        repository: &str,
        identifiers: &[DatasetIdentifier],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<DataMapEntry>, RegistrarError> {
        let adapter = self.adapters.get(repository)?;
        sink.event(ProgressEvent {
            message: format!(
                "phase=Resolve; {} identifier(s) via {}",
                identifiers.len(),
                adapter.label()
            ),
            elapsed: None,
        });
        let start = Instant::now();
        let entries = adapter.resolve(identifiers)?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; resolved {}", entries.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(entries)
    }

    pub fn register_data_map(
        &self,
        entries: &[DataMapEntry],
        owner: &OwnerId,
        sink: &dyn ProgressSink,
    ) -> Result<RegistrationReport, RegistrarError> {
        sink.event(ProgressEvent {
            message: format!("phase=Register; {} entr(ies) for {owner}", entries.len()),
            elapsed: None,
        });
        let start = Instant::now();
        let outcomes = self
            .registrar
            .register(owner, entries)
            .into_iter()
            .zip(entries)
            .map(|(result, entry)| match result {
                Ok(root) => EntryOutcome {
                    doi: entry.doi.clone(),
                    status: EntryStatus::Registered,
                    root: Some(root),
                    error: None,
                },
                Err(err) => EntryOutcome {
                    doi: entry.doi.clone(),
                    status: EntryStatus::Failed,
                    root: None,
                    error: Some(err.to_string()),
                },
            })
            .collect::<Vec<_>>();
        sink.event(ProgressEvent {
            message: "phase=Register; done".to_string(),
            elapsed: Some(start.elapsed()),
        });
        Ok(RegistrationReport {
            owner: owner.clone(),
            entries: outcomes,
        })
    }

    pub fn list_registered(
        &self,
        owner: &OwnerId,
        sink: &dyn ProgressSink,
    ) -> Result<RegisteredList, RegistrarError> {
        sink.event(ProgressEvent {
            message: format!("phase=List; registered roots of {owner}"),
            elapsed: None,
        });
        Ok(RegisteredList {
            owner: owner.clone(),
            roots: self.ledger.list(owner)?,
        })
    }

    /// Items of a folder the owner can read, sorted by name.
    pub fn list_items(
        &self,
        owner: &OwnerId,
        folder_id: &FolderId,
    ) -> Result<ItemList, RegistrarError> {
        let folder = self.storage.get_folder(folder_id)?;
        let can_read = folder.public || folder.access.contains_key(owner.as_str());
        if !can_read {
            return Err(RegistrarError::StorageFailure(format!(
                "{owner} has no access to folder {folder_id}"
            )));
        }
        let mut items = self
            .storage
            .list_items(folder_id)?
            .into_iter()
            .map(|item| ImportedItem {
                identifier: item.meta.get(META_IDENTIFIER).cloned().unwrap_or_default(),
                name: item.name,
                size_bytes: item.size,
            })
            .collect::<Vec<_>>();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ItemList {
            folder_id: folder.id,
            items,
        })
    }

    pub fn is_admin(&self, owner: &OwnerId, folder_id: &FolderId) -> Result<bool, RegistrarError> {
        let folder = self.storage.get_folder(folder_id)?;
        Ok(folder.access.get(owner.as_str()) == Some(&AccessLevel::Admin))
    }
}
