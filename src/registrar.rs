use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{
    DataMapEntry, META_IDENTIFIER, OwnerId, RegisteredRoot, RootMetadata, folder_name_for_doi,
};
use crate::error::RegistrarError;
use crate::ledger::{Ledger, registered_root};
use crate::providers::AdapterRegistry;
use crate::storage::{FolderRecord, StorageBackend};

/// Materializes data map entries as folders of items.
///
/// Registration is idempotent per `(owner, doi)`: the folder is reused and
/// items already carrying a member's identifier are updated in place.
pub struct Registrar<S: StorageBackend> {
    storage: Arc<S>,
    ledger: Arc<Ledger<S>>,
    adapters: Arc<AdapterRegistry>,
    public: bool,
}

impl<S: StorageBackend> Registrar<S> {
    pub fn new(storage: Arc<S>, ledger: Arc<Ledger<S>>, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            storage,
            ledger,
            adapters,
            public: false,
        }
    }

    pub fn with_public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    /// Registers every entry independently, in input order. A failed entry
    /// does not undo entries committed before it.
    pub fn register(
        &self,
        owner: &OwnerId,
        entries: &[DataMapEntry],
    ) -> Vec<Result<RegisteredRoot, RegistrarError>> {
        entries
            .iter()
            .map(|entry| {
                let result = self.register_entry(owner, entry);
                if let Err(err) = &result {
                    warn!(%owner, doi = %entry.doi, error = %err, "registration failed");
                }
                result
            })
            .collect()
    }

    pub fn register_entry(
        &self,
        owner: &OwnerId,
        entry: &DataMapEntry,
    ) -> Result<RegisteredRoot, RegistrarError> {
        entry.validate()?;
        let adapter = self.adapters.get(&entry.repository_label)?;
        let members = adapter.members(&entry.data_id)?;

        let folder = self.target_folder(owner, entry)?;
        if let Some(existing) = folder.meta.get(META_IDENTIFIER) {
            if existing != &entry.doi {
                return Err(RegistrarError::StorageFailure(format!(
                    "folder {} already holds dataset {existing}",
                    folder.id
                )));
            }
        }

        self.storage.grant_admin(&folder.id, owner)?;
        let metadata = RootMetadata {
            provider: entry.repository_label.clone(),
            identifier: entry.doi.clone(),
        };
        self.storage.set_folder_metadata(&folder.id, &metadata.to_map())?;
        let folder = self.storage.set_folder_description(&folder.id, &entry.name)?;

        let by_identifier = self
            .storage
            .list_items(&folder.id)?
            .into_iter()
            .filter_map(|item| {
                let identifier = item.meta.get(META_IDENTIFIER)?.clone();
                Some((identifier, item.name))
            })
            .collect::<HashMap<_, _>>();

        // A renamed member keeps its item unless another member now claims that name.
        let claimed = members
            .iter()
            .map(|member| member.name.as_str())
            .collect::<HashSet<_>>();
        let mut created = 0usize;
        for member in &members {
            let name = match by_identifier.get(&member.identifier) {
                Some(existing)
                    if existing == &member.name || !claimed.contains(existing.as_str()) =>
                {
                    existing.as_str()
                }
                _ => {
                    created += 1;
                    member.name.as_str()
                }
            };
            let item = self
                .storage
                .create_or_reuse_item(&folder.id, name, member.size_bytes)?;
            self.storage.set_item_metadata(
                &item,
                &BTreeMap::from([(META_IDENTIFIER.to_string(), member.identifier.clone())]),
            )?;
        }

        let root = registered_root(owner, &folder).ok_or_else(|| {
            RegistrarError::StorageFailure(format!("metadata missing on folder {}", folder.id))
        })?;
        self.ledger.record(owner, root.clone())?;
        info!(
            %owner,
            doi = %entry.doi,
            folder = %root.folder_id,
            members = members.len(),
            created,
            "registered"
        );
        Ok(root)
    }

    fn target_folder(
        &self,
        owner: &OwnerId,
        entry: &DataMapEntry,
    ) -> Result<FolderRecord, RegistrarError> {
        if let Some(root) = self.ledger.is_registered(owner, &entry.doi)? {
            return self.storage.get_folder(&root.folder_id);
        }
        let workspace = self.ledger.workspace(owner)?;
        self.storage
            .create_or_reuse_folder(&workspace.id, &folder_name_for_doi(&entry.doi), self.public)
    }
}
