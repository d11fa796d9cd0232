use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::domain::{OwnerId, RegisteredRoot, RootMetadata};
use crate::error::RegistrarError;
use crate::storage::{FolderRecord, SortDir, SortField, StorageBackend};

type OwnerIndex = BTreeMap<String, RegisteredRoot>;

/// Index of registered roots per owner, keyed by doi.
///
/// The index is derived from the `provider`/`identifier` metadata of the
/// folders under the owner's workspace. It only speeds up `is_registered`:
/// a hit is confirmed against the folder, a miss rescans storage, and `list`
/// always reads the folders.
pub struct Ledger<S: StorageBackend> {
    storage: Arc<S>,
    workspace: String,
    index: RwLock<HashMap<OwnerId, OwnerIndex>>,
}

impl<S: StorageBackend> Ledger<S> {
    pub fn new(storage: Arc<S>, workspace: impl Into<String>) -> Self {
        Self {
            storage,
            workspace: workspace.into(),
            index: RwLock::new(HashMap::new()),
        }
    }

    /// The folder under the owner's home that receives registered roots.
    pub fn workspace(&self, owner: &OwnerId) -> Result<FolderRecord, RegistrarError> {
        let home = self.storage.user_root(owner)?;
        self.storage
            .create_or_reuse_folder(&home.id, &self.workspace, false)
    }

    pub fn is_registered(
        &self,
        owner: &OwnerId,
        doi: &str,
    ) -> Result<Option<RegisteredRoot>, RegistrarError> {
        if let Some(root) = self.cached(owner, doi) {
            let confirmed = self
                .storage
                .get_folder(&root.folder_id)
                .ok()
                .and_then(|folder| registered_root(owner, &folder))
                .filter(|current| current.metadata.identifier == doi);
            if confirmed.is_some() {
                return Ok(confirmed);
            }
            debug!(%owner, doi, folder = %root.folder_id, "cached registration is stale");
        }
        self.refresh(owner)?;
        Ok(self.cached(owner, doi))
    }

    /// Registered roots of `owner`, ordered by folder name.
    pub fn list(&self, owner: &OwnerId) -> Result<Vec<RegisteredRoot>, RegistrarError> {
        let roots = self.scan(owner)?;
        let mut listed = roots.values().cloned().collect::<Vec<_>>();
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        self.index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(owner.clone(), roots);
        Ok(listed)
    }

    pub fn record(&self, owner: &OwnerId, root: RegisteredRoot) -> Result<(), RegistrarError> {
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index
            .entry(owner.clone())
            .or_default()
            .insert(root.metadata.identifier.clone(), root);
        Ok(())
    }

    /// Drops the cached index of `owner` and rebuilds it from folder metadata.
    pub fn refresh(&self, owner: &OwnerId) -> Result<(), RegistrarError> {
        let roots = self.scan(owner)?;
        let mut index = self.index.write().unwrap_or_else(PoisonError::into_inner);
        index.insert(owner.clone(), roots);
        Ok(())
    }

    fn cached(&self, owner: &OwnerId, doi: &str) -> Option<RegisteredRoot> {
        let index = self.index.read().unwrap_or_else(PoisonError::into_inner);
        index.get(owner).and_then(|roots| roots.get(doi)).cloned()
    }

    fn scan(&self, owner: &OwnerId) -> Result<OwnerIndex, RegistrarError> {
        let workspace = self.workspace(owner)?;
        let folders =
            self.storage
                .list_child_folders(&workspace.id, SortField::Name, SortDir::Ascending)?;
        let mut roots = OwnerIndex::new();
        for folder in folders {
            let Some(root) = registered_root(owner, &folder) else {
                continue;
            };
            if let Some(existing) = roots.get(&root.metadata.identifier) {
                warn!(
                    %owner,
                    doi = %root.metadata.identifier,
                    kept = %existing.folder_id,
                    ignored = %root.folder_id,
                    "duplicate registration"
                );
                continue;
            }
            roots.insert(root.metadata.identifier.clone(), root);
        }
        debug!(%owner, roots = roots.len(), "ledger rebuilt");
        Ok(roots)
    }
}

pub fn registered_root(owner: &OwnerId, folder: &FolderRecord) -> Option<RegisteredRoot> {
    let metadata = RootMetadata::from_map(&folder.meta)?;
    Some(RegisteredRoot {
        folder_id: folder.id.clone(),
        name: folder.name.clone(),
        description: folder.description.clone(),
        owner: owner.clone(),
        metadata,
    })
}
