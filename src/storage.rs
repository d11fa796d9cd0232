use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tempfile::Builder;

use crate::domain::{FolderId, OwnerId};
use crate::error::RegistrarError;

const FOLDER_DOC: &str = ".folder.json";
const ITEMS_DIR: &str = ".items";
const USERS_DIR: &str = "users";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Read,
    Write,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub id: FolderId,
    pub name: String,
    pub parent: Option<FolderId>,
    pub public: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub access: BTreeMap<String, AccessLevel>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub name: String,
    pub folder_id: FolderId,
    pub size: u64,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Created,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Ascending,
    Descending,
}

/// Folder/item primitives the registrar consumes. Implementations own
/// uniqueness of names under a parent and must make
/// `create_or_reuse_folder` atomic.
pub trait StorageBackend: Send + Sync {
    /// Home folder of `owner`, created on first use.
    fn user_root(&self, owner: &OwnerId) -> Result<FolderRecord, RegistrarError>;
    fn get_folder(&self, id: &FolderId) -> Result<FolderRecord, RegistrarError>;
    fn create_or_reuse_folder(
        &self,
        parent: &FolderId,
        name: &str,
        public: bool,
    ) -> Result<FolderRecord, RegistrarError>;
    fn set_folder_metadata(
        &self,
        folder: &FolderId,
        meta: &BTreeMap<String, String>,
    ) -> Result<FolderRecord, RegistrarError>;
    fn set_folder_description(
        &self,
        folder: &FolderId,
        description: &str,
    ) -> Result<FolderRecord, RegistrarError>;
    fn grant_admin(
        &self,
        folder: &FolderId,
        principal: &OwnerId,
    ) -> Result<FolderRecord, RegistrarError>;
    fn list_child_folders(
        &self,
        parent: &FolderId,
        sort: SortField,
        dir: SortDir,
    ) -> Result<Vec<FolderRecord>, RegistrarError>;
    /// Creates the item, or overwrites the size of an existing item with the same name.
    fn create_or_reuse_item(
        &self,
        folder: &FolderId,
        name: &str,
        size: u64,
    ) -> Result<ItemRecord, RegistrarError>;
    fn set_item_metadata(
        &self,
        item: &ItemRecord,
        meta: &BTreeMap<String, String>,
    ) -> Result<ItemRecord, RegistrarError>;
    /// Items of `folder`, sorted by name.
    fn list_items(&self, folder: &FolderId) -> Result<Vec<ItemRecord>, RegistrarError>;
}

/// Directory-tree backend. Each folder is a directory holding a `.folder.json`
/// document and an `.items/` directory of item documents.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: Utf8PathBuf,
    updates: Arc<Mutex<()>>,
}

impl FsStorage {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            updates: Arc::new(Mutex::new(())),
        }
    }

    /// Serializes read-modify-write cycles on documents.
    fn lock_updates(&self) -> MutexGuard<'_, ()> {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ensure_root(&self) -> Result<(), RegistrarError> {
        fs::create_dir_all(self.root.join(USERS_DIR).as_std_path()).map_err(storage_err)
    }

    fn folder_dir(&self, id: &FolderId) -> Result<Utf8PathBuf, RegistrarError> {
        let relative = Utf8Path::new(id.as_str());
        let is_safe = !id.as_str().is_empty()
            && relative
                .components()
                .all(|part| matches!(part, camino::Utf8Component::Normal(_)));
        if !is_safe {
            return Err(RegistrarError::StorageFailure(format!(
                "invalid folder id: {id}"
            )));
        }
        Ok(self.root.join(relative))
    }

    fn item_path(&self, folder: &FolderId, name: &str) -> Result<Utf8PathBuf, RegistrarError> {
        Ok(self
            .folder_dir(folder)?
            .join(ITEMS_DIR)
            .join(format!("{}.json", encode_component(name))))
    }

    fn read_folder_at(dir: &Utf8Path) -> Result<FolderRecord, RegistrarError> {
        read_json(&dir.join(FOLDER_DOC))
    }

    /// Publishes a fully written temp directory under `parent_dir/name`.
    /// The rename fails when the target already exists, which makes the
    /// existence check and the creation a single filesystem operation.
    fn create_or_reuse_dir(
        &self,
        parent_dir: &Utf8Path,
        record: FolderRecord,
    ) -> Result<FolderRecord, RegistrarError> {
        let target = parent_dir.join(&record.name);
        if target.as_std_path().exists() {
            return Self::read_folder_at(&target);
        }

        let temp_dir = Builder::new()
            .prefix(".tmp-folder")
            .tempdir_in(parent_dir.as_std_path())
            .map_err(storage_err)?;
        let temp_path = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf())
            .map_err(|_| RegistrarError::StorageFailure("non-utf8 temp dir".to_string()))?;
        fs::create_dir(temp_path.join(ITEMS_DIR).as_std_path()).map_err(storage_err)?;
        write_json_atomic(&temp_path.join(FOLDER_DOC), &record)?;

        match fs::rename(temp_dir.path(), target.as_std_path()) {
            Ok(()) => {
                let _ = temp_dir.keep();
                Ok(record)
            }
            Err(_) if target.as_std_path().exists() => Self::read_folder_at(&target),
            Err(err) => Err(storage_err(err)),
        }
    }

    fn update_folder<F>(&self, id: &FolderId, apply: F) -> Result<FolderRecord, RegistrarError>
    where
        F: FnOnce(&mut FolderRecord),
    {
        let dir = self.folder_dir(id)?;
        let _guard = self.lock_updates();
        let mut record = Self::read_folder_at(&dir)?;
        apply(&mut record);
        record.updated = Utc::now();
        write_json_atomic(&dir.join(FOLDER_DOC), &record)?;
        Ok(record)
    }
}

impl StorageBackend for FsStorage {
    fn user_root(&self, owner: &OwnerId) -> Result<FolderRecord, RegistrarError> {
        self.ensure_root()?;
        let now = Utc::now();
        let record = FolderRecord {
            id: FolderId::new(format!("{USERS_DIR}/{}", owner.as_str())),
            name: owner.as_str().to_string(),
            parent: None,
            public: false,
            description: None,
            access: BTreeMap::from([(owner.as_str().to_string(), AccessLevel::Admin)]),
            meta: BTreeMap::new(),
            created: now,
            updated: now,
        };
        self.create_or_reuse_dir(&self.root.join(USERS_DIR), record)
    }

    fn get_folder(&self, id: &FolderId) -> Result<FolderRecord, RegistrarError> {
        let dir = self.folder_dir(id)?;
        Self::read_folder_at(&dir)
    }

    fn create_or_reuse_folder(
        &self,
        parent: &FolderId,
        name: &str,
        public: bool,
    ) -> Result<FolderRecord, RegistrarError> {
        validate_folder_name(name)?;
        let parent_dir = self.folder_dir(parent)?;
        let parent_record = Self::read_folder_at(&parent_dir)?;
        let now = Utc::now();
        let record = FolderRecord {
            id: FolderId::new(format!("{}/{name}", parent_record.id.as_str())),
            name: name.to_string(),
            parent: Some(parent_record.id),
            public,
            description: None,
            access: BTreeMap::new(),
            meta: BTreeMap::new(),
            created: now,
            updated: now,
        };
        self.create_or_reuse_dir(&parent_dir, record)
    }

    fn set_folder_metadata(
        &self,
        folder: &FolderId,
        meta: &BTreeMap<String, String>,
    ) -> Result<FolderRecord, RegistrarError> {
        self.update_folder(folder, |record| {
            record
                .meta
                .extend(meta.iter().map(|(key, value)| (key.clone(), value.clone())));
        })
    }

    fn set_folder_description(
        &self,
        folder: &FolderId,
        description: &str,
    ) -> Result<FolderRecord, RegistrarError> {
        self.update_folder(folder, |record| {
            record.description = Some(description.to_string());
        })
    }

    fn grant_admin(
        &self,
        folder: &FolderId,
        principal: &OwnerId,
    ) -> Result<FolderRecord, RegistrarError> {
        self.update_folder(folder, |record| {
            record
                .access
                .insert(principal.as_str().to_string(), AccessLevel::Admin);
        })
    }

    fn list_child_folders(
        &self,
        parent: &FolderId,
        sort: SortField,
        dir: SortDir,
    ) -> Result<Vec<FolderRecord>, RegistrarError> {
        let parent_dir = self.folder_dir(parent)?;
        let mut folders = Vec::new();
        for entry in fs::read_dir(parent_dir.as_std_path()).map_err(storage_err)? {
            let entry = entry.map_err(storage_err)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            folders.push(Self::read_folder_at(&parent_dir.join(name))?);
        }
        folders.sort_by(|a, b| match sort {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Created => a.created.cmp(&b.created).then_with(|| a.name.cmp(&b.name)),
        });
        if dir == SortDir::Descending {
            folders.reverse();
        }
        Ok(folders)
    }

    fn create_or_reuse_item(
        &self,
        folder: &FolderId,
        name: &str,
        size: u64,
    ) -> Result<ItemRecord, RegistrarError> {
        if name.trim().is_empty() {
            return Err(RegistrarError::StorageFailure(
                "item name must not be empty".to_string(),
            ));
        }
        let path = self.item_path(folder, name)?;
        let now = Utc::now();
        let _guard = self.lock_updates();
        let record = match read_optional_json::<ItemRecord>(&path)? {
            Some(mut existing) => {
                existing.size = size;
                existing.updated = now;
                existing
            }
            None => ItemRecord {
                name: name.to_string(),
                folder_id: folder.clone(),
                size,
                meta: BTreeMap::new(),
                created: now,
                updated: now,
            },
        };
        write_json_atomic(&path, &record)?;
        Ok(record)
    }

    fn set_item_metadata(
        &self,
        item: &ItemRecord,
        meta: &BTreeMap<String, String>,
    ) -> Result<ItemRecord, RegistrarError> {
        let path = self.item_path(&item.folder_id, &item.name)?;
        let _guard = self.lock_updates();
        let mut record: ItemRecord = read_json(&path)?;
        record
            .meta
            .extend(meta.iter().map(|(key, value)| (key.clone(), value.clone())));
        record.updated = Utc::now();
        write_json_atomic(&path, &record)?;
        Ok(record)
    }

    fn list_items(&self, folder: &FolderId) -> Result<Vec<ItemRecord>, RegistrarError> {
        let items_dir = self.folder_dir(folder)?.join(ITEMS_DIR);
        if !items_dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut items = Vec::new();
        for entry in fs::read_dir(items_dir.as_std_path()).map_err(storage_err)? {
            let path = entry.map_err(storage_err)?.path();
            let is_doc = path.is_file()
                && path.extension().map(|ext| ext == "json").unwrap_or(false)
                && !path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with('.'))
                    .unwrap_or(true);
            if !is_doc {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|_| RegistrarError::StorageFailure("non-utf8 item path".to_string()))?;
            items.push(read_json::<ItemRecord>(&path)?);
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }
}

fn validate_folder_name(name: &str) -> Result<(), RegistrarError> {
    let is_valid = !name.trim().is_empty()
        && !name.starts_with('.')
        && !name.chars().any(|ch| matches!(ch, '/' | '\\') || ch.is_control());
    if !is_valid {
        return Err(RegistrarError::StorageFailure(format!(
            "invalid folder name: {name:?}"
        )));
    }
    Ok(())
}

/// Escapes an item name into a single safe path component.
fn encode_component(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for (index, ch) in name.chars().enumerate() {
        let must_escape = matches!(ch, '/' | '\\' | '%') || ch.is_control() || (index == 0 && ch == '.');
        if must_escape {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                encoded.push_str(&format!("%{byte:02X}"));
            }
        } else {
            encoded.push(ch);
        }
    }
    encoded
}

fn storage_err(err: io::Error) -> RegistrarError {
    RegistrarError::StorageFailure(err.to_string())
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, RegistrarError> {
    read_optional_json(path)?
        .ok_or_else(|| RegistrarError::StorageFailure(format!("missing document {path}")))
}

fn read_optional_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<Option<T>, RegistrarError> {
    let content = match fs::read(path.as_std_path()) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|err| RegistrarError::StorageFailure(format!("corrupt document {path}: {err}")))
}

fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), RegistrarError> {
    let parent = path
        .parent()
        .ok_or_else(|| RegistrarError::StorageFailure("invalid destination path".to_string()))?;
    fs::create_dir_all(parent.as_std_path()).map_err(storage_err)?;
    let content = serde_json::to_vec_pretty(value)
        .map_err(|err| RegistrarError::StorageFailure(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".tmp-doc")
        .tempfile_in(parent.as_std_path())
        .map_err(storage_err)?;
    temp.write_all(&content).map_err(storage_err)?;
    temp.persist(path.as_std_path())
        .map_err(|err| storage_err(err.error))?;
    Ok(())
}
