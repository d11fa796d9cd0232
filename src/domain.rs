use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegistrarError;

/// Opaque identifier of a dataset in an external repository, e.g. a URN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetIdentifier(String);

impl DatasetIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetIdentifier {
    type Err = RegistrarError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        // A quote would terminate the phrase filter early.
        if normalized.is_empty() || normalized.contains('"') {
            return Err(RegistrarError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for DatasetIdentifier {
    type Error = RegistrarError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DatasetIdentifier> for String {
    fn from(value: DatasetIdentifier) -> Self {
        value.0
    }
}

/// Principal that owns registered folders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OwnerId {
    type Err = RegistrarError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
            && !normalized.starts_with('.');
        if !is_valid {
            return Err(RegistrarError::ConfigurationError(format!(
                "invalid owner id: {value}"
            )));
        }
        Ok(Self(normalized.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormatType {
    Metadata,
    Data,
    Resource,
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatType::Metadata => write!(f, "METADATA"),
            FormatType::Data => write!(f, "DATA"),
            FormatType::Resource => write!(f, "RESOURCE"),
        }
    }
}

/// One row of a search index response. Only lives for the duration of a lookup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    pub identifier: String,
    #[serde(default)]
    pub format_id: Option<String>,
    pub format_type: FormatType,
    #[serde(default, rename = "resourceMap")]
    pub resource_map_ids: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, rename = "size")]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub documents: Vec<String>,
}

impl CatalogRecord {
    /// Name under which this row can be imported, if it is a named data file.
    pub fn importable_name(&self) -> Option<&str> {
        if self.format_type != FormatType::Data {
            return None;
        }
        self.file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// A resolved dataset, ready to be reviewed and registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMapEntry {
    /// Resource map identifier used to enumerate member files.
    #[serde(rename = "dataId")]
    pub data_id: String,
    /// Identifier of the top-level metadata record.
    pub doi: String,
    pub name: String,
    #[serde(rename = "repository")]
    pub repository_label: String,
    /// Declared size of the metadata record, not the sum of members.
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

impl DataMapEntry {
    pub fn validate(&self) -> Result<(), RegistrarError> {
        if self.data_id.trim().is_empty() {
            return Err(RegistrarError::InvalidDataMap(format!(
                "entry {} has an empty dataId",
                self.doi
            )));
        }
        if self.doi.trim().is_empty() {
            return Err(RegistrarError::InvalidDataMap(format!(
                "entry {} has an empty doi",
                self.data_id
            )));
        }
        if self.repository_label.trim().is_empty() {
            return Err(RegistrarError::InvalidDataMap(format!(
                "entry {} has no repository",
                self.doi
            )));
        }
        Ok(())
    }
}

pub fn parse_data_map(content: &str) -> Result<Vec<DataMapEntry>, RegistrarError> {
    let entries: Vec<DataMapEntry> = serde_json::from_str(content)
        .map_err(|err| RegistrarError::InvalidDataMap(err.to_string()))?;
    for entry in &entries {
        entry.validate()?;
    }
    Ok(entries)
}

/// Storage-side identifier of a folder, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FolderId(String);

impl FolderId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub const META_PROVIDER: &str = "provider";
pub const META_IDENTIFIER: &str = "identifier";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootMetadata {
    pub provider: String,
    pub identifier: String,
}

impl RootMetadata {
    pub fn from_map(meta: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            provider: meta.get(META_PROVIDER)?.clone(),
            identifier: meta.get(META_IDENTIFIER)?.clone(),
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (META_PROVIDER.to_string(), self.provider.clone()),
            (META_IDENTIFIER.to_string(), self.identifier.clone()),
        ])
    }
}

/// The local folder that one imported dataset lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredRoot {
    pub folder_id: FolderId,
    pub name: String,
    /// Dataset title as shown by the repository.
    pub description: Option<String>,
    pub owner: OwnerId,
    pub metadata: RootMetadata,
}

/// A file node created from a DATA row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedItem {
    pub name: String,
    pub size_bytes: u64,
    pub identifier: String,
}

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/\\\x00-\x1f\x7f]+").expect("static regex"));

/// Deterministic folder name for a dataset keyed by its doi.
pub fn folder_name_for_doi(doi: &str) -> String {
    let name = UNSAFE_NAME_CHARS.replace_all(doi.trim(), "_").into_owned();
    match name.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ if name.starts_with('.') => format!("_{}", &name[1..]),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_identifier_trims() {
        let id: DatasetIdentifier = "  urn:uuid:abc ".parse().unwrap();
        assert_eq!(id.as_str(), "urn:uuid:abc");
    }

    #[test]
    fn parse_identifier_rejects_quotes_and_blank() {
        assert_matches!(
            "".parse::<DatasetIdentifier>(),
            Err(RegistrarError::InvalidIdentifier(_))
        );
        assert_matches!(
            "a\"b".parse::<DatasetIdentifier>(),
            Err(RegistrarError::InvalidIdentifier(_))
        );
    }

    #[test]
    fn owner_rejects_path_segments() {
        assert!("joe".parse::<OwnerId>().is_ok());
        assert!("../root".parse::<OwnerId>().is_err());
        assert!(".hidden".parse::<OwnerId>().is_err());
    }

    #[test]
    fn folder_name_replaces_separators() {
        assert_eq!(
            folder_name_for_doi("urn:uuid:c878ae53"),
            "urn:uuid:c878ae53"
        );
        assert_eq!(folder_name_for_doi("doi:10.5063/F1QN64NZ"), "doi:10.5063_F1QN64NZ");
        assert_eq!(folder_name_for_doi(".."), "_");
        assert_eq!(folder_name_for_doi(".git"), "_git");
    }

    #[test]
    fn data_map_uses_wire_names() {
        let json = r#"[{"dataId":"resource_map_x","doi":"x","name":"X","repository":"DataONE","size":10}]"#;
        let entries = parse_data_map(json).unwrap();
        assert_eq!(entries[0].data_id, "resource_map_x");
        assert_eq!(entries[0].repository_label, "DataONE");
        assert_eq!(entries[0].size_bytes, 10);
    }

    #[test]
    fn data_map_rejects_empty_data_id() {
        let json = r#"[{"dataId":" ","doi":"x","name":"X","repository":"DataONE","size":10}]"#;
        assert_matches!(parse_data_map(json), Err(RegistrarError::InvalidDataMap(_)));
    }

    #[test]
    fn importable_name_requires_data_and_file_name() {
        let mut record = CatalogRecord {
            identifier: "a".to_string(),
            format_id: None,
            format_type: FormatType::Data,
            resource_map_ids: Vec::new(),
            title: None,
            file_name: Some("a.csv".to_string()),
            size_bytes: Some(1),
            documents: Vec::new(),
        };
        assert_eq!(record.importable_name(), Some("a.csv"));
        record.file_name = Some("   ".to_string());
        assert_eq!(record.importable_name(), None);
        record.file_name = Some("a.csv".to_string());
        record.format_type = FormatType::Metadata;
        assert_eq!(record.importable_name(), None);
    }
}
