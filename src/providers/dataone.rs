use tracing::{debug, info};

use crate::catalog::{CatalogClient, CatalogQuery, DEFAULT_ROWS};
use crate::domain::{CatalogRecord, DataMapEntry, DatasetIdentifier, FormatType, ImportedItem};
use crate::error::RegistrarError;
use crate::providers::RepositoryAdapter;

pub const DATAONE_LABEL: &str = "DataONE";

/// Resolves DataONE identifiers through the coordinating node's search index.
///
/// Lookup happens in two stages: the identifier is mapped to the resource map
/// that aggregates it, then the resource map is queried for its members.
/// Only the first resource map of a metadata record is followed, and only the
/// first page of members is read.
pub struct DataOneResolver<C: CatalogClient> {
    catalog: C,
    rows: u32,
}

impl<C: CatalogClient> DataOneResolver<C> {
    pub fn new(catalog: C) -> Self {
        Self {
            catalog,
            rows: DEFAULT_ROWS,
        }
    }

    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    /// Resource map id of `identifier`.
    pub fn resource_map_of(&self, identifier: &DatasetIdentifier) -> Result<String, RegistrarError> {
        let rows = self
            .catalog
            .query(&CatalogQuery::by_identifier(identifier.as_str()).with_rows(self.rows))?;
        let record = rows
            .iter()
            .find(|row| row.identifier == identifier.as_str())
            .or_else(|| rows.first())
            .ok_or_else(|| RegistrarError::NotFound(identifier.to_string()))?;

        if record.resource_map_ids.len() > 1 {
            debug!(
                %identifier,
                count = record.resource_map_ids.len(),
                "multiple resource maps, following the first"
            );
        }
        record.resource_map_ids.first().cloned().ok_or_else(|| {
            RegistrarError::ConfigurationError(format!(
                "{identifier} is not aggregated by any resource map"
            ))
        })
    }

    fn resource_map_rows(&self, data_id: &str) -> Result<Vec<CatalogRecord>, RegistrarError> {
        self.catalog
            .query(&CatalogQuery::by_resource_map(data_id).with_rows(self.rows))
    }
}

impl<C: CatalogClient> RepositoryAdapter for DataOneResolver<C> {
    fn label(&self) -> &str {
        DATAONE_LABEL
    }

    fn lookup(&self, identifier: &DatasetIdentifier) -> Result<DataMapEntry, RegistrarError> {
        let data_id = self.resource_map_of(identifier)?;
        let rows = self.resource_map_rows(&data_id)?;

        let metadata = rows
            .iter()
            .filter(|row| row.format_type == FormatType::Metadata)
            .find(|row| row.identifier == identifier.as_str())
            .or_else(|| {
                rows.iter()
                    .find(|row| row.format_type == FormatType::Metadata)
            })
            .ok_or_else(|| {
                RegistrarError::ConfigurationError(format!(
                    "resource map {data_id} has no metadata record"
                ))
            })?;

        let entry = DataMapEntry {
            data_id,
            doi: metadata.identifier.clone(),
            name: metadata
                .title
                .clone()
                .unwrap_or_else(|| metadata.identifier.clone()),
            repository_label: DATAONE_LABEL.to_string(),
            size_bytes: metadata.size_bytes.unwrap_or(0),
        };
        info!(%identifier, data_id = %entry.data_id, doi = %entry.doi, "resolved");
        Ok(entry)
    }

    fn members(&self, data_id: &str) -> Result<Vec<ImportedItem>, RegistrarError> {
        let rows = self.resource_map_rows(data_id)?;
        let mut items = Vec::new();
        for row in &rows {
            match row.importable_name() {
                Some(name) => items.push(ImportedItem {
                    name: name.to_string(),
                    size_bytes: row.size_bytes.unwrap_or(0),
                    identifier: row.identifier.clone(),
                }),
                None if row.format_type == FormatType::Data => {
                    debug!(identifier = %row.identifier, "skipping data object without fileName");
                }
                None => {}
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::catalog::Filter;

    struct Recorded {
        queries: Mutex<Vec<CatalogQuery>>,
        identifier_rows: Vec<CatalogRecord>,
        member_rows: Vec<CatalogRecord>,
    }

    impl CatalogClient for Recorded {
        fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError> {
            self.queries.lock().unwrap().push(query.clone());
            Ok(match query.filter {
                Filter::Identifier(_) => self.identifier_rows.clone(),
                Filter::ResourceMap(_) => self.member_rows.clone(),
            })
        }
    }

    fn row(identifier: &str, format_type: FormatType) -> CatalogRecord {
        CatalogRecord {
            identifier: identifier.to_string(),
            format_id: None,
            format_type,
            resource_map_ids: Vec::new(),
            title: None,
            file_name: None,
            size_bytes: None,
            documents: Vec::new(),
        }
    }

    #[test]
    fn follows_first_resource_map() {
        let mut meta = row("m", FormatType::Metadata);
        meta.resource_map_ids = vec!["rm1".to_string(), "rm2".to_string()];
        let mut member_meta = row("m", FormatType::Metadata);
        member_meta.title = Some("Title".to_string());
        member_meta.size_bytes = Some(5);
        let catalog = Recorded {
            queries: Mutex::new(Vec::new()),
            identifier_rows: vec![meta],
            member_rows: vec![member_meta],
        };
        let resolver = DataOneResolver::new(&catalog);
        let entry = resolver.lookup(&"m".parse().unwrap()).unwrap();
        assert_eq!(entry.data_id, "rm1");
        assert_eq!(entry.name, "Title");
        assert_eq!(entry.size_bytes, 5);

        let queries = catalog.queries.lock().unwrap();
        assert_eq!(queries[1].filter, Filter::ResourceMap("rm1".to_string()));
    }

    #[test]
    fn empty_resource_map_list_is_configuration_error() {
        let catalog = Recorded {
            queries: Mutex::new(Vec::new()),
            identifier_rows: vec![row("m", FormatType::Metadata)],
            member_rows: Vec::new(),
        };
        let resolver = DataOneResolver::new(&catalog);
        assert_matches!(
            resolver.lookup(&"m".parse().unwrap()),
            Err(RegistrarError::ConfigurationError(_))
        );
    }

    #[test]
    fn members_skip_rows_without_file_name() {
        let mut named = row("d1", FormatType::Data);
        named.file_name = Some("a.csv".to_string());
        named.size_bytes = Some(3);
        let catalog = Recorded {
            queries: Mutex::new(Vec::new()),
            identifier_rows: Vec::new(),
            member_rows: vec![row("m", FormatType::Metadata), row("d0", FormatType::Data), named],
        };
        let items = DataOneResolver::new(&catalog).members("rm").unwrap();
        assert_eq!(
            items,
            vec![ImportedItem {
                name: "a.csv".to_string(),
                size_bytes: 3,
                identifier: "d1".to_string(),
            }]
        );
    }

    #[test]
    fn honours_configured_rows() {
        let catalog = Recorded {
            queries: Mutex::new(Vec::new()),
            identifier_rows: Vec::new(),
            member_rows: Vec::new(),
        };
        let resolver = DataOneResolver::new(&catalog).with_rows(50);
        assert_matches!(
            resolver.lookup(&"x".parse().unwrap()),
            Err(RegistrarError::NotFound(id)) if id == "x"
        );
        assert_eq!(catalog.queries.lock().unwrap()[0].rows, 50);
    }
}
