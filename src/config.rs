use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::catalog::DEFAULT_ROWS;
use crate::error::RegistrarError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-dr.json";
pub const DEFAULT_QUERY_URL: &str = "https://cn.dataone.org/cn/v2/query/solr/";
pub const DEFAULT_WORKSPACE: &str = "Data";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub catalog: CatalogEntry,
    #[serde(default)]
    pub store: StoreEntry,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CatalogEntry {
    #[serde(default)]
    pub query_url: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub rows: Option<u32>,
    #[serde(default)]
    pub retries: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreEntry {
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub query_url: String,
    pub timeout: Duration,
    pub rows: u32,
    pub retries: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            query_url: DEFAULT_QUERY_URL.to_string(),
            timeout: Duration::from_secs(30),
            rows: DEFAULT_ROWS,
            retries: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub root: Utf8PathBuf,
    /// Well-known folder under each owner's home that receives registered roots.
    pub workspace: String,
    pub public: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub catalog: CatalogSettings,
    pub store: StoreSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `kira-dr.json` in the current directory when present.
    /// Without either, defaults apply.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, RegistrarError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RegistrarError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| RegistrarError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, RegistrarError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let defaults = CatalogSettings::default();

        let query_url = config.catalog.query_url.unwrap_or(defaults.query_url);
        if query_url.trim().is_empty() {
            return Err(RegistrarError::ConfigurationError(
                "catalog.query_url must not be empty".to_string(),
            ));
        }
        let rows = config.catalog.rows.unwrap_or(defaults.rows);
        if rows == 0 {
            return Err(RegistrarError::ConfigurationError(
                "catalog.rows must be positive".to_string(),
            ));
        }
        let catalog = CatalogSettings {
            query_url,
            timeout: config
                .catalog
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            rows,
            retries: config.catalog.retries.unwrap_or(defaults.retries),
        };

        let root = match config.store.root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_store_root()?,
        };
        let workspace = config
            .store
            .workspace
            .unwrap_or_else(|| DEFAULT_WORKSPACE.to_string());
        if workspace.trim().is_empty() || workspace.contains(['/', '\\']) {
            return Err(RegistrarError::ConfigurationError(format!(
                "invalid store.workspace: {workspace:?}"
            )));
        }
        let store = StoreSettings {
            root,
            workspace,
            public: config.store.public.unwrap_or(false),
        };

        Ok(ResolvedConfig {
            schema_version,
            catalog,
            store,
        })
    }
}

pub fn default_store_root() -> Result<Utf8PathBuf, RegistrarError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.data_local_dir().join("kira-data-registrar")).ok()
        })
        .ok_or_else(|| {
            RegistrarError::ConfigurationError("unable to resolve data directory".to_string())
        })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config = Config {
            store: StoreEntry {
                root: Some("/tmp/kira-dr".to_string()),
                ..StoreEntry::default()
            },
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.catalog.query_url, DEFAULT_QUERY_URL);
        assert_eq!(resolved.catalog.rows, 1000);
        assert_eq!(resolved.catalog.retries, 0);
        assert_eq!(resolved.store.workspace, DEFAULT_WORKSPACE);
        assert!(!resolved.store.public);
    }

    #[test]
    fn rejects_zero_rows() {
        let config = Config {
            catalog: CatalogEntry {
                rows: Some(0),
                ..CatalogEntry::default()
            },
            store: StoreEntry {
                root: Some("/tmp/kira-dr".to_string()),
                ..StoreEntry::default()
            },
            ..Config::default()
        };
        assert_matches!(
            ConfigLoader::resolve_config(config),
            Err(RegistrarError::ConfigurationError(_))
        );
    }
}
