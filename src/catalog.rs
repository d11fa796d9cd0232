use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CatalogSettings;
use crate::domain::CatalogRecord;
use crate::error::RegistrarError;

pub const DEFAULT_ROWS: u32 = 1000;

/// Fields needed to go from a dataset identifier to its resource map.
pub const IDENTIFIER_FIELDS: &[&str] = &["identifier", "formatType", "formatId", "resourceMap"];

/// Fields needed to enumerate the members of a resource map.
pub const MEMBER_FIELDS: &[&str] = &[
    "identifier",
    "formatType",
    "title",
    "size",
    "formatId",
    "fileName",
    "documents",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Identifier(String),
    ResourceMap(String),
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Identifier(value) => write!(f, "identifier:\"{value}\""),
            Filter::ResourceMap(value) => write!(f, "resourceMap:\"{value}\""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    pub filter: Filter,
    pub fields: Vec<String>,
    pub rows: u32,
    pub start: u32,
}

impl CatalogQuery {
    pub fn by_identifier(identifier: &str) -> Self {
        Self::first_page(Filter::Identifier(identifier.to_string()), IDENTIFIER_FIELDS)
    }

    pub fn by_resource_map(data_id: &str) -> Self {
        Self::first_page(Filter::ResourceMap(data_id.to_string()), MEMBER_FIELDS)
    }

    fn first_page(filter: Filter, fields: &[&str]) -> Self {
        Self {
            filter,
            fields: fields.iter().map(|field| field.to_string()).collect(),
            rows: DEFAULT_ROWS,
            start: 0,
        }
    }

    pub fn with_rows(mut self, rows: u32) -> Self {
        self.rows = rows;
        self
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("q", self.filter.to_string()),
            ("fl", self.fields.join(",")),
            ("rows", self.rows.to_string()),
            ("start", self.start.to_string()),
            ("wt", "json".to_string()),
        ]
    }
}

/// Read-only access to a search index. Implementations deserialize rows and
/// nothing else; an empty match is `Ok(vec![])`.
pub trait CatalogClient: Send + Sync {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError>;
}

impl<C: CatalogClient + ?Sized> CatalogClient for &C {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError> {
        (**self).query(query)
    }
}

impl<C: CatalogClient + ?Sized> CatalogClient for Arc<C> {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError> {
        (**self).query(query)
    }
}

#[derive(Debug, Deserialize)]
struct SolrEnvelope {
    response: SolrResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolrResponse {
    docs: Vec<CatalogRecord>,
    #[serde(default)]
    num_found: Option<u64>,
}

/// Parses a `wt=json` search response body into rows, in index order.
pub fn parse_response(body: &str) -> Result<Vec<CatalogRecord>, RegistrarError> {
    let envelope: SolrEnvelope = serde_json::from_str(body)
        .map_err(|err| RegistrarError::CatalogUnavailable(format!("malformed response: {err}")))?;
    if let Some(found) = envelope.response.num_found {
        if found > envelope.response.docs.len() as u64 {
            debug!(
                num_found = found,
                returned = envelope.response.docs.len(),
                "catalog result truncated to first page"
            );
        }
    }
    Ok(envelope.response.docs)
}

#[derive(Clone)]
pub struct SolrCatalogClient {
    client: Client,
    query_url: String,
}

impl SolrCatalogClient {
    pub fn new(settings: &CatalogSettings) -> Result<Self, RegistrarError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-dr/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RegistrarError::ConfigurationError(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| RegistrarError::CatalogUnavailable(err.to_string()))?;
        Ok(Self {
            client,
            query_url: settings.query_url.clone(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, RegistrarError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(RegistrarError::CatalogStatus { status, message })
    }
}

impl CatalogClient for SolrCatalogClient {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError> {
        debug!(filter = %query.filter, rows = query.rows, "catalog.request");
        let response = self
            .client
            .get(&self.query_url)
            .query(&query.params())
            .send()
            .map_err(|err| RegistrarError::CatalogUnavailable(err.to_string()))?;
        let response = Self::handle_status(response)?;
        let body = response
            .text()
            .map_err(|err| RegistrarError::CatalogUnavailable(err.to_string()))?;
        let records = parse_response(&body)?;
        debug!(filter = %query.filter, rows = records.len(), "catalog.response");
        Ok(records)
    }
}

/// Caller-side retry policy around any catalog client. Only faults classified
/// by [`RegistrarError::is_catalog_unavailable`] are retried.
pub struct RetryingCatalog<C> {
    inner: C,
    max_retries: usize,
    base_delay: Duration,
}

impl<C: CatalogClient> RetryingCatalog<C> {
    pub fn new(inner: C, max_retries: usize) -> Self {
        Self {
            inner,
            max_retries,
            base_delay: Duration::from_millis(200),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

impl<C: CatalogClient> CatalogClient for RetryingCatalog<C> {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError> {
        let mut attempt = 0usize;
        loop {
            match self.inner.query(query) {
                Err(err) if attempt < self.max_retries && err.is_catalog_unavailable() => {
                    attempt += 1;
                    warn!(attempt, error = %err, "catalog query failed, retrying");
                    thread::sleep(self.base_delay * attempt as u32);
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::FormatType;

    #[test]
    fn identifier_query_params() {
        let query = CatalogQuery::by_identifier("urn:uuid:abc");
        let params = query.params();
        assert_eq!(params[0], ("q", "identifier:\"urn:uuid:abc\"".to_string()));
        assert_eq!(
            params[1],
            ("fl", "identifier,formatType,formatId,resourceMap".to_string())
        );
        assert_eq!(params[2], ("rows", "1000".to_string()));
        assert_eq!(params[3], ("start", "0".to_string()));
        assert_eq!(params[4], ("wt", "json".to_string()));
    }

    #[test]
    fn resource_map_filter() {
        let query = CatalogQuery::by_resource_map("resource_map_x");
        assert_eq!(query.filter.to_string(), "resourceMap:\"resource_map_x\"");
        assert_eq!(
            query.fields.join(","),
            "identifier,formatType,title,size,formatId,fileName,documents"
        );
    }

    #[test]
    fn parse_empty_docs() {
        let body = r#"{"response":{"docs":[],"numFound":0,"start":0},"responseHeader":{"status":0}}"#;
        assert!(parse_response(body).unwrap().is_empty());
    }

    #[test]
    fn parse_rows_in_order() {
        let body = r#"{"response":{"docs":[
            {"identifier":"b","formatType":"DATA","fileName":"b.csv","size":2},
            {"identifier":"a","formatType":"METADATA","title":"A","size":1,"resourceMap":["rm"]}
        ],"numFound":2,"start":0}}"#;
        let rows = parse_response(body).unwrap();
        assert_eq!(rows[0].identifier, "b");
        assert_eq!(rows[0].format_type, FormatType::Data);
        assert_eq!(rows[1].resource_map_ids, vec!["rm".to_string()]);
    }

    #[test]
    fn malformed_body_is_unavailable() {
        assert_matches!(
            parse_response("<html>busy</html>"),
            Err(RegistrarError::CatalogUnavailable(_))
        );
        assert_matches!(
            parse_response(r#"{"responseHeader":{}}"#),
            Err(RegistrarError::CatalogUnavailable(_))
        );
    }

    struct Flaky {
        failures: Mutex<usize>,
        error_status: u16,
    }

    impl CatalogClient for Flaky {
        fn query(&self, _query: &CatalogQuery) -> Result<Vec<CatalogRecord>, RegistrarError> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(RegistrarError::CatalogStatus {
                    status: self.error_status,
                    message: "busy".to_string(),
                });
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn retrying_catalog_recovers_from_transient_status() {
        let flaky = Flaky {
            failures: Mutex::new(2),
            error_status: 503,
        };
        let catalog = RetryingCatalog::new(flaky, 3).with_base_delay(Duration::ZERO);
        assert!(catalog.query(&CatalogQuery::by_identifier("x")).unwrap().is_empty());
    }

    #[test]
    fn retrying_catalog_does_not_retry_client_errors() {
        let flaky = Flaky {
            failures: Mutex::new(1),
            error_status: 400,
        };
        let catalog = RetryingCatalog::new(flaky, 3).with_base_delay(Duration::ZERO);
        assert_matches!(
            catalog.query(&CatalogQuery::by_identifier("x")),
            Err(RegistrarError::CatalogStatus { status: 400, .. })
        );
    }
}
