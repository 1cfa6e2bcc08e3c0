use super::duration::parse_iso_duration;
use crate::error::Result;
use crate::flatten::FlattenConfig;
use crate::load::RetryPolicy;
use crate::table::{StorageMode, TableRef};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(15 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_API_KEY: &str = "default";

/// One configured API endpoint and where its rows go
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointSpec {
    pub name: String,
    /// URL template; `{API_KEY}` is substituted at fetch time
    pub url: String,
    pub table: TableRef,
    pub storage_mode: StorageMode,
    pub frequency: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Name of the key in the API key file
    pub api_key: String,
    pub flatten: FlattenConfig,
}

impl EndpointSpec {
    pub fn new(name: impl Into<String>, url: impl Into<String>, table: TableRef) -> Self {
        EndpointSpec {
            name: name.into(),
            url: url.into(),
            table,
            storage_mode: StorageMode::Append,
            frequency: DEFAULT_FREQUENCY,
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            api_key: DEFAULT_API_KEY.to_string(),
            flatten: FlattenConfig::default(),
        }
    }

    pub fn with_storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_flatten(mut self, flatten: FlattenConfig) -> Self {
        self.flatten = flatten;
        self
    }
}

/// Endpoint entry as written in `TC_API_config.json`
#[derive(Debug, Deserialize)]
pub(crate) struct RawEndpoint {
    name: String,
    url: String,
    table: String,
    #[serde(default)]
    frequency: Option<String>,
    #[serde(default)]
    storage_mode: Option<StorageMode>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    retry: Option<RetryPolicy>,
    #[serde(default)]
    timestamp_fields: Vec<String>,
    #[serde(default)]
    keyed_collections: Vec<String>,
    #[serde(default)]
    separator: Option<String>,
    #[serde(default)]
    list_delimiter: Option<String>,
    #[serde(default)]
    collection_key_column: Option<String>,
}

impl RawEndpoint {
    pub(crate) fn into_spec(self, project: &str, dataset: &str) -> Result<EndpointSpec> {
        let table = TableRef::parse_with_defaults(&self.table, project, dataset)?;
        let frequency = match &self.frequency {
            Some(text) => parse_iso_duration(text)?,
            None => DEFAULT_FREQUENCY,
        };
        let timeout = match &self.timeout {
            Some(text) => parse_iso_duration(text)?,
            None => DEFAULT_TIMEOUT,
        };

        let defaults = FlattenConfig::default();
        let flatten = FlattenConfig {
            separator: self.separator.unwrap_or(defaults.separator),
            list_delimiter: self.list_delimiter.unwrap_or(defaults.list_delimiter),
            timestamp_fields: self.timestamp_fields,
            keyed_collections: self.keyed_collections,
            collection_key_column: self
                .collection_key_column
                .unwrap_or(defaults.collection_key_column),
            ..defaults
        };

        Ok(EndpointSpec {
            name: self.name,
            url: self.url,
            table,
            storage_mode: self.storage_mode.unwrap_or_default(),
            frequency,
            timeout,
            retry: self.retry.unwrap_or_default(),
            api_key: self.api_key.unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
            flatten,
        })
    }
}
