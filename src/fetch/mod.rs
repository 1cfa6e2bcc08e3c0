//! Fetching endpoint documents.

pub mod http;

pub use http::{mask_secrets, HttpFetcher};

use crate::config::EndpointSpec;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Timeouts, connection failures, rate limits, server errors
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("fetch failed: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

/// Source of endpoint documents
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, spec: &EndpointSpec) -> Result<Value, FetchError>;
}
