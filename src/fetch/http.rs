use super::{FetchError, Fetcher};
use crate::config::{ApiKeys, EndpointSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Placeholder in endpoint URLs replaced by the API key
pub const API_KEY_PLACEHOLDER: &str = "{API_KEY}";

/// In-body API error codes worth retrying: rate limit, IP block, API
/// disabled, backend error.
pub const TRANSIENT_API_CODES: [i64; 4] = [5, 8, 9, 17];

static KEY_PARAM_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"key=[^&\s]+").unwrap());

/// Hide `key=` query values and the raw key itself.
pub fn mask_secrets(text: &str, secret: &str) -> String {
    let masked = KEY_PARAM_REGEX.replace_all(text, "key=***");
    if secret.is_empty() {
        masked.into_owned()
    } else {
        masked.replace(secret, "***")
    }
}

/// Fetches endpoint documents over HTTP with reqwest
pub struct HttpFetcher {
    client: reqwest::Client,
    api_keys: ApiKeys,
    request_timeout: Duration,
}

impl HttpFetcher {
    pub fn new(api_keys: ApiKeys, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tcdatalogger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpFetcher {
            client,
            api_keys,
            request_timeout,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, spec: &EndpointSpec) -> std::result::Result<Value, FetchError> {
        let key = self.api_keys.get(&spec.api_key).ok_or_else(|| {
            FetchError::Permanent(format!("API key `{}` is not configured", spec.api_key))
        })?;
        let url = spec.url.replace(API_KEY_PLACEHOLDER, key);
        let masked = mask_secrets(&url, key);
        info!(endpoint = %spec.name, url = %masked, "fetching");

        let response = self
            .client
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| classify(e, key))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {status} from {masked}");
            return Err(if is_transient_status(status) {
                FetchError::Transient(message)
            } else {
                FetchError::Permanent(message)
            });
        }

        let body = response.bytes().await.map_err(|e| classify(e, key))?;
        let document: Value = serde_json::from_slice(&body).map_err(|e| {
            FetchError::Permanent(format!("response from {masked} is not JSON: {e}"))
        })?;
        check_api_error(&document)?;

        debug!(endpoint = %spec.name, bytes = body.len(), "response received");
        Ok(document)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn classify(err: reqwest::Error, key: &str) -> FetchError {
    let permanent = err.is_builder() || err.is_decode() || err.is_redirect();
    let message = mask_secrets(&err.without_url().to_string(), key);
    if permanent {
        FetchError::Permanent(message)
    } else {
        FetchError::Transient(message)
    }
}

/// Map the API's `{"error": {"code": .., "error": ..}}` body to a fetch error.
fn check_api_error(document: &Value) -> std::result::Result<(), FetchError> {
    let Some(error) = document.get("error").and_then(Value::as_object) else {
        return Ok(());
    };
    let Some(code) = error.get("code").and_then(Value::as_i64) else {
        return Ok(());
    };
    let message = error
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let text = format!("API error {code}: {message}");
    if TRANSIENT_API_CODES.contains(&code) {
        Err(FetchError::Transient(text))
    } else {
        Err(FetchError::Permanent(text))
    }
}
