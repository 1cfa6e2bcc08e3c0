//! Application configuration: the endpoint list in `TC_API_config.json` and
//! the named API keys in `TC_API_key.json`.
//!
//! The config directory comes from an explicit path, then `TC_CONFIG_DIR`,
//! then the first existing entry of [`DEFAULT_CONFIG_DIRS`].

pub mod duration;
pub mod endpoint;

pub use duration::{format_duration, parse_iso_duration};
pub use endpoint::EndpointSpec;

use crate::error::{Error, Result};
use endpoint::RawEndpoint;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const API_CONFIG_FILE: &str = "TC_API_config.json";
pub const API_KEY_FILE: &str = "TC_API_key.json";
pub const CONFIG_DIR_ENV: &str = "TC_CONFIG_DIR";
pub const DEFAULT_CONFIG_DIRS: [&str; 4] = ["/mnt/config", "/app/config", "./config", "../config"];

pub const DEFAULT_PROJECT: &str = "local";
pub const DEFAULT_DATASET: &str = "torn";

/// Named API keys. Values never appear in `Debug` output.
#[derive(Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ApiKeys(HashMap<String, String>);

impl ApiKeys {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, String>> for ApiKeys {
    fn from(keys: HashMap<String, String>) -> Self {
        ApiKeys(keys)
    }
}

impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.0.keys().collect();
        names.sort();
        f.debug_map()
            .entries(names.into_iter().map(|name| (name, "***")))
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    dataset: Option<String>,
    endpoints: Vec<RawEndpoint>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub config_dir: Option<PathBuf>,
    pub project: String,
    pub dataset: String,
    pub endpoints: Vec<Arc<EndpointSpec>>,
    pub api_keys: ApiKeys,
}

impl AppConfig {
    /// Resolve the config directory and load both files from it.
    pub fn load(explicit_dir: Option<&Path>) -> Result<Self> {
        let dir = resolve_config_dir(explicit_dir)?;
        Self::from_dir(&dir)
    }

    pub fn from_dir(dir: &Path) -> Result<Self> {
        let api_config = read_file(&dir.join(API_CONFIG_FILE))?;
        let api_keys = read_file(&dir.join(API_KEY_FILE))?;
        let mut config = Self::from_json(&api_config, &api_keys)?;
        config.config_dir = Some(dir.to_path_buf());
        info!(
            config_dir = %dir.display(),
            endpoints = config.endpoints.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse the two config documents.
    pub fn from_json(api_config: &str, api_keys: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(api_config)
            .map_err(|e| Error::Config(format!("{API_CONFIG_FILE}: {e}")))?;
        let api_keys: ApiKeys = serde_json::from_str(api_keys)
            .map_err(|e| Error::Config(format!("{API_KEY_FILE}: {e}")))?;

        let project = raw.project.unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        let dataset = raw.dataset.unwrap_or_else(|| DEFAULT_DATASET.to_string());

        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(raw.endpoints.len());
        for raw_endpoint in raw.endpoints {
            let spec = raw_endpoint.into_spec(&project, &dataset)?;
            if !seen.insert(spec.name.clone()) {
                return Err(Error::Config(format!("duplicate endpoint `{}`", spec.name)));
            }
            if !api_keys.contains(&spec.api_key) {
                return Err(Error::Config(format!(
                    "endpoint `{}` uses unknown API key `{}`",
                    spec.name, spec.api_key
                )));
            }
            debug!(endpoint = %spec.name, table = %spec.table, mode = %spec.storage_mode, "endpoint configured");
            endpoints.push(Arc::new(spec));
        }
        check_table_overlap(&endpoints)?;

        Ok(AppConfig {
            config_dir: None,
            project,
            dataset,
            endpoints,
            api_keys,
        })
    }

    pub fn endpoint(&self, name: &str) -> Option<&Arc<EndpointSpec>> {
        self.endpoints.iter().find(|spec| spec.name == name)
    }

    /// Endpoints named in `names`, or all of them when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<EndpointSpec>>> {
        if names.is_empty() {
            return Ok(self.endpoints.clone());
        }
        names
            .iter()
            .map(|name| {
                self.endpoint(name)
                    .cloned()
                    .ok_or_else(|| Error::Config(format!("unknown endpoint `{name}`")))
            })
            .collect()
    }
}

/// Every endpoint must own its tables: no two endpoints may share a root
/// table, and no root table may be named like a child table of another
/// endpoint (`<root><separator>...`) in the same dataset.
fn check_table_overlap(endpoints: &[Arc<EndpointSpec>]) -> Result<()> {
    for (i, a) in endpoints.iter().enumerate() {
        for b in &endpoints[i + 1..] {
            if a.table.project != b.table.project || a.table.dataset != b.table.dataset {
                continue;
            }
            if a.table.table == b.table.table {
                return Err(Error::Config(format!(
                    "endpoints `{}` and `{}` both load table `{}`",
                    a.name, b.name, a.table
                )));
            }
            for (parent, other) in [(a, b), (b, a)] {
                let child_prefix = format!("{}{}", parent.table.table, parent.flatten.separator);
                if other.table.table.starts_with(&child_prefix) {
                    return Err(Error::Config(format!(
                        "table `{}` of endpoint `{}` overlaps the child tables of endpoint `{}`",
                        other.table, other.name, parent.name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Load a `.env` file from the working directory if present. Setting
/// `DOTENV_DISABLED=1` skips it.
pub fn load_dotenv() -> Result<()> {
    if matches!(
        std::env::var("DOTENV_DISABLED").ok().as_deref(),
        Some("true") | Some("1")
    ) {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(path) => {
            debug!(path = %path.display(), "loaded .env");
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(dotenvy::Error::LineParse(_, index)) => Err(Error::Config(format!(
            ".env has invalid syntax at position {index}"
        ))),
        Err(e) => Err(Error::Config(format!("failed to read .env: {e}"))),
    }
}

pub fn resolve_config_dir(explicit_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit_dir {
        return existing_dir(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return existing_dir(PathBuf::from(dir));
        }
    }
    DEFAULT_CONFIG_DIRS
        .iter()
        .map(PathBuf::from)
        .find(|dir| dir.is_dir())
        .ok_or_else(|| {
            Error::Config(format!(
                "no config directory found; set {CONFIG_DIR_ENV} or create one of {}",
                DEFAULT_CONFIG_DIRS.join(", ")
            ))
        })
}

fn existing_dir(dir: PathBuf) -> Result<PathBuf> {
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(Error::Config(format!(
            "config directory {} does not exist",
            dir.display()
        )))
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))
}
