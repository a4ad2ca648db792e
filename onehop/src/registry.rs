//! Registry access
//!
//! Reads SmartAPI-style registry listings into [`RegistryEntry`] values:
//! infores, component type, declared TRAPI/Biolink versions, servers grouped
//! by `x-maturity`, and test data locations.

use crate::config::ResourceFilter;
use crate::edges::normalize_infores;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use trapi::version::clamp_biolink_version;
use trapi::{TrapiClient, TrapiError};

/// Registry ids that are never tested
const IGNORED_RESOURCES: &[&str] = &["empty"];

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry at {url} is unavailable: {source}")]
    Unavailable {
        url: String,
        #[source]
        source: TrapiError,
    },

    #[error("Failed to read registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry document is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Registry document is malformed: {message}")]
    Malformed { message: String },
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    #[serde(rename = "KP")]
    Kp,
    #[serde(rename = "ARA")]
    Ara,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Kp => "KP",
            Component::Ara => "ARA",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment tier (`x-maturity`) of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
    Testing,
    Development,
}

impl Environment {
    /// Selection order when the caller does not name an environment
    pub const PRECEDENCE: [Environment; 4] = [
        Environment::Production,
        Environment::Staging,
        Environment::Testing,
        Environment::Development,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Testing => "testing",
            Environment::Development => "development",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::PRECEDENCE
            .into_iter()
            .find(|env| env.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("Unknown environment: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub url: String,
    pub environment: Environment,
}

/// Where a resource's test data lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestDataLocation {
    /// Same documents for every environment
    Urls(Vec<String>),
    ByEnvironment {
        default: Option<Vec<String>>,
        environments: BTreeMap<Environment, Vec<String>>,
    },
}

impl TestDataLocation {
    /// Documents usable in `environment`: environment-specific, else `default`
    pub fn for_environment(&self, environment: Environment) -> Option<&[String]> {
        let urls = match self {
            TestDataLocation::Urls(urls) => Some(urls.as_slice()),
            TestDataLocation::ByEnvironment {
                default,
                environments,
            } => environments
                .get(&environment)
                .or(default.as_ref())
                .map(Vec::as_slice),
        };
        urls.filter(|urls| !urls.is_empty())
    }

    /// Test data named for `environment` itself rather than inherited from `default`
    pub fn is_specific_to(&self, environment: Environment) -> bool {
        match self {
            TestDataLocation::Urls(urls) => !urls.is_empty(),
            TestDataLocation::ByEnvironment { environments, .. } => environments
                .get(&environment)
                .map(|urls| !urls.is_empty())
                .unwrap_or(false),
        }
    }

    fn parse(value: &Value) -> Option<TestDataLocation> {
        match value {
            Value::String(_) | Value::Array(_) => {
                Some(TestDataLocation::Urls(url_list(value)?))
            }
            Value::Object(map) => {
                let mut default = None;
                let mut environments = BTreeMap::new();
                for (key, entry) in map {
                    // `{ "url": ... }` objects or bare URL values
                    let urls = match entry.get("url") {
                        Some(url) => url_list(url),
                        None => url_list(entry),
                    };
                    let Some(urls) = urls else {
                        warn!("Invalid test data location entry for '{}'", key);
                        continue;
                    };
                    if key == "default" {
                        default = Some(urls);
                    } else if let Ok(environment) = key.parse::<Environment>() {
                        environments.insert(environment, urls);
                    } else {
                        warn!("Unknown x-maturity value in test data location: {}", key);
                    }
                }
                if default.is_none() && environments.is_empty() {
                    None
                } else {
                    Some(TestDataLocation::ByEnvironment {
                        default,
                        environments,
                    })
                }
            }
            _ => None,
        }
    }
}

fn url_list(value: &Value) -> Option<Vec<String>> {
    let urls: Vec<String> = match value {
        Value::String(url) => vec![url.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return None,
    };
    let urls: Vec<String> = urls
        .into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .collect();
    if urls.is_empty() {
        None
    } else {
        Some(urls)
    }
}

/// One testable registry listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub infores: String,
    pub title: String,
    pub component: Component,
    pub trapi_version: Option<String>,
    pub biolink_version: Option<String>,
    pub servers: Vec<ServerEntry>,
    pub test_data: TestDataLocation,
}

impl RegistryEntry {
    /// Server URLs declared for `environment`, in registry order
    pub fn servers_in(&self, environment: Environment) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|s| s.environment == environment)
            .map(|s| s.url.as_str())
            .collect()
    }

    pub fn declares(&self, environment: Environment) -> bool {
        self.servers.iter().any(|s| s.environment == environment)
    }
}

/// Walk a dotted tag path (`info.x-translator.infores`) into a JSON document
fn tag_value<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |node, tag| node.get(tag))
}

fn tag_str<'a>(data: &'a Value, path: &str) -> Option<&'a str> {
    tag_value(data, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_hit(index: usize, hit: &Value) -> Option<RegistryEntry> {
    let component = match tag_str(hit, "info.x-translator.component") {
        Some("KP") => Component::Kp,
        Some("ARA") => Component::Ara,
        _ => return None,
    };

    let title = tag_str(hit, "info.title").unwrap_or_default().to_string();

    let Some(infores) = tag_str(hit, "info.x-translator.infores").map(normalize_infores) else {
        warn!("Registry entry {} ('{}') has no infores; skipped", index, title);
        return None;
    };
    if IGNORED_RESOURCES.contains(&infores.as_str()) {
        debug!("Registry entry '{}' is ignored", infores);
        return None;
    }

    let Some(test_data) =
        tag_value(hit, "info.x-trapi.test_data_location").and_then(TestDataLocation::parse)
    else {
        warn!("Registry entry '{}' has no usable test_data_location; skipped", infores);
        return None;
    };

    let servers: Vec<ServerEntry> = hit
        .get("servers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|server| {
            let url = server.get("url")?.as_str()?.trim_end_matches('/').to_string();
            let environment = server.get("x-maturity")?.as_str()?.parse().ok()?;
            Some(ServerEntry { url, environment })
        })
        .collect();
    if servers.is_empty() {
        warn!("Registry entry '{}' lacks usable servers; skipped", infores);
        return None;
    }

    Some(RegistryEntry {
        infores,
        title,
        component,
        trapi_version: tag_str(hit, "info.x-trapi.version").map(str::to_string),
        biolink_version: tag_str(hit, "info.x-translator.biolink-version").map(clamp_biolink_version),
        servers,
        test_data,
    })
}

/// Parse a registry listing (`{"hits": [...]}`) into testable entries.
///
/// Entries repeating an earlier (infores, TRAPI version, Biolink version)
/// triple are dropped.
pub fn parse_registry(document: &Value) -> RegistryResult<Vec<RegistryEntry>> {
    let hits = document
        .get("hits")
        .and_then(Value::as_array)
        .ok_or_else(|| RegistryError::Malformed {
            message: "missing 'hits' array".to_string(),
        })?;

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for (index, hit) in hits.iter().enumerate() {
        let Some(entry) = parse_hit(index, hit) else {
            continue;
        };
        let key = (
            entry.infores.clone(),
            entry.trapi_version.clone(),
            entry.biolink_version.clone(),
        );
        if !seen.insert(key) {
            debug!("Duplicate registry entry for '{}' ignored", entry.infores);
            continue;
        }
        entries.push(entry);
    }

    info!("Registry lists {} testable resource(s)", entries.len());
    Ok(entries)
}

/// Entries of one component type accepted by `filter`, one per infores
pub fn select_resources<'a>(
    entries: &'a [RegistryEntry],
    component: Component,
    filter: &ResourceFilter,
) -> Vec<&'a RegistryEntry> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for entry in entries {
        if entry.component != component || !filter.matches(&entry.infores) {
            continue;
        }
        if !seen.insert(entry.infores.as_str()) {
            warn!(
                "{} '{}' is listed more than once; using the first listing",
                component, entry.infores
            );
            continue;
        }
        selected.push(entry);
    }
    selected
}

#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn entries(&self) -> RegistryResult<Vec<RegistryEntry>>;

    fn source_name(&self) -> String;
}

/// Live SmartAPI registry query
pub struct SmartApiRegistry {
    client: Arc<dyn TrapiClient>,
    url: String,
}

impl SmartApiRegistry {
    pub fn new(client: Arc<dyn TrapiClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl RegistrySource for SmartApiRegistry {
    async fn entries(&self) -> RegistryResult<Vec<RegistryEntry>> {
        let document = self
            .client
            .fetch_json(&self.url)
            .await
            .map_err(|source| RegistryError::Unavailable {
                url: self.url.clone(),
                source,
            })?;
        parse_registry(&document)
    }

    fn source_name(&self) -> String {
        self.url.clone()
    }
}

/// Registry snapshot stored in a local JSON file
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RegistrySource for FileRegistry {
    async fn entries(&self) -> RegistryResult<Vec<RegistryEntry>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;
        let document: Value = serde_json::from_str(&text)?;
        parse_registry(&document)
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory registry document
pub struct StaticRegistry {
    document: Value,
}

impl StaticRegistry {
    pub fn new(document: Value) -> Self {
        Self { document }
    }
}

#[async_trait]
impl RegistrySource for StaticRegistry {
    async fn entries(&self) -> RegistryResult<Vec<RegistryEntry>> {
        parse_registry(&self.document)
    }

    fn source_name(&self) -> String {
        "static".to_string()
    }
}
