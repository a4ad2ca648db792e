use crate::edges::normalize_infores;
use crate::registry::Environment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use trapi::SemVer;

pub const DEFAULT_REGISTRY_URL: &str = "https://smart-api.info/api/query?q=__all__&tags=%22trapi%22&fields=servers,info,_meta,_status,paths,tags,openapi,swagger&size=1000&from=0";
pub const DEFAULT_ONTOLOGY_KP_URL: &str = "https://ontology-kp.apps.renci.org";

/// Sentinel ARA filter value that disables ARA testing
pub const SKIP_SENTINEL: &str = "SKIP";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid resource filter pattern '{pattern}': {message}")]
    InvalidFilter { pattern: String, message: String },

    #[error("Invalid {field} '{value}': expected a semantic version")]
    InvalidVersion { field: &'static str, value: String },

    #[error("Unknown environment '{0}': expected production, staging, testing or development")]
    InvalidEnvironment(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// One entry of a [`ResourceFilter`]
#[derive(Debug, Clone)]
pub enum FilterPattern {
    Exact(String),
    Glob(glob::Pattern),
}

impl FilterPattern {
    fn matches(&self, infores: &str) -> bool {
        match self {
            FilterPattern::Exact(id) => id == infores,
            FilterPattern::Glob(pattern) => pattern.matches(infores),
        }
    }
}

/// Selection of resources by infores: exact ids, comma lists and `*` globs
#[derive(Debug, Clone, Default)]
pub enum ResourceFilter {
    #[default]
    All,
    /// Select nothing
    Skip,
    Patterns(Vec<FilterPattern>),
}

impl ResourceFilter {
    pub fn matches(&self, infores: &str) -> bool {
        let infores = normalize_infores(infores);
        match self {
            ResourceFilter::All => true,
            ResourceFilter::Skip => false,
            ResourceFilter::Patterns(patterns) => patterns.iter().any(|p| p.matches(&infores)),
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, ResourceFilter::Skip)
    }
}

impl FromStr for ResourceFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(ResourceFilter::All);
        }
        if s == SKIP_SENTINEL {
            return Ok(ResourceFilter::Skip);
        }

        let mut patterns = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let part = normalize_infores(part);
            if part.contains(['*', '?', '[']) {
                let pattern =
                    glob::Pattern::new(&part).map_err(|e| ConfigError::InvalidFilter {
                        pattern: part.clone(),
                        message: e.to_string(),
                    })?;
                patterns.push(FilterPattern::Glob(pattern));
            } else {
                patterns.push(FilterPattern::Exact(part));
            }
        }

        if patterns.is_empty() {
            Ok(ResourceFilter::All)
        } else {
            Ok(ResourceFilter::Patterns(patterns))
        }
    }
}

/// Which Biolink Model release queries and validation target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ModelVersion {
    /// Whatever each resource declares in the registry
    #[default]
    Registry,
    Pinned(String),
    /// Skip model validation entirely
    Suppressed,
}

impl FromStr for ModelVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(ModelVersion::Registry);
        }
        if s.eq_ignore_ascii_case("suppress") {
            return Ok(ModelVersion::Suppressed);
        }
        s.parse::<SemVer>()
            .map_err(|_| ConfigError::InvalidVersion {
                field: "Biolink Model version",
                value: s.to_string(),
            })?;
        Ok(ModelVersion::Pinned(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryLocation {
    Url(String),
    File(PathBuf),
}

impl Default for RegistryLocation {
    fn default() -> Self {
        RegistryLocation::Url(DEFAULT_REGISTRY_URL.to_string())
    }
}

/// Settings of a single test run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub run_id: String,
    /// Caller override of the TRAPI schema version
    pub trapi_version: Option<String>,
    pub biolink_version: ModelVersion,
    pub kp_filter: ResourceFilter,
    pub ara_filter: ResourceFilter,
    /// Caller-selected environment, if any
    pub environment: Option<Environment>,
    pub single_edge: bool,
    /// Cap on concurrent TRAPI queries across the whole run
    pub max_in_flight: usize,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub run_timeout: Option<Duration>,
    pub registry: RegistryLocation,
    /// Ontology KP used for entity ancestry; `None` disables RSE/ROE
    pub ontology_kp_url: Option<String>,
    /// Alternative Biolink Model hierarchy file
    pub biolink_model_path: Option<PathBuf>,
    pub report_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            run_id: default_run_id(),
            trapi_version: None,
            biolink_version: ModelVersion::default(),
            kp_filter: ResourceFilter::All,
            ara_filter: ResourceFilter::All,
            environment: None,
            single_edge: false,
            max_in_flight: 8,
            request_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
            run_timeout: None,
            registry: RegistryLocation::default(),
            ontology_kp_url: Some(DEFAULT_ONTOLOGY_KP_URL.to_string()),
            biolink_model_path: None,
            report_dir: PathBuf::from("reports"),
        }
    }
}

/// Run identifier derived from the local wall clock
pub fn default_run_id() -> String {
    chrono::Local::now().format("%F_%H-%M-%S").to_string()
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn with_trapi_version(mut self, version: impl Into<String>) -> Self {
        self.trapi_version = Some(version.into());
        self
    }

    pub fn with_biolink_version(mut self, version: ModelVersion) -> Self {
        self.biolink_version = version;
        self
    }

    pub fn with_kp_filter(mut self, filter: ResourceFilter) -> Self {
        self.kp_filter = filter;
        self
    }

    pub fn with_ara_filter(mut self, filter: ResourceFilter) -> Self {
        self.ara_filter = filter;
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_single_edge(mut self, single_edge: bool) -> Self {
        self.single_edge = single_edge;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    pub fn with_registry(mut self, registry: RegistryLocation) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_ontology_kp_url(mut self, url: Option<String>) -> Self {
        self.ontology_kp_url = url;
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| ConfigError::Invalid {
            message: message.to_string(),
        };

        if self.run_id.trim().is_empty() {
            return Err(invalid("Run id cannot be empty"));
        }
        if self.run_id.contains(['/', '\\']) {
            return Err(invalid("Run id cannot contain path separators"));
        }
        if self.run_id == "." || self.run_id == ".." {
            return Err(invalid("Run id cannot be a relative directory"));
        }

        if let Some(version) = &self.trapi_version {
            version
                .parse::<SemVer>()
                .map_err(|_| ConfigError::InvalidVersion {
                    field: "TRAPI version",
                    value: version.clone(),
                })?;
        }

        if self.max_in_flight == 0 {
            return Err(invalid("Concurrency limit must be greater than 0"));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("Request timeout must be greater than 0"));
        }
        if self.probe_timeout.is_zero() {
            return Err(invalid("Probe timeout must be greater than 0"));
        }
        if matches!(self.run_timeout, Some(t) if t.is_zero()) {
            return Err(invalid("Run timeout must be greater than 0"));
        }

        if let RegistryLocation::Url(url) = &self.registry {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(invalid("Registry URL must start with http:// or https://"));
            }
        }

        Ok(())
    }
}

/// On-disk TOML form of [`RunConfig`]; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub run_id: Option<String>,
    pub trapi_version: Option<String>,
    pub biolink_version: Option<String>,
    pub kp_id: Option<String>,
    pub ara_id: Option<String>,
    pub environment: Option<String>,
    pub one: Option<bool>,
    pub max_in_flight: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub probe_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub registry_url: Option<String>,
    pub registry_file: Option<PathBuf>,
    pub ontology_kp_url: Option<String>,
    pub no_ontology_kp: Option<bool>,
    pub biolink_model: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Layer `top` over `self`, field by field
    pub fn overlay(self, top: ConfigFile) -> ConfigFile {
        ConfigFile {
            run_id: top.run_id.or(self.run_id),
            trapi_version: top.trapi_version.or(self.trapi_version),
            biolink_version: top.biolink_version.or(self.biolink_version),
            kp_id: top.kp_id.or(self.kp_id),
            ara_id: top.ara_id.or(self.ara_id),
            environment: top.environment.or(self.environment),
            one: top.one.or(self.one),
            max_in_flight: top.max_in_flight.or(self.max_in_flight),
            request_timeout_secs: top.request_timeout_secs.or(self.request_timeout_secs),
            probe_timeout_secs: top.probe_timeout_secs.or(self.probe_timeout_secs),
            run_timeout_secs: top.run_timeout_secs.or(self.run_timeout_secs),
            registry_url: top.registry_url.or(self.registry_url),
            registry_file: top.registry_file.or(self.registry_file),
            ontology_kp_url: top.ontology_kp_url.or(self.ontology_kp_url),
            no_ontology_kp: top.no_ontology_kp.or(self.no_ontology_kp),
            biolink_model: top.biolink_model.or(self.biolink_model),
            report_dir: top.report_dir.or(self.report_dir),
        }
    }
}

impl TryFrom<ConfigFile> for RunConfig {
    type Error = ConfigError;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let mut config = RunConfig::default();

        if let Some(run_id) = file.run_id {
            config.run_id = run_id;
        }
        config.trapi_version = file.trapi_version.filter(|v| !v.trim().is_empty());
        if let Some(version) = file.biolink_version {
            config.biolink_version = version.parse()?;
        }
        if let Some(kp_id) = file.kp_id {
            config.kp_filter = kp_id.parse()?;
        }
        if let Some(ara_id) = file.ara_id {
            config.ara_filter = ara_id.parse()?;
        }
        if let Some(environment) = file.environment {
            config.environment = Some(
                environment
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnvironment(environment.clone()))?,
            );
        }
        config.single_edge = file.one.unwrap_or(false);
        if let Some(limit) = file.max_in_flight {
            config.max_in_flight = limit;
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.probe_timeout_secs {
            config.probe_timeout = Duration::from_secs(secs);
        }
        config.run_timeout = file.run_timeout_secs.map(Duration::from_secs);

        config.registry = match (file.registry_file, file.registry_url) {
            (Some(path), _) => RegistryLocation::File(path),
            (None, Some(url)) => RegistryLocation::Url(url),
            (None, None) => RegistryLocation::default(),
        };

        if file.no_ontology_kp.unwrap_or(false) {
            config.ontology_kp_url = None;
        } else if let Some(url) = file.ontology_kp_url {
            config.ontology_kp_url = Some(url);
        }
        config.biolink_model_path = file.biolink_model;
        if let Some(dir) = file.report_dir {
            config.report_dir = dir;
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_filter_forms() {
        let all: ResourceFilter = "".parse().unwrap();
        assert!(all.matches("anything"));

        let skip: ResourceFilter = "SKIP".parse().unwrap();
        assert!(skip.is_skip());
        assert!(!skip.matches("arax"));

        let exact: ResourceFilter = "molepro".parse().unwrap();
        assert!(exact.matches("molepro"));
        assert!(exact.matches("infores:molepro"));
        assert!(!exact.matches("molepro-2"));

        let list: ResourceFilter = "molepro, infores:rtx-kg2".parse().unwrap();
        assert!(list.matches("rtx-kg2"));
        assert!(list.matches("molepro"));
        assert!(!list.matches("cohd"));

        let glob: ResourceFilter = "automat-*,*-kg".parse().unwrap();
        assert!(glob.matches("automat-hetio"));
        assert!(glob.matches("sri-reference-kg"));
        assert!(!glob.matches("molepro"));
    }

    #[test]
    fn test_model_version_parsing() {
        assert_eq!("".parse::<ModelVersion>().unwrap(), ModelVersion::Registry);
        assert_eq!("suppress".parse::<ModelVersion>().unwrap(), ModelVersion::Suppressed);
        assert_eq!(
            "3.1.2".parse::<ModelVersion>().unwrap(),
            ModelVersion::Pinned("3.1.2".to_string())
        );
        assert!("latest".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_in_flight, 8);
        assert!(config.environment.is_none());
        assert_eq!(config.registry, RegistryLocation::default());
    }

    #[test]
    fn test_config_validation() {
        assert!(RunConfig::new().with_run_id("").validate().is_err());
        assert!(RunConfig::new().with_run_id("a/b").validate().is_err());
        assert!(RunConfig::new().with_run_id("../x").validate().is_err());
        assert!(RunConfig::new().with_run_id("..").validate().is_err());
        assert!(RunConfig::new().with_run_id("a\\b").validate().is_err());
        assert!(RunConfig::new().with_trapi_version("one").validate().is_err());
        assert!(RunConfig::new().with_max_in_flight(0).validate().is_err());
        assert!(RunConfig::new()
            .with_request_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RunConfig::new()
            .with_registry(RegistryLocation::Url("smart-api.info".to_string()))
            .validate()
            .is_err());
        assert!(RunConfig::new()
            .with_trapi_version("1.4.0")
            .with_run_timeout(Duration::from_secs(600))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_toml_overlay() {
        let file: ConfigFile = toml::from_str(
            r#"
            kp_id = "molepro"
            ara_id = "SKIP"
            environment = "staging"
            request_timeout_secs = 30
            registry_file = "registry.json"
            "#,
        )
        .unwrap();

        let cli = ConfigFile {
            kp_id: Some("rtx-kg2".to_string()),
            biolink_version: Some("suppress".to_string()),
            one: Some(true),
            ..ConfigFile::default()
        };

        let config = RunConfig::try_from(file.overlay(cli)).unwrap();
        assert!(config.kp_filter.matches("rtx-kg2"));
        assert!(!config.kp_filter.matches("molepro"));
        assert!(config.ara_filter.is_skip());
        assert_eq!(config.environment, Some(Environment::Staging));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.biolink_version, ModelVersion::Suppressed);
        assert!(config.single_edge);
        assert_eq!(config.registry, RegistryLocation::File(PathBuf::from("registry.json")));
    }

    #[test]
    fn test_config_file_rejects_bad_values() {
        let bad_env = ConfigFile {
            environment: Some("prod".to_string()),
            ..ConfigFile::default()
        };
        assert!(matches!(
            RunConfig::try_from(bad_env),
            Err(ConfigError::InvalidEnvironment(_))
        ));

        assert!(toml::from_str::<ConfigFile>("unknown_key = 1").is_err());
    }
}
