//! Test data loading and merging
//!
//! KP edge documents and ARA config documents are fetched from their
//! locations, recognised by shape, normalized into [`TestEdge`] and
//! [`AraConfig`], and merged per resource.

use crate::edges::{normalize_infores, AraConfig, EdgeTestSet, SourceType, TestEdge, TransformKind};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};
use trapi::{Qualifier, TrapiClient, TrapiError, ValidationMessage, ValidationMessages};

/// Upper bound on edges taken from one resource
pub const MAX_EDGES_PER_RESOURCE: usize = 100;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("No test data locations declared for {resource}")]
    NoLocations { resource: String },

    #[error("Failed to fetch test data from {location}: {source}")]
    Fetch {
        location: String,
        #[source]
        source: TrapiError,
    },

    #[error("Failed to read test data file {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Test data at {location} is malformed: {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Test data at {location} is neither a KP edge document nor an ARA config document")]
    UnrecognizedShape { location: String },

    #[error("Test data at {location} is missing its 'infores' field")]
    MissingInfores { location: String },

    #[error("Test data at {location} is a {found} document, expected a {expected} document")]
    WrongKind {
        location: String,
        expected: &'static str,
        found: &'static str,
    },
}

pub type LoadResult<T> = Result<T, LoadError>;

/// Source of raw test data documents
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, location: &str) -> LoadResult<Value>;
}

/// Fetches `http(s)` locations through a [`TrapiClient`] and anything else
/// from the local filesystem
pub struct TestDataFetcher {
    client: Arc<dyn TrapiClient>,
}

impl TestDataFetcher {
    pub fn new(client: Arc<dyn TrapiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentFetcher for TestDataFetcher {
    async fn fetch(&self, location: &str) -> LoadResult<Value> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = rewrite_github_url(location);
            debug!("Fetching test data from {}", url);
            return self
                .client
                .fetch_json(&url)
                .await
                .map_err(|source| LoadError::Fetch {
                    location: location.to_string(),
                    source,
                });
        }

        let text = tokio::fs::read_to_string(location)
            .await
            .map_err(|source| LoadError::Io {
                location: location.to_string(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|source| LoadError::Parse {
            location: location.to_string(),
            source,
        })
    }
}

/// Point GitHub "blob" page URLs at the raw file content instead
pub fn rewrite_github_url(url: &str) -> String {
    match url.strip_prefix("https://github.com/") {
        Some(rest) => {
            let rest = rest.replacen("/blob/", "/", 1);
            format!("https://raw.githubusercontent.com/{}", rest)
        }
        None => url.to_string(),
    }
}

/// Subject and object identifiers in either naming generation
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawEndpoints {
    Current { subject_id: String, object_id: String },
    Deprecated { subject: String, object: String },
}

impl RawEndpoints {
    fn into_ids(self) -> (String, String) {
        match self {
            RawEndpoints::Current {
                subject_id,
                object_id,
            } => (subject_id, object_id),
            RawEndpoints::Deprecated { subject, object } => (subject, object),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawEdge {
    #[serde(flatten)]
    endpoints: RawEndpoints,
    subject_category: String,
    object_category: String,
    predicate: String,
    #[serde(default)]
    association: Option<String>,
    #[serde(default)]
    qualifiers: Vec<Qualifier>,
    #[serde(default)]
    exclude_tests: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawKpDocument {
    pub infores: String,
    #[serde(default)]
    source_type: Option<SourceType>,
    #[serde(default)]
    exclude_tests: Vec<String>,
    edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAraDocument {
    pub infores: String,
    #[serde(rename = "KPs")]
    kps: Vec<String>,
}

/// A test data document recognised by its shape
#[derive(Debug, Clone)]
pub enum TestDataDocument {
    Kp(RawKpDocument),
    Ara(RawAraDocument),
}

impl TestDataDocument {
    pub fn parse(location: &str, value: Value) -> LoadResult<Self> {
        let is_kp = value.get("edges").is_some();
        let is_ara = value.get("KPs").is_some();
        if !is_kp && !is_ara {
            return Err(LoadError::UnrecognizedShape {
                location: location.to_string(),
            });
        }

        let has_infores = value
            .get("infores")
            .and_then(Value::as_str)
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if !has_infores {
            return Err(LoadError::MissingInfores {
                location: location.to_string(),
            });
        }

        let parse_error = |source| LoadError::Parse {
            location: location.to_string(),
            source,
        };
        if is_kp {
            serde_json::from_value(value)
                .map(TestDataDocument::Kp)
                .map_err(parse_error)
        } else {
            serde_json::from_value(value)
                .map(TestDataDocument::Ara)
                .map_err(parse_error)
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            TestDataDocument::Kp(_) => "KP",
            TestDataDocument::Ara(_) => "ARA",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Keep only the first edge of each resource
    pub single_edge: bool,
    pub max_edges: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            single_edge: false,
            max_edges: MAX_EDGES_PER_RESOURCE,
        }
    }
}

pub struct TestDataLoader {
    fetcher: Arc<dyn DocumentFetcher>,
    options: LoadOptions,
}

impl TestDataLoader {
    pub fn new(fetcher: Arc<dyn DocumentFetcher>) -> Self {
        Self {
            fetcher,
            options: LoadOptions::default(),
        }
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    async fn fetch_documents(
        &self,
        resource: &str,
        locations: &[String],
    ) -> LoadResult<Vec<(String, TestDataDocument)>> {
        if locations.is_empty() {
            return Err(LoadError::NoLocations {
                resource: resource.to_string(),
            });
        }

        let mut documents = Vec::with_capacity(locations.len());
        for location in locations {
            let value = self.fetcher.fetch(location).await?;
            let document = TestDataDocument::parse(location, value)?;
            documents.push((location.clone(), document));
        }
        Ok(documents)
    }

    /// Merge every KP edge document of `resource` into one edge set
    pub async fn load_kp(&self, resource: &str, locations: &[String]) -> LoadResult<EdgeTestSet> {
        let documents = self.fetch_documents(resource, locations).await?;

        let mut kp_documents = Vec::with_capacity(documents.len());
        for (location, document) in documents {
            match document {
                TestDataDocument::Kp(doc) => kp_documents.push((location, doc)),
                other => {
                    return Err(LoadError::WrongKind {
                        location,
                        expected: "KP",
                        found: other.kind(),
                    })
                }
            }
        }

        let mut set = EdgeTestSet::new(resource);
        for (location, doc) in &kp_documents {
            check_infores(resource, location, &doc.infores);
            set.exclude_tests
                .extend(parse_exclusions(location, &doc.exclude_tests));
        }
        if let Some(source_type) = kp_documents.iter().find_map(|(_, doc)| doc.source_type) {
            set.source_type = source_type;
        }

        let limit = if self.options.single_edge {
            1
        } else {
            self.options.max_edges
        };

        'documents: for (location, doc) in kp_documents {
            for raw in doc.edges {
                if set.edges.len() >= limit {
                    if !self.options.single_edge {
                        warn!(
                            "{}: test data truncated to the first {} edges",
                            resource, limit
                        );
                    }
                    break 'documents;
                }
                let edge = normalize_edge(set.edges.len(), &location, raw, &set.exclude_tests);
                if edge.is_noncompliant() {
                    warn!(
                        "{}: edge {} ({}) failed input validation",
                        resource,
                        edge.idx,
                        edge.triple()
                    );
                }
                set.edges.push(edge);
            }
        }

        info!(
            "Loaded {} test edge(s) for KP {} from {} location(s)",
            set.edges.len(),
            resource,
            locations.len()
        );
        Ok(set)
    }

    /// Merge every ARA config document of `resource`
    pub async fn load_ara(&self, resource: &str, locations: &[String]) -> LoadResult<AraConfig> {
        let documents = self.fetch_documents(resource, locations).await?;

        let mut kps: Vec<String> = Vec::new();
        for (location, document) in documents {
            match document {
                TestDataDocument::Ara(doc) => {
                    check_infores(resource, &location, &doc.infores);
                    kps.extend(doc.kps);
                }
                other => {
                    return Err(LoadError::WrongKind {
                        location,
                        expected: "ARA",
                        found: other.kind(),
                    })
                }
            }
        }

        let config = AraConfig::new(resource, kps);
        info!(
            "Loaded ARA {} declaring {} KP(s)",
            config.infores,
            config.kps.len()
        );
        Ok(config)
    }
}

fn check_infores(resource: &str, location: &str, declared: &str) {
    let declared = normalize_infores(declared);
    if declared != normalize_infores(resource) {
        warn!(
            "Test data at {} declares infores '{}' but is listed for '{}'",
            location, declared, resource
        );
    }
}

fn parse_exclusions(location: &str, codes: &[String]) -> BTreeSet<TransformKind> {
    codes
        .iter()
        .filter_map(|code| {
            let kind = TransformKind::from_code(code);
            if kind.is_none() {
                warn!("{}: ignoring unknown excluded test code '{}'", location, code);
            }
            kind
        })
        .collect()
}

fn normalize_edge(
    idx: usize,
    location: &str,
    raw: RawEdge,
    set_exclusions: &BTreeSet<TransformKind>,
) -> TestEdge {
    let (subject_id, object_id) = raw.endpoints.into_ids();

    let mut exclude_tests = parse_exclusions(location, &raw.exclude_tests);
    exclude_tests.extend(set_exclusions.iter().copied());

    let mut edge = TestEdge {
        idx,
        subject_id,
        subject_category: raw.subject_category,
        predicate: raw.predicate,
        object_id,
        object_category: raw.object_category,
        association: raw.association,
        qualifiers: raw.qualifiers,
        exclude_tests,
        location: location.to_string(),
        pre_validation: ValidationMessages::new(),
    };
    edge.pre_validation = pre_validate(&edge);
    edge
}

fn curie_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*:\S+$").ok())
        .as_ref()
}

fn biolink_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^biolink:[A-Za-z][A-Za-z0-9_]*$").ok())
        .as_ref()
}

fn matches(pattern: Option<&Regex>, value: &str) -> bool {
    pattern.map(|re| re.is_match(value)).unwrap_or(false)
}

/// Syntactic checks on a curated edge before any query is built
pub fn pre_validate(edge: &TestEdge) -> ValidationMessages {
    let mut messages = ValidationMessages::new();

    for (field, value) in [("subject_id", &edge.subject_id), ("object_id", &edge.object_id)] {
        if !matches(curie_pattern(), value) {
            messages.report(
                ValidationMessage::new("error.input_edge.node.id.not_curie")
                    .with_context("field", field)
                    .with_context("value", value.as_str()),
            );
        }
    }

    for (field, value) in [
        ("subject_category", &edge.subject_category),
        ("object_category", &edge.object_category),
    ] {
        if !matches(biolink_pattern(), value) {
            messages.report(
                ValidationMessage::new("error.input_edge.node.category.not_biolink")
                    .with_context("field", field)
                    .with_context("value", value.as_str()),
            );
        }
    }

    if !matches(biolink_pattern(), &edge.predicate) {
        messages.report(
            ValidationMessage::new("error.input_edge.predicate.not_biolink")
                .with_context("value", edge.predicate.as_str()),
        );
    }

    for qualifier in &edge.qualifiers {
        if !matches(biolink_pattern(), &qualifier.qualifier_type_id) {
            messages.report(
                ValidationMessage::new("error.input_edge.qualifier.type_id.not_biolink")
                    .with_context("value", qualifier.qualifier_type_id.as_str()),
            );
        }
    }

    if let Some(association) = &edge.association {
        if !matches(biolink_pattern(), association) {
            messages.report(
                ValidationMessage::new("warning.input_edge.association.not_biolink")
                    .with_context("value", association.as_str()),
            );
        }
    }

    messages
}
