use crate::edges::{TestEdge, TransformKind};
use crate::registry::{Component, Environment};
use crate::transforms::Inapplicable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use trapi::{HttpResponse, Query, Severity, ValidationMessages};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Why a variant did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Resolution,
    Transport,
    Compliance,
    Recovery,
    Provenance,
}

/// The tested resource, or for ARAs the ARA→KP pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub component: Component,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kp: Option<String>,
}

impl ResourceKey {
    pub fn kp(infores: impl Into<String>) -> Self {
        Self {
            component: Component::Kp,
            resource: infores.into(),
            kp: None,
        }
    }

    pub fn ara(ara: impl Into<String>, kp: impl Into<String>) -> Self {
        Self {
            component: Component::Ara,
            resource: ara.into(),
            kp: Some(kp.into()),
        }
    }

    /// The KP whose test edges are being exercised
    pub fn edge_source(&self) -> &str {
        self.kp.as_deref().unwrap_or(&self.resource)
    }

    /// Report directory of this key, relative to the run directory
    pub fn details_dir(&self) -> PathBuf {
        let mut dir = PathBuf::from(self.component.as_str()).join(&self.resource);
        if let Some(kp) = &self.kp {
            dir.push(kp);
        }
        dir
    }

    /// `KP/<kp>/<kp>-<idx>` or `ARA/<ara>/<kp>/<kp>-<idx>`
    pub fn edge_details_key(&self, idx: usize) -> PathBuf {
        self.details_dir()
            .join(format!("{}-{}", self.edge_source(), idx))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kp {
            Some(kp) => write!(f, "{} {}/{}", self.component, self.resource, kp),
            None => write!(f, "{} {}", self.component, self.resource),
        }
    }
}

/// Identity of one execution: resource, edge ordinal and variant kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultKey {
    pub resource: ResourceKey,
    pub edge_idx: usize,
    pub kind: TransformKind,
}

impl ResultKey {
    pub fn new(resource: ResourceKey, edge_idx: usize, kind: TransformKind) -> Self {
        Self {
            resource,
            edge_idx,
            kind,
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{} {}", self.resource, self.edge_idx, self.kind)
    }
}

/// Request and raw reply of one variant, kept for failure reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExchange {
    pub request: Query,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<HttpResponse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub key: ResultKey,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "ValidationMessages::is_empty")]
    pub messages: ValidationMessages,
    #[serde(skip)]
    pub exchange: Option<RawExchange>,
}

impl ExecutionResult {
    pub fn passed(key: ResultKey, messages: ValidationMessages) -> Self {
        Self {
            key,
            outcome: Outcome::Passed,
            failure: None,
            reason: None,
            messages,
            exchange: None,
        }
    }

    pub fn failed(
        key: ResultKey,
        failure: FailureKind,
        reason: impl Into<String>,
        messages: ValidationMessages,
    ) -> Self {
        Self {
            key,
            outcome: Outcome::Failed,
            failure: Some(failure),
            reason: Some(reason.into()),
            messages,
            exchange: None,
        }
    }

    pub fn skipped(key: ResultKey, reason: impl Into<String>, messages: ValidationMessages) -> Self {
        Self {
            key,
            outcome: Outcome::Skipped,
            failure: None,
            reason: Some(reason.into()),
            messages,
            exchange: None,
        }
    }

    pub fn with_exchange(mut self, exchange: RawExchange) -> Self {
        self.exchange = Some(exchange);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Passed => self.passed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: &Tally) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

/// Version and environment a resource was tested against
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trapi_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biolink_version: Option<String>,
}

/// All outcomes of one test edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub idx: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<TestEdge>,
    pub tally: Tally,
    pub results: BTreeMap<TransformKind, ExecutionResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<TransformKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inapplicable: Vec<Inapplicable>,
}

/// Per-resource report; ARA summaries nest one sub-summary per KP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub infores: String,
    pub component: Component,
    pub metadata: ResourceMetadata,
    pub kinds: BTreeMap<TransformKind, Tally>,
    pub total: Tally,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeSummary>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kps: BTreeMap<String, ResourceSummary>,
}

/// Where one message code was seen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub edge_id: String,
    pub test: TransformKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

/// Validation messages grouped by severity, then by code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Recommendations {
    pub index: BTreeMap<Severity, BTreeMap<String, Vec<Occurrence>>>,
}

impl Recommendations {
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.index
            .get(&severity)
            .map(|codes| codes.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.index.values().any(|codes| codes.contains_key(code))
    }
}

/// A resource left out of the run, with its cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedResource {
    pub infores: String,
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    pub cause: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    AllEdges,
    SingleEdge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunSummary {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub mode: RunMode,
    #[serde(rename = "KP")]
    pub kps: BTreeMap<String, Tally>,
    #[serde(rename = "ARA")]
    pub aras: BTreeMap<String, BTreeMap<String, Tally>>,
    pub total: Tally,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<ExcludedResource>,
}

/// Everything a finished run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub summary: TestRunSummary,
    pub kps: BTreeMap<String, ResourceSummary>,
    pub aras: BTreeMap<String, ResourceSummary>,
    pub recommendations: BTreeMap<ResourceKey, Recommendations>,
}

impl RunReport {
    pub fn resource(&self, key: &ResourceKey) -> Option<&ResourceSummary> {
        match key.component {
            Component::Kp => self.kps.get(&key.resource),
            Component::Ara => {
                let ara = self.aras.get(&key.resource)?;
                match &key.kp {
                    Some(kp) => ara.kps.get(kp),
                    None => Some(ara),
                }
            }
        }
    }

    /// Execution results that carry a raw exchange worth saving
    pub fn failed_exchanges(&self) -> impl Iterator<Item = (&ExecutionResult, &RawExchange)> {
        self.kps
            .values()
            .chain(self.aras.values().flat_map(|ara| ara.kps.values()))
            .flat_map(|summary| summary.edges.iter())
            .flat_map(|edge| edge.results.values())
            .filter(|result| result.outcome == Outcome::Failed)
            .filter_map(|result| result.exchange.as_ref().map(|exchange| (result, exchange)))
    }
}
