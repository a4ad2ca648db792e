//! Report artifacts of a finished run
//!
//! Layout under `<run_id>/`:
//!
//! ```text
//! test_run_summary.json
//! KP/<kp>/resource_summary.json
//! KP/<kp>/recommendations.json
//! KP/<kp>/<kp>-<idx>.json
//! KP/<kp>/<kp>-<idx>-<test>.json          raw exchange of a failed variant
//! ARA/<ara>/resource_summary.json
//! ARA/<ara>/<kp>/recommendations.json
//! ARA/<ara>/<kp>/<kp>-<idx>.json
//! ```

use crate::results::{Outcome, ResourceKey, ResourceSummary, RunReport};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Destination for report documents, addressed by relative path
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, path: &Path, document: &Value) -> ReportResult<()>;

    fn store_name(&self) -> &'static str;
}

pub struct FileReportStore {
    root: PathBuf,
}

impl FileReportStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ReportStore for FileReportStore {
    async fn save(&self, path: &Path, document: &Value) -> ReportResult<()> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ReportError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        let text = serde_json::to_string_pretty(document)?;
        tokio::fs::write(&target, text)
            .await
            .map_err(|source| ReportError::Io {
                path: target.clone(),
                source,
            })?;
        debug!("Wrote {}", target.display());
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "filesystem"
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    documents: Mutex<BTreeMap<PathBuf, Value>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<Value> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .cloned()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save(&self, path: &Path, document: &Value) -> ReportResult<()> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), document.clone());
        Ok(())
    }

    fn store_name(&self) -> &'static str {
        "memory"
    }
}

fn to_value<T: Serialize>(value: &T) -> ReportResult<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Resource summary with each edge reduced to its outcome per test
fn resource_document(summary: &ResourceSummary) -> Value {
    let edges: Vec<Value> = summary
        .edges
        .iter()
        .map(|edge| {
            let outcomes: Map<String, Value> = edge
                .results
                .iter()
                .map(|(kind, result)| {
                    let outcome = match result.outcome {
                        Outcome::Passed => "passed",
                        Outcome::Failed => "failed",
                        Outcome::Skipped => "skipped",
                    };
                    (kind.code().to_string(), Value::from(outcome))
                })
                .collect();
            let mut entry = json!({ "idx": edge.idx, "tests": outcomes });
            if let Some(test_edge) = &edge.edge {
                entry["subject_id"] = json!(test_edge.subject_id);
                entry["predicate"] = json!(test_edge.predicate);
                entry["object_id"] = json!(test_edge.object_id);
            }
            entry
        })
        .collect();

    let mut document = json!({
        "infores": summary.infores,
        "component": summary.component,
        "metadata": summary.metadata,
        "tests": summary.kinds,
        "total": summary.total,
    });
    if !edges.is_empty() {
        document["edges"] = Value::Array(edges);
    }
    if !summary.kps.is_empty() {
        let kps: Map<String, Value> = summary
            .kps
            .iter()
            .map(|(kp, sub)| (kp.clone(), resource_document(sub)))
            .collect();
        document["KPs"] = Value::Object(kps);
    }
    document
}

/// `<details key><suffix>.json`
fn json_file(details: &Path, suffix: &str) -> PathBuf {
    let stem = details
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    details.with_file_name(format!("{}{}.json", stem, suffix))
}

/// Write every artifact of `report`. Returns the number of documents saved.
pub async fn write_run_report(store: &dyn ReportStore, report: &RunReport) -> ReportResult<usize> {
    let run_dir = PathBuf::from(&report.summary.run_id);
    let mut written = 0;

    store
        .save(&run_dir.join("test_run_summary.json"), &to_value(&report.summary)?)
        .await?;
    written += 1;

    let resources = report.kps.values().chain(report.aras.values());
    for summary in resources {
        let dir = run_dir
            .join(summary.component.as_str())
            .join(&summary.infores);
        store
            .save(&dir.join("resource_summary.json"), &resource_document(summary))
            .await?;
        written += 1;
    }

    for (key, recommendations) in &report.recommendations {
        let path = run_dir.join(key.details_dir()).join("recommendations.json");
        store.save(&path, &to_value(recommendations)?).await?;
        written += 1;
    }

    let keyed_edges = report
        .kps
        .values()
        .map(|summary| (ResourceKey::kp(&summary.infores), summary))
        .chain(report.aras.values().flat_map(|ara| {
            ara.kps
                .values()
                .map(move |sub| (ResourceKey::ara(&ara.infores, &sub.infores), sub))
        }));
    for (key, summary) in keyed_edges {
        for edge in &summary.edges {
            let path = json_file(&run_dir.join(key.edge_details_key(edge.idx)), "");
            store.save(&path, &to_value(edge)?).await?;
            written += 1;
        }
    }

    for (result, exchange) in report.failed_exchanges() {
        let key = &result.key;
        let details = run_dir.join(key.resource.edge_details_key(key.edge_idx));
        let path = json_file(&details, &format!("-{}", key.kind.test_name()));
        store.save(&path, &to_value(exchange)?).await?;
        written += 1;
    }

    info!(
        "Wrote {} report documents for run {} to {} store",
        written,
        report.summary.run_id,
        store.store_name()
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ResultAggregator;
    use crate::edges::TransformKind;
    use crate::results::{ExecutionResult, FailureKind, RawExchange, ResultKey, RunMode};
    use trapi::{Query, ValidationMessage, ValidationMessages};

    fn report() -> RunReport {
        let aggregator = ResultAggregator::new();
        let kp = ResourceKey::kp("kp-a");
        let ara = ResourceKey::ara("ara", "kp-a");

        aggregator.record(ExecutionResult::passed(
            ResultKey::new(kp.clone(), 0, TransformKind::BySubject),
            ValidationMessages::new(),
        ));
        aggregator.record(
            ExecutionResult::failed(
                ResultKey::new(ara.clone(), 1, TransformKind::InverseByNewSubject),
                FailureKind::Recovery,
                "missing",
                ValidationMessages::from(vec![ValidationMessage::new(
                    "error.trapi.response.knowledge_graph.missing_expected_edge",
                )]),
            )
            .with_exchange(RawExchange {
                request: Query::new(Default::default()),
                response: None,
            }),
        );
        aggregator.finish("run-1", RunMode::AllEdges)
    }

    #[tokio::test]
    async fn test_artifact_layout() {
        let store = InMemoryReportStore::new();
        let written = write_run_report(&store, &report()).await.unwrap();
        assert_eq!(written, store.paths().len());

        for path in [
            "run-1/test_run_summary.json",
            "run-1/KP/kp-a/resource_summary.json",
            "run-1/KP/kp-a/kp-a-0.json",
            "run-1/ARA/ara/resource_summary.json",
            "run-1/ARA/ara/kp-a/recommendations.json",
            "run-1/ARA/ara/kp-a/kp-a-1.json",
            "run-1/ARA/ara/kp-a/kp-a-1-inverse_by_new_subject.json",
        ] {
            assert!(store.get(path).is_some(), "missing {}", path);
        }
        assert!(store.get("run-1/KP/kp-a/kp-a-0-by_subject.json").is_none());

        let summary = store.get("run-1/test_run_summary.json").unwrap();
        assert_eq!(summary["KP"]["kp-a"]["passed"], 1);
        assert_eq!(summary["ARA"]["ara"]["kp-a"]["failed"], 1);

        let ara = store.get("run-1/ARA/ara/resource_summary.json").unwrap();
        assert_eq!(ara["KPs"]["kp-a"]["edges"][0]["tests"]["IBNS"], "failed");
    }

    #[tokio::test]
    async fn test_file_store_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileReportStore::new(dir.path());
        write_run_report(&store, &report()).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("run-1/KP/kp-a/kp-a-0.json")).unwrap();
        let edge: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(edge["idx"], 0);
        assert_eq!(edge["results"]["BS"]["outcome"], "passed");
    }
}
