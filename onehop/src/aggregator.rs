//! Run-wide result accumulation
//!
//! The aggregator is the only shared mutable state of a run. Every mutation
//! goes through one mutex; summaries are folded only when the run finishes,
//! so each level's tally is the sum of the level below.

use crate::edges::{TestEdge, TransformKind};
use crate::registry::Component;
use crate::results::{
    EdgeSummary, ExcludedResource, ExecutionResult, FailureKind, Occurrence, Recommendations,
    ResourceKey, ResourceMetadata, ResourceSummary, ResultKey, RunMode, RunReport, Tally,
    TestRunSummary,
};
use crate::transforms::VariantPlan;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

#[derive(Debug, Default)]
struct AggregatorState {
    seen: HashSet<ResultKey>,
    metadata: BTreeMap<(Component, String), ResourceMetadata>,
    edges: BTreeMap<ResourceKey, BTreeMap<usize, EdgeSummary>>,
    recommendations: BTreeMap<ResourceKey, Recommendations>,
    excluded: Vec<ExcludedResource>,
}

fn empty_edge(idx: usize) -> EdgeSummary {
    EdgeSummary {
        idx,
        edge: None,
        tally: Tally::default(),
        results: BTreeMap::new(),
        excluded: Vec::new(),
        inapplicable: Vec::new(),
    }
}

#[derive(Debug, Default)]
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, AggregatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record what a resource was tested against
    pub fn describe(&self, component: Component, infores: &str, metadata: ResourceMetadata) {
        self.state()
            .metadata
            .insert((component, infores.to_string()), metadata);
    }

    /// Make `key` appear in the report even if it ends up with no edges
    pub fn open(&self, key: &ResourceKey) {
        self.state().edges.entry(key.clone()).or_default();
    }

    pub fn exclude(&self, component: Component, infores: &str, failure: Option<FailureKind>, cause: impl Into<String>) {
        let cause = cause.into();
        error!("Excluding {} {}: {}", component, infores, cause);
        self.state().excluded.push(ExcludedResource {
            infores: infores.to_string(),
            component,
            failure,
            cause,
        });
    }

    /// Record all results of one edge at once. Returns how many were new.
    pub fn record_edge(
        &self,
        key: &ResourceKey,
        edge: &TestEdge,
        plan: &VariantPlan,
        results: Vec<ExecutionResult>,
    ) -> usize {
        let mut state = self.state();
        {
            let summary = state
                .edges
                .entry(key.clone())
                .or_default()
                .entry(edge.idx)
                .or_insert_with(|| empty_edge(edge.idx));
            summary.edge = Some(edge.clone());
            summary.excluded = plan.excluded.clone();
            summary.inapplicable = plan.inapplicable.clone();
        }
        let mut recorded = 0;
        for result in results {
            if Self::record_locked(&mut state, result) {
                recorded += 1;
            }
        }
        recorded
    }

    /// Record a single result; a key seen before is ignored
    pub fn record(&self, result: ExecutionResult) -> bool {
        Self::record_locked(&mut self.state(), result)
    }

    fn record_locked(state: &mut AggregatorState, result: ExecutionResult) -> bool {
        if !state.seen.insert(result.key.clone()) {
            debug!("Ignoring duplicate result {}", result.key);
            return false;
        }

        let key = result.key.clone();
        let edge_id = format!("{}#{}", key.resource.edge_source(), key.edge_idx);
        let recommendations = state.recommendations.entry(key.resource.clone()).or_default();
        for message in result.messages.iter() {
            recommendations
                .index
                .entry(message.severity)
                .or_default()
                .entry(message.code.clone())
                .or_default()
                .push(Occurrence {
                    edge_id: edge_id.clone(),
                    test: key.kind,
                    context: message.context.clone(),
                });
        }

        let summary = state
            .edges
            .entry(key.resource.clone())
            .or_default()
            .entry(key.edge_idx)
            .or_insert_with(|| empty_edge(key.edge_idx));
        summary.tally.add(result.outcome);
        summary.results.insert(key.kind, result);
        true
    }

    /// Fold everything recorded so far into the run report
    pub fn finish(&self, run_id: &str, mode: RunMode) -> RunReport {
        let state = self.state();
        let metadata = |component: Component, infores: &str| {
            state
                .metadata
                .get(&(component, infores.to_string()))
                .cloned()
                .unwrap_or_default()
        };

        let mut kps = BTreeMap::new();
        let mut aras: BTreeMap<String, ResourceSummary> = BTreeMap::new();

        for (key, edges) in &state.edges {
            match (&key.component, &key.kp) {
                (Component::Kp, _) => {
                    let summary = fold(
                        &key.resource,
                        Component::Kp,
                        metadata(Component::Kp, &key.resource),
                        edges,
                    );
                    kps.insert(key.resource.clone(), summary);
                }
                (Component::Ara, Some(kp)) => {
                    let sub = fold(kp, Component::Kp, metadata(Component::Kp, kp), edges);
                    let ara = aras.entry(key.resource.clone()).or_insert_with(|| ResourceSummary {
                        infores: key.resource.clone(),
                        component: Component::Ara,
                        metadata: metadata(Component::Ara, &key.resource),
                        kinds: BTreeMap::new(),
                        total: Tally::default(),
                        edges: Vec::new(),
                        kps: BTreeMap::new(),
                    });
                    for (kind, tally) in &sub.kinds {
                        ara.kinds.entry(*kind).or_default().merge(tally);
                    }
                    ara.total.merge(&sub.total);
                    ara.kps.insert(kp.clone(), sub);
                }
                (Component::Ara, None) => {
                    debug!("ARA key without KP: {}", key);
                }
            }
        }

        let mut total = Tally::default();
        let kp_index: BTreeMap<String, Tally> = kps
            .iter()
            .map(|(infores, summary)| (infores.clone(), summary.total))
            .collect();
        for tally in kp_index.values() {
            total.merge(tally);
        }
        let ara_index: BTreeMap<String, BTreeMap<String, Tally>> = aras
            .iter()
            .map(|(ara, summary)| {
                let per_kp = summary
                    .kps
                    .iter()
                    .map(|(kp, sub)| (kp.clone(), sub.total))
                    .collect();
                (ara.clone(), per_kp)
            })
            .collect();
        for summary in aras.values() {
            total.merge(&summary.total);
        }

        RunReport {
            summary: TestRunSummary {
                run_id: run_id.to_string(),
                timestamp: Utc::now(),
                mode,
                kps: kp_index,
                aras: ara_index,
                total,
                excluded: state.excluded.clone(),
            },
            kps,
            aras,
            recommendations: state.recommendations.clone(),
        }
    }
}

fn fold(
    infores: &str,
    component: Component,
    metadata: ResourceMetadata,
    edges: &BTreeMap<usize, EdgeSummary>,
) -> ResourceSummary {
    let mut kinds: BTreeMap<TransformKind, Tally> = BTreeMap::new();
    let mut total = Tally::default();
    for edge in edges.values() {
        for (kind, result) in &edge.results {
            kinds.entry(*kind).or_default().add(result.outcome);
            total.add(result.outcome);
        }
    }
    ResourceSummary {
        infores: infores.to_string(),
        component,
        metadata,
        kinds,
        total,
        edges: edges.values().cloned().collect(),
        kps: BTreeMap::new(),
    }
}
