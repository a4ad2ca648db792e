//! Run orchestration
//!
//! A run selects resources from the registry, resolves a live endpoint for
//! each, loads their test data and then tests every KP directly and every
//! ARA through the KPs it declares. All collaborators live in a
//! [`RunContext`] owned by the run; nothing is process-global.

use crate::aggregator::ResultAggregator;
use crate::checker::{EdgeChecker, ProvenanceExpectation};
use crate::config::{ConfigError, ModelVersion, RegistryLocation, RunConfig};
use crate::dispatcher::{DispatchTarget, QueryDispatcher};
use crate::edges::{EdgeTestSet, TestEdge};
use crate::loader::{DocumentFetcher, LoadOptions, TestDataLoader, TestDataFetcher};
use crate::ontology::{BiolinkModel, EntityAncestry, OntologyContext, OntologyError, OntologyKp};
use crate::registry::{
    select_resources, Component, FileRegistry, RegistryEntry, RegistryError, RegistrySource,
    SmartApiRegistry,
};
use crate::report::{write_run_report, FileReportStore, ReportError, ReportStore};
use crate::resolver::{EndpointResolver, ResolutionError, ResolvedEndpoint};
use crate::results::{FailureKind, ResourceKey, ResourceMetadata, RunMode, RunReport};
use crate::transforms::TransformRegistry;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use trapi::version::DEFAULT_TRAPI_VERSION;
use trapi::{ComplianceValidator, StructuralValidator, TrapiClient};

/// Failures that end a run before any report is produced
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Invalid run configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Resource registry unavailable: {0}")]
    Registry(#[from] RegistryError),

    #[error("Biolink Model unavailable: {0}")]
    Ontology(#[from] OntologyError),

    #[error("Failed to write run report: {0}")]
    Report(#[from] ReportError),
}

/// Collaborators of one run
pub struct RunContext {
    pub config: RunConfig,
    pub client: Arc<dyn TrapiClient>,
    pub registry: Arc<dyn RegistrySource>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub validator: Arc<dyn ComplianceValidator>,
    /// `None` makes the raise-entity transforms inapplicable
    pub ancestry: Option<Arc<dyn EntityAncestry>>,
    pub store: Arc<dyn ReportStore>,
    pub transforms: TransformRegistry,
}

impl RunContext {
    /// Wire the default collaborators described by `config`
    pub fn new(config: RunConfig, client: Arc<dyn TrapiClient>) -> Self {
        let registry: Arc<dyn RegistrySource> = match &config.registry {
            RegistryLocation::Url(url) => Arc::new(SmartApiRegistry::new(client.clone(), url.clone())),
            RegistryLocation::File(path) => Arc::new(FileRegistry::new(path.clone())),
        };
        let ancestry = config
            .ontology_kp_url
            .as_ref()
            .map(|url| Arc::new(OntologyKp::new(client.clone(), url.clone())) as Arc<dyn EntityAncestry>);

        Self {
            registry,
            fetcher: Arc::new(TestDataFetcher::new(client.clone())),
            validator: Arc::new(StructuralValidator::new()),
            ancestry,
            store: Arc::new(FileReportStore::new(config.report_dir.clone())),
            transforms: TransformRegistry::standard(),
            client,
            config,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn RegistrySource>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ComplianceValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_ancestry(mut self, ancestry: Option<Arc<dyn EntityAncestry>>) -> Self {
        self.ancestry = ancestry;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ReportStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }
}

/// Versions a resource is queried and validated against
#[derive(Debug, Clone, PartialEq, Eq)]
struct TargetVersions {
    schema: String,
    model: Option<String>,
}

/// A KP that resolved and loaded; ARAs can only be tested through these
struct PreparedKp {
    endpoint: ResolvedEndpoint,
    versions: TargetVersions,
    edges: EdgeTestSet,
    ontology: OntologyContext,
}

struct PreparedAra {
    infores: String,
    endpoint: ResolvedEndpoint,
    versions: TargetVersions,
    kps: Vec<String>,
}

/// One resource key and everything needed to test its edges
struct TestJob<'a> {
    key: ResourceKey,
    target: DispatchTarget,
    checker: EdgeChecker,
    kp: &'a PreparedKp,
    provenance: Option<ProvenanceExpectation>,
}

pub struct OneHopTestRunner {
    context: RunContext,
}

impl OneHopTestRunner {
    pub fn new(context: RunContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    /// Execute the run, write its report and return it
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let config = &self.context.config;
        config.validate()?;

        let model = Arc::new(match &config.biolink_model_path {
            Some(path) => BiolinkModel::load(path).await?,
            None => BiolinkModel::bundled()?,
        });

        let entries = self.context.registry.entries().await?;
        info!(
            "Run {}: {} registry entries from {}",
            config.run_id,
            entries.len(),
            self.context.registry.source_name()
        );

        let deadline = config.run_timeout.and_then(|timeout| {
            let deadline = Instant::now().checked_add(timeout);
            if deadline.is_none() {
                warn!("Run timeout of {:?} is out of range, running without a deadline", timeout);
            }
            deadline
        });
        let aggregator = ResultAggregator::new();
        let resolver = EndpointResolver::new(self.context.client.clone(), config.probe_timeout);
        let dispatcher = QueryDispatcher::new(
            self.context.client.clone(),
            config.max_in_flight,
            config.request_timeout,
        )
        .with_deadline(deadline);

        let kp_entries = select_resources(&entries, Component::Kp, &config.kp_filter);
        let ara_entries = if config.ara_filter.is_skip() {
            debug!("ARA testing disabled");
            Vec::new()
        } else {
            select_resources(&entries, Component::Ara, &config.ara_filter)
        };
        info!(
            "Selected {} KP(s) and {} ARA(s)",
            kp_entries.len(),
            ara_entries.len()
        );

        let kp_preparations = kp_entries.iter().map(|entry| {
            self.prepare_kp(entry, &resolver, deadline, model.clone(), &aggregator)
        });
        let ara_preparations = ara_entries
            .iter()
            .map(|entry| self.prepare_ara(entry, &resolver, deadline, &aggregator));
        let (kps, aras) = futures::join!(join_all(kp_preparations), join_all(ara_preparations));
        let kps: Vec<PreparedKp> = kps.into_iter().flatten().collect();
        let aras: Vec<PreparedAra> = aras.into_iter().flatten().collect();

        let mut jobs = Vec::new();
        for kp in &kps {
            let target = DispatchTarget::new(&kp.endpoint.url, &kp.versions.schema)
                .with_biolink_version(kp.versions.model.clone());
            jobs.push(TestJob {
                key: ResourceKey::kp(&kp.edges.infores),
                target,
                checker: self.checker(&kp.versions),
                kp,
                provenance: None,
            });
        }
        for ara in &aras {
            for declared in &ara.kps {
                let Some(kp) = kps.iter().find(|kp| &kp.edges.infores == declared) else {
                    debug!(
                        "{} declares {}, which was not tested in this run",
                        ara.infores, declared
                    );
                    continue;
                };
                let target = DispatchTarget::new(&ara.endpoint.url, &ara.versions.schema)
                    .with_biolink_version(ara.versions.model.clone())
                    .with_knowledge_source(declared);
                jobs.push(TestJob {
                    key: ResourceKey::ara(&ara.infores, declared),
                    target,
                    checker: self.checker(&ara.versions),
                    kp,
                    provenance: Some(ProvenanceExpectation::new(
                        declared,
                        kp.edges.source_type,
                        &ara.infores,
                    )),
                });
            }
        }

        join_all(
            jobs.iter()
                .map(|job| self.test_resource(job, &dispatcher, &aggregator)),
        )
        .await;

        let mode = if config.single_edge {
            RunMode::SingleEdge
        } else {
            RunMode::AllEdges
        };
        let report = aggregator.finish(&config.run_id, mode);
        let written = write_run_report(self.context.store.as_ref(), &report).await?;
        info!(
            "Run {} finished: {} passed, {} failed, {} skipped ({} documents)",
            report.summary.run_id,
            report.summary.total.passed,
            report.summary.total.failed,
            report.summary.total.skipped,
            written
        );
        Ok(report)
    }

    fn versions(&self, entry: &RegistryEntry) -> TargetVersions {
        let config = &self.context.config;
        let schema = config
            .trapi_version
            .clone()
            .or_else(|| entry.trapi_version.clone())
            .unwrap_or_else(|| DEFAULT_TRAPI_VERSION.to_string());
        let model = match &config.biolink_version {
            ModelVersion::Registry => entry.biolink_version.clone(),
            ModelVersion::Pinned(version) => Some(version.clone()),
            ModelVersion::Suppressed => None,
        };
        TargetVersions { schema, model }
    }

    fn checker(&self, versions: &TargetVersions) -> EdgeChecker {
        EdgeChecker::new(
            self.context.validator.clone(),
            &versions.schema,
            versions.model.clone(),
        )
    }

    fn loader(&self) -> TestDataLoader {
        TestDataLoader::new(self.context.fetcher.clone()).with_options(LoadOptions {
            single_edge: self.context.config.single_edge,
            ..LoadOptions::default()
        })
    }

    /// Resolve an endpoint, giving up at the run deadline
    async fn resolve(
        &self,
        entry: &RegistryEntry,
        resolver: &EndpointResolver,
        deadline: Option<Instant>,
    ) -> Result<ResolvedEndpoint, ResolutionError> {
        let resolving = resolver.resolve(entry, self.context.config.environment);
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, resolving)
                .await
                .unwrap_or_else(|_| {
                    Err(ResolutionError::Aborted {
                        resource: entry.infores.clone(),
                    })
                }),
            None => resolving.await,
        }
    }

    fn describe(
        &self,
        aggregator: &ResultAggregator,
        entry: &RegistryEntry,
        endpoint: &ResolvedEndpoint,
        versions: &TargetVersions,
    ) {
        aggregator.describe(
            entry.component,
            &entry.infores,
            ResourceMetadata {
                url: Some(endpoint.url.clone()),
                environment: Some(endpoint.environment),
                trapi_version: Some(versions.schema.clone()),
                biolink_version: versions.model.clone(),
            },
        );
    }

    async fn prepare_kp(
        &self,
        entry: &RegistryEntry,
        resolver: &EndpointResolver,
        deadline: Option<Instant>,
        model: Arc<BiolinkModel>,
        aggregator: &ResultAggregator,
    ) -> Option<PreparedKp> {
        let endpoint = match self.resolve(entry, resolver, deadline).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                aggregator.exclude(Component::Kp, &entry.infores, Some(FailureKind::Resolution), e.to_string());
                return None;
            }
        };
        let loader = self.loader();
        let loading = loader.load_kp(&entry.infores, &endpoint.test_data);
        let edges = match before_deadline(deadline, loading).await {
            Some(Ok(edges)) => edges,
            Some(Err(e)) => {
                aggregator.exclude(Component::Kp, &entry.infores, Some(FailureKind::Configuration), e.to_string());
                return None;
            }
            None => {
                aggregator.exclude(Component::Kp, &entry.infores, None, LOAD_ABORTED.to_string());
                return None;
            }
        };

        let versions = self.versions(entry);
        self.describe(aggregator, entry, &endpoint, &versions);
        aggregator.open(&ResourceKey::kp(&entry.infores));
        if edges.is_empty() {
            warn!("{} has no test edges", entry.infores);
        }

        let prefetching = OntologyContext::prefetch(
            model.clone(),
            self.context.ancestry.as_deref(),
            &edges.edges,
            self.context.config.max_in_flight,
        );
        let ontology = match before_deadline(deadline, prefetching).await {
            Some(ontology) => ontology,
            None => {
                warn!("Run deadline reached before entity parents of {} were known", entry.infores);
                OntologyContext::new(model)
            }
        };
        Some(PreparedKp {
            endpoint,
            versions,
            edges,
            ontology,
        })
    }

    async fn prepare_ara(
        &self,
        entry: &RegistryEntry,
        resolver: &EndpointResolver,
        deadline: Option<Instant>,
        aggregator: &ResultAggregator,
    ) -> Option<PreparedAra> {
        let endpoint = match self.resolve(entry, resolver, deadline).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                aggregator.exclude(Component::Ara, &entry.infores, Some(FailureKind::Resolution), e.to_string());
                return None;
            }
        };
        let loader = self.loader();
        let loading = loader.load_ara(&entry.infores, &endpoint.test_data);
        let config = match before_deadline(deadline, loading).await {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                aggregator.exclude(Component::Ara, &entry.infores, Some(FailureKind::Configuration), e.to_string());
                return None;
            }
            None => {
                aggregator.exclude(Component::Ara, &entry.infores, None, LOAD_ABORTED.to_string());
                return None;
            }
        };

        let versions = self.versions(entry);
        self.describe(aggregator, entry, &endpoint, &versions);
        Some(PreparedAra {
            infores: entry.infores.clone(),
            endpoint,
            versions,
            kps: config.kps,
        })
    }

    async fn test_resource(&self, job: &TestJob<'_>, dispatcher: &QueryDispatcher, aggregator: &ResultAggregator) {
        aggregator.open(&job.key);
        info!(
            "Testing {} with {} edge(s) at {}",
            job.key,
            job.kp.edges.edges.len(),
            job.target.url
        );
        join_all(
            job.kp
                .edges
                .edges
                .iter()
                .map(|edge| self.test_edge(job, edge, dispatcher, aggregator)),
        )
        .await;
    }

    async fn test_edge(
        &self,
        job: &TestJob<'_>,
        edge: &TestEdge,
        dispatcher: &QueryDispatcher,
        aggregator: &ResultAggregator,
    ) {
        let plan = self.context.transforms.generate(edge, &job.kp.ontology);

        let results = if edge.is_noncompliant() {
            debug!("{} is noncompliant; skipping its tests", edge.edge_id(job.key.edge_source()));
            plan.variants
                .iter()
                .map(|variant| job.checker.skip_noncompliant(&job.key, edge, variant))
                .collect()
        } else {
            dispatcher
                .dispatch_all(plan.variants.clone(), &job.target)
                .await
                .into_iter()
                .map(|dispatched| job.checker.check(&job.key, edge, dispatched, job.provenance.as_ref()))
                .collect()
        };

        let recorded = aggregator.record_edge(&job.key, edge, &plan, results);
        debug!("{} edge {}: {} result(s)", job.key, edge.idx, recorded);
    }
}

const LOAD_ABORTED: &str = "run deadline reached while loading test data";

/// `None` once the run deadline passes first
async fn before_deadline<F: Future>(deadline: Option<Instant>, work: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, work).await.ok(),
        None => Some(work.await),
    }
}
