pub mod aggregator;
pub mod checker;
pub mod config;
pub mod dispatcher;
pub mod edges;
pub mod loader;
pub mod ontology;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod results;
pub mod runner;
pub mod transforms;

pub use aggregator::ResultAggregator;
pub use checker::{EdgeChecker, ProvenanceExpectation};
pub use config::{ConfigError, ConfigFile, ModelVersion, RegistryLocation, ResourceFilter, RunConfig};
pub use dispatcher::{DispatchOutcome, DispatchTarget, Dispatched, QueryDispatcher};
pub use edges::{AraConfig, EdgeTestSet, SourceType, TestEdge, TransformKind};
pub use loader::{DocumentFetcher, LoadError, LoadOptions, TestDataFetcher, TestDataLoader};
pub use ontology::{BiolinkModel, EntityAncestry, OntologyContext, OntologyError, OntologyKp};
pub use registry::{
    select_resources, Component, Environment, FileRegistry, RegistryEntry, RegistryError,
    RegistrySource, SmartApiRegistry, StaticRegistry,
};
pub use report::{
    write_run_report, FileReportStore, InMemoryReportStore, ReportError, ReportStore,
};
pub use resolver::{EndpointResolver, ResolutionError, ResolvedEndpoint};
pub use results::{
    ExecutionResult, FailureKind, Outcome, ResourceKey, ResourceSummary, RunMode, RunReport,
    Tally, TestRunSummary,
};
pub use runner::{OneHopTestRunner, RunContext, RunError};
pub use transforms::{
    OneHopQuery, TestVariant, TransformDescriptor, TransformRegistry, VariantPlan,
};

pub mod prelude {
    pub use crate::aggregator::*;
    pub use crate::checker::*;
    pub use crate::config::*;
    pub use crate::dispatcher::*;
    pub use crate::edges::*;
    pub use crate::loader::*;
    pub use crate::ontology::*;
    pub use crate::registry::*;
    pub use crate::report::*;
    pub use crate::resolver::*;
    pub use crate::results::*;
    pub use crate::runner::*;
    pub use crate::transforms::*;
}
