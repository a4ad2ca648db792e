//! TRAPI query dispatch with a run-wide cap on in-flight requests

use crate::transforms::TestVariant;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};
use trapi::{AttributeConstraint, HttpResponse, Query, TrapiClient};

/// Where and how the variants of one resource are sent
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTarget {
    pub url: String,
    pub schema_version: String,
    /// `None` when model validation is suppressed
    pub biolink_version: Option<String>,
    /// For ARA queries, the KP the returned edges must come from
    pub knowledge_source: Option<String>,
}

impl DispatchTarget {
    pub fn new(url: impl Into<String>, schema_version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            schema_version: schema_version.into(),
            biolink_version: None,
            knowledge_source: None,
        }
    }

    pub fn with_biolink_version(mut self, version: Option<String>) -> Self {
        self.biolink_version = version;
        self
    }

    pub fn with_knowledge_source(mut self, infores: impl Into<String>) -> Self {
        self.knowledge_source = Some(infores.into());
        self
    }
}

/// Render a variant as the TRAPI query sent to `target`
pub fn build_query(variant: &TestVariant, target: &DispatchTarget) -> Query {
    let mut graph = variant.query.to_query_graph();
    if let Some(kp) = &target.knowledge_source {
        if let Some(edge) = graph.one_hop_edge_mut() {
            edge.attribute_constraints
                .push(AttributeConstraint::knowledge_source(format!("infores:{}", kp)));
        }
    }
    Query::new(graph)
        .with_schema_version(&target.schema_version)
        .with_biolink_version(target.biolink_version.clone())
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Answered(HttpResponse),
    /// Connection failure or request timeout, never retried
    TransportFailed(String),
    /// Cut off by the run deadline
    Aborted,
}

#[derive(Debug, Clone)]
pub struct Dispatched {
    pub variant: TestVariant,
    pub request: Query,
    pub outcome: DispatchOutcome,
}

/// Clones share one permit pool
#[derive(Clone)]
pub struct QueryDispatcher {
    client: Arc<dyn TrapiClient>,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
    deadline: Option<Instant>,
}

impl QueryDispatcher {
    pub fn new(client: Arc<dyn TrapiClient>, max_in_flight: usize, request_timeout: Duration) -> Self {
        Self {
            client,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            request_timeout,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    pub async fn dispatch(&self, variant: TestVariant, target: &DispatchTarget) -> Dispatched {
        let request = build_query(&variant, target);

        let outcome = if self.deadline_passed() {
            DispatchOutcome::Aborted
        } else {
            let exchange = self.send(&target.url, &request);
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, exchange)
                    .await
                    .unwrap_or(DispatchOutcome::Aborted),
                None => exchange.await,
            }
        };

        match &outcome {
            DispatchOutcome::Answered(reply) => {
                debug!("{} edge {}: HTTP {}", variant.kind, variant.edge_idx, reply.status)
            }
            DispatchOutcome::TransportFailed(cause) => {
                warn!("{} edge {} to {}: {}", variant.kind, variant.edge_idx, target.url, cause)
            }
            DispatchOutcome::Aborted => {
                debug!("{} edge {}: aborted by run deadline", variant.kind, variant.edge_idx)
            }
        }

        Dispatched {
            variant,
            request,
            outcome,
        }
    }

    /// Send every variant of one edge; returns when all of them are done
    pub async fn dispatch_all(&self, variants: Vec<TestVariant>, target: &DispatchTarget) -> Vec<Dispatched> {
        join_all(variants.into_iter().map(|variant| self.dispatch(variant, target))).await
    }

    async fn send(&self, url: &str, request: &Query) -> DispatchOutcome {
        let Ok(_permit) = self.permits.acquire().await else {
            return DispatchOutcome::Aborted;
        };
        match tokio::time::timeout(self.request_timeout, self.client.query(url, request)).await {
            Ok(Ok(reply)) => DispatchOutcome::Answered(reply),
            Ok(Err(e)) => DispatchOutcome::TransportFailed(e.to_string()),
            Err(_) => DispatchOutcome::TransportFailed(format!(
                "No response from {} within {}s",
                url,
                self.request_timeout.as_secs()
            )),
        }
    }
}
