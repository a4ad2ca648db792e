//! Turns one dispatched variant into an [`ExecutionResult`]
//!
//! The compliance verdict comes from the injected [`ComplianceValidator`];
//! this module adds the one-hop specific checks: the expected edge must be in
//! the knowledge graph, the expected node must be bound in the results, and
//! ARA answers must attribute the edge to both the KP and the ARA.

use crate::dispatcher::{DispatchOutcome, Dispatched};
use crate::edges::{normalize_infores, SourceType, TestEdge};
use crate::results::{ExecutionResult, FailureKind, RawExchange, ResourceKey, ResultKey};
use crate::transforms::{OneHopQuery, TestVariant};
use std::sync::Arc;
use trapi::types::AGGREGATOR_KNOWLEDGE_SOURCE;
use trapi::{ComplianceValidator, Edge, HttpResponse, Response, ValidationMessage, ValidationMessages};

pub mod codes {
    pub const NONCOMPLIANT_INPUT_EDGE: &str = "warning.input_edge.noncompliant";
    pub const RUN_TIMEOUT: &str = "warning.trapi.request.run_timeout";
    pub const NETWORK_ERROR: &str = "error.trapi.request.network_error";
    pub const UNEXPECTED_HTTP_CODE: &str = "critical.trapi.response.unexpected_http_code";
    pub const EMPTY_RESPONSE: &str = "critical.trapi.response.empty";
    pub const UNPARSABLE_RESPONSE: &str = "critical.trapi.response.unparsable";
    pub const EMPTY_KNOWLEDGE_GRAPH: &str = "error.trapi.response.knowledge_graph.empty";
    pub const MISSING_EXPECTED_EDGE: &str =
        "error.trapi.response.knowledge_graph.missing_expected_edge";
    pub const MISSING_EXPECTED_OUTPUT: &str = "error.trapi.response.results.missing_expected_output";
    pub const KP_PROVENANCE_MISSING: &str =
        "error.trapi.response.knowledge_graph.edge.provenance.kp.missing";
    pub const ARA_PROVENANCE_MISSING: &str =
        "error.trapi.response.knowledge_graph.edge.provenance.ara.missing";
}

/// Attribution an ARA answer must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceExpectation {
    pub kp: String,
    pub kp_role: SourceType,
    pub ara: String,
}

impl ProvenanceExpectation {
    pub fn new(kp: &str, kp_role: SourceType, ara: &str) -> Self {
        Self {
            kp: normalize_infores(kp),
            kp_role,
            ara: normalize_infores(ara),
        }
    }

    fn names_kp(&self, edge: &Edge) -> bool {
        edge.knowledge_sources().iter().any(|(role, id)| {
            let role_matches = role == self.kp_role.resource_role()
                || (self.kp_role == SourceType::Primary && role == "original_knowledge_source");
            role_matches && normalize_infores(id) == self.kp
        })
    }

    fn names_ara(&self, edge: &Edge) -> bool {
        edge.knowledge_sources()
            .iter()
            .any(|(role, id)| role == AGGREGATOR_KNOWLEDGE_SOURCE && normalize_infores(id) == self.ara)
    }
}

fn message(code: &str, edge_id: &str, variant: &TestVariant) -> ValidationMessage {
    ValidationMessage::new(code)
        .with_context("edge_id", edge_id)
        .with_context("test", variant.kind.test_name())
}

pub struct EdgeChecker {
    validator: Arc<dyn ComplianceValidator>,
    schema_version: String,
    model_version: Option<String>,
}

impl EdgeChecker {
    pub fn new(
        validator: Arc<dyn ComplianceValidator>,
        schema_version: impl Into<String>,
        model_version: Option<String>,
    ) -> Self {
        Self {
            validator,
            schema_version: schema_version.into(),
            model_version,
        }
    }

    /// Result for a variant of an edge that failed load-time validation
    pub fn skip_noncompliant(&self, resource: &ResourceKey, edge: &TestEdge, variant: &TestVariant) -> ExecutionResult {
        let edge_id = edge.edge_id(resource.edge_source());
        let mut messages = edge.pre_validation.clone();
        messages.report(message(codes::NONCOMPLIANT_INPUT_EDGE, &edge_id, variant));
        ExecutionResult::skipped(
            ResultKey::new(resource.clone(), edge.idx, variant.kind),
            "test edge failed input validation",
            messages,
        )
    }

    pub fn check(
        &self,
        resource: &ResourceKey,
        edge: &TestEdge,
        dispatched: Dispatched,
        provenance: Option<&ProvenanceExpectation>,
    ) -> ExecutionResult {
        let Dispatched {
            variant,
            request,
            outcome,
        } = dispatched;

        if edge.is_noncompliant() {
            return self.skip_noncompliant(resource, edge, &variant);
        }

        let key = ResultKey::new(resource.clone(), edge.idx, variant.kind);
        let edge_id = edge.edge_id(resource.edge_source());
        let mut messages = ValidationMessages::new();

        let reply = match outcome {
            DispatchOutcome::Aborted => {
                messages.report(message(codes::RUN_TIMEOUT, &edge_id, &variant));
                return ExecutionResult::skipped(key, "run deadline reached before a response", messages);
            }
            DispatchOutcome::TransportFailed(cause) => {
                messages.report(message(codes::NETWORK_ERROR, &edge_id, &variant).with_context("cause", &cause));
                return ExecutionResult::failed(key, FailureKind::Transport, cause, messages)
                    .with_exchange(RawExchange {
                        request,
                        response: None,
                    });
            }
            DispatchOutcome::Answered(reply) => reply,
        };

        let verdict = self.judge(&variant, edge, &edge_id, &reply, provenance, &mut messages);
        let result = match verdict {
            Ok(()) => ExecutionResult::passed(key, messages),
            Err((failure, reason)) => ExecutionResult::failed(key, failure, reason, messages),
        };
        result.with_exchange(RawExchange {
            request,
            response: Some(reply),
        })
    }

    fn judge(
        &self,
        variant: &TestVariant,
        edge: &TestEdge,
        edge_id: &str,
        reply: &HttpResponse,
        provenance: Option<&ProvenanceExpectation>,
        messages: &mut ValidationMessages,
    ) -> Result<(), (FailureKind, String)> {
        if !reply.is_success() {
            messages.report(
                message(codes::UNEXPECTED_HTTP_CODE, edge_id, variant)
                    .with_context("status", reply.status.to_string()),
            );
            return Err((FailureKind::Transport, format!("HTTP status {}", reply.status)));
        }

        let body = match &reply.body {
            Some(body) if !body.is_null() => body,
            _ => {
                messages.report(message(codes::EMPTY_RESPONSE, edge_id, variant));
                return Err((FailureKind::Compliance, "empty response body".to_string()));
            }
        };

        messages.merge(
            self.validator
                .validate(body, &self.schema_version, self.model_version.as_deref()),
        );
        if messages.has_errors() {
            return Err((
                FailureKind::Compliance,
                format!("{} reported errors", self.validator.validator_name()),
            ));
        }

        let response: Response = match serde_json::from_value(body.clone()) {
            Ok(response) => response,
            Err(e) => {
                messages.report(
                    message(codes::UNPARSABLE_RESPONSE, edge_id, variant).with_context("cause", e.to_string()),
                );
                return Err((FailureKind::Compliance, "response is not a TRAPI message".to_string()));
            }
        };

        let query = &variant.query;
        let knowledge_graph = match response.knowledge_graph() {
            Some(kg) if !kg.is_empty() => kg,
            _ => {
                messages.report(message(codes::EMPTY_KNOWLEDGE_GRAPH, edge_id, variant));
                return Err((FailureKind::Recovery, "empty knowledge graph".to_string()));
            }
        };

        let mut matching: Vec<(&String, &Edge)> = knowledge_graph
            .edges
            .iter()
            .filter(|(_, kg_edge)| links_expected_nodes(kg_edge, query, edge))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        if matching.is_empty() {
            messages.report(
                message(codes::MISSING_EXPECTED_EDGE, edge_id, variant)
                    .with_context("expected", query.output_id()),
            );
            return Err((
                FailureKind::Recovery,
                format!("no knowledge graph edge links {} to {}", query.input_id(), query.output_id()),
            ));
        }

        let bound = response
            .results()
            .iter()
            .any(|result| result.binds(query.output_node(), query.output_id()));
        if !bound {
            messages.report(
                message(codes::MISSING_EXPECTED_OUTPUT, edge_id, variant)
                    .with_context("node", query.output_node())
                    .with_context("expected", query.output_id()),
            );
            return Err((
                FailureKind::Recovery,
                format!("{} is not bound to node {} in any result", query.output_id(), query.output_node()),
            ));
        }

        if let Some(expected) = provenance {
            for (kg_edge_id, kg_edge) in &matching {
                if !expected.names_kp(kg_edge) {
                    messages.report(
                        message(codes::KP_PROVENANCE_MISSING, edge_id, variant)
                            .with_context("kg_edge", kg_edge_id.as_str())
                            .with_context("kp", &expected.kp)
                            .with_context("role", expected.kp_role.resource_role()),
                    );
                    return Err((
                        FailureKind::Provenance,
                        format!(
                            "edge {} does not name {} as {}",
                            kg_edge_id,
                            expected.kp,
                            expected.kp_role.resource_role()
                        ),
                    ));
                }
                if !expected.names_ara(kg_edge) {
                    messages.report(
                        message(codes::ARA_PROVENANCE_MISSING, edge_id, variant)
                            .with_context("kg_edge", kg_edge_id.as_str())
                            .with_context("ara", &expected.ara),
                    );
                    return Err((
                        FailureKind::Provenance,
                        format!(
                            "edge {} does not name {} as {}",
                            kg_edge_id, expected.ara, AGGREGATOR_KNOWLEDGE_SOURCE
                        ),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// The returned edge joins the expected output with the input entity, in
/// either direction. The input may be the queried term or the asserted one
/// it was raised from.
fn links_expected_nodes(kg_edge: &Edge, query: &OneHopQuery, edge: &TestEdge) -> bool {
    let output = query.output_id();
    let accepted = |id: &str| {
        id != output && (id == query.input_id() || id == edge.subject_id || id == edge.object_id)
    };
    (kg_edge.object == output && accepted(&kg_edge.subject))
        || (kg_edge.subject == output && accepted(&kg_edge.object))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edges::TransformKind;
    use crate::results::Outcome;
    use crate::transforms::LookupDirection;
    use serde_json::{json, Value};
    use trapi::StructuralValidator;

    fn edge() -> TestEdge {
        TestEdge {
            idx: 2,
            subject_id: "CHEBI:3002".to_string(),
            subject_category: "biolink:SmallMolecule".to_string(),
            predicate: "biolink:treats".to_string(),
            object_id: "MONDO:0005148".to_string(),
            object_category: "biolink:Disease".to_string(),
            association: None,
            qualifiers: Vec::new(),
            exclude_tests: Default::default(),
            location: "kp.json".to_string(),
            pre_validation: Default::default(),
        }
    }

    fn by_subject(edge: &TestEdge) -> TestVariant {
        TestVariant {
            edge_idx: edge.idx,
            kind: TransformKind::BySubject,
            query: OneHopQuery::from_edge(edge, LookupDirection::ObjectBySubject),
        }
    }

    fn checker() -> EdgeChecker {
        EdgeChecker::new(Arc::new(StructuralValidator::new()), "1.4.0", Some("3.1.2".to_string()))
    }

    fn answered(body: Value) -> Dispatched {
        let edge = edge();
        Dispatched {
            variant: by_subject(&edge),
            request: trapi::Query::new(Default::default()),
            outcome: DispatchOutcome::Answered(HttpResponse {
                status: 200,
                body: Some(body),
            }),
        }
    }

    fn response(sources: Value) -> Value {
        json!({
            "schema_version": "1.4.0",
            "biolink_version": "3.1.2",
            "message": {
                "knowledge_graph": {
                    "nodes": {
                        "CHEBI:3002": {"categories": ["biolink:SmallMolecule"]},
                        "MONDO:0005148": {"categories": ["biolink:Disease"]}
                    },
                    "edges": {
                        "e0": {
                            "subject": "CHEBI:3002",
                            "predicate": "biolink:treats",
                            "object": "MONDO:0005148",
                            "sources": sources
                        }
                    }
                },
                "results": [
                    {"node_bindings": {"a": [{"id": "CHEBI:3002"}], "b": [{"id": "MONDO:0005148"}]}}
                ]
            }
        })
    }

    #[test]
    fn test_recovered_edge_passes() {
        let result = checker().check(
            &ResourceKey::kp("kp-a"),
            &edge(),
            answered(response(json!([]))),
            None,
        );
        assert_eq!(result.outcome, Outcome::Passed);
        assert!(result.exchange.is_some());
    }

    #[test]
    fn test_missing_edge_is_recovery_error() {
        let mut body = response(json!([]));
        body["message"]["knowledge_graph"]["edges"] = json!({
            "e1": {"subject": "CHEBI:3002", "predicate": "biolink:treats", "object": "MONDO:0000001"}
        });
        let result = checker().check(&ResourceKey::kp("kp-a"), &edge(), answered(body), None);

        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.failure, Some(FailureKind::Recovery));
        assert!(result.messages.contains_code(codes::MISSING_EXPECTED_EDGE));
    }

    #[test]
    fn test_unbound_output_is_recovery_error() {
        let mut body = response(json!([]));
        body["message"]["results"] = json!([
            {"node_bindings": {"a": [{"id": "CHEBI:3002"}], "b": [{"id": "MONDO:0000001"}]}}
        ]);
        let result = checker().check(&ResourceKey::kp("kp-a"), &edge(), answered(body), None);
        assert_eq!(result.failure, Some(FailureKind::Recovery));
        assert!(result.messages.contains_code(codes::MISSING_EXPECTED_OUTPUT));
    }

    #[test]
    fn test_http_error_and_transport_failure() {
        let mut dispatched = answered(json!({}));
        dispatched.outcome = DispatchOutcome::Answered(HttpResponse { status: 503, body: None });
        let result = checker().check(&ResourceKey::kp("kp-a"), &edge(), dispatched, None);
        assert_eq!(result.outcome, Outcome::Failed);
        assert!(result.messages.contains_code(codes::UNEXPECTED_HTTP_CODE));

        let mut dispatched = answered(json!({}));
        dispatched.outcome = DispatchOutcome::TransportFailed("connection refused".to_string());
        let result = checker().check(&ResourceKey::kp("kp-a"), &edge(), dispatched, None);
        assert_eq!(result.failure, Some(FailureKind::Transport));
        assert!(result.messages.contains_code(codes::NETWORK_ERROR));
    }

    #[test]
    fn test_aborted_and_noncompliant_are_skipped() {
        let mut dispatched = answered(json!({}));
        dispatched.outcome = DispatchOutcome::Aborted;
        let result = checker().check(&ResourceKey::kp("kp-a"), &edge(), dispatched, None);
        assert_eq!(result.outcome, Outcome::Skipped);
        assert!(result.messages.contains_code(codes::RUN_TIMEOUT));

        let mut bad = edge();
        bad.pre_validation
            .report(ValidationMessage::new("error.input_edge.node.id.not_curie"));
        let result = checker().check(&ResourceKey::kp("kp-a"), &bad, answered(response(json!([]))), None);
        assert_eq!(result.outcome, Outcome::Skipped);
        assert!(result.messages.contains_code(codes::NONCOMPLIANT_INPUT_EDGE));
    }

    #[test]
    fn test_compliance_errors_fail_the_variant() {
        let body = json!({"schema_version": "1.4.0"});
        let result = checker().check(&ResourceKey::kp("kp-a"), &edge(), answered(body), None);
        assert_eq!(result.failure, Some(FailureKind::Compliance));
    }

    #[test]
    fn test_ara_provenance() {
        let expected = ProvenanceExpectation::new("infores:kp-a", SourceType::Primary, "aragorn");
        let resource = ResourceKey::ara("aragorn", "kp-a");

        let attributed = response(json!([
            {"resource_id": "infores:kp-a", "resource_role": "primary_knowledge_source"},
            {"resource_id": "infores:aragorn", "resource_role": "aggregator_knowledge_source"}
        ]));
        let result = checker().check(&resource, &edge(), answered(attributed), Some(&expected));
        assert_eq!(result.outcome, Outcome::Passed);

        let no_kp = response(json!([
            {"resource_id": "infores:aragorn", "resource_role": "aggregator_knowledge_source"}
        ]));
        let result = checker().check(&resource, &edge(), answered(no_kp), Some(&expected));
        assert_eq!(result.failure, Some(FailureKind::Provenance));
        assert!(result.messages.contains_code(codes::KP_PROVENANCE_MISSING));

        let mut legacy = response(Value::Null);
        legacy["message"]["knowledge_graph"]["edges"]["e0"]["attributes"] = json!([
            {"attribute_type_id": "biolink:primary_knowledge_source", "value": "infores:kp-a"}
        ]);
        let result = checker().check(&resource, &edge(), answered(legacy), Some(&expected));
        assert_eq!(result.failure, Some(FailureKind::Provenance));
        assert!(result.messages.contains_code(codes::ARA_PROVENANCE_MISSING));
    }

    #[test]
    fn test_every_matching_edge_needs_provenance() {
        let expected = ProvenanceExpectation::new("infores:kp-a", SourceType::Primary, "aragorn");
        let resource = ResourceKey::ara("aragorn", "kp-a");

        let mut mixed = response(json!([
            {"resource_id": "infores:kp-a", "resource_role": "primary_knowledge_source"},
            {"resource_id": "infores:aragorn", "resource_role": "aggregator_knowledge_source"}
        ]));
        mixed["message"]["knowledge_graph"]["edges"]["e1"] = json!({
            "subject": "CHEBI:3002",
            "predicate": "biolink:treats",
            "object": "MONDO:0005148",
            "sources": [{"resource_id": "infores:someone-else", "resource_role": "primary_knowledge_source"}]
        });
        let result = checker().check(&resource, &edge(), answered(mixed), Some(&expected));

        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.failure, Some(FailureKind::Provenance));
        let missing = result
            .messages
            .iter()
            .find(|m| m.code == codes::KP_PROVENANCE_MISSING)
            .expect("kp provenance message");
        assert_eq!(missing.context.get("kg_edge").map(String::as_str), Some("e1"));
    }

    #[test]
    fn test_legacy_aggregator_attribute_names_ara() {
        let expected = ProvenanceExpectation::new("infores:kp-a", SourceType::Primary, "aragorn");
        let resource = ResourceKey::ara("aragorn", "kp-a");

        let mut legacy = response(Value::Null);
        legacy["message"]["knowledge_graph"]["edges"]["e0"]["attributes"] = json!([
            {"attribute_type_id": "biolink:primary_knowledge_source", "value": "infores:kp-a"},
            {"attribute_type_id": "biolink:aggregator_knowledge_source", "value": ["infores:aragorn"]}
        ]);
        let result = checker().check(&resource, &edge(), answered(legacy), Some(&expected));
        assert_eq!(result.outcome, Outcome::Passed);
    }
}
