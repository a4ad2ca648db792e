//! Response compliance validation seam
//!
//! The engine treats schema and model compliance as a black box: a
//! [`ComplianceValidator`] looks at one raw TRAPI response and returns
//! [`ValidationMessages`] grouped by [`Severity`]. A full reasoner-validator
//! can be plugged in behind the trait; [`StructuralValidator`] is the built-in
//! shape-only default.
//!
//! # Examples
//!
//! ```rust
//! use trapi::validator::{ComplianceValidator, Severity, StructuralValidator};
//!
//! let validator = StructuralValidator::default();
//! let messages = validator.validate(&serde_json::json!({}), "1.4.0", None);
//! assert!(messages.has_severity(Severity::Error));
//! ```

use crate::version::SemVer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Information,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Information,
        Severity::Warning,
        Severity::Error,
        Severity::Critical,
    ];

    /// Severity named by the first segment of a dotted message code.
    ///
    /// `info.*` and `information.*` map to [`Severity::Information`]; anything
    /// unrecognised is treated as an error.
    pub fn from_code(code: &str) -> Severity {
        match code.split('.').next().unwrap_or_default() {
            "info" | "information" => Severity::Information,
            "warning" => Severity::Warning,
            "critical" => Severity::Critical,
            _ => Severity::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Information => "information",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub code: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ValidationMessage {
    pub fn new(code: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            severity: Severity::from_code(&code),
            code,
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)?;
        if !self.context.is_empty() {
            let parts: Vec<String> = self
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " ({})", parts.join(", "))?;
        }
        Ok(())
    }
}

/// Ordered collection of validation messages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationMessages {
    messages: Vec<ValidationMessage>,
}

impl ValidationMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, message: ValidationMessage) {
        if !self.messages.contains(&message) {
            self.messages.push(message);
        }
    }

    pub fn merge(&mut self, other: ValidationMessages) {
        for message in other.messages {
            self.report(message);
        }
    }

    pub fn has_severity(&self, severity: Severity) -> bool {
        self.messages.iter().any(|m| m.severity == severity)
    }

    pub fn has_critical(&self) -> bool {
        self.has_severity(Severity::Critical)
    }

    /// Any message at `error` or above
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity >= Severity::Error)
    }

    pub fn contains_code(&self, code: &str) -> bool {
        self.messages.iter().any(|m| m.code == code)
    }

    pub fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationMessage> {
        self.messages.iter().filter(move |m| m.severity == severity)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl From<Vec<ValidationMessage>> for ValidationMessages {
    fn from(messages: Vec<ValidationMessage>) -> Self {
        let mut collected = ValidationMessages::new();
        for message in messages {
            collected.report(message);
        }
        collected
    }
}

impl IntoIterator for ValidationMessages {
    type Item = ValidationMessage;
    type IntoIter = std::vec::IntoIter<ValidationMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

/// Judges whether one TRAPI response is schema and model compliant.
///
/// `model_version` of `None` means model validation is suppressed for the run.
pub trait ComplianceValidator: Send + Sync {
    fn validate(
        &self,
        response: &Value,
        schema_version: &str,
        model_version: Option<&str>,
    ) -> ValidationMessages;

    fn validator_name(&self) -> &'static str;
}

pub mod codes {
    pub const MESSAGE_MISSING: &str = "error.trapi.response.message.missing";
    pub const KNOWLEDGE_GRAPH_MALFORMED: &str = "error.trapi.response.knowledge_graph.malformed";
    pub const EDGE_MALFORMED: &str = "error.trapi.response.knowledge_graph.edge.malformed";
    pub const RESULTS_MALFORMED: &str = "error.trapi.response.results.malformed";
    pub const SCHEMA_VERSION_MISMATCH: &str = "warning.trapi.response.schema_version.mismatch";
    pub const MODEL_VERSION_MISMATCH: &str = "warning.trapi.response.biolink_version.mismatch";
    pub const PREDICATE_NOT_BIOLINK: &str = "error.knowledge_graph.edge.predicate.not_biolink";
    pub const CATEGORY_NOT_BIOLINK: &str = "warning.knowledge_graph.node.category.not_biolink";
    pub const RESULTS_EMPTY: &str = "info.trapi.response.results.empty";
}

/// Shape-only compliance checks.
///
/// Verifies the envelope, the knowledge graph edge triples and the results
/// list, compares declared versions, and (unless model validation is
/// suppressed) requires `biolink:` predicates and categories.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator {
    /// Skip schema and model version comparisons
    pub ignore_version_mismatch: bool,
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_versions(
        &self,
        response: &Value,
        schema_version: &str,
        model_version: Option<&str>,
        messages: &mut ValidationMessages,
    ) {
        if self.ignore_version_mismatch {
            return;
        }

        if let Some(declared) = response.get("schema_version").and_then(Value::as_str) {
            let same = match (declared.parse::<SemVer>(), schema_version.parse::<SemVer>()) {
                (Ok(a), Ok(b)) => a.same_minor(&b),
                _ => declared == schema_version,
            };
            if !same {
                messages.report(
                    ValidationMessage::new(codes::SCHEMA_VERSION_MISMATCH)
                        .with_context("expected", schema_version)
                        .with_context("found", declared),
                );
            }
        }

        if let (Some(expected), Some(declared)) = (
            model_version,
            response.get("biolink_version").and_then(Value::as_str),
        ) {
            if expected != declared {
                messages.report(
                    ValidationMessage::new(codes::MODEL_VERSION_MISMATCH)
                        .with_context("expected", expected)
                        .with_context("found", declared),
                );
            }
        }
    }

    fn check_knowledge_graph(
        &self,
        kg: &Value,
        check_model: bool,
        messages: &mut ValidationMessages,
    ) {
        if kg.is_null() {
            return;
        }

        let (nodes, edges) = match (kg.get("nodes"), kg.get("edges")) {
            (Some(Value::Object(nodes)), Some(Value::Object(edges))) => (nodes, edges),
            _ => {
                messages.report(ValidationMessage::new(codes::KNOWLEDGE_GRAPH_MALFORMED));
                return;
            }
        };

        for (edge_id, edge) in edges {
            let triple = ["subject", "predicate", "object"]
                .map(|field| edge.get(field).and_then(Value::as_str));
            let [Some(_), Some(predicate), Some(_)] = triple else {
                messages.report(
                    ValidationMessage::new(codes::EDGE_MALFORMED).with_context("edge_id", edge_id),
                );
                continue;
            };
            if check_model && !predicate.starts_with("biolink:") {
                messages.report(
                    ValidationMessage::new(codes::PREDICATE_NOT_BIOLINK)
                        .with_context("edge_id", edge_id)
                        .with_context("predicate", predicate),
                );
            }
        }

        if check_model {
            for (node_id, node) in nodes {
                let categories = node
                    .get("categories")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str);
                for category in categories {
                    if !category.starts_with("biolink:") {
                        messages.report(
                            ValidationMessage::new(codes::CATEGORY_NOT_BIOLINK)
                                .with_context("node_id", node_id)
                                .with_context("category", category),
                        );
                    }
                }
            }
        }
    }
}

impl ComplianceValidator for StructuralValidator {
    fn validate(
        &self,
        response: &Value,
        schema_version: &str,
        model_version: Option<&str>,
    ) -> ValidationMessages {
        let mut messages = ValidationMessages::new();

        let Some(message) = response.get("message").filter(|m| m.is_object()) else {
            messages.report(ValidationMessage::new(codes::MESSAGE_MISSING));
            return messages;
        };

        self.check_versions(response, schema_version, model_version, &mut messages);

        if let Some(kg) = message.get("knowledge_graph") {
            self.check_knowledge_graph(kg, model_version.is_some(), &mut messages);
        }

        match message.get("results") {
            Some(Value::Array(results)) if results.is_empty() => {
                messages.report(ValidationMessage::new(codes::RESULTS_EMPTY));
            }
            Some(Value::Array(_)) | Some(Value::Null) | None => {}
            Some(_) => messages.report(ValidationMessage::new(codes::RESULTS_MALFORMED)),
        }

        debug!(
            "{} validation produced {} message(s)",
            self.validator_name(),
            messages.len()
        );
        messages
    }

    fn validator_name(&self) -> &'static str {
        "structural"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_from_code() {
        assert_eq!(Severity::from_code("info.compliant"), Severity::Information);
        assert_eq!(
            Severity::from_code("warning.trapi.response.schema_version.mismatch"),
            Severity::Warning
        );
        assert_eq!(
            Severity::from_code("critical.trapi.response.unexpected_http_code"),
            Severity::Critical
        );
        assert_eq!(Severity::from_code("error.input_edge.predicate"), Severity::Error);
        assert_eq!(Severity::from_code("something.odd"), Severity::Error);
        assert!(Severity::Critical > Severity::Error);
    }

    #[test]
    fn test_messages_deduplicate_and_classify() {
        let mut messages = ValidationMessages::new();
        messages.report(ValidationMessage::new("warning.a"));
        messages.report(ValidationMessage::new("warning.a"));
        messages.report(ValidationMessage::new("info.b").with_context("k", "v"));
        assert_eq!(messages.len(), 2);
        assert!(!messages.has_errors());

        let mut other = ValidationMessages::new();
        other.report(ValidationMessage::new("critical.c"));
        messages.merge(other);
        assert!(messages.has_errors());
        assert!(messages.has_critical());
        assert!(messages.contains_code("info.b"));
        assert_eq!(messages.by_severity(Severity::Warning).count(), 1);
    }

    #[test]
    fn test_message_serialization() {
        let message = ValidationMessage::new("error.trapi.response.empty")
            .with_context("edge_id", "e0");
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["severity"], "error");
        assert_eq!(value["context"]["edge_id"], "e0");
        assert_eq!(message.to_string(), "error.trapi.response.empty (edge_id=e0)");
    }

    #[test]
    fn test_structural_validator_accepts_compliant_response() {
        let response = json!({
            "schema_version": "1.4.2",
            "biolink_version": "3.1.2",
            "message": {
                "knowledge_graph": {
                    "nodes": {"UBERON:0005453": {"categories": ["biolink:AnatomicalEntity"]}},
                    "edges": {"e0": {
                        "subject": "UBERON:0005453",
                        "predicate": "biolink:subclass_of",
                        "object": "UBERON:0035769"
                    }}
                },
                "results": [{"node_bindings": {}}]
            }
        });
        let messages = StructuralValidator::new().validate(&response, "1.4.0", Some("3.1.2"));
        assert!(messages.is_empty(), "unexpected: {:?}", messages);
    }

    #[test]
    fn test_structural_validator_flags_problems() {
        let response = json!({
            "schema_version": "1.3.0",
            "message": {
                "knowledge_graph": {
                    "nodes": {"X:1": {"categories": ["Gene"]}},
                    "edges": {
                        "e0": {"subject": "X:1", "predicate": "related", "object": "X:2"},
                        "e1": {"subject": "X:1"}
                    }
                },
                "results": {}
            }
        });
        let messages = StructuralValidator::new().validate(&response, "1.4.0", Some("3.1.2"));
        assert!(messages.contains_code(codes::SCHEMA_VERSION_MISMATCH));
        assert!(messages.contains_code(codes::PREDICATE_NOT_BIOLINK));
        assert!(messages.contains_code(codes::CATEGORY_NOT_BIOLINK));
        assert!(messages.contains_code(codes::EDGE_MALFORMED));
        assert!(messages.contains_code(codes::RESULTS_MALFORMED));
    }

    #[test]
    fn test_suppressed_model_validation_skips_biolink_checks() {
        let response = json!({
            "message": {
                "knowledge_graph": {
                    "nodes": {},
                    "edges": {"e0": {"subject": "X:1", "predicate": "related", "object": "X:2"}}
                }
            }
        });
        let messages = StructuralValidator::new().validate(&response, "1.4.0", None);
        assert!(!messages.has_errors());
    }

    #[test]
    fn test_missing_message_is_error() {
        let messages = StructuralValidator::new().validate(&json!({"status": "OK"}), "1.4.0", None);
        assert!(messages.contains_code(codes::MESSAGE_MISSING));
        assert!(messages.has_errors());
    }
}
