//! Query derivations for one test edge
//!
//! Each [`TransformKind`] has one [`TransformDescriptor`] in the
//! [`TransformRegistry`]; its derive function turns a [`TestEdge`] into a
//! [`OneHopQuery`] or explains why the edge does not support it.

use crate::edges::{TestEdge, TransformKind};
use crate::ontology::OntologyContext;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use trapi::types::{OBJECT_NODE, SUBJECT_NODE};
use trapi::{QNode, Qualifier, QualifierConstraint, QueryGraph};

/// Which end of the edge is pinned by identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupDirection {
    /// Subject pinned, object expected back on node `b`
    ObjectBySubject,
    /// Object pinned, subject expected back on node `a`
    SubjectByObject,
}

/// A one-hop question in edge terms, before it becomes a TRAPI message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHopQuery {
    pub subject_id: String,
    pub subject_category: String,
    pub predicate: String,
    pub object_id: String,
    pub object_category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifiers: Vec<Qualifier>,
    pub direction: LookupDirection,
}

impl OneHopQuery {
    pub fn from_edge(edge: &TestEdge, direction: LookupDirection) -> Self {
        Self {
            subject_id: edge.subject_id.clone(),
            subject_category: edge.subject_category.clone(),
            predicate: edge.predicate.clone(),
            object_id: edge.object_id.clone(),
            object_category: edge.object_category.clone(),
            qualifiers: edge.qualifiers.clone(),
            direction,
        }
    }

    pub fn input_node(&self) -> &'static str {
        match self.direction {
            LookupDirection::ObjectBySubject => SUBJECT_NODE,
            LookupDirection::SubjectByObject => OBJECT_NODE,
        }
    }

    pub fn output_node(&self) -> &'static str {
        match self.direction {
            LookupDirection::ObjectBySubject => OBJECT_NODE,
            LookupDirection::SubjectByObject => SUBJECT_NODE,
        }
    }

    pub fn input_id(&self) -> &str {
        match self.direction {
            LookupDirection::ObjectBySubject => &self.subject_id,
            LookupDirection::SubjectByObject => &self.object_id,
        }
    }

    /// Identifier that must come back bound to the output node
    pub fn output_id(&self) -> &str {
        match self.direction {
            LookupDirection::ObjectBySubject => &self.object_id,
            LookupDirection::SubjectByObject => &self.subject_id,
        }
    }

    /// Both nodes carry their category; only the input node carries an id
    pub fn to_query_graph(&self) -> QueryGraph {
        let mut subject = QNode::category(&self.subject_category);
        let mut object = QNode::category(&self.object_category);
        match self.direction {
            LookupDirection::ObjectBySubject => subject = subject.with_id(&self.subject_id),
            LookupDirection::SubjectByObject => object = object.with_id(&self.object_id),
        }

        let mut graph = QueryGraph::one_hop(subject, &self.predicate, object);
        if !self.qualifiers.is_empty() {
            if let Some(edge) = graph.one_hop_edge_mut() {
                edge.qualifier_constraints.push(QualifierConstraint {
                    qualifier_set: self.qualifiers.clone(),
                });
            }
        }
        graph
    }
}

/// Swap `subject_*` and `object_*` qualifier types
fn swap_qualifier_type(type_id: &str) -> String {
    let (namespace, name) = match type_id.split_once(':') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, type_id),
    };
    let swapped = if let Some(rest) = name.strip_prefix("subject_") {
        format!("object_{}", rest)
    } else if let Some(rest) = name.strip_prefix("object_") {
        format!("subject_{}", rest)
    } else {
        name.to_string()
    };
    match namespace {
        Some(namespace) => format!("{}:{}", namespace, swapped),
        None => swapped,
    }
}

/// Turn `query` around: subject and object trade places and the predicate
/// becomes `inverse_predicate`. The pinned node stays the subject.
pub fn invert_query(query: &OneHopQuery, inverse_predicate: &str) -> OneHopQuery {
    OneHopQuery {
        subject_id: query.object_id.clone(),
        subject_category: query.object_category.clone(),
        predicate: inverse_predicate.to_string(),
        object_id: query.subject_id.clone(),
        object_category: query.subject_category.clone(),
        qualifiers: query
            .qualifiers
            .iter()
            .map(|q| Qualifier {
                qualifier_type_id: swap_qualifier_type(&q.qualifier_type_id),
                qualifier_value: q.qualifier_value.clone(),
            })
            .collect(),
        direction: query.direction,
    }
}

/// Why an edge supports no variant of some kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inapplicable {
    pub kind: TransformKind,
    pub reason: String,
}

/// One derived query of one test edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVariant {
    pub edge_idx: usize,
    pub kind: TransformKind,
    pub query: OneHopQuery,
}

/// Everything the registry decided for one edge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantPlan {
    pub variants: Vec<TestVariant>,
    pub inapplicable: Vec<Inapplicable>,
    pub excluded: Vec<TransformKind>,
    /// Edge terms missing from the loaded Biolink model
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_terms: Vec<String>,
}

pub type DeriveFn = fn(&TestEdge, &OntologyContext) -> Result<OneHopQuery, String>;

#[derive(Clone)]
pub struct TransformDescriptor {
    pub kind: TransformKind,
    pub description: &'static str,
    derive: DeriveFn,
}

impl TransformDescriptor {
    pub fn new(kind: TransformKind, description: &'static str, derive: DeriveFn) -> Self {
        Self {
            kind,
            description,
            derive,
        }
    }

    pub fn derive(&self, edge: &TestEdge, ontology: &OntologyContext) -> Result<OneHopQuery, Inapplicable> {
        (self.derive)(edge, ontology).map_err(|reason| Inapplicable {
            kind: self.kind,
            reason,
        })
    }
}

impl std::fmt::Debug for TransformDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformDescriptor")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .finish()
    }
}

fn by_subject(edge: &TestEdge, _: &OntologyContext) -> Result<OneHopQuery, String> {
    Ok(OneHopQuery::from_edge(edge, LookupDirection::ObjectBySubject))
}

fn by_object(edge: &TestEdge, _: &OntologyContext) -> Result<OneHopQuery, String> {
    Ok(OneHopQuery::from_edge(edge, LookupDirection::SubjectByObject))
}

fn inverse_by_new_subject(edge: &TestEdge, ontology: &OntologyContext) -> Result<OneHopQuery, String> {
    let inverse = ontology
        .model()
        .inverse(&edge.predicate)
        .ok_or_else(|| format!("predicate {} has no registered inverse", edge.predicate))?;
    let forward = OneHopQuery::from_edge(edge, LookupDirection::ObjectBySubject);
    Ok(invert_query(&forward, inverse))
}

fn raise_subject_entity(edge: &TestEdge, ontology: &OntologyContext) -> Result<OneHopQuery, String> {
    let parent = ontology
        .entity_parent(&edge.subject_id, &edge.subject_category)
        .ok_or_else(|| {
            format!(
                "subject {} [{}] does not map onto a parent ontology term",
                edge.subject_id, edge.subject_category
            )
        })?;
    let mut query = OneHopQuery::from_edge(edge, LookupDirection::ObjectBySubject);
    query.subject_id = parent.to_string();
    Ok(query)
}

fn raise_object_entity(edge: &TestEdge, ontology: &OntologyContext) -> Result<OneHopQuery, String> {
    let parent = ontology
        .entity_parent(&edge.object_id, &edge.object_category)
        .ok_or_else(|| {
            format!(
                "object {} [{}] does not map onto a parent ontology term",
                edge.object_id, edge.object_category
            )
        })?;
    let mut query = OneHopQuery::from_edge(edge, LookupDirection::SubjectByObject);
    query.object_id = parent.to_string();
    Ok(query)
}

fn raise_object_by_subject(edge: &TestEdge, ontology: &OntologyContext) -> Result<OneHopQuery, String> {
    let parent = ontology
        .model()
        .parent_category(&edge.object_category)
        .ok_or_else(|| format!("object category {} has no non-root is_a parent", edge.object_category))?;
    let mut query = OneHopQuery::from_edge(edge, LookupDirection::ObjectBySubject);
    query.object_category = parent.to_string();
    Ok(query)
}

fn raise_predicate_by_subject(edge: &TestEdge, ontology: &OntologyContext) -> Result<OneHopQuery, String> {
    let parent = ontology
        .model()
        .parent_predicate(&edge.predicate)
        .ok_or_else(|| format!("predicate {} has no non-root is_a parent", edge.predicate))?;
    let mut query = OneHopQuery::from_edge(edge, LookupDirection::ObjectBySubject);
    query.predicate = parent.to_string();
    Ok(query)
}

/// Ordered table of transform descriptors
#[derive(Debug, Clone)]
pub struct TransformRegistry {
    descriptors: Vec<TransformDescriptor>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    /// All seven derivations
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(TransformDescriptor::new(
            TransformKind::BySubject,
            "Look up the object given the subject and predicate",
            by_subject,
        ));
        registry.register(TransformDescriptor::new(
            TransformKind::ByObject,
            "Look up the subject given the object and predicate",
            by_object,
        ));
        registry.register(TransformDescriptor::new(
            TransformKind::InverseByNewSubject,
            "Invert the predicate, then look up the original subject given the original object",
            inverse_by_new_subject,
        ));
        registry.register(TransformDescriptor::new(
            TransformKind::RaiseSubjectEntity,
            "Replace the subject with its parent ontology term and look up the object",
            raise_subject_entity,
        ));
        registry.register(TransformDescriptor::new(
            TransformKind::RaiseObjectEntity,
            "Replace the object with its parent ontology term and look up the subject",
            raise_object_entity,
        ));
        registry.register(TransformDescriptor::new(
            TransformKind::RaiseObjectBySubject,
            "Widen the object category to its parent and look up the object given the subject",
            raise_object_by_subject,
        ));
        registry.register(TransformDescriptor::new(
            TransformKind::RaisePredicateBySubject,
            "Widen the predicate to its parent and look up the object given the subject",
            raise_predicate_by_subject,
        ));
        registry
    }

    /// Add a descriptor, replacing any earlier one of the same kind
    pub fn register(&mut self, descriptor: TransformDescriptor) {
        match self.descriptors.iter_mut().find(|d| d.kind == descriptor.kind) {
            Some(existing) => *existing = descriptor,
            None => self.descriptors.push(descriptor),
        }
    }

    pub fn get(&self, kind: TransformKind) -> Option<&TransformDescriptor> {
        self.descriptors.iter().find(|d| d.kind == kind)
    }

    pub fn descriptors(&self) -> &[TransformDescriptor] {
        &self.descriptors
    }

    /// Derive every variant the edge supports and has not excluded
    pub fn generate(&self, edge: &TestEdge, ontology: &OntologyContext) -> VariantPlan {
        let mut plan = VariantPlan {
            unknown_terms: ontology.model().unknown_terms(edge),
            ..VariantPlan::default()
        };
        if !plan.unknown_terms.is_empty() {
            warn!(
                "Edge {} uses terms missing from the Biolink model: {}",
                edge.idx,
                plan.unknown_terms.join(", ")
            );
        }
        for descriptor in &self.descriptors {
            if edge.excludes(descriptor.kind) {
                plan.excluded.push(descriptor.kind);
                continue;
            }
            match descriptor.derive(edge, ontology) {
                Ok(query) => plan.variants.push(TestVariant {
                    edge_idx: edge.idx,
                    kind: descriptor.kind,
                    query,
                }),
                Err(mut inapplicable) => {
                    if !plan.unknown_terms.is_empty() {
                        inapplicable.reason = format!(
                            "{} (unknown to the model: {})",
                            inapplicable.reason,
                            plan.unknown_terms.join(", ")
                        );
                    }
                    debug!(
                        "{} not applicable to edge {}: {}",
                        inapplicable.kind, edge.idx, inapplicable.reason
                    );
                    plan.inapplicable.push(inapplicable);
                }
            }
        }
        plan
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
