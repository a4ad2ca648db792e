use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Query graph node key bound to the subject of a one-hop query
pub const SUBJECT_NODE: &str = "a";
/// Query graph node key bound to the object of a one-hop query
pub const OBJECT_NODE: &str = "b";
/// Query graph edge key of a one-hop query
pub const ONE_HOP_EDGE: &str = "ab";

pub const PRIMARY_KNOWLEDGE_SOURCE: &str = "primary_knowledge_source";
pub const AGGREGATOR_KNOWLEDGE_SOURCE: &str = "aggregator_knowledge_source";
pub const KNOWLEDGE_SOURCE_ATTRIBUTE: &str = "biolink:knowledge_source";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Qualifier {
    pub qualifier_type_id: String,
    pub qualifier_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualifierConstraint {
    pub qualifier_set: Vec<Qualifier>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeConstraint {
    pub id: String,
    pub name: String,
    pub value: Value,
    pub operator: String,
}

impl AttributeConstraint {
    /// Restrict returned edges to those contributed by one knowledge source
    pub fn knowledge_source(infores: impl Into<String>) -> Self {
        Self {
            id: KNOWLEDGE_SOURCE_ATTRIBUTE.to_string(),
            name: "knowledge source".to_string(),
            value: Value::Array(vec![Value::String(infores.into())]),
            operator: "==".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

impl QNode {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            ids: None,
            categories: Some(vec![category.into()]),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.ids = Some(vec![id.into()]);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QEdge {
    pub subject: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicates: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub qualifier_constraints: Vec<QualifierConstraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attribute_constraints: Vec<AttributeConstraint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryGraph {
    pub nodes: BTreeMap<String, QNode>,
    pub edges: BTreeMap<String, QEdge>,
}

impl QueryGraph {
    /// Build the two-node, single-edge graph `a --predicate--> b`
    pub fn one_hop(subject: QNode, predicate: impl Into<String>, object: QNode) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(SUBJECT_NODE.to_string(), subject);
        nodes.insert(OBJECT_NODE.to_string(), object);

        let mut edges = BTreeMap::new();
        edges.insert(
            ONE_HOP_EDGE.to_string(),
            QEdge {
                subject: SUBJECT_NODE.to_string(),
                object: OBJECT_NODE.to_string(),
                predicates: Some(vec![predicate.into()]),
                qualifier_constraints: Vec::new(),
                attribute_constraints: Vec::new(),
            },
        );

        Self { nodes, edges }
    }

    pub fn one_hop_edge(&self) -> Option<&QEdge> {
        self.edges.get(ONE_HOP_EDGE)
    }

    pub fn one_hop_edge_mut(&mut self) -> Option<&mut QEdge> {
        self.edges.get_mut(ONE_HOP_EDGE)
    }

    /// Identifiers pinned on a query node, empty when the node is open
    pub fn node_ids(&self, node: &str) -> &[String] {
        self.nodes
            .get(node)
            .and_then(|n| n.ids.as_deref())
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub attribute_type_id: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalSource {
    pub resource_id: String,
    pub resource_role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_resource_ids: Option<Vec<String>>,
}

impl RetrievalSource {
    pub fn new(resource_id: impl Into<String>, resource_role: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            resource_role: resource_role.into(),
            upstream_resource_ids: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<RetrievalSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
}

impl Edge {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            sources: None,
            attributes: None,
        }
    }

    /// All `(role, resource_id)` attributions on the edge.
    ///
    /// TRAPI 1.4 `sources` entries come first, followed by the older
    /// `biolink:*_knowledge_source` attributes whose values may be a single
    /// CURIE or a list of them.
    pub fn knowledge_sources(&self) -> Vec<(String, String)> {
        let mut found = Vec::new();

        if let Some(sources) = &self.sources {
            for source in sources {
                found.push((source.resource_role.clone(), source.resource_id.clone()));
            }
        }

        if let Some(attributes) = &self.attributes {
            for attribute in attributes {
                let role = match attribute.attribute_type_id.strip_prefix("biolink:") {
                    Some(role) if role.ends_with("knowledge_source") => role,
                    _ => continue,
                };
                match &attribute.value {
                    Value::String(id) => found.push((role.to_string(), id.clone())),
                    Value::Array(ids) => {
                        for id in ids.iter().filter_map(Value::as_str) {
                            found.push((role.to_string(), id.to_string()));
                        }
                    }
                    _ => {}
                }
            }
        }

        found
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeGraph {
    #[serde(default)]
    pub nodes: HashMap<String, Node>,
    #[serde(default)]
    pub edges: HashMap<String, Edge>,
}

impl KnowledgeGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeBinding {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

/// One entry of a TRAPI `results` list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    #[serde(default)]
    pub node_bindings: HashMap<String, Vec<NodeBinding>>,
}

impl QueryResult {
    pub fn binds(&self, node: &str, id: &str) -> bool {
        self.node_bindings
            .get(node)
            .map(|bindings| {
                bindings
                    .iter()
                    .any(|b| b.id == id || b.query_id.as_deref() == Some(id))
            })
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_graph: Option<QueryGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_graph: Option<KnowledgeGraph>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<QueryResult>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biolink_version: Option<String>,
}

impl Query {
    pub fn new(query_graph: QueryGraph) -> Self {
        Self {
            message: Message {
                query_graph: Some(query_graph),
                knowledge_graph: Some(KnowledgeGraph::default()),
                results: Some(Vec::new()),
            },
            schema_version: None,
            biolink_version: None,
        }
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = Some(version.into());
        self
    }

    pub fn with_biolink_version(mut self, version: Option<String>) -> Self {
        self.biolink_version = version;
        self
    }

    pub fn query_graph(&self) -> Option<&QueryGraph> {
        self.message.query_graph.as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biolink_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Response {
    pub fn knowledge_graph(&self) -> Option<&KnowledgeGraph> {
        self.message.knowledge_graph.as_ref()
    }

    pub fn results(&self) -> &[QueryResult] {
        self.message.results.as_deref().unwrap_or(&[])
    }
}

/// Raw outcome of one HTTP exchange with a TRAPI endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_one_hop_query_serialization() {
        let graph = QueryGraph::one_hop(
            QNode::category("biolink:Gene").with_id("NCBIGene:1017"),
            "biolink:related_to",
            QNode::category("biolink:Disease"),
        );
        let query = Query::new(graph).with_schema_version("1.4.0");
        let value = serde_json::to_value(&query).unwrap();

        assert_eq!(value["schema_version"], "1.4.0");
        assert!(value.get("biolink_version").is_none());
        assert_eq!(
            value["message"]["query_graph"]["nodes"]["a"]["ids"][0],
            "NCBIGene:1017"
        );
        assert!(value["message"]["query_graph"]["nodes"]["b"]
            .get("ids")
            .is_none());
        assert_eq!(
            value["message"]["query_graph"]["edges"]["ab"]["predicates"][0],
            "biolink:related_to"
        );
        assert!(value["message"]["query_graph"]["edges"]["ab"]
            .get("qualifier_constraints")
            .is_none());
    }

    #[test]
    fn test_knowledge_sources_from_sources_and_attributes() {
        let edge: Edge = serde_json::from_value(json!({
            "subject": "CHEBI:3002",
            "predicate": "biolink:treats",
            "object": "MONDO:0005148",
            "sources": [
                {"resource_id": "infores:kp-a", "resource_role": "primary_knowledge_source"}
            ],
            "attributes": [
                {"attribute_type_id": "biolink:aggregator_knowledge_source", "value": ["infores:ara-x", "infores:ara-y"]},
                {"attribute_type_id": "biolink:publications", "value": ["PMID:1"]}
            ]
        }))
        .unwrap();

        let sources = edge.knowledge_sources();
        assert_eq!(sources.len(), 3);
        assert!(sources.contains(&(
            "primary_knowledge_source".to_string(),
            "infores:kp-a".to_string()
        )));
        assert!(sources.contains(&(
            "aggregator_knowledge_source".to_string(),
            "infores:ara-y".to_string()
        )));
    }

    #[test]
    fn test_result_binding_lookup() {
        let result: QueryResult = serde_json::from_value(json!({
            "node_bindings": {
                "a": [{"id": "UBERON:0005453"}],
                "b": [{"id": "UBERON:0035769", "query_id": "UBERON:0000001"}]
            }
        }))
        .unwrap();

        assert!(result.binds("a", "UBERON:0005453"));
        assert!(result.binds("b", "UBERON:0000001"));
        assert!(!result.binds("a", "UBERON:0035769"));
        assert!(!result.binds("c", "UBERON:0005453"));
    }

    #[test]
    fn test_response_tolerates_missing_sections() {
        let response: Response = serde_json::from_value(json!({"message": {}})).unwrap();
        assert!(response.knowledge_graph().is_none());
        assert!(response.results().is_empty());
    }
}
