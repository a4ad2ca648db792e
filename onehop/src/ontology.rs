//! Hierarchy lookups used to generalize test edges
//!
//! [`BiolinkModel`] answers category and predicate questions (parents,
//! inverses) from a compact model document. [`EntityAncestry`] answers the
//! entity question, "which ontology term is the parent of this CURIE", and
//! [`OntologyContext`] holds both for one run, with entity parents resolved
//! up front so that transforms stay pure.

use crate::edges::{TestEdge, TransformKind};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use trapi::{QNode, Query, QueryGraph, Response, TrapiClient, TrapiError};

const BUNDLED_MODEL: &str = include_str!("../data/biolink_model.json");

/// Identifier namespaces backed by a real class hierarchy
pub const ONTOLOGY_PREFIXES: [&str; 7] = ["CHEBI", "HP", "MONDO", "UBERON", "CL", "EFO", "NCIT"];

const SUBCLASS_OF: &str = "biolink:subclass_of";

#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("Failed to read Biolink model {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed Biolink model: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Ontology lookup failed: {0}")]
    Lookup(#[from] TrapiError),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Element {
    #[serde(default)]
    is_a: Option<String>,
    #[serde(default)]
    inverse: Option<String>,
    #[serde(default)]
    symmetric: bool,
    #[serde(default)]
    mixin: bool,
}

#[derive(Debug, Deserialize)]
struct ModelDocument {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    categories: HashMap<String, Element>,
    #[serde(default)]
    predicates: HashMap<String, Element>,
}

#[derive(Debug, Clone)]
pub struct BiolinkModel {
    version: Option<String>,
    categories: HashMap<String, Element>,
    predicates: HashMap<String, Element>,
    inverses: HashMap<String, String>,
}

impl BiolinkModel {
    /// The hierarchy subset compiled into the binary
    pub fn bundled() -> Result<Self, OntologyError> {
        Self::from_json(BUNDLED_MODEL)
    }

    pub async fn load(path: &Path) -> Result<Self, OntologyError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| OntologyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, OntologyError> {
        let document: ModelDocument = serde_json::from_str(text)?;

        // Inverses are declared on one side only
        let mut inverses = HashMap::new();
        for (name, element) in &document.predicates {
            if let Some(inverse) = &element.inverse {
                inverses.insert(name.clone(), inverse.clone());
                inverses
                    .entry(inverse.clone())
                    .or_insert_with(|| name.clone());
            }
        }

        Ok(Self {
            version: document.version,
            categories: document.categories,
            predicates: document.predicates,
            inverses,
        })
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn is_category(&self, name: &str) -> bool {
        self.categories.contains_key(name)
    }

    pub fn is_predicate(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }

    /// Predicate and categories of `edge` that this model does not define
    pub fn unknown_terms(&self, edge: &TestEdge) -> Vec<String> {
        let mut unknown = Vec::new();
        if !self.is_predicate(&edge.predicate) {
            unknown.push(edge.predicate.clone());
        }
        for category in [&edge.subject_category, &edge.object_category] {
            if !self.is_category(category) && !unknown.contains(category) {
                unknown.push(category.clone());
            }
        }
        unknown
    }

    /// Registered inverse of `predicate`; symmetric predicates are their own
    pub fn inverse(&self, predicate: &str) -> Option<&str> {
        let (name, element) = self.predicates.get_key_value(predicate)?;
        if element.symmetric {
            return Some(name.as_str());
        }
        self.inverses.get(predicate).map(String::as_str)
    }

    /// A root has no `is_a` parent and is not a mixin
    pub fn is_root(&self, name: &str) -> bool {
        self.categories
            .get(name)
            .or_else(|| self.predicates.get(name))
            .map(|element| element.is_a.is_none() && !element.mixin)
            .unwrap_or(false)
    }

    pub fn parent_category(&self, category: &str) -> Option<&str> {
        non_root_parent(&self.categories, category)
    }

    pub fn parent_predicate(&self, predicate: &str) -> Option<&str> {
        non_root_parent(&self.predicates, predicate)
    }
}

fn non_root_parent<'a>(elements: &'a HashMap<String, Element>, name: &str) -> Option<&'a str> {
    let parent = elements.get(name)?.is_a.as_deref()?;
    let grandparent = elements.get(parent)?.is_a.as_ref();
    grandparent.map(|_| parent)
}

fn prefix(curie: &str) -> Option<&str> {
    curie.split_once(':').map(|(prefix, _)| prefix)
}

/// Subclass ancestors of an ontology term
#[async_trait]
pub trait EntityAncestry: Send + Sync {
    /// Every term the entity is a subclass of, within `category`
    async fn ancestors(&self, curie: &str, category: &str) -> Result<Vec<String>, OntologyError>;
}

/// Answers ancestry questions with a `subclass_of` TRAPI query
pub struct OntologyKp {
    client: Arc<dyn TrapiClient>,
    url: String,
}

impl OntologyKp {
    pub fn new(client: Arc<dyn TrapiClient>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl EntityAncestry for OntologyKp {
    async fn ancestors(&self, curie: &str, category: &str) -> Result<Vec<String>, OntologyError> {
        let graph = QueryGraph::one_hop(
            QNode::default().with_id(curie),
            SUBCLASS_OF,
            QNode::category(category),
        );
        let reply = self.client.query(&self.url, &Query::new(graph)).await?;
        if !reply.is_success() {
            return Err(OntologyError::Lookup(TrapiError::HttpStatus {
                url: self.url.clone(),
                status: reply.status,
            }));
        }
        let Some(body) = reply.body else {
            return Ok(Vec::new());
        };
        let response: Response = serde_json::from_value(body)?;

        Ok(response
            .results()
            .iter()
            .filter_map(|result| result.node_bindings.get(trapi::types::OBJECT_NODE))
            .filter_map(|bindings| bindings.first())
            .map(|binding| binding.id.clone())
            .collect())
    }
}

/// Ancestors sharing the term's own namespace, the term itself excluded
async fn namespace_ancestors(
    ancestry: &dyn EntityAncestry,
    curie: &str,
    category: &str,
) -> Result<Vec<String>, OntologyError> {
    let namespace = prefix(curie);
    let mut ancestors = ancestry.ancestors(curie, category).await?;
    ancestors.retain(|id| id != curie && prefix(id) == namespace);
    Ok(ancestors)
}

/// The closest same-namespace parent of an ontology term.
///
/// Closest means the ancestor that itself has the most ancestors. Terms
/// outside [`ONTOLOGY_PREFIXES`] have no parent.
pub async fn entity_parent(
    ancestry: &dyn EntityAncestry,
    curie: &str,
    category: &str,
) -> Result<Option<String>, OntologyError> {
    if !prefix(curie).is_some_and(|p| ONTOLOGY_PREFIXES.contains(&p)) {
        return Ok(None);
    }

    let mut closest: Option<(usize, String)> = None;
    for ancestor in namespace_ancestors(ancestry, curie, category).await? {
        let depth = namespace_ancestors(ancestry, &ancestor, category).await?.len();
        if depth == 0 {
            continue;
        }
        let candidate = (depth, ancestor);
        if closest.as_ref().map_or(true, |best| candidate > *best) {
            closest = Some(candidate);
        }
    }
    Ok(closest.map(|(_, id)| id))
}

/// Everything transforms need to know about hierarchies during one run
#[derive(Debug, Clone)]
pub struct OntologyContext {
    model: Arc<BiolinkModel>,
    entity_parents: HashMap<(String, String), String>,
}

impl OntologyContext {
    pub fn new(model: Arc<BiolinkModel>) -> Self {
        Self {
            model,
            entity_parents: HashMap::new(),
        }
    }

    pub fn with_entity_parent(
        mut self,
        curie: impl Into<String>,
        category: impl Into<String>,
        parent: impl Into<String>,
    ) -> Self {
        self.entity_parents
            .insert((curie.into(), category.into()), parent.into());
        self
    }

    pub fn model(&self) -> &BiolinkModel {
        &self.model
    }

    pub fn entity_parent(&self, curie: &str, category: &str) -> Option<&str> {
        self.entity_parents
            .get(&(curie.to_string(), category.to_string()))
            .map(String::as_str)
    }

    /// Resolve entity parents for every edge that can still use them.
    ///
    /// At most `max_in_flight` lookups run at once. Lookup failures leave
    /// the entity without a parent, which makes the raise-entity transforms
    /// inapplicable for it.
    pub async fn prefetch(
        model: Arc<BiolinkModel>,
        ancestry: Option<&dyn EntityAncestry>,
        edges: &[TestEdge],
        max_in_flight: usize,
    ) -> Self {
        let mut context = Self::new(model);
        let Some(ancestry) = ancestry else {
            return context;
        };

        let mut wanted: HashSet<(String, String)> = HashSet::new();
        for edge in edges.iter().filter(|edge| !edge.is_noncompliant()) {
            if !edge.excludes(TransformKind::RaiseSubjectEntity) {
                wanted.insert((edge.subject_id.clone(), edge.subject_category.clone()));
            }
            if !edge.excludes(TransformKind::RaiseObjectEntity) {
                wanted.insert((edge.object_id.clone(), edge.object_category.clone()));
            }
        }

        let lookups = wanted.into_iter().map(|(curie, category)| async move {
            let parent = entity_parent(ancestry, &curie, &category).await;
            (curie, category, parent)
        });

        let found: Vec<_> = stream::iter(lookups)
            .buffer_unordered(max_in_flight.max(1))
            .collect()
            .await;
        for (curie, category, parent) in found {
            match parent {
                Ok(Some(parent)) => {
                    debug!("{} [{}] raises to {}", curie, category, parent);
                    context.entity_parents.insert((curie, category), parent);
                }
                Ok(None) => {}
                Err(e) => warn!("No parent for {} [{}]: {}", curie, category, e),
            }
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::BTreeSet;
    use trapi::{HttpResponse, TrapiResult};

    fn model() -> BiolinkModel {
        BiolinkModel::bundled().unwrap()
    }

    #[test]
    fn test_inverse_lookup() {
        let model = model();
        assert_eq!(model.inverse("biolink:subclass_of"), Some("biolink:superclass_of"));
        assert_eq!(model.inverse("biolink:superclass_of"), Some("biolink:subclass_of"));
        assert_eq!(model.inverse("biolink:interacts_with"), Some("biolink:interacts_with"));
        assert_eq!(model.inverse("biolink:not_a_predicate"), None);
    }

    #[test]
    fn test_parents_stop_below_the_root() {
        let model = model();
        assert_eq!(
            model.parent_category("biolink:AnatomicalEntity"),
            Some("biolink:OrganismalEntity")
        );
        assert_eq!(model.parent_category("biolink:NamedThing"), None);
        assert_eq!(model.parent_category("biolink:Unknown"), None);
        assert!(model.is_root("biolink:Entity"));
        assert!(!model.is_root("biolink:GeneOrGeneProduct"));

        assert_eq!(model.parent_predicate("biolink:causes"), Some("biolink:contributes_to"));
        assert_eq!(model.parent_predicate("biolink:related_to"), None);
        assert_eq!(model.parent_predicate("biolink:related_to_at_instance_level"), None);
    }

    struct MapAncestry(HashMap<String, Vec<String>>);

    #[async_trait]
    impl EntityAncestry for MapAncestry {
        async fn ancestors(&self, curie: &str, _category: &str) -> Result<Vec<String>, OntologyError> {
            Ok(self.0.get(curie).cloned().unwrap_or_default())
        }
    }

    fn ancestry() -> MapAncestry {
        let mut map = HashMap::new();
        map.insert(
            "UBERON:0005453".to_string(),
            vec![
                "UBERON:0005453".to_string(),
                "UBERON:0000061".to_string(),
                "UBERON:0000465".to_string(),
                "UBERON:0001062".to_string(),
                "CARO:0000000".to_string(),
            ],
        );
        map.insert(
            "UBERON:0000061".to_string(),
            vec!["UBERON:0000465".to_string(), "UBERON:0001062".to_string()],
        );
        map.insert("UBERON:0000465".to_string(), vec!["UBERON:0001062".to_string()]);
        MapAncestry(map)
    }

    #[tokio::test]
    async fn test_entity_parent_picks_deepest_ancestor() {
        let parent = entity_parent(&ancestry(), "UBERON:0005453", "biolink:AnatomicalEntity")
            .await
            .unwrap();
        assert_eq!(parent.as_deref(), Some("UBERON:0000061"));

        let none = entity_parent(&ancestry(), "NCBIGene:1017", "biolink:Gene")
            .await
            .unwrap();
        assert_eq!(none, None);
    }

    #[tokio::test]
    async fn test_prefetch_honours_exclusions() {
        let edge = TestEdge {
            idx: 0,
            subject_id: "UBERON:0005453".to_string(),
            subject_category: "biolink:AnatomicalEntity".to_string(),
            predicate: "biolink:subclass_of".to_string(),
            object_id: "UBERON:0000061".to_string(),
            object_category: "biolink:AnatomicalEntity".to_string(),
            association: None,
            qualifiers: Vec::new(),
            exclude_tests: BTreeSet::from([TransformKind::RaiseObjectEntity]),
            location: "kp.json".to_string(),
            pre_validation: Default::default(),
        };
        let ancestry = ancestry();
        let context =
            OntologyContext::prefetch(Arc::new(model()), Some(&ancestry), &[edge], 4).await;

        assert_eq!(
            context.entity_parent("UBERON:0005453", "biolink:AnatomicalEntity"),
            Some("UBERON:0000061")
        );
        assert_eq!(
            context.entity_parent("UBERON:0000061", "biolink:AnatomicalEntity"),
            None
        );
    }

    struct OntologyClient;

    #[async_trait]
    impl TrapiClient for OntologyClient {
        async fn query(&self, endpoint: &str, query: &Query) -> TrapiResult<HttpResponse> {
            assert_eq!(endpoint, "https://ontology.example.org");
            let graph = query.query_graph().unwrap();
            assert_eq!(graph.node_ids("a"), ["HP:0000118".to_string()]);
            Ok(HttpResponse {
                status: 200,
                body: Some(json!({
                    "message": {
                        "results": [
                            {"node_bindings": {"a": [{"id": "HP:0000118"}], "b": [{"id": "HP:0000001"}]}}
                        ]
                    }
                })),
            })
        }

        async fn meta_knowledge_graph(&self, _endpoint: &str) -> TrapiResult<()> {
            Ok(())
        }

        async fn fetch_json(&self, _url: &str) -> TrapiResult<Value> {
            Ok(Value::Null)
        }

        fn client_name(&self) -> &'static str {
            "ontology"
        }
    }

    #[tokio::test]
    async fn test_ontology_kp_reads_object_bindings() {
        let kp = OntologyKp::new(Arc::new(OntologyClient), "https://ontology.example.org");
        let ancestors = kp
            .ancestors("HP:0000118", "biolink:PhenotypicFeature")
            .await
            .unwrap();
        assert_eq!(ancestors, vec!["HP:0000001".to_string()]);
    }

    #[test]
    fn test_model_file_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, BUNDLED_MODEL).unwrap();

        let model = tokio_test::block_on(BiolinkModel::load(&path)).unwrap();
        assert_eq!(model.version(), BiolinkModel::bundled().unwrap().version());

        let missing = tokio_test::block_on(BiolinkModel::load(&dir.path().join("absent.json")));
        assert!(matches!(missing, Err(OntologyError::Io { .. })));
    }
}
