#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use trapi::types::{OBJECT_NODE, SUBJECT_NODE};
use trapi::{HttpResponse, Query, TrapiClient, TrapiError, TrapiResult};

/// An assertion a mock KP knows about
#[derive(Debug, Clone)]
pub struct Triple {
    pub subject: String,
    pub subject_category: String,
    pub predicate: String,
    pub object: String,
    pub object_category: String,
}

impl Triple {
    pub fn new(subject: &str, subject_category: &str, predicate: &str, object: &str, object_category: &str) -> Self {
        Self {
            subject: subject.to_string(),
            subject_category: subject_category.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            object_category: object_category.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockKp {
    pub infores: String,
    pub role: &'static str,
    pub triples: Vec<Triple>,
}

/// How a mock KP reacts to queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Answer,
    /// A well-formed answer about unrelated entities
    Unrelated,
    Status(u16),
}

enum Service {
    Kp(MockKp, Behavior),
    /// ARA relaying whichever KP its knowledge source constraint names. A
    /// leaky ARA also returns an unattributed copy of every relayed edge.
    Ara { infores: String, leaky: bool },
}

/// In-memory stand-in for every HTTP service a run touches
pub struct MockNetwork {
    services: HashMap<String, Service>,
    documents: HashMap<String, Value>,
    inverses: Vec<(String, String)>,
    pub queries: Mutex<Vec<(String, Query)>>,
    pub probes: Mutex<Vec<String>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            documents: HashMap::new(),
            inverses: vec![
                ("biolink:subclass_of".to_string(), "biolink:superclass_of".to_string()),
                ("biolink:treats".to_string(), "biolink:treated_by".to_string()),
            ],
            queries: Mutex::new(Vec::new()),
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_kp(mut self, url: &str, kp: MockKp) -> Self {
        self.services.insert(url.to_string(), Service::Kp(kp, Behavior::Answer));
        self
    }

    pub fn with_broken_kp(mut self, url: &str, kp: MockKp, behavior: Behavior) -> Self {
        self.services.insert(url.to_string(), Service::Kp(kp, behavior));
        self
    }

    pub fn with_ara(mut self, url: &str, infores: &str) -> Self {
        let ara = Service::Ara {
            infores: infores.to_string(),
            leaky: false,
        };
        self.services.insert(url.to_string(), ara);
        self
    }

    pub fn with_leaky_ara(mut self, url: &str, infores: &str) -> Self {
        let ara = Service::Ara {
            infores: infores.to_string(),
            leaky: true,
        };
        self.services.insert(url.to_string(), ara);
        self
    }

    pub fn with_document(mut self, url: &str, document: Value) -> Self {
        self.documents.insert(url.to_string(), document);
        self
    }

    pub fn queries_to(&self, url: &str) -> Vec<Query> {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == url)
            .map(|(_, query)| query.clone())
            .collect()
    }

    fn inverse(&self, predicate: &str) -> Option<&str> {
        self.inverses.iter().find_map(|(a, b)| {
            if a == predicate {
                Some(b.as_str())
            } else if b == predicate {
                Some(a.as_str())
            } else {
                None
            }
        })
    }

    fn kp_named(&self, infores: &str) -> Option<&MockKp> {
        self.services.values().find_map(|service| match service {
            Service::Kp(kp, _) if kp.infores == infores => Some(kp),
            _ => None,
        })
    }

    /// Match the one-hop query against `kp`, in the asserted or inverse direction
    fn answer(&self, kp: &MockKp, query: &Query, relayed_by: Option<&str>) -> Value {
        let graph = query.query_graph().cloned().unwrap_or_default();
        let predicates = graph
            .one_hop_edge()
            .and_then(|edge| edge.predicates.clone())
            .unwrap_or_default();
        let subject_ids = graph.node_ids(SUBJECT_NODE).to_vec();
        let object_ids = graph.node_ids(OBJECT_NODE).to_vec();
        let pinned = |ids: &[String], id: &str| ids.is_empty() || ids.iter().any(|i| i == id);

        let mut nodes = Map::new();
        let mut edges = Map::new();
        let mut results = Vec::new();
        for (i, triple) in kp.triples.iter().enumerate() {
            let forward = predicates.iter().any(|p| p == &triple.predicate)
                && pinned(&subject_ids, &triple.subject)
                && pinned(&object_ids, &triple.object);
            let inverse = predicates
                .iter()
                .any(|p| self.inverse(p) == Some(triple.predicate.as_str()))
                && pinned(&subject_ids, &triple.object)
                && pinned(&object_ids, &triple.subject);
            if !forward && !inverse {
                continue;
            }

            nodes.insert(triple.subject.clone(), json!({"categories": [triple.subject_category]}));
            nodes.insert(triple.object.clone(), json!({"categories": [triple.object_category]}));

            let mut sources = vec![json!({"resource_id": format!("infores:{}", kp.infores), "resource_role": kp.role})];
            if let Some(ara) = relayed_by {
                sources.push(json!({
                    "resource_id": format!("infores:{}", ara),
                    "resource_role": "aggregator_knowledge_source"
                }));
            }
            let edge_id = format!("e{}", i);
            edges.insert(
                edge_id.clone(),
                json!({
                    "subject": triple.subject,
                    "predicate": triple.predicate,
                    "object": triple.object,
                    "sources": sources
                }),
            );

            let (a, b) = if forward {
                (&triple.subject, &triple.object)
            } else {
                (&triple.object, &triple.subject)
            };
            results.push(json!({
                "node_bindings": {"a": [{"id": a}], "b": [{"id": b}]},
                "edge_bindings": {"ab": [{"id": edge_id}]}
            }));
        }

        json!({
            "schema_version": query.schema_version,
            "biolink_version": query.biolink_version,
            "message": {
                "query_graph": graph,
                "knowledge_graph": {"nodes": nodes, "edges": edges},
                "results": results
            }
        })
    }
}

fn unavailable(url: &str) -> TrapiError {
    TrapiError::ServiceUnavailable {
        message: format!("Cannot connect to {}", url),
    }
}

fn with_unattributed_copies(mut body: Value) -> Value {
    if let Some(edges) = body["message"]["knowledge_graph"]["edges"].as_object_mut() {
        let copies: Vec<(String, Value)> = edges
            .iter()
            .map(|(id, edge)| {
                let mut copy = edge.clone();
                copy["sources"] = json!([
                    {"resource_id": "infores:someone-else", "resource_role": "primary_knowledge_source"}
                ]);
                (format!("{}-copy", id), copy)
            })
            .collect();
        edges.extend(copies);
    }
    body
}

/// The KP an ARA query is constrained to
fn constrained_kp(query: &Query) -> Option<String> {
    let edge = query.query_graph()?.one_hop_edge()?;
    let constraint = edge.attribute_constraints.first()?;
    let id = constraint.value.get(0)?.as_str()?;
    Some(id.trim_start_matches("infores:").to_string())
}

#[async_trait]
impl TrapiClient for MockNetwork {
    async fn query(&self, endpoint: &str, query: &Query) -> TrapiResult<HttpResponse> {
        self.queries
            .lock()
            .unwrap()
            .push((endpoint.to_string(), query.clone()));

        let body = match self.services.get(endpoint) {
            None => return Err(unavailable(endpoint)),
            Some(Service::Kp(kp, Behavior::Answer)) => self.answer(kp, query, None),
            Some(Service::Kp(_, Behavior::Unrelated)) => json!({
                "schema_version": query.schema_version,
                "biolink_version": query.biolink_version,
                "message": {
                    "knowledge_graph": {
                        "nodes": {
                            "NCBIGene:1": {"categories": ["biolink:Gene"]},
                            "NCBIGene:2": {"categories": ["biolink:Gene"]}
                        },
                        "edges": {
                            "x": {"subject": "NCBIGene:1", "predicate": "biolink:related_to", "object": "NCBIGene:2"}
                        }
                    },
                    "results": [{"node_bindings": {"a": [{"id": "NCBIGene:1"}], "b": [{"id": "NCBIGene:2"}]}}]
                }
            }),
            Some(Service::Kp(_, Behavior::Status(status))) => {
                return Ok(HttpResponse {
                    status: *status,
                    body: None,
                })
            }
            Some(Service::Ara { infores, leaky }) => {
                match constrained_kp(query).and_then(|kp| self.kp_named(&kp)) {
                    Some(kp) if *leaky => with_unattributed_copies(self.answer(kp, query, Some(infores))),
                    Some(kp) => self.answer(kp, query, Some(infores)),
                    None => json!({"message": {"knowledge_graph": {"nodes": {}, "edges": {}}, "results": []}}),
                }
            }
        };

        Ok(HttpResponse {
            status: 200,
            body: Some(body),
        })
    }

    async fn meta_knowledge_graph(&self, endpoint: &str) -> TrapiResult<()> {
        self.probes.lock().unwrap().push(endpoint.to_string());
        if self.services.contains_key(endpoint) {
            Ok(())
        } else {
            Err(unavailable(endpoint))
        }
    }

    async fn fetch_json(&self, url: &str) -> TrapiResult<Value> {
        self.documents.get(url).cloned().ok_or_else(|| unavailable(url))
    }

    fn client_name(&self) -> &'static str {
        "mock"
    }
}

/// A registry hit in SmartAPI form
pub fn registry_hit(infores: &str, component: &str, servers: Value, test_data: Value) -> Value {
    json!({
        "info": {
            "title": format!("{} service", infores),
            "x-translator": {
                "infores": format!("infores:{}", infores),
                "component": component,
                "biolink-version": "3.1.2"
            },
            "x-trapi": {"version": "1.4.0", "test_data_location": test_data}
        },
        "servers": servers
    })
}

pub fn production(url: &str) -> Value {
    json!([{"url": url, "x-maturity": "production"}])
}
