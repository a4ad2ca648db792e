//! Endpoint resolution
//!
//! Each resource walks `Unresolved -> EnvironmentSelected -> EndpointProbed`
//! and ends `Live` or `Unreachable`. Probes run in registry order and stop
//! at the first endpoint that answers.

use crate::registry::{Environment, RegistryEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use trapi::TrapiClient;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionError {
    #[error("{resource} declares no endpoint in the {environment} environment")]
    EnvironmentNotDeclared {
        resource: String,
        environment: Environment,
    },

    #[error("{resource} has no test data for the {environment} environment")]
    NoTestData {
        resource: String,
        environment: Environment,
    },

    #[error("{resource} declares no environment with both endpoints and test data")]
    NoEnvironment { resource: String },

    #[error("No live endpoint for {resource} in {environment}: {}", causes.join("; "))]
    Unreachable {
        resource: String,
        environment: Environment,
        causes: Vec<String>,
    },

    #[error("Resolution of {resource} aborted by the run deadline")]
    Aborted { resource: String },
}

/// A live endpoint chosen for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEndpoint {
    pub resource: String,
    pub environment: Environment,
    pub url: String,
    /// Test data documents that go with the chosen environment
    pub test_data: Vec<String>,
    pub live_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionState {
    Unresolved,
    EnvironmentSelected {
        environment: Environment,
        candidates: Vec<String>,
    },
    EndpointProbed {
        environment: Environment,
        live: Option<String>,
        causes: Vec<String>,
    },
    Live(ResolvedEndpoint),
    Unreachable(ResolutionError),
}

/// Pick the target environment of `entry`.
///
/// A requested environment must be declared and have test data. Otherwise
/// the precedence list is walked twice: first for environments with their
/// own test data, then for any that can fall back on `default` data.
pub fn select_environment(
    entry: &RegistryEntry,
    requested: Option<Environment>,
) -> Result<Environment, ResolutionError> {
    if let Some(environment) = requested {
        if !entry.declares(environment) {
            return Err(ResolutionError::EnvironmentNotDeclared {
                resource: entry.infores.clone(),
                environment,
            });
        }
        if entry.test_data.for_environment(environment).is_none() {
            return Err(ResolutionError::NoTestData {
                resource: entry.infores.clone(),
                environment,
            });
        }
        return Ok(environment);
    }

    let declared = || {
        Environment::PRECEDENCE
            .into_iter()
            .filter(|env| entry.declares(*env))
    };

    declared()
        .find(|env| entry.test_data.is_specific_to(*env))
        .or_else(|| declared().find(|env| entry.test_data.for_environment(*env).is_some()))
        .ok_or_else(|| ResolutionError::NoEnvironment {
            resource: entry.infores.clone(),
        })
}

pub struct EndpointResolver {
    client: Arc<dyn TrapiClient>,
    probe_timeout: Duration,
}

impl EndpointResolver {
    pub fn new(client: Arc<dyn TrapiClient>, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
        }
    }

    /// Drive one resource through the resolution states
    pub async fn resolve(
        &self,
        entry: &RegistryEntry,
        requested: Option<Environment>,
    ) -> Result<ResolvedEndpoint, ResolutionError> {
        let resource = entry.infores.as_str();
        let mut state = ResolutionState::Unresolved;

        loop {
            let next = match &state {
                ResolutionState::Unresolved => match select_environment(entry, requested) {
                    Ok(environment) => ResolutionState::EnvironmentSelected {
                        environment,
                        candidates: entry
                            .servers_in(environment)
                            .into_iter()
                            .map(str::to_string)
                            .collect(),
                    },
                    Err(e) => ResolutionState::Unreachable(e),
                },
                ResolutionState::EnvironmentSelected {
                    environment,
                    candidates,
                } => {
                    let (live, causes) = self.probe_candidates(candidates).await;
                    ResolutionState::EndpointProbed {
                        environment: *environment,
                        live,
                        causes,
                    }
                }
                ResolutionState::EndpointProbed {
                    environment,
                    live: Some(url),
                    ..
                } => ResolutionState::Live(ResolvedEndpoint {
                    resource: resource.to_string(),
                    environment: *environment,
                    url: url.clone(),
                    test_data: entry
                        .test_data
                        .for_environment(*environment)
                        .map(<[String]>::to_vec)
                        .unwrap_or_default(),
                    live_at: Utc::now(),
                }),
                ResolutionState::EndpointProbed {
                    environment,
                    live: None,
                    causes,
                } => ResolutionState::Unreachable(ResolutionError::Unreachable {
                    resource: resource.to_string(),
                    environment: *environment,
                    causes: causes.clone(),
                }),
                ResolutionState::Live(endpoint) => {
                    info!(
                        "{} resolved to {} ({})",
                        resource, endpoint.url, endpoint.environment
                    );
                    return Ok(endpoint.clone());
                }
                ResolutionState::Unreachable(error) => {
                    warn!("{}", error);
                    return Err(error.clone());
                }
            };
            debug!("{}: {:?} -> {:?}", resource, state, next);
            state = next;
        }
    }

    /// Probe in order; stop at the first live endpoint
    async fn probe_candidates(&self, candidates: &[String]) -> (Option<String>, Vec<String>) {
        let mut causes = Vec::new();
        for url in candidates {
            match tokio::time::timeout(self.probe_timeout, self.client.meta_knowledge_graph(url))
                .await
            {
                Ok(Ok(())) => return (Some(url.clone()), causes),
                Ok(Err(e)) => causes.push(format!("{}: {}", url, e)),
                Err(_) => causes.push(format!(
                    "{}: no answer within {}s",
                    url,
                    self.probe_timeout.as_secs()
                )),
            }
        }
        (None, causes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Component, ServerEntry, TestDataLocation};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex;
    use trapi::{HttpResponse, Query, TrapiError, TrapiResult};

    struct ProbeClient {
        live: HashSet<String>,
        probed: Mutex<Vec<String>>,
    }

    impl ProbeClient {
        fn new(live: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                live: live.iter().map(|s| s.to_string()).collect(),
                probed: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TrapiClient for ProbeClient {
        async fn query(&self, _endpoint: &str, _query: &Query) -> TrapiResult<HttpResponse> {
            unreachable!("resolution never queries")
        }

        async fn meta_knowledge_graph(&self, endpoint: &str) -> TrapiResult<()> {
            self.probed.lock().unwrap().push(endpoint.to_string());
            if self.live.contains(endpoint) {
                Ok(())
            } else {
                Err(TrapiError::ServiceUnavailable {
                    message: format!("Cannot connect to {}", endpoint),
                })
            }
        }

        async fn fetch_json(&self, url: &str) -> TrapiResult<Value> {
            Err(TrapiError::HttpStatus {
                url: url.to_string(),
                status: 404,
            })
        }

        fn client_name(&self) -> &'static str {
            "probe"
        }
    }

    fn entry(servers: &[(&str, Environment)], test_data: TestDataLocation) -> RegistryEntry {
        RegistryEntry {
            infores: "kp-a".to_string(),
            title: "KP A".to_string(),
            component: Component::Kp,
            trapi_version: Some("1.4.0".to_string()),
            biolink_version: Some("3.1.2".to_string()),
            servers: servers
                .iter()
                .map(|(url, environment)| ServerEntry {
                    url: url.to_string(),
                    environment: *environment,
                })
                .collect(),
            test_data,
        }
    }

    fn urls(items: &[&str]) -> TestDataLocation {
        TestDataLocation::Urls(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_staging_preferred_over_development() {
        let e = entry(
            &[
                ("https://dev.example.org", Environment::Development),
                ("https://ci.example.org", Environment::Staging),
            ],
            urls(&["kp.json"]),
        );
        assert_eq!(select_environment(&e, None).unwrap(), Environment::Staging);
    }

    #[test]
    fn test_requested_environment_must_be_declared() {
        let e = entry(&[("https://dev.example.org", Environment::Development)], urls(&["kp.json"]));
        assert_eq!(
            select_environment(&e, Some(Environment::Development)).unwrap(),
            Environment::Development
        );
        assert!(matches!(
            select_environment(&e, Some(Environment::Production)),
            Err(ResolutionError::EnvironmentNotDeclared { .. })
        ));
    }

    #[test]
    fn test_specific_test_data_beats_default() {
        let test_data = TestDataLocation::ByEnvironment {
            default: Some(vec!["default.json".to_string()]),
            environments: BTreeMap::from([(Environment::Testing, vec!["testing.json".to_string()])]),
        };
        let e = entry(
            &[
                ("https://prod.example.org", Environment::Production),
                ("https://test.example.org", Environment::Testing),
            ],
            test_data,
        );
        assert_eq!(select_environment(&e, None).unwrap(), Environment::Testing);

        let only_staging_data = TestDataLocation::ByEnvironment {
            default: None,
            environments: BTreeMap::from([(Environment::Staging, vec!["s.json".to_string()])]),
        };
        let e = entry(&[("https://prod.example.org", Environment::Production)], only_staging_data);
        assert!(matches!(
            select_environment(&e, None),
            Err(ResolutionError::NoEnvironment { .. })
        ));
        assert!(matches!(
            select_environment(&e, Some(Environment::Production)),
            Err(ResolutionError::NoTestData { .. })
        ));
    }

    #[tokio::test]
    async fn test_first_live_endpoint_wins() {
        let client = ProbeClient::new(&["https://b.example.org", "https://c.example.org"]);
        let resolver = EndpointResolver::new(client.clone(), Duration::from_secs(1));
        let e = entry(
            &[
                ("https://a.example.org", Environment::Production),
                ("https://b.example.org", Environment::Production),
                ("https://c.example.org", Environment::Production),
                ("https://d.example.org", Environment::Staging),
            ],
            urls(&["kp.json"]),
        );

        let endpoint = resolver.resolve(&e, None).await.unwrap();
        assert_eq!(endpoint.url, "https://b.example.org");
        assert_eq!(endpoint.environment, Environment::Production);
        assert_eq!(endpoint.test_data, vec!["kp.json".to_string()]);
        assert_eq!(
            *client.probed.lock().unwrap(),
            vec!["https://a.example.org".to_string(), "https://b.example.org".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_resource_reports_causes() {
        let client = ProbeClient::new(&[]);
        let resolver = EndpointResolver::new(client, Duration::from_secs(1));
        let e = entry(
            &[
                ("https://a.example.org", Environment::Staging),
                ("https://b.example.org", Environment::Staging),
            ],
            urls(&["kp.json"]),
        );

        match resolver.resolve(&e, None).await {
            Err(ResolutionError::Unreachable {
                environment,
                causes,
                ..
            }) => {
                assert_eq!(environment, Environment::Staging);
                assert_eq!(causes.len(), 2);
            }
            other => panic!("expected unreachable, got {:?}", other),
        }
    }
}
