use crate::config::ClientConfig;
use crate::provider::{TrapiClient, TrapiError, TrapiResult};
use crate::types::{HttpResponse, Query};
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// reqwest-backed [`TrapiClient`]
pub struct HttpTrapiClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTrapiClient {
    pub fn new(config: ClientConfig) -> TrapiResult<Self> {
        config
            .validate()
            .map_err(|message| TrapiError::InvalidConfig { message })?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TrapiError::InvalidConfig {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, config })
    }

    pub fn with_default_config() -> TrapiResult<Self> {
        Self::new(ClientConfig::default())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint_url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    /// Turn a raw body into the JSON the checker inspects.
    ///
    /// Empty bodies become `None`; bodies that are not JSON are kept verbatim
    /// as a JSON string so they can still be reported.
    fn decode_body(text: &str) -> Option<Value> {
        if text.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Response body is not JSON: {}", e);
                Some(Value::String(text.to_string()))
            }
        }
    }

    fn handle_http_error(err: reqwest::Error, url: &str, timeout: Duration) -> TrapiError {
        if err.is_timeout() {
            TrapiError::Timeout {
                url: url.to_string(),
                timeout_secs: timeout.as_secs(),
            }
        } else if err.is_connect() {
            TrapiError::ServiceUnavailable {
                message: format!("Cannot connect to {}", url),
            }
        } else if let Some(status) = err.status() {
            TrapiError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            TrapiError::Network(err)
        }
    }
}

#[async_trait]
impl TrapiClient for HttpTrapiClient {
    async fn query(&self, endpoint: &str, query: &Query) -> TrapiResult<HttpResponse> {
        let url = Self::endpoint_url(endpoint, "query");
        let timeout = self.config.request_timeout;
        debug!("POST {}", url);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(query)
            .send()
            .await
            .map_err(|e| Self::handle_http_error(e, &url, timeout))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Self::handle_http_error(e, &url, timeout))?;

        debug!(
            "POST {} returned {} in {}ms",
            url,
            status,
            start.elapsed().as_millis()
        );

        Ok(HttpResponse {
            status,
            body: Self::decode_body(&text),
        })
    }

    async fn meta_knowledge_graph(&self, endpoint: &str) -> TrapiResult<()> {
        let url = Self::endpoint_url(endpoint, "meta_knowledge_graph");
        let timeout = self.config.probe_timeout;

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::handle_http_error(e, &url, timeout))?;

        if !response.status().is_success() {
            warn!("Probe of {} returned {}", url, response.status());
            return Err(TrapiError::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }

    async fn fetch_json(&self, url: &str) -> TrapiResult<Value> {
        let timeout = self.config.probe_timeout;

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Self::handle_http_error(e, url, timeout))?;

        if !response.status().is_success() {
            return Err(TrapiError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| Self::handle_http_error(e, url, timeout))?;

        Ok(serde_json::from_str(&text)?)
    }

    fn client_name(&self) -> &'static str {
        "reqwest"
    }
}
