use crate::types::{HttpResponse, Query};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrapiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("HTTP status {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl TrapiError {
    /// Whether the failure means the endpoint could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TrapiError::Timeout { .. } | TrapiError::ServiceUnavailable { .. }
        ) || matches!(self, TrapiError::Network(e) if e.is_connect() || e.is_timeout())
    }
}

pub type TrapiResult<T> = Result<T, TrapiError>;

/// Transport seam between the engine and TRAPI services.
///
/// `query` returns the HTTP status and body even for non-2xx answers so the
/// caller can classify them. Only transport failures surface as `Err`.
#[async_trait]
pub trait TrapiClient: Send + Sync {
    async fn query(&self, endpoint: &str, query: &Query) -> TrapiResult<HttpResponse>;

    /// Liveness probe against `{endpoint}/meta_knowledge_graph`
    async fn meta_knowledge_graph(&self, endpoint: &str) -> TrapiResult<()>;

    /// Fetch an arbitrary JSON document (registry listings, test data)
    async fn fetch_json(&self, url: &str) -> TrapiResult<Value>;

    fn client_name(&self) -> &'static str;
}
