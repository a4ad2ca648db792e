pub mod client;
pub mod config;
pub mod provider;
pub mod types;
pub mod validator;
pub mod version;

pub use client::HttpTrapiClient;
pub use config::ClientConfig;
pub use provider::{TrapiClient, TrapiError, TrapiResult};
pub use types::{
    Attribute, AttributeConstraint, Edge, HttpResponse, KnowledgeGraph, Message, Node,
    NodeBinding, QEdge, QNode, Qualifier, QualifierConstraint, Query, QueryGraph, QueryResult,
    Response, RetrievalSource,
};
pub use validator::{
    ComplianceValidator, Severity, StructuralValidator, ValidationMessage, ValidationMessages,
};
pub use version::{SemVer, VersionError};

pub mod prelude {
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::provider::*;
    pub use crate::types::*;
    pub use crate::validator::*;
    pub use crate::version::*;
}
