//! Client library for the EPO Open Patent Services (OPS) API.
//!
//! Resolves patent publication identifiers to bibliographic metadata
//! (title, inventors, IPC classifications) over the published-data
//! endpoints, with OAuth client-credentials token management, retrying
//! transport, namespace-tolerant XML extraction, and a public Espacenet
//! fallback when the primary service degrades.

pub mod config;
pub mod error;
pub mod extract;
pub mod http;
pub mod resolver;
pub mod search;
pub mod token;
pub mod types;

pub use config::OpsConfig;
pub use error::{OpsError, Result};
pub use extract::{BiblioFields, extract_biblio};
pub use resolver::PatentResolver;
pub use search::SearchClient;
pub use token::{TokenManager, TokenStore};
pub use types::{
    DocumentIdentifier, EndpointVariant, FailureKind, PatentRecord, SearchPage, SearchRange,
};
