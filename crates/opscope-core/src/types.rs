use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};

/// The (country, number, kind) triple addressing one patent publication.
///
/// Produced by the search stage and immutable afterwards; the document
/// number may still contain whitespace as delivered by the service, so URL
/// construction goes through [`DocumentIdentifier::normalized_number`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdentifier {
    pub country: String,
    pub doc_number: String,
    pub kind: String,
}

impl DocumentIdentifier {
    pub fn new(country: &str, doc_number: &str, kind: &str) -> Result<Self> {
        let country = country.trim();
        let doc_number = doc_number.trim();
        let kind = kind.trim();

        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(OpsError::InvalidIdentifier(format!(
                "country must be a 2-letter code, got {country:?}"
            )));
        }
        if doc_number.is_empty() {
            return Err(OpsError::InvalidIdentifier(
                "document number is empty".to_string(),
            ));
        }
        if !(1..=2).contains(&kind.len()) || !kind.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(OpsError::InvalidIdentifier(format!(
                "kind must be a 1-2 character code, got {kind:?}"
            )));
        }

        Ok(Self {
            country: country.to_uppercase(),
            doc_number: doc_number.to_string(),
            kind: kind.to_uppercase(),
        })
    }

    /// Parse the dot-separated form, e.g. `EP.1234567.B1`.
    pub fn parse(input: &str) -> Result<Self> {
        let parts = input.trim().split('.').collect::<Vec<_>>();
        let [country, doc_number, kind] = parts.as_slice() else {
            return Err(OpsError::InvalidIdentifier(format!(
                "expected COUNTRY.NUMBER.KIND, got {input:?}"
            )));
        };
        Self::new(country, doc_number, kind)
    }

    /// Document number with all whitespace stripped.
    pub fn normalized_number(&self) -> String {
        self.doc_number
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect()
    }

    /// Concatenated form used by the public Espacenet search, e.g. `EP1234567B1`.
    pub fn espacenet_query(&self) -> String {
        format!("{}{}{}", self.country, self.normalized_number(), self.kind)
    }
}

impl fmt::Display for DocumentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.country,
            self.normalized_number(),
            self.kind
        )
    }
}

/// The identifier-encoding conventions accepted by the published-data
/// endpoint, in the order the resolver tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointVariant {
    Epodoc,
    Docdb,
    Original,
}

impl EndpointVariant {
    pub const ALL: [EndpointVariant; 3] = [
        EndpointVariant::Epodoc,
        EndpointVariant::Docdb,
        EndpointVariant::Original,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointVariant::Epodoc => "epodoc",
            EndpointVariant::Docdb => "docdb",
            EndpointVariant::Original => "original",
        }
    }

    pub fn biblio_url(&self, base_url: &str, id: &DocumentIdentifier) -> String {
        format!(
            "{}/published-data/publication/{}/{}.{}.{}/biblio",
            base_url,
            self.as_str(),
            id.country,
            id.normalized_number(),
            id.kind
        )
    }
}

/// Per-document failure classification carried on every [`PatentRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    #[default]
    None,
    Timeout,
    RateLimit,
    Network,
    Unknown,
}

/// One resolved publication. Exactly one record exists per input identifier
/// and `title` is always human-readable, even when resolution failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatentRecord {
    pub identifier: DocumentIdentifier,
    pub title: String,
    pub inventors: Vec<String>,
    pub classifications: Vec<String>,
    pub error: FailureKind,
    pub espacenet_url: Option<String>,
}

/// One page of search hits plus the service's total result count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPage {
    pub total_count: u64,
    pub identifiers: Vec<DocumentIdentifier>,
}

/// 1-based inclusive result range passed through to the search endpoint.
#[derive(Debug, Clone, Copy)]
pub struct SearchRange {
    pub start: u32,
    pub end: u32,
}
