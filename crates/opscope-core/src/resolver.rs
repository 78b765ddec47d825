//! Per-document bibliographic resolution and batch fan-out.
//!
//! Resolution degrades in three tiers: identifier-encoding variants against
//! the primary endpoint, then the public Espacenet lookup, then a typed
//! failure on the returned record. The caller always receives a record; the
//! only propagated error is an auth failure, which no document can resolve
//! without.

use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{debug, warn};

use crate::config::OpsConfig;
use crate::error::{OpsError, Result};
use crate::extract::{BiblioFields, extract_biblio};
use crate::http::RetryingClient;
use crate::token::TokenManager;
use crate::types::{DocumentIdentifier, EndpointVariant, FailureKind, PatentRecord};

const TIMEOUT_TITLE: &str = "Request timed out - please try again";
const RATE_LIMIT_TITLE: &str = "Rate limit exceeded - please try again later";
const UNAVAILABLE_TITLE: &str = "Temporarily unavailable - please try again";
const ESPACENET_TITLE: &str = "Title available on Espacenet";
const UNKNOWN_TITLE: &str = "Error retrieving patent information";

pub struct PatentResolver {
    http: RetryingClient,
    auth: Arc<TokenManager>,
    ops_base_url: String,
    espacenet_url: String,
    concurrency: usize,
}

/// Resolution state machine; kept explicit so the failure taxonomy stays
/// auditable.
enum ResolveState {
    TryVariant(usize),
    ClassifyFailure,
    TrySecondary,
}

/// Terminal classification of the last failure seen across all variants.
#[derive(Debug, PartialEq, Eq)]
enum FailureClass {
    Timeout,
    RateLimit,
    Secondary,
    Unknown,
}

fn classify_failure(error: Option<&OpsError>) -> FailureClass {
    match error {
        Some(OpsError::Timeout { .. }) => FailureClass::Timeout,
        Some(OpsError::RateLimit { .. }) => FailureClass::RateLimit,
        Some(OpsError::HttpStatus { status: 429, .. }) => FailureClass::RateLimit,
        Some(_) => FailureClass::Secondary,
        None => FailureClass::Unknown,
    }
}

impl PatentResolver {
    pub fn new(config: &OpsConfig, auth: Arc<TokenManager>) -> Result<Self> {
        let http = RetryingClient::new(
            config.request_timeout,
            config.inter_request_pause,
            config.backoff_base,
            config.max_attempts,
        )?;
        Ok(Self {
            http,
            auth,
            ops_base_url: config.ops_base_url.clone(),
            espacenet_url: config.espacenet_url.clone(),
            concurrency: config.concurrency.max(1),
        })
    }

    /// Resolve one publication. Per-document failures are absorbed into the
    /// returned record's [`FailureKind`]; only an unobtainable credential
    /// propagates.
    pub async fn resolve(&self, identifier: &DocumentIdentifier) -> Result<PatentRecord> {
        let mut state = ResolveState::TryVariant(0);
        let mut last_error: Option<OpsError> = None;

        loop {
            state = match state {
                ResolveState::TryVariant(index) => match EndpointVariant::ALL.get(index) {
                    None => ResolveState::ClassifyFailure,
                    Some(variant) => {
                        let token = self.auth.get_valid_token().await?;
                        let url = variant.biblio_url(&self.ops_base_url, identifier);
                        match self.fetch_biblio(&url, &token).await {
                            Ok(Some(fields)) => return Ok(found_record(identifier, fields)),
                            Ok(None) => {
                                debug!("{identifier}: no usable data via {}", variant.as_str());
                                ResolveState::TryVariant(index + 1)
                            }
                            Err(err) => {
                                debug!("{identifier}: {} failed: {err}", variant.as_str());
                                last_error = Some(err);
                                ResolveState::TryVariant(index + 1)
                            }
                        }
                    }
                },
                ResolveState::ClassifyFailure => match classify_failure(last_error.as_ref()) {
                    FailureClass::Timeout => {
                        return Ok(failure_record(identifier, FailureKind::Timeout, TIMEOUT_TITLE));
                    }
                    FailureClass::RateLimit => {
                        return Ok(failure_record(
                            identifier,
                            FailureKind::RateLimit,
                            RATE_LIMIT_TITLE,
                        ));
                    }
                    FailureClass::Unknown => {
                        return Ok(failure_record(identifier, FailureKind::Unknown, UNKNOWN_TITLE));
                    }
                    FailureClass::Secondary => ResolveState::TrySecondary,
                },
                ResolveState::TrySecondary => {
                    let url = format!(
                        "{}?q={}",
                        self.espacenet_url,
                        urlencoding::encode(&identifier.espacenet_query())
                    );
                    match self.http.get(&url, HeaderMap::new()).await {
                        Ok(_) => {
                            warn!("{identifier}: degraded to Espacenet fallback");
                            let mut record =
                                failure_record(identifier, FailureKind::None, ESPACENET_TITLE);
                            record.espacenet_url = Some(url);
                            return Ok(record);
                        }
                        Err(err) => {
                            warn!("{identifier}: secondary source also failed: {err}");
                            return Ok(failure_record(
                                identifier,
                                FailureKind::Network,
                                UNAVAILABLE_TITLE,
                            ));
                        }
                    }
                }
            };
        }
    }

    /// Fetch one biblio URL and extract. `Ok(None)` means "insufficient,
    /// advance to the next identifier encoding": an empty body, a response
    /// that does not parse, or parseable XML without a title.
    async fn fetch_biblio(&self, url: &str, token: &str) -> Result<Option<BiblioFields>> {
        let body = self.http.get(url, bearer_headers(token)?).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        match extract_biblio(&body) {
            Ok(fields) if fields.title.is_some() => Ok(Some(fields)),
            Ok(_) => Ok(None),
            Err(err) => {
                debug!("discarding unparseable response from {url}: {err}");
                Ok(None)
            }
        }
    }

    /// Resolve a batch under the concurrency cap, yielding one record per
    /// input in input order regardless of completion order. A slow or
    /// failing document never aborts the others.
    pub async fn resolve_all(
        &self,
        identifiers: &[DocumentIdentifier],
    ) -> Result<Vec<PatentRecord>> {
        let records: Vec<PatentRecord> = stream::iter(identifiers)
            .map(|identifier| self.resolve(identifier))
            .buffered(self.concurrency)
            .try_collect()
            .await?;
        let failed = records
            .iter()
            .filter(|r| r.error != FailureKind::None)
            .count();
        debug!("resolved batch: {} documents, {failed} failed", records.len());
        Ok(records)
    }
}

fn bearer_headers(token: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|_| OpsError::Auth("token contains invalid header characters".to_string()))?;
    headers.insert(AUTHORIZATION, value);
    headers.insert(ACCEPT, HeaderValue::from_static("application/xml"));
    Ok(headers)
}

fn found_record(identifier: &DocumentIdentifier, fields: BiblioFields) -> PatentRecord {
    PatentRecord {
        identifier: identifier.clone(),
        title: fields.title.unwrap_or_default(),
        inventors: fields.inventors,
        classifications: fields.classifications,
        error: FailureKind::None,
        espacenet_url: None,
    }
}

fn failure_record(
    identifier: &DocumentIdentifier,
    error: FailureKind,
    title: &str,
) -> PatentRecord {
    PatentRecord {
        identifier: identifier.clone(),
        title: title.to_string(),
        inventors: Vec::new(),
        classifications: Vec::new(),
        error,
        espacenet_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use mockito::{Server, ServerGuard};
    use tempfile::TempDir;

    const BIBLIO_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ops:world-patent-data xmlns:ops="http://ops.epo.org" xmlns="http://www.epo.org/exchange">
  <exchange-documents>
    <exchange-document country="EP" doc-number="1234567" kind="B1">
      <bibliographic-data>
        <classifications-ipcr>
          <classification-ipcr><text>A61K 9/00</text></classification-ipcr>
        </classifications-ipcr>
        <parties>
          <inventors>
            <inventor><name><firstname>Ada</firstname><lastname>Lovelace</lastname></name></inventor>
          </inventors>
        </parties>
        <invention-title lang="en">Widget apparatus</invention-title>
      </bibliographic-data>
    </exchange-document>
  </exchange-documents>
</ops:world-patent-data>"#;

    const NO_TITLE_XML: &str = r#"<doc>
        <classification-ipc><text>H04L</text></classification-ipc>
    </doc>"#;

    fn test_config(server: &ServerGuard, dir: &TempDir) -> OpsConfig {
        let mut config = OpsConfig::new("key", "secret");
        config.auth_url = format!("{}/auth/accesstoken", server.url());
        config.ops_base_url = format!("{}/rest-services", server.url());
        config.espacenet_url = format!("{}/patent/search", server.url());
        config.token_cache_path = dir.path().join("token.json");
        config.inter_request_pause = Duration::ZERO;
        config.backoff_base = Duration::from_millis(1);
        config
    }

    async fn mock_auth(server: &mut ServerGuard) {
        server
            .mock("POST", "/auth/accesstoken")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok","expires_in":3600}"#)
            .create_async()
            .await;
    }

    fn resolver(server: &ServerGuard, dir: &TempDir) -> PatentResolver {
        let config = test_config(server, dir);
        let auth = Arc::new(TokenManager::new(&config).unwrap());
        PatentResolver::new(&config, auth).unwrap()
    }

    fn biblio_path(variant: &str, triple: &str) -> String {
        format!("/rest-services/published-data/publication/{variant}/{triple}/biblio")
    }

    #[tokio::test]
    async fn first_variant_success_skips_remaining_variants() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_auth(&mut server).await;

        let epodoc = server
            .mock("GET", biblio_path("epodoc", "EP.1234567.B1").as_str())
            .match_header("authorization", "Bearer tok")
            .match_header("accept", "application/xml")
            .with_status(200)
            .with_body(BIBLIO_XML)
            .expect(1)
            .create_async()
            .await;
        let docdb = server
            .mock("GET", biblio_path("docdb", "EP.1234567.B1").as_str())
            .expect(0)
            .create_async()
            .await;
        let original = server
            .mock("GET", biblio_path("original", "EP.1234567.B1").as_str())
            .expect(0)
            .create_async()
            .await;

        let resolver = resolver(&server, &dir);
        let id = DocumentIdentifier::parse("EP.1234567.B1").unwrap();
        let record = resolver.resolve(&id).await.unwrap();

        epodoc.assert_async().await;
        docdb.assert_async().await;
        original.assert_async().await;
        assert_eq!(record.title, "Widget apparatus");
        assert_eq!(record.inventors, vec!["Ada Lovelace".to_string()]);
        assert_eq!(record.classifications, vec!["A61K 9/00".to_string()]);
        assert_eq!(record.error, FailureKind::None);
        assert!(record.espacenet_url.is_none());
    }

    #[tokio::test]
    async fn empty_and_titleless_bodies_advance_to_later_variants() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_auth(&mut server).await;

        let _epodoc = server
            .mock("GET", biblio_path("epodoc", "EP.1234567.B1").as_str())
            .with_status(200)
            .with_body("")
            .create_async()
            .await;
        let _docdb = server
            .mock("GET", biblio_path("docdb", "EP.1234567.B1").as_str())
            .with_status(200)
            .with_body(NO_TITLE_XML)
            .create_async()
            .await;
        let original = server
            .mock("GET", biblio_path("original", "EP.1234567.B1").as_str())
            .with_status(200)
            .with_body(BIBLIO_XML)
            .expect(1)
            .create_async()
            .await;

        let resolver = resolver(&server, &dir);
        let id = DocumentIdentifier::parse("EP.1234567.B1").unwrap();
        let record = resolver.resolve(&id).await.unwrap();

        original.assert_async().await;
        assert_eq!(record.title, "Widget apparatus");
        assert_eq!(record.error, FailureKind::None);
    }

    #[tokio::test]
    async fn rate_limited_variants_classify_without_secondary_lookup() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_auth(&mut server).await;

        for variant in ["epodoc", "docdb", "original"] {
            server
                .mock("GET", biblio_path(variant, "EP.1234567.B1").as_str())
                .with_status(429)
                .create_async()
                .await;
        }
        let espacenet = server
            .mock("GET", mockito::Matcher::Regex("^/patent/search.*".into()))
            .expect(0)
            .create_async()
            .await;

        let resolver = resolver(&server, &dir);
        let id = DocumentIdentifier::parse("EP.1234567.B1").unwrap();
        let record = resolver.resolve(&id).await.unwrap();

        espacenet.assert_async().await;
        assert_eq!(record.error, FailureKind::RateLimit);
        assert_eq!(record.title, RATE_LIMIT_TITLE);
    }

    #[tokio::test]
    async fn server_errors_fall_back_to_espacenet() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_auth(&mut server).await;

        for variant in ["epodoc", "docdb", "original"] {
            server
                .mock("GET", biblio_path(variant, "EP.1234567.B1").as_str())
                .with_status(500)
                .create_async()
                .await;
        }
        let espacenet = server
            .mock("GET", "/patent/search")
            .match_query(mockito::Matcher::UrlEncoded(
                "q".into(),
                "EP1234567B1".into(),
            ))
            .with_status(200)
            .with_body("<html></html>")
            .expect(1)
            .create_async()
            .await;

        let resolver = resolver(&server, &dir);
        let id = DocumentIdentifier::parse("EP.1234567.B1").unwrap();
        let record = resolver.resolve(&id).await.unwrap();

        espacenet.assert_async().await;
        assert_eq!(record.error, FailureKind::None);
        assert_eq!(record.title, ESPACENET_TITLE);
        let url = record.espacenet_url.expect("secondary url attached");
        assert!(url.contains("q=EP1234567B1"));
    }

    #[tokio::test]
    async fn failing_secondary_source_yields_network_error() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_auth(&mut server).await;

        for variant in ["epodoc", "docdb", "original"] {
            server
                .mock("GET", biblio_path(variant, "EP.1234567.B1").as_str())
                .with_status(502)
                .create_async()
                .await;
        }
        server
            .mock("GET", "/patent/search")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let resolver = resolver(&server, &dir);
        let id = DocumentIdentifier::parse("EP.1234567.B1").unwrap();
        let record = resolver.resolve(&id).await.unwrap();

        assert_eq!(record.error, FailureKind::Network);
        assert_eq!(record.title, UNAVAILABLE_TITLE);
        assert!(record.espacenet_url.is_none());
    }

    #[tokio::test]
    async fn batch_output_preserves_input_order() {
        let mut server = Server::new_async().await;
        let dir = TempDir::new().unwrap();
        mock_auth(&mut server).await;

        // The first document answers slowest; order must still hold.
        server
            .mock("GET", biblio_path("epodoc", "EP.1.A1").as_str())
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(250));
                writer.write_all(BIBLIO_XML.as_bytes())
            })
            .create_async()
            .await;
        for triple in ["EP.2.A1", "EP.3.A1"] {
            server
                .mock("GET", biblio_path("epodoc", triple).as_str())
                .with_status(200)
                .with_body(BIBLIO_XML)
                .create_async()
                .await;
        }

        let resolver = resolver(&server, &dir);
        let ids = ["EP.1.A1", "EP.2.A1", "EP.3.A1"]
            .iter()
            .map(|s| DocumentIdentifier::parse(s).unwrap())
            .collect::<Vec<_>>();
        let records = resolver.resolve_all(&ids).await.unwrap();

        assert_eq!(records.len(), 3);
        for (record, id) in records.iter().zip(&ids) {
            assert_eq!(&record.identifier, id);
            assert_eq!(record.error, FailureKind::None);
        }
    }

    #[test]
    fn failure_classification_covers_the_taxonomy() {
        let timeout = OpsError::Timeout {
            url: "u".to_string(),
        };
        let rate_limit = OpsError::RateLimit {
            url: "u".to_string(),
        };
        let too_many = OpsError::HttpStatus {
            url: "u".to_string(),
            status: 429,
        };
        let server_error = OpsError::HttpStatus {
            url: "u".to_string(),
            status: 503,
        };

        assert_eq!(classify_failure(Some(&timeout)), FailureClass::Timeout);
        assert_eq!(classify_failure(Some(&rate_limit)), FailureClass::RateLimit);
        assert_eq!(classify_failure(Some(&too_many)), FailureClass::RateLimit);
        assert_eq!(
            classify_failure(Some(&server_error)),
            FailureClass::Secondary
        );
        assert_eq!(classify_failure(None), FailureClass::Unknown);
    }
}
