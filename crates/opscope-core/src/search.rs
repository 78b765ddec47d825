//! Published-data search: query the OPS search endpoint for publication
//! references matching a CQL query.

use std::sync::Arc;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::warn;

use crate::config::OpsConfig;
use crate::error::{OpsError, Result};
use crate::extract::{Element, find_all, first_descendant, parse_tree};
use crate::http::RetryingClient;
use crate::token::TokenManager;
use crate::types::{DocumentIdentifier, SearchPage, SearchRange};

pub struct SearchClient {
    http: RetryingClient,
    auth: Arc<TokenManager>,
    base_url: String,
}

impl SearchClient {
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
            base_url: config.ops_base_url.clone(),
        })
    }

    /// Run one search request and return the requested range of hits.
    pub async fn search(&self, query: &str, range: &SearchRange) -> Result<SearchPage> {
        let token = self.auth.get_valid_token().await?;
        let url = format!(
            "{}/published-data/search?q={}&Range={}-{}",
            self.base_url,
            urlencoding::encode(query),
            range.start,
            range.end
        );
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| OpsError::Auth("token contains invalid header characters".to_string()))?;
        headers.insert(AUTHORIZATION, value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/xml"));

        let body = self.http.get(&url, headers).await?;
        parse_search_page(&body)
    }
}

/// Parse a search response. The total count is mandatory; individual hits
/// that fail identifier validation are skipped rather than failing the page.
pub fn parse_search_page(xml: &str) -> Result<SearchPage> {
    let root = parse_tree(xml)?;
    let total_count = first_descendant(&root, "biblio-search")
        .and_then(|el| el.attr("total-result-count").map(str::to_string))
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .ok_or_else(|| OpsError::Parse("search response lacks a total result count".into()))?;

    let mut identifiers = Vec::new();
    for reference in find_all(&root, &["publication-reference"]) {
        match identifier_from_reference(reference) {
            Ok(id) => identifiers.push(id),
            Err(err) => warn!("skipping unusable search hit: {err}"),
        }
    }

    Ok(SearchPage {
        total_count,
        identifiers,
    })
}

fn identifier_from_reference(reference: &Element) -> Result<DocumentIdentifier> {
    let field = |name: &str| {
        first_descendant(reference, name)
            .and_then(Element::direct_text)
            .ok_or_else(|| OpsError::Parse(format!("publication reference lacks {name}")))
    };
    DocumentIdentifier::new(&field("country")?, &field("doc-number")?, &field("kind")?)
}
