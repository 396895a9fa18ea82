//! Serper.dev Google search client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{SearchProvider, SearchQuery, SearchResult};
use crate::error::SearchError;

const PROVIDER: &str = "serper";
const RESULT_LIMIT: u32 = 10;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SerperSearch {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<OrganicResult>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl SerperSearch {
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SearchError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("client setup: {e}"),
            })?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn request_body(query: &SearchQuery) -> serde_json::Value {
    let mut body = serde_json::json!({
        "q": query.query,
        "num": RESULT_LIMIT,
    });
    if let Some(ref language) = query.language {
        body["hl"] = serde_json::Value::String(language.clone());
    }
    body
}

fn into_results(response: SerperResponse) -> Vec<SearchResult> {
    response
        .organic
        .into_iter()
        .take(RESULT_LIMIT as usize)
        .map(|r| SearchResult::new(r.link, r.title, r.snippet))
        .collect()
}

#[async_trait]
impl SearchProvider for SerperSearch {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", self.api_key.expose_secret())
            .json(&request_body(query))
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {}: {body}", status.as_u16()),
            });
        }

        let parsed: SerperResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;
        Ok(into_results(parsed))
    }
}
