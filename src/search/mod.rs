//! Search-results gate.
//!
//! Research is never started without a minimum evidentiary basis: the
//! provider's results are filtered to those with a usable URL, capped, and
//! rejected with `PrecheckFailed` when too few remain.

pub mod serper;

pub use serper::SerperSearch;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, SearchError};

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

impl SearchResult {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
        }
    }

    /// A result counts as evidence only with a non-blank URL.
    pub fn has_usable_url(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

/// Query plus an optional language hint.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub language: Option<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        let language = language.into();
        if !language.trim().is_empty() {
            self.language = Some(language);
        }
        self
    }
}

/// Ranked web search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Return up to ten ranked results for `query`.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError>;
}

/// Keep the first `max` results with a usable URL (URLs are trimmed).
pub fn usable_results(results: Vec<SearchResult>, max: usize) -> Vec<SearchResult> {
    results
        .into_iter()
        .filter(SearchResult::has_usable_url)
        .map(|mut r| {
            r.url = r.url.trim().to_string();
            r
        })
        .take(max)
        .collect()
}

/// Run the search and enforce the minimum-evidence precheck.
///
/// Provider errors are returned as-is; there is no retry at this layer.
pub async fn gather_evidence(
    provider: &dyn SearchProvider,
    query: &SearchQuery,
    config: &PipelineConfig,
) -> Result<Vec<SearchResult>, PipelineError> {
    let raw = provider.search(query).await?;
    let returned = raw.len();
    let results = usable_results(raw, config.max_results);

    if results.len() < config.min_usable_results {
        warn!(
            query = %query.query,
            returned,
            usable = results.len(),
            required = config.min_usable_results,
            "Search precheck failed"
        );
        return Err(PipelineError::PrecheckFailed {
            usable: results.len(),
            required: config.min_usable_results,
        });
    }

    info!(
        query = %query.query,
        provider = provider.provider_name(),
        usable = results.len(),
        "Search precheck passed"
    );
    Ok(results)
}
