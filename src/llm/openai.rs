//! HTTP client for the OpenAI Assistants thread/run API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{AssistantClient, MessageRole, RunStatus};
use crate::error::LlmError;

const PROVIDER: &str = "openai";

/// Upper bound for any single API request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Assistants API client (`OpenAI-Beta: assistants=v2`).
pub struct OpenAiAssistants {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    status: String,
    #[serde(default)]
    last_error: Option<RunError>,
    #[serde(default)]
    incomplete_details: Option<IncompleteDetails>,
}

#[derive(Debug, Deserialize)]
struct RunError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IncompleteDetails {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    role: String,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextPart>,
}

#[derive(Debug, Deserialize)]
struct TextPart {
    value: String,
}

impl OpenAiAssistants {
    /// Create a client against `base_url`, e.g. `https://api.openai.com/v1`.
    pub fn new(api_key: SecretString, base_url: impl Into<String>) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("client setup: {e}"),
            })?;
        Ok(Self::with_client(client, api_key, base_url))
    }

    /// Create a client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_key: SecretString,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(self.api_key.expose_secret())
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
        op: &str,
    ) -> Result<T, LlmError> {
        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("{op}: {e}"),
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::AuthFailed {
                provider: PROVIDER.to_string(),
            });
        }
        let body = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("{op}: failed to read body: {e}"),
        })?;
        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("{op}: HTTP {}: {body}", status.as_u16()),
            });
        }

        serde_json::from_str(&body).map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: format!("{op}: {e}"),
        })
    }

    /// Collect the assistant text produced by `run_id`, oldest first.
    async fn fetch_run_output(&self, thread_id: &str, run_id: &str) -> Result<String, LlmError> {
        let builder = self
            .request(
                reqwest::Method::GET,
                &format!("/threads/{thread_id}/messages"),
            )
            .query(&[("run_id", run_id), ("order", "desc"), ("limit", "20")]);
        let list: MessageList = self.send_json(builder, "list_messages").await?;
        Ok(collect_assistant_text(list))
    }
}

fn collect_assistant_text(list: MessageList) -> String {
    let mut parts: Vec<String> = list
        .data
        .into_iter()
        .filter(|m| m.role == "assistant")
        .map(|m| {
            m.content
                .into_iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.map(|t| t.value))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect();
    // Listed newest first.
    parts.reverse();
    parts.join("\n\n")
}

fn map_run_status(run: RunResponse) -> RunStatus {
    match run.status.as_str() {
        "queued" => RunStatus::Queued,
        "in_progress" | "cancelling" => RunStatus::InProgress,
        other => {
            let reason = run
                .last_error
                .and_then(|e| match (e.message, e.code) {
                    (Some(m), _) if !m.is_empty() => Some(m),
                    (_, Some(c)) => Some(c),
                    _ => None,
                })
                .or_else(|| run.incomplete_details.and_then(|d| d.reason))
                .unwrap_or_else(|| format!("run ended with status {other}"));
            RunStatus::Failed(reason)
        }
    }
}

#[async_trait]
impl AssistantClient for OpenAiAssistants {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn open_conversation(&self) -> Result<String, LlmError> {
        let builder = self
            .request(reqwest::Method::POST, "/threads")
            .json(&serde_json::json!({}));
        let thread: IdResponse = self.send_json(builder, "create_thread").await?;
        debug!(thread_id = %thread.id, "Opened conversation");
        Ok(thread.id)
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        text: &str,
    ) -> Result<(), LlmError> {
        let builder = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{thread_id}/messages"),
            )
            .json(&serde_json::json!({
                "role": role.as_str(),
                "content": text,
            }));
        let _: IdResponse = self.send_json(builder, "create_message").await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, LlmError> {
        let builder = self
            .request(reqwest::Method::POST, &format!("/threads/{thread_id}/runs"))
            .json(&serde_json::json!({ "assistant_id": assistant_id }));
        let run: IdResponse = self.send_json(builder, "create_run").await?;
        debug!(thread_id, run_id = %run.id, assistant_id, "Started run");
        Ok(run.id)
    }

    async fn poll_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, LlmError> {
        let builder = self.request(
            reqwest::Method::GET,
            &format!("/threads/{thread_id}/runs/{run_id}"),
        );
        let run: RunResponse = self.send_json(builder, "retrieve_run").await?;
        if run.status == "completed" {
            let text = self.fetch_run_output(thread_id, run_id).await?;
            return Ok(RunStatus::Completed(text));
        }
        Ok(map_run_status(run))
    }
}
