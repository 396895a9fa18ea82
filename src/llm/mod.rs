//! Generative AI integration.
//!
//! Every stage talks to the AI service through the same four calls on
//! [`AssistantClient`]: open a conversation thread, post a message, start a
//! run, poll the run. [`poll::wait_for_run`] wraps the last one in a bounded
//! wait so a stage never blocks past its budget.

pub mod openai;
pub mod poll;

pub use openai::OpenAiAssistants;
pub use poll::{PollOutcome, PollPolicy, wait_for_run};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Author of a message posted into a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Observed state of an asynchronous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    /// Finished; carries the assistant's final response text.
    Completed(String),
    /// Finished unsuccessfully; carries the service's reason.
    Failed(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

/// Thread + run pair identifying one in-flight generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHandle {
    pub thread_id: String,
    pub run_id: String,
}

/// Conversation-thread + asynchronous-run execution model.
#[async_trait]
pub trait AssistantClient: Send + Sync {
    /// Provider name for logs and errors.
    fn provider_name(&self) -> &str;

    /// Create a new conversation and return its id.
    async fn open_conversation(&self) -> Result<String, LlmError>;

    /// Append a message to a conversation.
    async fn post_message(
        &self,
        thread_id: &str,
        role: MessageRole,
        text: &str,
    ) -> Result<(), LlmError>;

    /// Start a run of `assistant_id` over the conversation; returns the run id.
    async fn start_run(&self, thread_id: &str, assistant_id: &str) -> Result<String, LlmError>;

    /// Check a run once.
    async fn poll_run(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::InProgress.is_terminal());
        assert!(RunStatus::Completed("x".into()).is_terminal());
        assert!(RunStatus::Failed("boom".into()).is_terminal());
    }

    #[test]
    fn run_handle_serializes_camel_case() {
        let handle = RunHandle {
            thread_id: "thread_1".into(),
            run_id: "run_1".into(),
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["threadId"], "thread_1");
        assert_eq!(json["runId"], "run_1");
    }
}
