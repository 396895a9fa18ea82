//! Error types for the article pipeline.

use uuid::Uuid;

use crate::article::state::JobStatus;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Version conflict on {entity} {id}: expected version {expected}")]
    Conflict {
        entity: String,
        id: String,
        expected: i64,
    },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors from the generative AI service (transport level, not run failures).
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Errors from the search-results provider.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from search provider {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Errors surfaced by the stage orchestrators.
///
/// "Keep polling" is not represented here; each stage returns an outcome
/// enum with an `InProgress` variant for that.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Job {job_id} is not owned by the caller")]
    Forbidden { job_id: Uuid },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Search precheck failed: {usable} usable result(s), at least {required} required")]
    PrecheckFailed { usable: usize, required: usize },

    #[error("Job {job_id} is {status}, cannot {operation}")]
    InvalidState {
        job_id: Uuid,
        status: JobStatus,
        operation: &'static str,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Generation failed during {stage}: {reason}")]
    GenerationFailed { stage: &'static str, reason: String },

    #[error("Job {job_id} has failed: {reason}")]
    JobFailed { job_id: Uuid, reason: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl PipelineError {
    /// Short machine-readable label used in API bodies and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::InvalidInput(_) => "invalid_input",
            Self::PrecheckFailed { .. } => "precheck_failed",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound { .. } => "not_found",
            Self::GenerationFailed { .. } => "generation_failed",
            Self::JobFailed { .. } => "failed",
            Self::Llm(_) => "llm_error",
            Self::Search(_) => "search_error",
            Self::Database(_) => "database_error",
        }
    }
}
