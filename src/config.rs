//! Configuration types.

use std::ops::RangeInclusive;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Timing and threshold knobs for the stage orchestrators.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Delay between two polls of the same run.
    pub poll_interval: Duration,
    /// Wall-clock budget for one research poll invocation.
    pub research_budget: Duration,
    /// Wall-clock budget for one section generation invocation.
    pub section_budget: Duration,
    /// Wall-clock budget for one finalize (cleanup) invocation.
    pub cleanup_budget: Duration,
    /// Wall-clock budget for the SEO packaging generation.
    pub seo_budget: Duration,
    /// Minimum number of results with a usable URL before research may start.
    pub min_usable_results: usize,
    /// Only this many usable results are kept.
    pub max_results: usize,
    /// Read-modify-write attempts before a version conflict is surfaced.
    pub store_write_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1500),
            research_budget: Duration::from_secs(25),
            section_budget: Duration::from_secs(30),
            cleanup_budget: Duration::from_secs(30),
            seo_budget: Duration::from_secs(15),
            min_usable_results: 2,
            max_results: 10,
            store_write_attempts: 5,
        }
    }
}

impl PipelineConfig {
    /// Defaults with `PIPELINE_*` environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            poll_interval: check_poll_interval(env_duration_ms(
                "PIPELINE_POLL_INTERVAL_MS",
                defaults.poll_interval,
            )?)?,
            research_budget: env_duration_secs(
                "PIPELINE_RESEARCH_BUDGET_SECS",
                defaults.research_budget,
            )?,
            section_budget: env_duration_secs(
                "PIPELINE_SECTION_BUDGET_SECS",
                defaults.section_budget,
            )?,
            cleanup_budget: env_duration_secs(
                "PIPELINE_CLEANUP_BUDGET_SECS",
                defaults.cleanup_budget,
            )?,
            seo_budget: env_duration_secs("PIPELINE_SEO_BUDGET_SECS", defaults.seo_budget)?,
            ..defaults
        })
    }
}

/// Assistant identifiers used for each stage's runs.
#[derive(Debug, Clone)]
pub struct AssistantRefs {
    pub research: String,
    pub writer: String,
    pub editor: String,
    pub seo: String,
}

impl AssistantRefs {
    /// Use one assistant for every stage.
    pub fn single(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            research: id.clone(),
            writer: id.clone(),
            editor: id.clone(),
            seo: id,
        }
    }
}

/// Everything the server binary needs, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: String,
    /// Header carrying the authenticated user id, set by the upstream auth proxy.
    pub user_header: String,
    pub openai_api_key: SecretString,
    pub openai_base_url: String,
    pub assistants: AssistantRefs,
    pub serper_api_key: SecretString,
    pub serper_base_url: String,
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port: u16 = match std::env::var("SEO_WRITER_PORT") {
            Ok(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "SEO_WRITER_PORT".to_string(),
                message: format!("{e}"),
            })?,
            Err(_) => 8080,
        };

        let db_path = std::env::var("SEO_WRITER_DB_PATH")
            .unwrap_or_else(|_| "./data/seo-writer.db".to_string());
        let user_header =
            std::env::var("SEO_WRITER_USER_HEADER").unwrap_or_else(|_| "x-user-id".to_string());

        let openai_api_key = SecretString::from(required("OPENAI_API_KEY")?);
        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        let research = required("ASSISTANT_RESEARCH_ID")?;
        let writer = required("ASSISTANT_WRITER_ID")?;
        let editor = std::env::var("ASSISTANT_EDITOR_ID").unwrap_or_else(|_| writer.clone());
        let seo = std::env::var("ASSISTANT_SEO_ID").unwrap_or_else(|_| writer.clone());

        let serper_api_key = SecretString::from(required("SERPER_API_KEY")?);
        let serper_base_url = std::env::var("SERPER_BASE_URL")
            .unwrap_or_else(|_| "https://google.serper.dev".to_string());

        Ok(Self {
            port,
            db_path,
            user_header,
            openai_api_key,
            openai_base_url,
            assistants: AssistantRefs {
                research,
                writer,
                editor,
                seo,
            },
            serper_api_key,
            serper_base_url,
            pipeline: PipelineConfig::from_env()?,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            }),
        Err(_) => Ok(None),
    }
}

/// Accepted range for the delay between polls of one run.
pub const POLL_INTERVAL_RANGE: RangeInclusive<Duration> =
    Duration::from_millis(1000)..=Duration::from_millis(2000);

fn check_poll_interval(interval: Duration) -> Result<Duration, ConfigError> {
    if POLL_INTERVAL_RANGE.contains(&interval) {
        Ok(interval)
    } else {
        Err(ConfigError::InvalidValue {
            key: "PIPELINE_POLL_INTERVAL_MS".to_string(),
            message: format!("{} ms is outside 1000..=2000 ms", interval.as_millis()),
        })
    }
}

fn env_duration_ms(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(env_u64(key)?.map(Duration::from_millis).unwrap_or(default))
}

fn env_duration_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(env_u64(key)?.map(Duration::from_secs).unwrap_or(default))
}
