//! Article job data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobStatus;
use crate::error::PipelineError;
use crate::llm::RunHandle;
use crate::search::SearchResult;

/// Caller-supplied generation parameters. Immutable once the job exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobParams {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub author_persona: String,
    #[serde(default)]
    pub angle: String,
    #[serde(default)]
    pub content_goal: String,
    #[serde(default)]
    pub desired_length: String,
    #[serde(default)]
    pub complexity: String,
    #[serde(default)]
    pub constraints: String,
}

impl JobParams {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Builder: set language.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Builder: set audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Trim every field and require a topic.
    pub fn normalized(mut self) -> Result<Self, PipelineError> {
        for field in [
            &mut self.topic,
            &mut self.language,
            &mut self.audience,
            &mut self.author_persona,
            &mut self.angle,
            &mut self.content_goal,
            &mut self.desired_length,
            &mut self.complexity,
            &mut self.constraints,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
        if self.topic.is_empty() {
            return Err(PipelineError::InvalidInput("topic is required".to_string()));
        }
        Ok(self)
    }
}

/// One planned section of the article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineSection {
    pub section_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Ordered section plan produced by research.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    #[serde(default)]
    pub title: String,
    pub sections: Vec<OutlineSection>,
}

impl Outline {
    /// Index of `section_id` in outline order.
    pub fn position(&self, section_id: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.section_id == section_id)
    }

    pub fn section(&self, section_id: &str) -> Option<&OutlineSection> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }
}

/// Everything the research stage records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchArtifacts {
    pub outline: Outline,
    pub section_notes: BTreeMap<String, String>,
    pub sources: Vec<String>,
}

/// Lifecycle of one section entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    /// A run is in flight; any previous HTML is kept until it completes.
    Generating,
    Completed,
    Failed,
}

/// Generated section, keyed by `section_id` within the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionEntry {
    pub section_id: String,
    #[serde(default)]
    pub html: String,
    pub status: SectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// In-flight run, present while `Generating`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SectionEntry {
    /// Holds HTML from a run that completed.
    ///
    /// Stays true while a regeneration is in flight, so finalize never drops
    /// content that already finished.
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some() && !self.html.trim().is_empty()
    }
}

/// Search-engine metadata for a finished article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeoPackage {
    pub meta_title: String,
    pub meta_description: String,
    pub slug: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One end-to-end article generation request and its accumulated state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleJob {
    pub id: Uuid,
    pub user_id: String,
    pub params: JobParams,
    /// Conversation of the current run (research, then cleanup).
    pub thread_id: Option<String>,
    pub run_id: Option<String>,
    pub status: JobStatus,
    pub outline: Option<Outline>,
    pub section_notes: BTreeMap<String, String>,
    pub sources: Vec<String>,
    /// Results that passed the search gate at start.
    pub search_results: Vec<SearchResult>,
    pub sections: Vec<SectionEntry>,
    pub final_html: Option<String>,
    pub seo: Option<SeoPackage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_run: Option<RunHandle>,
    pub error_message: Option<String>,
    /// Optimistic concurrency token, bumped by every store write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArticleJob {
    /// Create a pending job owned by `user_id`.
    pub fn new(user_id: impl Into<String>, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            params,
            thread_id: None,
            run_id: None,
            status: JobStatus::Pending,
            outline: None,
            section_notes: BTreeMap::new(),
            sources: Vec::new(),
            search_results: Vec::new(),
            sections: Vec::new(),
            final_html: None,
            seo: None,
            seo_run: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The job's current thread/run pair, if both are recorded.
    pub fn current_run(&self) -> Option<RunHandle> {
        match (&self.thread_id, &self.run_id) {
            (Some(thread_id), Some(run_id)) => Some(RunHandle {
                thread_id: thread_id.clone(),
                run_id: run_id.clone(),
            }),
            _ => None,
        }
    }

    pub fn section(&self, section_id: &str) -> Option<&SectionEntry> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    /// Recorded research, available once research has completed.
    pub fn research(&self) -> Option<ResearchArtifacts> {
        if !self.status.has_research() {
            return None;
        }
        self.outline.as_ref().map(|outline| ResearchArtifacts {
            outline: outline.clone(),
            section_notes: self.section_notes.clone(),
            sources: self.sources.clone(),
        })
    }

    pub fn completed_section_count(&self) -> usize {
        self.sections.iter().filter(|s| s.is_completed()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_require_topic() {
        let err = JobParams::new("   ").normalized().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn params_are_trimmed() {
        let params = JobParams::new("  rust ownership ")
            .with_language(" en ")
            .normalized()
            .unwrap();
        assert_eq!(params.topic, "rust ownership");
        assert_eq!(params.language, "en");
    }

    #[test]
    fn params_deserialize_camel_case_with_defaults() {
        let params: JobParams = serde_json::from_str(
            r#"{"topic": "x", "authorPersona": "chef", "contentGoal": "rank", "desiredLength": "2000 words"}"#,
        )
        .unwrap();
        assert_eq!(params.author_persona, "chef");
        assert_eq!(params.content_goal, "rank");
        assert_eq!(params.desired_length, "2000 words");
        assert!(params.audience.is_empty());
    }

    #[test]
    fn new_job_is_pending_without_run() {
        let job = ArticleJob::new("user-1", JobParams::new("x"));
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.current_run().is_none());
        assert!(job.research().is_none());
        assert_eq!(job.version, 0);
    }

    #[test]
    fn outline_lookup() {
        let outline = Outline {
            title: "T".into(),
            sections: vec![
                OutlineSection {
                    section_id: "s1".into(),
                    title: "One".into(),
                    description: String::new(),
                },
                OutlineSection {
                    section_id: "s2".into(),
                    title: "Two".into(),
                    description: String::new(),
                },
            ],
        };
        assert_eq!(outline.position("s2"), Some(1));
        assert_eq!(outline.position("s9"), None);
        assert_eq!(outline.section("s1").unwrap().title, "One");
    }

    #[test]
    fn blank_html_is_not_completed() {
        let entry = SectionEntry {
            section_id: "s1".into(),
            html: "  ".into(),
            status: SectionStatus::Completed,
            completed_at: None,
            run: None,
            error: None,
        };
        assert!(!entry.is_completed());
    }
}
