//! Job state machine.
//!
//! Transitions are methods on [`ArticleJob`] so that every status change also
//! records the fields that status promises (run handle, outline, final HTML).
//! Orchestrators call them inside a read-modify-write, so a rejected
//! transition leaves the stored record untouched.

use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::model::{ArticleJob, ResearchArtifacts, SectionEntry, SectionStatus, SeoPackage};
use crate::error::PipelineError;
use crate::llm::RunHandle;
use crate::search::SearchResult;

/// Lifecycle status of an article job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job row exists; no external calls made yet.
    Pending,
    /// Research run started.
    Generating,
    /// Outline, notes and sources recorded.
    ResearchCompleted,
    /// At least one section call accepted.
    WritingSections,
    /// Cleanup run dispatched over the assembled draft.
    Finalizing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Check if this status allows transitioning to `target`.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        if target == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, target),
            (Pending, Generating)
                | (Generating, ResearchCompleted)
                | (ResearchCompleted, WritingSections)
                | (WritingSections, Finalizing)
                | (Finalizing, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Sections may be generated only between research and finalize.
    pub fn allows_section_generation(&self) -> bool {
        matches!(self, Self::ResearchCompleted | Self::WritingSections)
    }

    /// True once research artifacts are guaranteed to be recorded.
    pub fn has_research(&self) -> bool {
        matches!(
            self,
            Self::ResearchCompleted | Self::WritingSections | Self::Finalizing | Self::Completed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::ResearchCompleted => "research_completed",
            Self::WritingSections => "writing_sections",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "generating" => Ok(Self::Generating),
            "research_completed" => Ok(Self::ResearchCompleted),
            "writing_sections" => Ok(Self::WritingSections),
            "finalizing" => Ok(Self::Finalizing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

impl ArticleJob {
    fn invalid_state(&self, operation: &'static str) -> PipelineError {
        PipelineError::InvalidState {
            job_id: self.id,
            status: self.status,
            operation,
        }
    }

    fn transition_to(
        &mut self,
        target: JobStatus,
        operation: &'static str,
    ) -> Result<(), PipelineError> {
        if !self.status.can_transition_to(target) {
            return Err(self.invalid_state(operation));
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Ownership check applied before every read or write.
    pub fn ensure_owner(&self, user_id: &str) -> Result<(), PipelineError> {
        if self.user_id != user_id {
            return Err(PipelineError::Forbidden { job_id: self.id });
        }
        Ok(())
    }

    /// Map a failed job to the error every stage returns for it.
    pub fn ensure_not_failed(&self) -> Result<(), PipelineError> {
        if self.status == JobStatus::Failed {
            return Err(PipelineError::JobFailed {
                job_id: self.id,
                reason: self
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            });
        }
        Ok(())
    }

    /// `pending -> generating`: record the research run and the gated results.
    pub fn begin_research(
        &mut self,
        run: RunHandle,
        search_results: Vec<SearchResult>,
    ) -> Result<(), PipelineError> {
        self.transition_to(JobStatus::Generating, "start research")?;
        self.thread_id = Some(run.thread_id);
        self.run_id = Some(run.run_id);
        self.search_results = search_results;
        Ok(())
    }

    /// `generating -> research_completed`.
    pub fn complete_research(&mut self, research: ResearchArtifacts) -> Result<(), PipelineError> {
        if research.outline.sections.is_empty() {
            return Err(PipelineError::InvalidInput(
                "research outline has no sections".to_string(),
            ));
        }
        self.transition_to(JobStatus::ResearchCompleted, "complete research")?;
        self.outline = Some(research.outline);
        self.section_notes = research.section_notes;
        self.sources = research.sources;
        Ok(())
    }

    /// Record an in-flight run for `section_id`.
    ///
    /// Performs `research_completed -> writing_sections` on the first call. An
    /// existing entry keeps its HTML until the new run completes.
    pub fn accept_section(&mut self, section_id: &str, run: RunHandle) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        if !self.status.allows_section_generation() {
            return Err(self.invalid_state("generate a section"));
        }
        self.ensure_outline_section(section_id)?;
        if self.status == JobStatus::ResearchCompleted {
            self.transition_to(JobStatus::WritingSections, "generate a section")?;
        }

        match self.sections.iter_mut().find(|s| s.section_id == section_id) {
            Some(entry) => {
                entry.status = SectionStatus::Generating;
                entry.run = Some(run);
                entry.error = None;
            }
            None => self.sections.push(SectionEntry {
                section_id: section_id.to_string(),
                html: String::new(),
                status: SectionStatus::Generating,
                completed_at: None,
                run: Some(run),
                error: None,
            }),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Store generated HTML for `section_id`, replacing any prior entry in place.
    pub fn complete_section(&mut self, section_id: &str, html: &str) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        if self.status != JobStatus::WritingSections {
            return Err(self.invalid_state("store a section"));
        }
        self.ensure_outline_section(section_id)?;

        let now = Utc::now();
        let entry = SectionEntry {
            section_id: section_id.to_string(),
            html: html.to_string(),
            status: SectionStatus::Completed,
            completed_at: Some(now),
            run: None,
            error: None,
        };
        match self.sections.iter_mut().find(|s| s.section_id == section_id) {
            Some(existing) => *existing = entry,
            None => self.sections.push(entry),
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record a failed section run. The job status is not touched.
    ///
    /// A section that completed before keeps its HTML and goes back to
    /// `completed`; the reason is still recorded.
    pub fn fail_section(&mut self, section_id: &str, reason: &str) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        if let Some(entry) = self.sections.iter_mut().find(|s| s.section_id == section_id) {
            entry.status = if entry.is_completed() {
                SectionStatus::Completed
            } else {
                SectionStatus::Failed
            };
            entry.run = None;
            entry.error = Some(reason.to_string());
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    /// `writing_sections -> finalizing`: record the cleanup run.
    pub fn begin_finalize(&mut self, run: RunHandle) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        if self.completed_section_count() == 0 {
            return Err(self.invalid_state("finalize without completed sections"));
        }
        self.transition_to(JobStatus::Finalizing, "finalize")?;
        self.thread_id = Some(run.thread_id);
        self.run_id = Some(run.run_id);
        Ok(())
    }

    /// `finalizing -> completed`: the only place `final_html` is set.
    pub fn complete(&mut self, final_html: &str) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        if final_html.trim().is_empty() {
            return Err(PipelineError::GenerationFailed {
                stage: "finalize",
                reason: "cleanup produced empty output".to_string(),
            });
        }
        self.transition_to(JobStatus::Completed, "complete")?;
        self.final_html = Some(final_html.to_string());
        Ok(())
    }

    /// Any non-terminal status `-> failed`, keeping the reason for diagnostics.
    pub fn fail(&mut self, reason: &str) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        self.transition_to(JobStatus::Failed, "fail")?;
        self.error_message = Some(reason.to_string());
        Ok(())
    }

    /// Record the SEO packaging run. Only valid on a completed job.
    pub fn begin_seo(&mut self, run: RunHandle) -> Result<(), PipelineError> {
        self.ensure_not_failed()?;
        if self.status != JobStatus::Completed {
            return Err(self.invalid_state("package SEO metadata"));
        }
        self.seo_run = Some(run);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete_seo(&mut self, seo: SeoPackage) -> Result<(), PipelineError> {
        if self.status != JobStatus::Completed {
            return Err(self.invalid_state("package SEO metadata"));
        }
        self.seo = Some(seo);
        self.seo_run = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Drop a failed SEO run so the next call starts a fresh one.
    pub fn clear_seo_run(&mut self) {
        self.seo_run = None;
        self.updated_at = Utc::now();
    }

    fn ensure_outline_section(&self, section_id: &str) -> Result<(), PipelineError> {
        let known = self
            .outline
            .as_ref()
            .is_some_and(|outline| outline.position(section_id).is_some());
        if !known {
            return Err(PipelineError::NotFound {
                entity: "section",
                id: section_id.to_string(),
            });
        }
        Ok(())
    }
}
