//! Stage orchestrators.
//!
//! Each public method performs one pipeline stage for one external request:
//! read the job, decide, call the AI service with a bounded wait, then write
//! back through [`ArticlePipeline::mutate`]. Budget exhaustion is reported as
//! an `InProgress` outcome and the caller is expected to call again; the run
//! handle stored on the job lets the next call resume the same run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::assemble;
use super::model::{ArticleJob, JobParams, ResearchArtifacts, SectionStatus, SeoPackage};
use super::payload;
use super::prompts;
use super::state::JobStatus;
use crate::clock::{Clock, TokioClock};
use crate::config::{AssistantRefs, PipelineConfig};
use crate::error::{DatabaseError, LlmError, PipelineError};
use crate::llm::{
    AssistantClient, MessageRole, PollOutcome, PollPolicy, RunHandle, wait_for_run,
};
use crate::sanitize::{self, CLEANUP_KEYS, RESEARCH_KEYS, SECTION_KEYS, SEO_KEYS};
use crate::search::{self, SearchProvider, SearchQuery};
use crate::store::JobStore;

/// Result of a successful `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub job_id: Uuid,
    pub thread_id: String,
    pub run_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResearchPoll {
    /// No research run recorded yet.
    Pending,
    /// Budget exhausted; poll again.
    InProgress,
    Completed(ResearchArtifacts),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionOutcome {
    InProgress { section_id: String },
    Completed { section_id: String, html: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    InProgress,
    Completed { final_html: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeoOutcome {
    InProgress,
    Completed(SeoPackage),
}

/// Drives article jobs through research, sections, finalize and SEO packaging.
///
/// Holds no per-job state; everything durable lives in the [`JobStore`].
pub struct ArticlePipeline {
    store: Arc<dyn JobStore>,
    assistant: Arc<dyn AssistantClient>,
    search: Arc<dyn SearchProvider>,
    clock: Arc<dyn Clock>,
    assistants: AssistantRefs,
    config: PipelineConfig,
}

impl ArticlePipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        assistant: Arc<dyn AssistantClient>,
        search: Arc<dyn SearchProvider>,
        assistants: AssistantRefs,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            assistant,
            search,
            clock: Arc::new(TokioClock::new()),
            assistants,
            config,
        }
    }

    /// Replace the time source (tests use a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Owned job snapshot.
    pub async fn get_job(&self, user_id: &str, job_id: Uuid) -> Result<ArticleJob, PipelineError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound {
                entity: "job",
                id: job_id.to_string(),
            })?;
        job.ensure_owner(user_id)?;
        Ok(job)
    }

    /// The caller's jobs, newest first.
    pub async fn list_jobs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ArticleJob>, PipelineError> {
        Ok(self.store.list_jobs_for_user(user_id, limit).await?)
    }

    /// Create a job, gate on search evidence, and dispatch the research run.
    ///
    /// Failures before the run starts leave the job `pending`; failures from
    /// starting the run onward move it to `failed`.
    pub async fn start_research(
        &self,
        user_id: &str,
        params: JobParams,
    ) -> Result<StartOutcome, PipelineError> {
        let params = params.normalized()?;
        let job = ArticleJob::new(user_id, params);
        let job_id = job.id;
        self.store.insert_job(&job).await?;
        info!(job_id = %job_id, topic = %job.params.topic, "Article job created");

        let query = SearchQuery::new(job.params.topic.clone())
            .with_language(job.params.language.clone());
        let results = search::gather_evidence(self.search.as_ref(), &query, &self.config).await?;

        let prompt = prompts::research_prompt(&job.params, &results);
        let thread_id = self.assistant.open_conversation().await?;
        self.assistant
            .post_message(&thread_id, MessageRole::User, &prompt)
            .await?;

        let run_id = match self
            .assistant
            .start_run(&thread_id, &self.assistants.research)
            .await
        {
            Ok(run_id) => run_id,
            Err(e) => return Err(self.fail_job(user_id, job_id, "research", e.to_string()).await),
        };
        let run = RunHandle { thread_id, run_id };

        if let Err(e) = self
            .mutate(user_id, job_id, |job| {
                job.begin_research(run.clone(), results.clone())
            })
            .await
        {
            self.fail_job(user_id, job_id, "research", e.to_string()).await;
            return Err(e);
        }

        info!(
            job_id = %job_id,
            thread_id = %run.thread_id,
            run_id = %run.run_id,
            results = results.len(),
            "Research run started"
        );
        Ok(StartOutcome {
            job_id,
            thread_id: run.thread_id,
            run_id: run.run_id,
            status: JobStatus::Generating,
        })
    }

    /// Wait (bounded) for the research run and record outline, notes and sources.
    pub async fn poll_research(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<ResearchPoll, PipelineError> {
        let job = self.get_job(user_id, job_id).await?;
        job.ensure_not_failed()?;
        if job.status.has_research() {
            return stored_research(&job).map(ResearchPoll::Completed);
        }
        let run = match (job.status, job.current_run()) {
            (JobStatus::Generating, Some(run)) => run,
            _ => {
                debug!(job_id = %job_id, status = %job.status, "Research not started yet");
                return Ok(ResearchPoll::Pending);
            }
        };

        let text = match self.wait(&run, self.config.research_budget).await {
            Ok(PollOutcome::Completed(text)) => text,
            Ok(PollOutcome::TimedOut) => {
                debug!(job_id = %job_id, run_id = %run.run_id, "Research still in progress");
                return Ok(ResearchPoll::InProgress);
            }
            Ok(PollOutcome::Failed(reason)) => {
                return Err(self.fail_job(user_id, job_id, "research", reason).await);
            }
            Err(e) => return Err(self.fail_job(user_id, job_id, "research", e.to_string()).await),
        };

        let cleaned = sanitize::sanitize(&text, RESEARCH_KEYS);
        let fallback: Vec<String> = job.search_results.iter().map(|r| r.url.clone()).collect();
        let research = match payload::parse_research(&cleaned, &fallback) {
            Ok(research) => research,
            Err(reason) => return Err(self.fail_job(user_id, job_id, "research", reason).await),
        };

        let (job, ()) = self
            .mutate(user_id, job_id, |job| {
                job.ensure_not_failed()?;
                if job.status.has_research() {
                    // A concurrent poll already stored it.
                    return Ok(());
                }
                job.complete_research(research.clone())
            })
            .await?;

        info!(
            job_id = %job_id,
            sections = research.outline.sections.len(),
            sources = research.sources.len(),
            "Research completed"
        );
        stored_research(&job).map(ResearchPoll::Completed)
    }

    /// Draft one outline section, or resume its in-flight run.
    ///
    /// A failed run marks only that section failed; the job status is kept.
    pub async fn generate_section(
        &self,
        user_id: &str,
        job_id: Uuid,
        section_id: &str,
    ) -> Result<SectionOutcome, PipelineError> {
        let job = self.get_job(user_id, job_id).await?;
        job.ensure_not_failed()?;
        if !job.status.allows_section_generation() {
            return Err(invalid_state(&job, "generate a section"));
        }
        let outline = job
            .outline
            .as_ref()
            .ok_or_else(|| invalid_state(&job, "generate a section"))?;
        let section = outline
            .section(section_id)
            .ok_or_else(|| PipelineError::NotFound {
                entity: "section",
                id: section_id.to_string(),
            })?;

        let in_flight = job
            .section(section_id)
            .filter(|entry| entry.status == SectionStatus::Generating)
            .and_then(|entry| entry.run.clone());

        let run = match in_flight {
            Some(run) => {
                debug!(job_id = %job_id, section_id, run_id = %run.run_id, "Resuming section run");
                run
            }
            None => {
                let notes = job.section_notes.get(section_id).map(String::as_str);
                let prompt = prompts::section_prompt(&job.params, outline, section, notes);
                let run = self
                    .launch_run(&prompt, &self.assistants.writer)
                    .await
                    .map_err(|e| {
                        warn!(job_id = %job_id, section_id, error = %e, "Section run could not start");
                        PipelineError::GenerationFailed {
                            stage: "section",
                            reason: e.to_string(),
                        }
                    })?;
                self.mutate(user_id, job_id, |job| {
                    job.accept_section(section_id, run.clone())
                })
                .await?;
                info!(job_id = %job_id, section_id, run_id = %run.run_id, "Section run started");
                run
            }
        };

        let reason = match self.wait(&run, self.config.section_budget).await {
            Ok(PollOutcome::TimedOut) => {
                debug!(job_id = %job_id, section_id, "Section still in progress");
                return Ok(SectionOutcome::InProgress {
                    section_id: section_id.to_string(),
                });
            }
            Ok(PollOutcome::Completed(text)) => {
                let html = sanitize::sanitize(&text, SECTION_KEYS);
                if html.trim().is_empty() {
                    "section run returned empty output".to_string()
                } else {
                    self.mutate(user_id, job_id, |job| job.complete_section(section_id, &html))
                        .await?;
                    info!(job_id = %job_id, section_id, bytes = html.len(), "Section completed");
                    return Ok(SectionOutcome::Completed {
                        section_id: section_id.to_string(),
                        html,
                    });
                }
            }
            Ok(PollOutcome::Failed(reason)) => reason,
            Err(e) => e.to_string(),
        };

        warn!(job_id = %job_id, section_id, reason = %reason, "Section generation failed");
        if let Err(e) = self
            .mutate(user_id, job_id, |job| job.fail_section(section_id, &reason))
            .await
        {
            warn!(job_id = %job_id, section_id, error = %e, "Failed to record section failure");
        }
        Err(PipelineError::GenerationFailed {
            stage: "section",
            reason,
        })
    }

    /// Assemble completed sections, run the cleanup pass, and complete the job.
    pub async fn finalize(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<FinalizeOutcome, PipelineError> {
        let job = self.get_job(user_id, job_id).await?;
        job.ensure_not_failed()?;
        let run = match job.status {
            JobStatus::Completed => {
                return Ok(FinalizeOutcome::Completed {
                    final_html: job.final_html.clone().unwrap_or_default(),
                });
            }
            JobStatus::Finalizing => {
                let run = job
                    .current_run()
                    .ok_or_else(|| invalid_state(&job, "resume finalize"))?;
                debug!(job_id = %job_id, run_id = %run.run_id, "Resuming cleanup run");
                run
            }
            JobStatus::WritingSections => self.dispatch_cleanup(user_id, &job).await?,
            _ => return Err(invalid_state(&job, "finalize")),
        };

        let reason = match self.wait(&run, self.config.cleanup_budget).await {
            Ok(PollOutcome::TimedOut) => {
                debug!(job_id = %job_id, "Cleanup still in progress");
                return Ok(FinalizeOutcome::InProgress);
            }
            Ok(PollOutcome::Completed(text)) => {
                let html = sanitize::sanitize(&text, CLEANUP_KEYS);
                if html.trim().is_empty() {
                    "cleanup run returned empty output".to_string()
                } else {
                    let stored = self
                        .mutate(user_id, job_id, |job| {
                            if job.status == JobStatus::Completed {
                                return Ok(());
                            }
                            job.complete(&html)
                        })
                        .await;
                    match stored {
                        Ok((job, ())) => {
                            info!(job_id = %job_id, bytes = html.len(), "Article completed");
                            return Ok(FinalizeOutcome::Completed {
                                final_html: job.final_html.unwrap_or(html),
                            });
                        }
                        Err(e @ (PipelineError::JobFailed { .. } | PipelineError::InvalidState { .. })) => {
                            return Err(e);
                        }
                        Err(e) => e.to_string(),
                    }
                }
            }
            Ok(PollOutcome::Failed(reason)) => reason,
            Err(e) => e.to_string(),
        };
        Err(self.fail_job(user_id, job_id, "finalize", reason).await)
    }

    /// Generate search-engine metadata for a completed article.
    ///
    /// Does not change the job status; a failed run is cleared so the next
    /// call starts over.
    pub async fn package_seo(
        &self,
        user_id: &str,
        job_id: Uuid,
    ) -> Result<SeoOutcome, PipelineError> {
        let job = self.get_job(user_id, job_id).await?;
        job.ensure_not_failed()?;
        if job.status != JobStatus::Completed {
            return Err(invalid_state(&job, "package SEO metadata"));
        }
        if let Some(seo) = job.seo.clone() {
            return Ok(SeoOutcome::Completed(seo));
        }

        let run = match job.seo_run.clone() {
            Some(run) => run,
            None => {
                let prompt =
                    prompts::seo_prompt(&job.params, job.final_html.as_deref().unwrap_or_default());
                let run = self
                    .launch_run(&prompt, &self.assistants.seo)
                    .await
                    .map_err(|e| PipelineError::GenerationFailed {
                        stage: "seo",
                        reason: e.to_string(),
                    })?;
                self.mutate(user_id, job_id, |job| job.begin_seo(run.clone()))
                    .await?;
                info!(job_id = %job_id, run_id = %run.run_id, "SEO run started");
                run
            }
        };

        let reason = match self.wait(&run, self.config.seo_budget).await {
            Ok(PollOutcome::TimedOut) => return Ok(SeoOutcome::InProgress),
            Ok(PollOutcome::Completed(text)) => {
                match payload::parse_seo(&sanitize::sanitize(&text, SEO_KEYS)) {
                    Ok(seo) => {
                        let (job, ()) = self
                            .mutate(user_id, job_id, |job| job.complete_seo(seo.clone()))
                            .await?;
                        info!(job_id = %job_id, slug = %seo.slug, "SEO package stored");
                        return Ok(SeoOutcome::Completed(job.seo.unwrap_or(seo)));
                    }
                    Err(reason) => reason,
                }
            }
            Ok(PollOutcome::Failed(reason)) => reason,
            Err(e) => e.to_string(),
        };

        warn!(job_id = %job_id, reason = %reason, "SEO packaging failed");
        if let Err(e) = self
            .mutate(user_id, job_id, |job| {
                job.clear_seo_run();
                Ok(())
            })
            .await
        {
            warn!(job_id = %job_id, error = %e, "Failed to clear SEO run");
        }
        Err(PipelineError::GenerationFailed {
            stage: "seo",
            reason,
        })
    }

    async fn dispatch_cleanup(
        &self,
        user_id: &str,
        job: &ArticleJob,
    ) -> Result<RunHandle, PipelineError> {
        let outline = job
            .outline
            .as_ref()
            .ok_or_else(|| invalid_state(job, "finalize"))?;
        let draft = assemble::assemble_html(outline, &job.sections);
        if draft.is_empty() {
            return Err(invalid_state(job, "finalize without completed sections"));
        }

        let prompt = prompts::cleanup_prompt(&job.params, &draft);
        let run = match self.launch_run(&prompt, &self.assistants.editor).await {
            Ok(run) => run,
            Err(e) => return Err(self.fail_job(user_id, job.id, "finalize", e.to_string()).await),
        };

        match self
            .mutate(user_id, job.id, |job| job.begin_finalize(run.clone()))
            .await
        {
            Ok(_) => {}
            // Another finalize got there first; the job is unchanged by us.
            Err(e @ (PipelineError::InvalidState { .. } | PipelineError::JobFailed { .. })) => {
                return Err(e);
            }
            Err(e) => {
                self.fail_job(user_id, job.id, "finalize", e.to_string()).await;
                return Err(e);
            }
        }

        info!(
            job_id = %job.id,
            sections = job.completed_section_count(),
            bytes = draft.len(),
            run_id = %run.run_id,
            "Cleanup run started"
        );
        Ok(run)
    }

    /// open -> post -> start.
    async fn launch_run(&self, prompt: &str, assistant_id: &str) -> Result<RunHandle, LlmError> {
        let thread_id = self.assistant.open_conversation().await?;
        self.assistant
            .post_message(&thread_id, MessageRole::User, prompt)
            .await?;
        let run_id = self.assistant.start_run(&thread_id, assistant_id).await?;
        Ok(RunHandle { thread_id, run_id })
    }

    async fn wait(&self, run: &RunHandle, budget: Duration) -> Result<PollOutcome, LlmError> {
        wait_for_run(
            self.assistant.as_ref(),
            self.clock.as_ref(),
            &run.thread_id,
            &run.run_id,
            PollPolicy::new(self.config.poll_interval, budget),
        )
        .await
    }

    /// Move the job to `failed` and build the error the stage returns.
    async fn fail_job(
        &self,
        user_id: &str,
        job_id: Uuid,
        stage: &'static str,
        reason: String,
    ) -> PipelineError {
        error!(job_id = %job_id, stage, reason = %reason, "Article job failed");
        let recorded = self
            .mutate(user_id, job_id, |job| {
                if job.status.is_terminal() {
                    return Ok(());
                }
                job.fail(&reason)
            })
            .await;
        if let Err(e) = recorded {
            warn!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
        PipelineError::GenerationFailed { stage, reason }
    }

    /// Read-modify-write with optimistic retry.
    ///
    /// `apply` runs against a fresh copy on every attempt, so a delta that
    /// lost a version race is re-applied on top of the winner's record.
    async fn mutate<T, F>(
        &self,
        user_id: &str,
        job_id: Uuid,
        mut apply: F,
    ) -> Result<(ArticleJob, T), PipelineError>
    where
        F: FnMut(&mut ArticleJob) -> Result<T, PipelineError> + Send,
        T: Send,
    {
        let attempts = self.config.store_write_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut job = self.get_job(user_id, job_id).await?;
            let value = apply(&mut job)?;
            job.updated_at = Utc::now();

            match self.store.update_job(&job).await {
                Ok(()) => {
                    job.version += 1;
                    debug!(job_id = %job_id, status = %job.status, version = job.version, "Job written");
                    return Ok((job, value));
                }
                Err(DatabaseError::Conflict { .. }) if attempt < attempts => {
                    warn!(job_id = %job_id, attempt, "Job version conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn invalid_state(job: &ArticleJob, operation: &'static str) -> PipelineError {
    PipelineError::InvalidState {
        job_id: job.id,
        status: job.status,
        operation,
    }
}

fn stored_research(job: &ArticleJob) -> Result<ResearchArtifacts, PipelineError> {
    job.research()
        .ok_or_else(|| invalid_state(job, "read research"))
}
