//! Article generation pipeline.
//!
//! A job moves research -> outline -> sections -> finalize, one stage per
//! external request. Nothing survives between requests except the job record.

pub mod assemble;
pub mod model;
pub mod payload;
pub mod pipeline;
pub mod prompts;
pub mod state;

pub use model::{
    ArticleJob, JobParams, Outline, OutlineSection, ResearchArtifacts, SectionEntry,
    SectionStatus, SeoPackage,
};
pub use pipeline::{
    ArticlePipeline, FinalizeOutcome, ResearchPoll, SectionOutcome, SeoOutcome, StartOutcome,
};
pub use state::JobStatus;
