//! `JobStore` trait: the single async interface for job persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::article::ArticleJob;
use crate::error::DatabaseError;

/// Typed create/read/update over persisted article jobs.
///
/// Writes are optimistic: [`JobStore::update_job`] only succeeds when the
/// stored version still equals `job.version`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Insert a new job. Its `version` is stored as given.
    async fn insert_job(&self, job: &ArticleJob) -> Result<(), DatabaseError>;

    /// Get a job by ID.
    async fn get_job(&self, id: Uuid) -> Result<Option<ArticleJob>, DatabaseError>;

    /// Replace the stored record and bump its version.
    ///
    /// Returns `DatabaseError::Conflict` when another writer got there first
    /// and `DatabaseError::NotFound` when the job does not exist.
    async fn update_job(&self, job: &ArticleJob) -> Result<(), DatabaseError>;

    /// Jobs owned by `user_id`, newest first.
    async fn list_jobs_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ArticleJob>, DatabaseError>;
}
