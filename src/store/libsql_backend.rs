//! libSQL backend: async `JobStore` implementation.
//!
//! Supports local file and in-memory databases. Structured job fields are
//! stored as JSON text columns.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use uuid::Uuid;

use crate::article::{ArticleJob, JobParams, JobStatus};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::JobStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlJobStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlJobStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn exists(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COUNT(*) FROM article_jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("job_exists: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("job_exists: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

const JOB_COLUMNS: &str = "id, user_id, topic, language, audience, author_persona, angle, \
    content_goal, desired_length, complexity, constraints, thread_id, run_id, status, outline, \
    section_notes, sources, search_results, sections, final_html, seo, seo_run, error_message, \
    version, created_at, updated_at";

/// Fixed-width timestamps so `ORDER BY created_at` sorts chronologically.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: Serialize>(value: &T, field: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value)
        .map_err(|e| DatabaseError::Serialization(format!("{field}: {e}")))
}

fn opt_json<T: Serialize>(value: Option<&T>, field: &str) -> Result<libsql::Value, DatabaseError> {
    Ok(match value {
        Some(v) => libsql::Value::Text(to_json(v, field)?),
        None => libsql::Value::Null,
    })
}

fn from_json<T: DeserializeOwned>(raw: &str, field: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::Serialization(format!("{field}: {e}")))
}

fn opt_from_json<T: DeserializeOwned>(
    raw: Option<String>,
    field: &str,
) -> Result<Option<T>, DatabaseError> {
    raw.map(|r| from_json(&r, field)).transpose()
}

fn row_to_job(row: &libsql::Row) -> Result<ArticleJob, DatabaseError> {
    let text = |i: i32| -> Result<String, DatabaseError> {
        row.get::<String>(i)
            .map_err(|e| DatabaseError::Query(format!("job row column {i}: {e}")))
    };
    let opt = |i: i32| -> Option<String> { row.get::<String>(i).ok() };

    let id_str = text(0)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("job id {id_str}: {e}")))?;
    let status_str = text(13)?;
    let status: JobStatus = status_str
        .parse()
        .map_err(|e: String| DatabaseError::Serialization(e))?;

    Ok(ArticleJob {
        id,
        user_id: text(1)?,
        params: JobParams {
            topic: text(2)?,
            language: text(3)?,
            audience: text(4)?,
            author_persona: text(5)?,
            angle: text(6)?,
            content_goal: text(7)?,
            desired_length: text(8)?,
            complexity: text(9)?,
            constraints: text(10)?,
        },
        thread_id: opt(11),
        run_id: opt(12),
        status,
        outline: opt_from_json(opt(14), "outline")?,
        section_notes: from_json(&text(15)?, "section_notes")?,
        sources: from_json(&text(16)?, "sources")?,
        search_results: from_json(&text(17)?, "search_results")?,
        sections: from_json(&text(18)?, "sections")?,
        final_html: opt(19),
        seo: opt_from_json(opt(20), "seo")?,
        seo_run: opt_from_json(opt(21), "seo_run")?,
        error_message: opt(22),
        version: row
            .get::<i64>(23)
            .map_err(|e| DatabaseError::Query(format!("job row version: {e}")))?,
        created_at: parse_datetime(&text(24)?),
        updated_at: parse_datetime(&text(25)?),
    })
}

#[async_trait]
impl JobStore for LibSqlJobStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_job(&self, job: &ArticleJob) -> Result<(), DatabaseError> {
        let p = &job.params;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO article_jobs ({JOB_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
                      ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)"
                ),
                params![
                    job.id.to_string(),
                    job.user_id.as_str(),
                    p.topic.as_str(),
                    p.language.as_str(),
                    p.audience.as_str(),
                    p.author_persona.as_str(),
                    p.angle.as_str(),
                    p.content_goal.as_str(),
                    p.desired_length.as_str(),
                    p.complexity.as_str(),
                    p.constraints.as_str(),
                    opt_text(job.thread_id.as_deref()),
                    opt_text(job.run_id.as_deref()),
                    job.status.as_str(),
                    opt_json(job.outline.as_ref(), "outline")?,
                    to_json(&job.section_notes, "section_notes")?,
                    to_json(&job.sources, "sources")?,
                    to_json(&job.search_results, "search_results")?,
                    to_json(&job.sections, "sections")?,
                    opt_text(job.final_html.as_deref()),
                    opt_json(job.seo.as_ref(), "seo")?,
                    opt_json(job.seo_run.as_ref(), "seo_run")?,
                    opt_text(job.error_message.as_deref()),
                    job.version,
                    format_datetime(&job.created_at),
                    format_datetime(&job.updated_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_job: {e}")))?;

        debug!(job_id = %job.id, user_id = %job.user_id, "Job inserted into DB");
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<ArticleJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM article_jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_job: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_job: {e}"))),
        }
    }

    async fn update_job(&self, job: &ArticleJob) -> Result<(), DatabaseError> {
        // Input parameters, owner and creation time are immutable.
        let changed = self
            .conn()
            .execute(
                "UPDATE article_jobs SET thread_id = ?1, run_id = ?2, status = ?3, outline = ?4, \
                 section_notes = ?5, sources = ?6, search_results = ?7, sections = ?8, \
                 final_html = ?9, seo = ?10, seo_run = ?11, error_message = ?12, \
                 updated_at = ?13, version = version + 1 \
                 WHERE id = ?14 AND version = ?15",
                params![
                    opt_text(job.thread_id.as_deref()),
                    opt_text(job.run_id.as_deref()),
                    job.status.as_str(),
                    opt_json(job.outline.as_ref(), "outline")?,
                    to_json(&job.section_notes, "section_notes")?,
                    to_json(&job.sources, "sources")?,
                    to_json(&job.search_results, "search_results")?,
                    to_json(&job.sections, "sections")?,
                    opt_text(job.final_html.as_deref()),
                    opt_json(job.seo.as_ref(), "seo")?,
                    opt_json(job.seo_run.as_ref(), "seo_run")?,
                    opt_text(job.error_message.as_deref()),
                    format_datetime(&job.updated_at),
                    job.id.to_string(),
                    job.version,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_job: {e}")))?;

        if changed == 0 {
            if self.exists(job.id).await? {
                return Err(DatabaseError::Conflict {
                    entity: "article_job".to_string(),
                    id: job.id.to_string(),
                    expected: job.version,
                });
            }
            return Err(DatabaseError::NotFound {
                entity: "article_job".to_string(),
                id: job.id.to_string(),
            });
        }

        debug!(job_id = %job.id, status = %job.status, version = job.version + 1, "Job updated in DB");
        Ok(())
    }

    async fn list_jobs_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ArticleJob>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM article_jobs WHERE user_id = ?1 \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![user_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_jobs_for_user: {e}")))?;

        let mut jobs = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => jobs.push(row_to_job(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_jobs_for_user: {e}"))),
            }
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::{Outline, OutlineSection, ResearchArtifacts};
    use crate::llm::RunHandle;
    use crate::search::SearchResult;

    async fn test_db() -> LibSqlJobStore {
        LibSqlJobStore::new_memory().await.unwrap()
    }

    fn make_job(user: &str) -> ArticleJob {
        ArticleJob::new(
            user,
            JobParams::new("rust ownership").with_language("en"),
        )
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let db = test_db().await;
        let job = make_job("user-1");
        db.insert_job(&job).await.unwrap();

        let fetched = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.user_id, "user-1");
        assert_eq!(fetched.params, job.params);
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.version, 0);
        assert!(fetched.outline.is_none());
        assert!(fetched.thread_id.is_none());
    }

    #[tokio::test]
    async fn get_by_id_not_found() {
        let db = test_db().await;
        assert!(db.get_job(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_persists_structured_fields() {
        let db = test_db().await;
        let mut job = make_job("user-1");
        db.insert_job(&job).await.unwrap();

        job.begin_research(
            RunHandle {
                thread_id: "thread_1".into(),
                run_id: "run_1".into(),
            },
            vec![SearchResult::new("https://a.example", "A", "a")],
        )
        .unwrap();
        db.update_job(&job).await.unwrap();
        job.version += 1;

        job.complete_research(ResearchArtifacts {
            outline: Outline {
                title: "Guide".into(),
                sections: vec![OutlineSection {
                    section_id: "s1".into(),
                    title: "Intro".into(),
                    description: "d".into(),
                }],
            },
            section_notes: [("s1".to_string(), "note".to_string())].into(),
            sources: vec!["https://a.example".into()],
        })
        .unwrap();
        db.update_job(&job).await.unwrap();

        let fetched = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.status, JobStatus::ResearchCompleted);
        assert_eq!(fetched.thread_id.as_deref(), Some("thread_1"));
        assert_eq!(fetched.outline.unwrap().sections[0].section_id, "s1");
        assert_eq!(fetched.section_notes["s1"], "note");
        assert_eq!(fetched.search_results.len(), 1);
    }

    #[tokio::test]
    async fn stale_version_is_a_conflict() {
        let db = test_db().await;
        let job = make_job("user-1");
        db.insert_job(&job).await.unwrap();

        let mut first = db.get_job(job.id).await.unwrap().unwrap();
        let mut second = db.get_job(job.id).await.unwrap().unwrap();

        first.error_message = Some("first".into());
        db.update_job(&first).await.unwrap();

        second.error_message = Some("second".into());
        let err = db.update_job(&second).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict { expected: 0, .. }));

        let stored = db.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.error_message.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn update_missing_job_is_not_found() {
        let db = test_db().await;
        let err = db.update_job(&make_job("user-1")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_scoped_to_owner_and_newest_first() {
        let db = test_db().await;
        let mut older = make_job("user-1");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = make_job("user-1");
        let other = make_job("user-2");
        for job in [&older, &newer, &other] {
            db.insert_job(job).await.unwrap();
        }

        let jobs = db.list_jobs_for_user("user-1", 10).await.unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        let limited = db.list_jobs_for_user("user-1", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn file_backed_database_persists_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.db");
        let job = make_job("user-1");
        {
            let db = LibSqlJobStore::new_local(&path).await.unwrap();
            db.insert_job(&job).await.unwrap();
        }
        let db = LibSqlJobStore::new_local(&path).await.unwrap();
        assert!(db.get_job(job.id).await.unwrap().is_some());
    }
}
