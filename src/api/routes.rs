//! REST endpoints for the article pipeline.
//!
//! Every response body is JSON carrying at least `status` and `message`
//! (or the stage payload), so clients never infer success from the HTTP
//! code alone. `202 Accepted` means "call again".

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};
use uuid::Uuid;

use super::identity::IdentityProvider;
use crate::article::{
    ArticlePipeline, FinalizeOutcome, JobParams, ResearchPoll, SectionOutcome, SeoOutcome,
};
use crate::error::PipelineError;

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

/// Shared state for article routes.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<ArticlePipeline>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl ApiState {
    pub fn new(pipeline: Arc<ArticlePipeline>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { pipeline, identity }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState { .. } => StatusCode::CONFLICT,
            Self::JobFailed { .. } => StatusCode::GONE,
            Self::PrecheckFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::GenerationFailed { .. } | Self::Llm(_) | Self::Search(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let mut body = json!({
            "status": self.label(),
            "message": self.to_string(),
        });
        match &self {
            Self::InvalidState { status, .. } => body["jobStatus"] = json!(status),
            Self::JobFailed { job_id, .. } | Self::Forbidden { job_id } => {
                body["jobId"] = json!(job_id)
            }
            Self::GenerationFailed { stage, .. } => body["stage"] = json!(stage),
            _ => {}
        }
        (status, Json(body)).into_response()
    }
}

fn parse_job_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw).map_err(|_| PipelineError::NotFound {
        entity: "job",
        id: raw.to_string(),
    })
}

fn in_progress(message: &str, extra: serde_json::Value) -> Response {
    let mut body = json!({ "status": "in_progress", "message": message });
    if let (Some(body), serde_json::Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

/// POST /api/articles
async fn start_article(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<JobParams>, JsonRejection>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let Json(params) = body.map_err(|e| PipelineError::InvalidInput(e.body_text()))?;
    let started = state.pipeline.start_research(&user_id, params).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": started.status,
            "message": "Research started",
            "jobId": started.job_id,
            "threadId": started.thread_id,
            "runId": started.run_id,
        })),
    )
        .into_response())
}

/// GET /api/articles
async fn list_articles(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let jobs = state.pipeline.list_jobs(&user_id, limit).await?;
    Ok(Json(json!({
        "status": "ok",
        "message": format!("{} job(s)", jobs.len()),
        "jobs": jobs,
    }))
    .into_response())
}

/// GET /api/articles/{id}
async fn get_article(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let job = state.pipeline.get_job(&user_id, parse_job_id(&id)?).await?;
    Ok(Json(json!({
        "status": job.status,
        "message": job.error_message.clone().unwrap_or_default(),
        "job": job,
    }))
    .into_response())
}

/// GET /api/articles/{id}/research
async fn poll_research(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let job_id = parse_job_id(&id)?;
    let response = match state.pipeline.poll_research(&user_id, job_id).await? {
        ResearchPoll::Pending => Json(json!({
            "status": "pending",
            "message": "Research has not started",
        }))
        .into_response(),
        ResearchPoll::InProgress => in_progress("Research is still running", json!({})),
        ResearchPoll::Completed(research) => Json(json!({
            "status": "completed",
            "message": "Research completed",
            "outline": research.outline,
            "sectionNotes": research.section_notes,
            "sources": research.sources,
        }))
        .into_response(),
    };
    Ok(response)
}

/// POST /api/articles/{id}/sections/{section_id}
async fn generate_section(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((id, section_id)): Path<(String, String)>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let job_id = parse_job_id(&id)?;
    let response = match state
        .pipeline
        .generate_section(&user_id, job_id, &section_id)
        .await?
    {
        SectionOutcome::InProgress { section_id } => in_progress(
            "Section is still being written",
            json!({ "sectionId": section_id }),
        ),
        SectionOutcome::Completed { section_id, html } => Json(json!({
            "status": "completed",
            "message": "Section completed",
            "sectionId": section_id,
            "sectionHtml": html,
        }))
        .into_response(),
    };
    Ok(response)
}

/// POST /api/articles/{id}/finalize
async fn finalize(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let job_id = parse_job_id(&id)?;
    let response = match state.pipeline.finalize(&user_id, job_id).await? {
        FinalizeOutcome::InProgress => in_progress("Cleanup is still running", json!({})),
        FinalizeOutcome::Completed { final_html } => Json(json!({
            "status": "completed",
            "message": "Article completed",
            "finalHtml": final_html,
        }))
        .into_response(),
    };
    Ok(response)
}

/// POST /api/articles/{id}/seo
async fn package_seo(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, PipelineError> {
    let user_id = state.identity.resolve(&headers)?;
    let job_id = parse_job_id(&id)?;
    let response = match state.pipeline.package_seo(&user_id, job_id).await? {
        SeoOutcome::InProgress => in_progress("SEO packaging is still running", json!({})),
        SeoOutcome::Completed(seo) => Json(json!({
            "status": "completed",
            "message": "SEO package ready",
            "seo": seo,
        }))
        .into_response(),
    };
    Ok(response)
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "message": "healthy" }))
}

/// Build the article REST routes.
pub fn article_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/articles", post(start_article).get(list_articles))
        .route("/api/articles/{id}", get(get_article))
        .route("/api/articles/{id}/research", get(poll_research))
        .route(
            "/api/articles/{id}/sections/{section_id}",
            post(generate_section),
        )
        .route("/api/articles/{id}/finalize", post(finalize))
        .route("/api/articles/{id}/seo", post(package_seo))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::JobStatus;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn errors_map_to_status_and_label() {
        let cases = [
            (PipelineError::Unauthenticated, StatusCode::UNAUTHORIZED, "unauthenticated"),
            (
                PipelineError::PrecheckFailed { usable: 1, required: 2 },
                StatusCode::UNPROCESSABLE_ENTITY,
                "precheck_failed",
            ),
            (
                PipelineError::InvalidState {
                    job_id: Uuid::nil(),
                    status: JobStatus::Pending,
                    operation: "finalize",
                },
                StatusCode::CONFLICT,
                "invalid_state",
            ),
            (
                PipelineError::JobFailed {
                    job_id: Uuid::nil(),
                    reason: "boom".into(),
                },
                StatusCode::GONE,
                "failed",
            ),
            (
                PipelineError::GenerationFailed {
                    stage: "section",
                    reason: "boom".into(),
                },
                StatusCode::BAD_GATEWAY,
                "generation_failed",
            ),
        ];
        for (error, expected_status, label) in cases {
            let response = error.into_response();
            assert_eq!(response.status(), expected_status);
            let body = body_json(response).await;
            assert_eq!(body["status"], label);
            assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()));
        }
    }

    #[tokio::test]
    async fn invalid_state_reports_job_status() {
        let body = body_json(
            PipelineError::InvalidState {
                job_id: Uuid::nil(),
                status: JobStatus::Generating,
                operation: "generate a section",
            }
            .into_response(),
        )
        .await;
        assert_eq!(body["jobStatus"], "generating");
    }

    #[test]
    fn malformed_job_id_is_not_found() {
        assert!(matches!(
            parse_job_id("not-a-uuid"),
            Err(PipelineError::NotFound { entity: "job", .. })
        ));
    }

    #[tokio::test]
    async fn in_progress_merges_extra_fields() {
        let response = in_progress("wait", json!({ "sectionId": "s1" }));
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["status"], "in_progress");
        assert_eq!(body["sectionId"], "s1");
    }
}
