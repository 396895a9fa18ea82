//! Integration tests for the article REST API.
//!
//! Each test builds the full router over an in-memory store, a scripted
//! assistant and a fixed search provider, then drives it request by request
//! the way a browser client would.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use seo_writer::api::{ApiState, TrustedHeaderIdentity, article_routes};
use seo_writer::article::ArticlePipeline;
use seo_writer::clock::ManualClock;
use seo_writer::config::{AssistantRefs, PipelineConfig};
use seo_writer::error::{LlmError, SearchError};
use seo_writer::llm::{AssistantClient, MessageRole, RunStatus};
use seo_writer::search::{SearchProvider, SearchQuery, SearchResult};
use seo_writer::store::LibSqlJobStore;

const ALICE: &str = "alice";
const BOB: &str = "bob";

/// Assistant double: every run completes on its first poll with a response
/// chosen from the prompt, unless `stall` is set.
#[derive(Default)]
struct StubAssistant {
    counter: AtomicU32,
    prompts: Mutex<HashMap<String, String>>,
    runs: Mutex<HashMap<String, String>>,
    stall: AtomicBool,
}

impl StubAssistant {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn respond(prompt: &str) -> String {
        if prompt.starts_with("Research") {
            let sections: Vec<Value> = (1..=5)
                .map(|i| json!({ "sectionId": format!("s{i}"), "title": format!("Part {i}") }))
                .collect();
            json!({
                "outline": { "title": "Composting at home", "sections": sections },
                "sectionNotes": { "s2": "mention worms" },
                "sources": ["https://site0.example"],
            })
            .to_string()
        } else if prompt.starts_with("Write one section") {
            let title = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Section to write: "))
                .unwrap_or_default();
            format!("```html\n<h2>{title}</h2><p>About {title}.</p>\n```")
        } else if prompt.starts_with("Edit the article") {
            let draft = prompt.split("Article:\n").nth(1).unwrap_or_default();
            json!({ "cleanHtml": draft }).to_string()
        } else {
            json!({
                "metaTitle": "Composting at home",
                "metaDescription": "A practical guide.",
                "keywords": "compost, garden",
            })
            .to_string()
        }
    }
}

#[async_trait]
impl AssistantClient for StubAssistant {
    fn provider_name(&self) -> &str {
        "stub"
    }

    async fn open_conversation(&self) -> Result<String, LlmError> {
        Ok(self.next_id("thread"))
    }

    async fn post_message(
        &self,
        thread_id: &str,
        _role: MessageRole,
        text: &str,
    ) -> Result<(), LlmError> {
        self.prompts
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), text.to_string());
        Ok(())
    }

    async fn start_run(&self, thread_id: &str, _assistant_id: &str) -> Result<String, LlmError> {
        let prompt = self
            .prompts
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default();
        let run_id = self.next_id("run");
        self.runs
            .lock()
            .unwrap()
            .insert(run_id.clone(), Self::respond(&prompt));
        Ok(run_id)
    }

    async fn poll_run(&self, _thread_id: &str, run_id: &str) -> Result<RunStatus, LlmError> {
        if self.stall.load(Ordering::SeqCst) {
            return Ok(RunStatus::InProgress);
        }
        let text = self.runs.lock().unwrap().get(run_id).cloned();
        Ok(text.map_or(RunStatus::InProgress, RunStatus::Completed))
    }
}

struct StubSearch {
    results: usize,
}

#[async_trait]
impl SearchProvider for StubSearch {
    fn provider_name(&self) -> &str {
        "stub"
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        Ok((0..self.results)
            .map(|i| {
                SearchResult::new(format!("https://site{i}.example"), format!("Site {i}"), "")
            })
            .collect())
    }
}

async fn app_with(results: usize) -> (Router, Arc<StubAssistant>) {
    let store = Arc::new(LibSqlJobStore::new_memory().await.unwrap());
    let assistant = Arc::new(StubAssistant::default());
    let pipeline = ArticlePipeline::new(
        store,
        assistant.clone(),
        Arc::new(StubSearch { results }),
        AssistantRefs::single("asst_test"),
        PipelineConfig::default(),
    )
    .with_clock(Arc::new(ManualClock::new()));
    let identity = Arc::new(TrustedHeaderIdentity::new("x-user-id").unwrap());
    let app = article_routes(ApiState::new(Arc::new(pipeline), identity));
    (app, assistant)
}

async fn send(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn start(app: &Router, user: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/articles",
        Some(user),
        Some(json!({ "topic": "home composting", "language": "en" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["jobId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn full_article_flow() {
    let (app, _) = app_with(3).await;
    let job_id = start(&app, ALICE).await;

    let (status, research) = send(&app, "GET", &format!("/api/articles/{job_id}/research"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(research["status"], "completed");
    let sections = research["outline"]["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 5);
    assert_eq!(research["sectionNotes"]["s2"], "mention worms");

    // Out of outline order on purpose.
    for section_id in ["s3", "s1", "s5", "s2", "s4"] {
        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/articles/{job_id}/sections/{section_id}"),
            Some(ALICE),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "completed");
        assert_eq!(body["sectionId"], section_id);
        assert!(body["sectionHtml"].as_str().unwrap().starts_with("<h2>"));
    }

    let (status, finalized) = send(&app, "POST", &format!("/api/articles/{job_id}/finalize"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK, "{finalized}");
    let html = finalized["finalHtml"].as_str().unwrap();
    let positions: Vec<usize> = (1..=5)
        .map(|i| html.find(&format!("<h2>Part {i}</h2>")).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{html}");

    let (status, seo) = send(&app, "POST", &format!("/api/articles/{job_id}/seo"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seo["seo"]["metaTitle"], "Composting at home");
    assert_eq!(seo["seo"]["keywords"], json!(["compost", "garden"]));

    let (status, job) = send(&app, "GET", &format!("/api/articles/{job_id}"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["job"]["finalHtml"], finalized["finalHtml"]);
}

#[tokio::test]
async fn thin_search_results_reject_start_and_keep_job_pending() {
    let (app, _) = app_with(1).await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/articles",
        Some(ALICE),
        Some(json!({ "topic": "home composting" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["status"], "precheck_failed");

    let (status, list) = send(&app, "GET", "/api/articles", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::OK);
    let jobs = list["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["status"], "pending");
}

#[tokio::test]
async fn section_before_research_completes_conflicts() {
    let (app, assistant) = app_with(3).await;
    assistant.stall.store(true, Ordering::SeqCst);
    let job_id = start(&app, ALICE).await;

    let (status, body) = send(&app, "GET", &format!("/api/articles/{job_id}/research"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "in_progress");

    let (status, body) = send(&app, "POST", &format!("/api/articles/{job_id}/sections/s1"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "invalid_state");
    assert_eq!(body["jobStatus"], "generating");
}

#[tokio::test]
async fn sections_are_keyed_by_id() {
    let (app, _) = app_with(3).await;
    let job_id = start(&app, ALICE).await;
    send(&app, "GET", &format!("/api/articles/{job_id}/research"), Some(ALICE), None).await;

    for _ in 0..2 {
        let (status, _) = send(&app, "POST", &format!("/api/articles/{job_id}/sections/s2"), Some(ALICE), None).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app, "POST", &format!("/api/articles/{job_id}/sections/nope"), Some(ALICE), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");

    let (_, job) = send(&app, "GET", &format!("/api/articles/{job_id}"), Some(ALICE), None).await;
    assert_eq!(job["status"], "writing_sections");
    let sections = job["job"]["sections"].as_array().unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0]["sectionId"], "s2");
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let (app, _) = app_with(3).await;
    let (status, body) = send(&app, "POST", "/api/articles", None, Some(json!({ "topic": "x" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "unauthenticated");

    let (status, _) = send(&app, "GET", "/api/articles", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn other_users_job_is_forbidden() {
    let (app, _) = app_with(3).await;
    let job_id = start(&app, ALICE).await;

    let (status, body) = send(&app, "GET", &format!("/api/articles/{job_id}"), Some(BOB), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], "forbidden");

    let (status, _) = send(&app, "POST", &format!("/api/articles/{job_id}/finalize"), Some(BOB), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, list) = send(&app, "GET", "/api/articles", Some(BOB), None).await;
    assert!(list["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_requests_get_json_errors() {
    let (app, _) = app_with(3).await;

    let (status, body) = send(&app, "POST", "/api/articles", Some(ALICE), Some(json!({ "topic": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "invalid_input");

    let (status, body) = send(&app, "GET", "/api/articles/not-a-uuid", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], "not_found");

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn concurrent_section_requests_all_land() {
    let (app, _) = app_with(3).await;
    let job_id = start(&app, ALICE).await;
    send(&app, "GET", &format!("/api/articles/{job_id}/research"), Some(ALICE), None).await;

    let uris: Vec<String> = (1..=5)
        .map(|i| format!("/api/articles/{job_id}/sections/s{i}"))
        .collect();
    let responses =
        futures::future::join_all(uris.iter().map(|uri| send(&app, "POST", uri, Some(ALICE), None)))
            .await;
    assert!(responses.iter().all(|(status, _)| *status == StatusCode::OK));

    let (_, job) = send(&app, "GET", &format!("/api/articles/{job_id}"), Some(ALICE), None).await;
    assert_eq!(job["job"]["sections"].as_array().unwrap().len(), 5);
}
