use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};

use seo_writer::api::{ApiState, TrustedHeaderIdentity, article_routes};
use seo_writer::article::ArticlePipeline;
use seo_writer::config::ServerConfig;
use seo_writer::llm::OpenAiAssistants;
use seo_writer::search::SerperSearch;
use seo_writer::store::{JobStore, LibSqlJobStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env().context("Failed to load configuration")?;

    eprintln!("SEO Writer v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api/articles", config.port);
    eprintln!("   Database: {}", config.db_path);
    eprintln!("   Identity header: {}", config.user_header);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = Path::new(&config.db_path);
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store: Arc<dyn JobStore> = Arc::new(
        LibSqlJobStore::new_local(db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );

    // ── Providers ────────────────────────────────────────────────────────
    let assistant = Arc::new(
        OpenAiAssistants::new(config.openai_api_key.clone(), config.openai_base_url.clone())
            .context("Failed to build assistant client")?,
    );
    let search = Arc::new(
        SerperSearch::new(config.serper_api_key.clone(), config.serper_base_url.clone())
            .context("Failed to build search client")?,
    );

    let pipeline = Arc::new(ArticlePipeline::new(
        store,
        assistant,
        search,
        config.assistants.clone(),
        config.pipeline.clone(),
    ));
    let identity = Arc::new(
        TrustedHeaderIdentity::new(&config.user_header).context("Invalid identity header")?,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = article_routes(ApiState::new(pipeline, identity)).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Article API server started");
    axum::serve(listener, app).await?;

    Ok(())
}
