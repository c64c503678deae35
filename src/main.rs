use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use listing_studio::{routes::{router, AppState}, MemoryStore, Pipeline, PipelineConfig, UploadWizard};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::gemini(config).context("invalid pipeline configuration")?;
    tracing::info!("Using API key: {}", pipeline.config().redacted_key());

    let port: u16 = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
    let media_base = std::env::var("MEDIA_PUBLIC_BASE").unwrap_or_else(|_| format!("http://localhost:{port}/media"));
    let store = Arc::new(MemoryStore::new(media_base));

    let state = AppState {
        wizard: UploadWizard::new(Arc::new(pipeline), store.clone()),
        media: store,
    };
    state.wizard.spawn_reaper();
    tracing::info!("Idle sessions expire after {:?}", state.wizard.pipeline().config().session_ttl);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
