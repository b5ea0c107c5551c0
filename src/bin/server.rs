//! Server binary: wires the engine's collaborators from the environment and
//! serves its HTTP surface, the same "thin shim over the library crate"
//! shape the teacher's own `bin/pdf2md.rs` uses.

use std::sync::Arc;

use anyhow::{Context, Result};
use extraction_engine::adapters::HttpObjectStore;
use extraction_engine::cache::InMemoryJobCache;
use extraction_engine::config::Settings;
use extraction_engine::coordinator::Coordinator;
use extraction_engine::pipeline::llm_client::HttpLlmClient;
use extraction_engine::pipeline::pdf_text::PdfiumTextProvider;
use extraction_engine::{cache::JobCache, persistence::PyqStore, persistence::SyllabusStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Arc::new(Settings::from_env().map_err(|e| anyhow::anyhow!(e.to_string()))?);

    #[cfg(not(feature = "postgres-store"))]
    anyhow::bail!("the server binary requires the postgres-store feature");

    #[cfg(feature = "postgres-store")]
    let pg_pool = connect_postgres(&settings).await?;

    #[cfg(feature = "postgres-store")]
    let documents: Arc<dyn extraction_engine::collaborators::DocumentRepository> =
        Arc::new(extraction_engine::adapters::PgDocumentRepository::new(pg_pool.clone()));

    let objects: Arc<dyn extraction_engine::collaborators::ObjectStore> = Arc::new(HttpObjectStore::new());
    let pdf = Arc::new(PdfiumTextProvider::new().context("failed to initialise pdfium")?);
    let llm = Arc::new(HttpLlmClient::new(&settings.llm).context("failed to build LLM client")?);

    let cache: Arc<dyn JobCache> = build_cache(&settings).await?;

    #[cfg(feature = "postgres-store")]
    let (syllabus_store, pyq_store): (Arc<dyn SyllabusStore>, Arc<dyn PyqStore>) = (
        Arc::new(extraction_engine::persistence::PgSyllabusStore::new(pg_pool.clone())),
        Arc::new(extraction_engine::persistence::PgPyqStore::new(pg_pool)),
    );

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&settings),
        documents,
        objects,
        pdf,
        llm,
        Arc::clone(&cache),
        syllabus_store,
        pyq_store,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(extraction_engine::reaper::run(
        Arc::clone(&cache),
        settings.reaper_interval,
        settings.retry.per_attempt_timeout * 2,
        shutdown_rx,
    ));

    let app = extraction_engine::server::build_router(coordinator);
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!(addr = %settings.bind_addr, "extraction engine listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(());
    Ok(())
}

#[cfg(feature = "postgres-store")]
async fn connect_postgres(settings: &Settings) -> Result<sqlx::PgPool> {
    let url = settings.database_url.as_deref().context("DATABASE_URL is not set")?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to postgres")
}

async fn build_cache(settings: &Settings) -> Result<Arc<dyn JobCache>> {
    #[cfg(feature = "redis-cache")]
    {
        if let Some(redis_url) = &settings.redis_url {
            let cache = extraction_engine::cache::RedisJobCache::connect(redis_url, settings.job_ttl.clone())
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            return Ok(Arc::new(cache));
        }
    }
    tracing::warn!("REDIS_URL not set; falling back to an in-memory job cache (single-process only)");
    Ok(Arc::new(InMemoryJobCache::new(settings.job_ttl.clone())))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
