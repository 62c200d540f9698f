//! Request Service
//!
//! REST + WebSocket API for infrastructure requests, with the processing
//! pipeline running in background tasks.

use anyhow::{Context, Result};
use iac_generator::{TemplateGenerator, TemplateStore};
use request_service::{
    create_router, AppState, CommandDeployer, Config, HttpTextGenerator, MemoryCache, MemoryStore,
    Orchestrator, OrchestratorParts, RedisCache, RedisStore, RequestStore, RequirementAnalyzer,
    StatusCache, StorageBackend, WebhookNotifier,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "request_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    config.ensure_directories()?;

    info!("Starting Request Service");
    info!("Storage backend: {:?}", config.storage_backend);
    info!("LLM: {:?} {} at {}", config.llm_provider, config.llm_model, config.llm_url);
    info!("Artifact directory: {}", config.artifact_dir.display());

    let (store, cache) = match config.storage_backend {
        StorageBackend::Redis => {
            let store: Arc<dyn RequestStore> = Arc::new(
                RedisStore::new(&config.redis_url)
                    .await
                    .context("Failed to initialize request store")?,
            );
            let cache: Arc<dyn StatusCache> = Arc::new(
                RedisCache::new(&config.redis_url, config.cache_ttl)
                    .await
                    .context("Failed to initialize status cache")?,
            );
            (store, cache)
        }
        StorageBackend::Memory => {
            let store: Arc<dyn RequestStore> = Arc::new(MemoryStore::new());
            let cache: Arc<dyn StatusCache> = Arc::new(MemoryCache::new(config.cache_ttl));
            (store, cache)
        }
    };

    let templates = match &config.templates_dir {
        Some(dir) => TemplateStore::load_dir(dir).context("Failed to load template catalog")?,
        None => TemplateStore::builtin(),
    };
    info!("Template catalog: {} entries", templates.len());

    let llm = HttpTextGenerator::new(config.llm_config())
        .map_err(|e| anyhow::anyhow!("Failed to create LLM client: {}", e))?;

    let orchestrator = Orchestrator::new(OrchestratorParts {
        store,
        cache,
        analyzer: RequirementAnalyzer::new(Arc::new(llm)),
        generator: TemplateGenerator::new(templates),
        deployer: Arc::new(CommandDeployer::new(config.executor_config())),
        artifact_dir: config.artifact_dir.clone(),
        notifier: config.notify_webhook_url.as_deref().map(WebhookNotifier::new),
    });

    let app = create_router(AppState {
        orchestrator: Arc::clone(&orchestrator),
    });

    // Start API server
    let addr = config.api_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Request Service API running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    info!("Request Service stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
