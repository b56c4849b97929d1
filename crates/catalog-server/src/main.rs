//! Catalog Server - Main entry point

use anyhow::{Context, Result};
use catalog_common::logging::{init_logging, LogConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use catalog_server::{
    api,
    cache::{CacheKeyRegistry, CacheStore, MemoryCache, QueryCache},
    config::Config,
    db::{self, PgProductRepository, ProductRepository},
    features::FeatureState,
    ingest::{
        ChunkProcessor, FileSplitter, JobQueue, JobRunner, MemoryJobQueue, PgJobQueue,
        QueueBackend, WorkerPool,
    },
    rates::{ExchangeRateProvider, HttpRateSource},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("catalog-server".to_string())
        .filter_directives("catalog_server=debug,tower_http=debug,sqlx=warn".to_string())
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Catalog Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = db::create_pool(&config.database).await?;
    db::migrate(&db_pool).await?;

    for dir in [&config.ingest.upload_dir, &config.ingest.chunk_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    let queue: Arc<dyn JobQueue> = match config.ingest.queue_backend {
        QueueBackend::Postgres => Arc::new(PgJobQueue::new(db_pool.clone())),
        QueueBackend::Memory => {
            tracing::warn!("Using in-memory job queue; queued jobs are lost on restart");
            Arc::new(MemoryJobQueue::new())
        },
    };
    let repo: Arc<dyn ProductRepository> = Arc::new(PgProductRepository::new(db_pool));
    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let query_cache = QueryCache::new(
        cache.clone(),
        Arc::new(CacheKeyRegistry::new()),
        Duration::from_secs(config.query_cache.ttl_secs),
    );

    let rate_timeout = Duration::from_secs(config.rates.timeout_secs);
    let rates = ExchangeRateProvider::new(
        cache,
        Arc::new(HttpRateSource::new("primary", &config.rates.primary_url, rate_timeout)?),
        Arc::new(HttpRateSource::new("fallback", &config.rates.fallback_url, rate_timeout)?),
        Duration::from_secs(config.rates.cache_ttl_secs),
    );

    let runner = JobRunner::new(
        FileSplitter::new(queue.clone(), &config.ingest),
        ChunkProcessor::new(repo.clone(), config.ingest.batch_size),
        Arc::new(rates),
        query_cache.clone(),
    );
    let workers = WorkerPool::new(queue.clone(), Arc::new(runner), &config.ingest).start();

    let state = FeatureState {
        queue,
        repo,
        query_cache,
        ingest: Arc::new(config.ingest.clone()),
    };
    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Peer addresses feed the per-IP rate limiter
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight jobs finish; anything left active is re-queued on next start
    let drain = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Waiting up to {} seconds for running jobs", drain.as_secs());
    if tokio::time::timeout(drain, workers.shutdown()).await.is_err() {
        tracing::warn!("Workers still busy after shutdown timeout, exiting anyway");
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
