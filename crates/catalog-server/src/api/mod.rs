//! HTTP application assembly
//!
//! Feature routes are nested under `/api/v1`; `/health` sits at the root.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::compression::CompressionLayer;

use crate::config::Config;
use crate::features::{self, FeatureState};
use crate::middleware;

/// Build the application router with all routes and middleware
pub fn create_router(state: FeatureState, config: &Config) -> Router {
    let api_v1 = features::router(state.clone());

    // Layers apply from innermost to outermost
    let router = Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", api_v1)
        .layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors));

    middleware::with_rate_limit(router, &config.rate_limit)
}

/// Health check handler
async fn health_check(State(state): State<FeatureState>) -> Response {
    match state.repo.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected"
                })),
            )
                .into_response()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKeyRegistry, MemoryCache, QueryCache};
    use crate::db::MemoryProductRepository;
    use crate::ingest::{IngestConfig, MemoryJobQueue};
    use crate::middleware::RateLimitConfig;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = FeatureState {
            queue: Arc::new(MemoryJobQueue::new()),
            repo: Arc::new(MemoryProductRepository::new()),
            query_cache: QueryCache::new(
                Arc::new(MemoryCache::new()),
                Arc::new(CacheKeyRegistry::new()),
                Duration::from_secs(60),
            ),
            ingest: Arc::new(IngestConfig::default()),
        };
        let config = Config {
            rate_limit: RateLimitConfig {
                requests_per_minute: 0,
            },
            ..Config::default()
        };
        create_router(state, &config)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_json(app(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"], "connected");
    }

    #[tokio::test]
    async fn test_products_mounted_under_api_v1() {
        let (status, body) = get_json(app(), "/api/v1/products").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
    }
}
