//! Integration tests for middleware
//!
//! These tests verify:
//! - CORS headers are correctly set
//! - Rate limiting rejects clients over their budget

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Method, Request, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tower::ServiceExt;

use catalog_server::{config::CorsConfig, middleware};

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Test helper to create a test server with CORS middleware
fn create_test_app_with_cors(cors_config: CorsConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(middleware::cors_layer(&cors_config))
}

/// Test helper to create a test server with rate limiting
fn create_test_app_with_rate_limit(requests_per_minute: u64) -> Router {
    let router = Router::new().route("/health", get(health));
    middleware::with_rate_limit(router, &middleware::RateLimitConfig { requests_per_minute })
}

fn request_from(ip: [u8; 4]) -> Request<Body> {
    Request::builder()
        .uri("/health")
        .extension(ConnectInfo(SocketAddr::from((ip, 40000))))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_cors_headers_with_specific_origin() {
    let app = create_test_app_with_cors(CorsConfig {
        allowed_origins: vec!["http://localhost:3000".to_string()],
        allow_credentials: true,
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(
        headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:3000"
    );
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
}

#[tokio::test]
async fn test_cors_preflight_for_upload() {
    let app = create_test_app_with_cors(CorsConfig {
        allowed_origins: vec!["http://localhost:3000".to_string()],
        allow_credentials: false,
    });

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::OPTIONS)
                .uri("/health")
                .header(header::ORIGIN, "http://localhost:3000")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers();
    assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_HEADERS));
    assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "3600");
}

#[tokio::test]
async fn test_cors_wildcard_origin_ignores_credentials() {
    let app = create_test_app_with_cors(CorsConfig {
        allowed_origins: vec!["*".to_string()],
        allow_credentials: true,
    });

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://example.com")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_CREDENTIALS));
}

#[tokio::test]
async fn test_rate_limiting_rejects_requests_over_limit() {
    let app = create_test_app_with_rate_limit(2);

    for _ in 0..2 {
        let response = app.clone().oneshot(request_from([10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.clone().oneshot(request_from([10, 0, 0, 1])).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // Budgets are per client IP
    let response = app.oneshot(request_from([10, 0, 0, 2])).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limiting_disabled_with_zero() {
    let app = create_test_app_with_rate_limit(0);

    for _ in 0..10 {
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
