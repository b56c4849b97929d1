//! End-to-end tests for the upload → split → chunk → listing pipeline
//!
//! Everything runs in-process: memory job queue, memory product repository,
//! memory caches, and wiremock standing in for the exchange rate feeds.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use catalog_server::{
    api,
    cache::{CacheKeyRegistry, MemoryCache, QueryCache},
    config::Config,
    db::MemoryProductRepository,
    features::FeatureState,
    ingest::{
        ChunkProcessor, FileSplitter, IngestConfig, JobQueue, JobRunner, MemoryJobQueue,
        QueueBackend, WorkerPool, WorkerPoolHandle,
    },
    middleware::RateLimitConfig,
    rates::{ExchangeRateProvider, HttpRateSource},
};

const BOUNDARY: &str = "pipeline-boundary";

struct Pipeline {
    app: Router,
    query_store: Arc<MemoryCache>,
    workers: Option<WorkerPoolHandle>,
    _dir: TempDir,
}

fn feed() -> Value {
    json!({"usd": {"usd": 1, "eur": 0.5, "gbp": 0.25, "jpy": 100, "brl": 5}})
}

async fn mount_feed(server: &MockServer, route: &str, status: u16) {
    let response = if status == 200 {
        ResponseTemplate::new(200).set_body_json(feed())
    } else {
        ResponseTemplate::new(status)
    };
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn start_pipeline(server: &MockServer, chunk_size: usize, max_attempts: u32) -> Pipeline {
    let dir = TempDir::new().unwrap();
    let ingest = IngestConfig {
        upload_dir: dir.path().join("uploads"),
        chunk_dir: dir.path().join("chunks"),
        chunk_size,
        batch_size: 2,
        worker_concurrency: 2,
        jobs_per_second: 100,
        max_attempts,
        backoff_ms: 10,
        poll_interval_ms: 10,
        heartbeat_interval_secs: 1,
        stall_timeout_secs: 60,
        queue_backend: QueueBackend::Memory,
        upload_wait_secs: 5,
    };
    std::fs::create_dir_all(&ingest.upload_dir).unwrap();
    std::fs::create_dir_all(&ingest.chunk_dir).unwrap();

    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
    let repo = Arc::new(MemoryProductRepository::new());
    let query_store = Arc::new(MemoryCache::new());
    let query_cache = QueryCache::new(
        query_store.clone(),
        Arc::new(CacheKeyRegistry::new()),
        Duration::from_secs(60),
    );

    let timeout = Duration::from_secs(2);
    let rates = ExchangeRateProvider::new(
        Arc::new(MemoryCache::new()),
        Arc::new(
            HttpRateSource::new("primary", format!("{}/primary.json", server.uri()), timeout)
                .unwrap(),
        ),
        Arc::new(
            HttpRateSource::new("fallback", format!("{}/fallback.json", server.uri()), timeout)
                .unwrap(),
        ),
        Duration::from_secs(60),
    );

    let runner = JobRunner::new(
        FileSplitter::new(queue.clone(), &ingest),
        ChunkProcessor::new(repo.clone(), ingest.batch_size),
        Arc::new(rates),
        query_cache.clone(),
    );
    let workers = WorkerPool::new(queue.clone(), Arc::new(runner), &ingest).start();

    let config = Config {
        ingest: ingest.clone(),
        rate_limit: RateLimitConfig {
            requests_per_minute: 0,
        },
        ..Config::default()
    };
    let state = FeatureState {
        queue,
        repo,
        query_cache,
        ingest: Arc::new(ingest),
    };

    Pipeline {
        app: api::create_router(state, &config),
        query_store,
        workers: Some(workers),
        _dir: dir,
    }
}

impl Pipeline {
    async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn upload(&self, query: &str, csv: &str) -> (StatusCode, Value) {
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"products.csv\"\r\nContent-Type: text/csv\r\n\r\n{csv}\r\n--{b}--\r\n",
            b = BOUNDARY,
            csv = csv,
        );
        self.request(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/products/upload{}", query))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Poll the upload summary until every job has settled
    async fn settled_summary(&self, upload_id: &str) -> Value {
        let uri = format!("/api/v1/products/uploads/{}/summary", upload_id);
        for _ in 0..500 {
            let (status, summary) = self.get(&uri).await;
            assert_eq!(status, StatusCode::OK);
            if summary["status"] == "completed" || summary["status"] == "failed" {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upload {} did not settle", upload_id);
    }

    async fn shutdown(mut self) {
        if let Some(workers) = self.workers.take() {
            workers.shutdown().await;
        }
    }
}

fn upload_id(response: &Value) -> String {
    response["jobIds"][0].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_row_errors_are_reported_and_valid_rows_persisted() {
    let server = MockServer::start().await;
    mount_feed(&server, "/primary.json", 200).await;
    let pipeline = start_pipeline(&server, 1000, 3).await;

    let (status, accepted) = pipeline
        .upload("", "name;price;expiration\nApple;1.99;2023-12-31\n;1.99;2023-12-31\n")
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["message"], "File upload accepted for processing");
    let upload_id = upload_id(&accepted);

    let summary = pipeline.settled_summary(&upload_id).await;
    let chunk_id = format!("{}-0", upload_id);
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["jobIds"], json!([chunk_id]));
    assert_eq!(
        summary["chunks"],
        json!({"total": 1, "completed": 1, "failed": 0, "pending": 0})
    );
    assert_eq!(summary["processed"], 1);
    assert_eq!(
        summary["errors"],
        json!([{
            "jobId": chunk_id,
            "line": 2,
            "error": "'name' is missing or empty after sanitization"
        }])
    );

    let (status, chunk_status) = pipeline
        .get(&format!("/api/v1/products/upload-status/{}", chunk_id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        chunk_status,
        json!({
            "status": "completed",
            "processed": 1,
            "errors": [{"line": 2, "error": "'name' is missing or empty after sanitization"}]
        })
    );

    let (status, page) = pipeline.get("/api/v1/products?name=Apple").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 1);
    assert_eq!(page["totalPages"], 1);
    let apple = &page["data"][0];
    assert_eq!(apple["name"], "Apple");
    assert_eq!(apple["price"], 1.99);
    assert_eq!(apple["expiration"], "2023-12-31");
    // 1.99 * 0.5 = 0.995 rounds half-up
    assert_eq!(apple["exchangeRates"]["EUR"].as_f64(), Some(1.0));
    assert_eq!(apple["exchangeRates"]["JPY"].as_f64(), Some(199.0));
    assert_eq!(apple["exchangeRates"]["BRL"].as_f64(), Some(9.95));

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_wait_returns_chunk_job_ids() {
    let server = MockServer::start().await;
    mount_feed(&server, "/primary.json", 200).await;
    let pipeline = start_pipeline(&server, 2, 3).await;

    let mut csv = String::from("name;price;expiration\n");
    for i in 0..5 {
        csv.push_str(&format!("Item {};{}.50;\n", i, i));
    }

    let (status, accepted) = pipeline.upload("?wait=true", &csv).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let job_ids: Vec<String> = serde_json::from_value(accepted["jobIds"].clone()).unwrap();
    assert_eq!(job_ids.len(), 3);
    let (split_id, _) = job_ids[0].rsplit_once('-').unwrap();
    for (i, id) in job_ids.iter().enumerate() {
        assert_eq!(id, &format!("{}-{}", split_id, i));
    }

    let summary = pipeline.settled_summary(split_id).await;
    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["processed"], 5);
    assert_eq!(summary["errors"], json!([]));

    let (_, page) = pipeline
        .get("/api/v1/products?sortBy=price&order=DESC&limit=2&page=1")
        .await;
    assert_eq!(page["total"], 5);
    assert_eq!(page["totalPages"], 3);
    assert_eq!(page["data"][0]["name"], "Item 4");
    assert_eq!(page["data"][1]["name"], "Item 3");

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_listing_cache_skips_empty_results_and_is_invalidated_by_ingest() {
    let server = MockServer::start().await;
    mount_feed(&server, "/primary.json", 200).await;
    let pipeline = start_pipeline(&server, 1000, 3).await;

    let (status, page) = pipeline.get("/api/v1/products").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 0);
    assert!(pipeline.query_store.is_empty().await);

    let (_, accepted) = pipeline.upload("", "name;price;expiration\nApple;1.99;\n").await;
    pipeline.settled_summary(&upload_id(&accepted)).await;

    let (_, page) = pipeline.get("/api/v1/products").await;
    assert_eq!(page["total"], 1);
    assert_eq!(pipeline.query_store.len().await, 1);

    let (_, accepted) = pipeline.upload("", "name;price;expiration\nPear;0.99;\n").await;
    pipeline.settled_summary(&upload_id(&accepted)).await;
    assert!(pipeline.query_store.is_empty().await);

    let (_, page) = pipeline.get("/api/v1/products").await;
    assert_eq!(page["total"], 2);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_fallback_feed_used_when_primary_fails() {
    let server = MockServer::start().await;
    mount_feed(&server, "/primary.json", 503).await;
    mount_feed(&server, "/fallback.json", 200).await;
    let pipeline = start_pipeline(&server, 1000, 1).await;

    let (_, accepted) = pipeline.upload("", "name;price;expiration\nApple;2.00;\n").await;
    let summary = pipeline.settled_summary(&upload_id(&accepted)).await;

    assert_eq!(summary["status"], "completed");
    assert_eq!(summary["processed"], 1);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_chunk_fails_when_no_feed_is_reachable() {
    let server = MockServer::start().await;
    mount_feed(&server, "/primary.json", 500).await;
    mount_feed(&server, "/fallback.json", 500).await;
    let pipeline = start_pipeline(&server, 1000, 1).await;

    let (_, accepted) = pipeline.upload("", "name;price;expiration\nApple;2.00;\n").await;
    let upload_id = upload_id(&accepted);
    let summary = pipeline.settled_summary(&upload_id).await;

    assert_eq!(summary["status"], "failed");
    assert_eq!(
        summary["chunks"],
        json!({"total": 1, "completed": 0, "failed": 1, "pending": 0})
    );
    assert_eq!(
        summary["errors"],
        json!([{
            "jobId": format!("{}-0", upload_id),
            "line": 0,
            "error": "Failed to fetch exchange rates"
        }])
    );

    let (_, page) = pipeline.get("/api/v1/products").await;
    assert_eq!(page["total"], 0);

    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_health_reports_connected() {
    let server = MockServer::start().await;
    let pipeline = start_pipeline(&server, 1000, 1).await;

    let (status, body) = pipeline.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "database": "connected"}));

    pipeline.shutdown().await;
}

fn write_upload(dir: &Path, rows: usize) -> std::path::PathBuf {
    let mut contents = String::from("name;price;expiration\n");
    for i in 0..rows {
        contents.push_str(&format!("P{};1.00;\n", i));
    }
    let path = dir.join("upload.csv");
    std::fs::write(&path, contents).unwrap();
    path
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_split_preserves_rows(rows in 0usize..40, chunk_size in 1usize..8) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (chunks, sizes) = runtime.block_on(async {
            let dir = TempDir::new().unwrap();
            let config = IngestConfig {
                chunk_dir: dir.path().to_path_buf(),
                chunk_size,
                ..IngestConfig::default()
            };
            let splitter = FileSplitter::new(Arc::new(MemoryJobQueue::new()), &config);
            let upload = write_upload(dir.path(), rows);

            let output = splitter.split("p", &upload).await.unwrap();
            let sizes: Vec<usize> = output
                .job_ids
                .iter()
                .map(|id| {
                    let contents =
                        std::fs::read_to_string(dir.path().join(format!("{}.csv", id))).unwrap();
                    assert!(contents.starts_with("name;price;expiration\n"));
                    contents.lines().count() - 1
                })
                .collect();
            (output.job_ids.len(), sizes)
        });

        prop_assert_eq!(chunks, rows.div_ceil(chunk_size));
        prop_assert_eq!(sizes.iter().sum::<usize>(), rows);
        prop_assert!(sizes.iter().all(|&n| n >= 1 && n <= chunk_size));
    }
}
