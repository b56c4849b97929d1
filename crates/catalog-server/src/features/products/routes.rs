use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::{
    commands::{upload, UploadCommand},
    queries::{
        list_products, upload_status, upload_summary, ListProductsQuery, UploadStatusQuery,
        UploadSummaryQuery,
    },
};
use crate::error::ApiResult;
use crate::features::FeatureState;

pub fn products_routes() -> Router<FeatureState> {
    Router::new()
        .route("/", get(list_products))
        .route("/upload", post(upload_file))
        .route("/upload-status/:id", get(upload_status))
        .route("/uploads/:id/summary", get(upload_summary))
}

#[derive(Debug, Default, Deserialize)]
struct UploadParams {
    #[serde(default)]
    wait: bool,
}

/// GET /products?name&price&expiration&sortBy&order&limit&page
async fn list_products(
    State(state): State<FeatureState>,
    Query(query): Query<ListProductsQuery>,
) -> ApiResult<Response> {
    let page = list_products::handle(state.repo.as_ref(), &state.query_cache, query).await?;
    Ok((StatusCode::OK, Json(page)).into_response())
}

/// POST /products/upload (multipart, field `file`)
#[tracing::instrument(skip(state, multipart))]
async fn upload_file(
    State(state): State<FeatureState>,
    Query(params): Query<UploadParams>,
    multipart: Multipart,
) -> ApiResult<Response> {
    let (upload_id, file_path) = upload::receive(multipart, &state.ingest.upload_dir).await?;

    let command = UploadCommand {
        upload_id,
        file_path,
        wait: params.wait,
    };
    let response = upload::handle(state.queue.as_ref(), &state.ingest, command).await?;

    tracing::info!(job_ids = ?response.job_ids, "Upload accepted");

    Ok((StatusCode::ACCEPTED, Json(response)).into_response())
}

/// GET /products/upload-status/:id
async fn upload_status(
    State(state): State<FeatureState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let status =
        upload_status::handle(state.queue.as_ref(), UploadStatusQuery { job_id }).await?;
    Ok((StatusCode::OK, Json(status)).into_response())
}

/// GET /products/uploads/:id/summary
async fn upload_summary(
    State(state): State<FeatureState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Response> {
    let summary =
        upload_summary::handle(state.queue.as_ref(), UploadSummaryQuery { upload_id }).await?;
    Ok((StatusCode::OK, Json(summary)).into_response())
}
