//! Feature modules implementing the catalog API
//!
//! Each feature is a vertical slice:
//! - `commands/` - write operations (uploads)
//! - `queries/` - read operations (listing, status)
//! - `routes.rs` - HTTP route definitions
//!
//! # Features
//!
//! - **products**: CSV uploads, job status, upload summaries and product listings

pub mod products;
pub mod shared;

use axum::Router;
use std::sync::Arc;

use crate::cache::QueryCache;
use crate::db::ProductRepository;
use crate::ingest::{IngestConfig, JobQueue};

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    pub queue: Arc<dyn JobQueue>,
    pub repo: Arc<dyn ProductRepository>,
    pub query_cache: QueryCache,
    pub ingest: Arc<IngestConfig>,
}

/// Creates the API router with all feature routes mounted
///
/// - `/products` - uploads, upload status and listings
pub fn router(state: FeatureState) -> Router<()> {
    Router::new().nest("/products", products::products_routes().with_state(state))
}
