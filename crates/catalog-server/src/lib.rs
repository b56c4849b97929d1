//! Catalog Server Library
//!
//! Asynchronous ingestion of product catalogs delivered as `;`-separated
//! CSV files, plus a cached, paginated product listing API.
//!
//! # Overview
//!
//! - **API**: upload, job status, upload summary and listing endpoints (axum)
//! - **Ingestion**: split → chunk pipeline over a durable job queue
//! - **Rates**: exchange rates from a primary/fallback feed with a TTL cache
//! - **Caching**: cache-aside listings with a registry of populated keys
//! - **Database**: PostgreSQL via SQLx
//!
//! # Example
//!
//! ```no_run
//! use catalog_server::config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     println!("binding {}:{}", config.server.host, config.server.port);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod rates;

// Re-export commonly used types
pub use error::{ApiResult, AppError};
