//! Catalog Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the catalog ingest workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`CatalogError`] and the [`Result`] alias
//! - **Logging**: [`logging::LogConfig`] and [`logging::init_logging`]
//!
//! # Example
//!
//! ```no_run
//! use catalog_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("catalog ingest starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CatalogError, Result};
