//! Product catalog feature: CSV uploads, their status, and listings

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{UploadCommand, UploadError, UploadResponse};
pub use queries::{
    ListProductsError, ListProductsQuery, UploadStatusError, UploadStatusQuery,
    UploadSummaryError, UploadSummaryQuery,
};
pub use routes::products_routes;
