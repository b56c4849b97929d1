pub mod list_products;
pub mod upload_status;
pub mod upload_summary;

pub use list_products::{ListProductsError, ListProductsQuery};
pub use upload_status::{UploadStatusError, UploadStatusQuery};
pub use upload_summary::{UploadSummaryError, UploadSummaryQuery};
