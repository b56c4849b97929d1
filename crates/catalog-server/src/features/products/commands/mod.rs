pub mod upload;

pub use upload::{UploadCommand, UploadError, UploadResponse};
