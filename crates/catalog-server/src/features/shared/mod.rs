//! Shared utilities and types for feature modules

pub mod pagination;

pub use pagination::{Paginated, DEFAULT_LIMIT, MAX_LIMIT};
