//! Shared pagination types
//!
//! Listing endpoints take `page` (1-based) and `limit` and answer with
//! [`Paginated`]: the page's rows plus `total` and `totalPages`.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::cache::Cacheable;

/// Default items per page.
pub const DEFAULT_LIMIT: i64 = 10;

/// Largest accepted `limit`.
pub const MAX_LIMIT: i64 = 100;

/// Number of pages needed for `total` rows at `limit` per page
pub fn total_pages(total: i64, limit: i64) -> i64 {
    if total <= 0 || limit <= 0 {
        return 0;
    }
    (total + limit - 1) / limit
}

/// Wrapper for paginated list responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        Self {
            data,
            total,
            page,
            limit,
            total_pages: total_pages(total, limit),
        }
    }
}

impl<T: Serialize + DeserializeOwned> Cacheable for Paginated<T> {
    fn is_empty_result(&self) -> bool {
        self.data.is_empty()
    }
}
