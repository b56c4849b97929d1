//! Product listing query
//!
//! Validates raw query-string values into a [`ProductFilter`], then reads
//! through the query cache. The cache key is the filter's JSON encoding, so
//! equivalent requests (`order` omitted vs `order=ASC`) share one entry.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;
use std::str::FromStr;

use crate::cache::QueryCache;
use crate::db::{Product, ProductFilter, ProductRepository, SortField, SortOrder};
use crate::error::AppError;
use crate::features::shared::{Paginated, DEFAULT_LIMIT, MAX_LIMIT};
use crate::ingest::row::sanitize;

/// Raw query parameters; every value is validated by [`ListProductsQuery::into_filter`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListProductsQuery {
    pub name: Option<String>,
    pub price: Option<String>,
    pub expiration: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub limit: Option<String>,
    pub page: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListProductsError {
    #[error("{0}")]
    Invalid(String),
    #[error("Failed to load products: {0}")]
    Repository(#[from] anyhow::Error),
}

impl From<ListProductsError> for AppError {
    fn from(err: ListProductsError) -> Self {
        match err {
            ListProductsError::Invalid(message) => AppError::BadRequest(message),
            ListProductsError::Repository(e) => {
                tracing::error!(error = %e, "Product listing failed");
                AppError::Internal("Failed to load products".to_string())
            },
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn invalid(message: &str) -> ListProductsError {
    ListProductsError::Invalid(message.to_string())
}

impl ListProductsQuery {
    pub fn into_filter(self) -> Result<ProductFilter, ListProductsError> {
        let name = match present(self.name) {
            Some(raw) => {
                let clean = sanitize(&raw);
                if clean.is_empty() {
                    return Err(invalid("Query parameter 'name' is invalid after sanitization"));
                }
                Some(clean)
            },
            None => None,
        };

        let price = present(self.price)
            .map(|raw| {
                BigDecimal::from_str(&raw)
                    .ok()
                    .filter(|p| *p >= BigDecimal::from(0))
                    .ok_or_else(|| invalid("price must be a non-negative number"))
            })
            .transpose()?;

        let expiration = present(self.expiration)
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| invalid("expiration must be a valid date (YYYY-MM-DD)"))
            })
            .transpose()?;

        let sort_by = present(self.sort_by)
            .map(|raw| {
                SortField::from_str(&raw)
                    .map_err(|_| invalid("sortBy must be one of: name, price, expiration"))
            })
            .transpose()?;

        let order = match present(self.order).as_deref() {
            None | Some("ASC") => SortOrder::Asc,
            Some("DESC") => SortOrder::Desc,
            Some(_) => return Err(invalid("order must be one of: ASC, DESC")),
        };

        let limit = match present(self.limit) {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|l| (1..=MAX_LIMIT).contains(l))
                .ok_or_else(|| invalid("limit must be an integer between 1 and 100"))?,
            None => DEFAULT_LIMIT,
        };

        let page = match present(self.page) {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| invalid("page must be an integer greater than 0"))?,
            None => 1,
        };
        // The row offset must fit the storage integer type
        if (page - 1).checked_mul(limit).is_none() {
            return Err(invalid("page is too large for the requested limit"));
        }

        Ok(ProductFilter {
            name,
            price,
            expiration,
            sort_by,
            order,
            limit,
            page,
        })
    }
}

pub fn cache_key(filter: &ProductFilter) -> Result<String, ListProductsError> {
    let encoded = serde_json::to_string(filter).map_err(anyhow::Error::from)?;
    Ok(format!("products:{}", encoded))
}

#[tracing::instrument(skip(repo, cache))]
pub async fn handle(
    repo: &dyn ProductRepository,
    cache: &QueryCache,
    query: ListProductsQuery,
) -> Result<Paginated<Product>, ListProductsError> {
    let filter = query.into_filter()?;
    let key = cache_key(&filter)?;

    cache
        .get_or_populate(&key, || async {
            let page = repo.find(&filter).await?;
            Ok::<_, ListProductsError>(Paginated::new(page.data, filter.page, filter.limit, page.total))
        })
        .await
}
