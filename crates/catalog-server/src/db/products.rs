//! Product persistence
//!
//! [`ProductRepository`] is the seam between the pipeline/API and storage:
//! one bulk insert and one filtered, paginated read.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::cmp::Ordering;
use std::collections::HashSet;
use tokio::sync::RwLock;

use super::decimal::rates_to_json;
use crate::ingest::row::NewProduct;

// 6 binds per row keeps each statement well under the 65535 parameter cap
const INSERT_ROWS_PER_STATEMENT: usize = 5_000;

/// A persisted product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    #[serde(with = "crate::db::decimal::option")]
    pub price: Option<BigDecimal>,
    pub expiration: Option<NaiveDate>,
    pub exchange_rates: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Name,
    Price,
    Expiration,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Price => "price",
            SortField::Expiration => "expiration",
        }
    }
}

impl std::str::FromStr for SortField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name" => Ok(SortField::Name),
            "price" => Ok(SortField::Price),
            "expiration" => Ok(SortField::Expiration),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Normalized listing query
///
/// Field order is fixed, so the JSON encoding doubles as a cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub name: Option<String>,
    #[serde(serialize_with = "serialize_price")]
    pub price: Option<BigDecimal>,
    pub expiration: Option<NaiveDate>,
    pub sort_by: Option<SortField>,
    pub order: SortOrder,
    pub limit: i64,
    pub page: i64,
}

fn serialize_price<S: serde::Serializer>(
    value: &Option<BigDecimal>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    crate::db::decimal::option::serialize(value, serializer)
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            name: None,
            price: None,
            expiration: None,
            sort_by: None,
            order: SortOrder::Asc,
            limit: 10,
            page: 1,
        }
    }
}

impl ProductFilter {
    /// Saturates instead of overflowing for out-of-range pages
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.limit)
    }
}

/// One page of products plus the unpaginated match count
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPage {
    pub data: Vec<Product>,
    pub total: i64,
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    /// Insert every row or none, each keyed by `(source, line)`.
    ///
    /// Rows whose key is already stored are skipped, so re-running a source
    /// after a partial failure never duplicates products. Returns the number
    /// of rows written.
    async fn insert_batch(&self, source: &str, rows: &[(u64, NewProduct)]) -> Result<u64>;

    async fn find(&self, filter: &ProductFilter) -> Result<ProductPage>;

    /// Cheap connectivity check for health probes
    async fn ping(&self) -> Result<()>;
}

pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_filters<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a ProductFilter) {
    let mut keyword = " WHERE ";
    let mut next = |builder: &mut QueryBuilder<'a, Postgres>| {
        builder.push(keyword);
        keyword = " AND ";
    };

    if let Some(name) = &filter.name {
        next(builder);
        builder
            .push("name LIKE ")
            .push_bind(format!("%{}%", escape_like(name)));
    }
    if let Some(price) = &filter.price {
        next(builder);
        builder.push("price = ").push_bind(price.clone());
    }
    if let Some(expiration) = filter.expiration {
        next(builder);
        builder.push("expiration = ").push_bind(expiration);
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn insert_batch(&self, source: &str, rows: &[(u64, NewProduct)]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.context("Failed to start transaction")?;
        let mut inserted = 0;

        for chunk in rows.chunks(INSERT_ROWS_PER_STATEMENT) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO products (name, price, expiration, exchange_rates, source_chunk, source_line) ",
            );
            builder.push_values(chunk, |mut b, (line, product)| {
                b.push_bind(product.name.clone())
                    .push_bind(product.price.clone())
                    .push_bind(product.expiration)
                    .push_bind(rates_to_json(&product.exchange_rates))
                    .push_bind(source)
                    .push_bind(*line as i64);
            });
            builder.push(" ON CONFLICT (source_chunk, source_line) DO NOTHING");

            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .context("Failed to insert products")?;
            inserted += result.rows_affected();
        }

        tx.commit().await.context("Failed to commit product batch")?;
        tracing::debug!(source = %source, rows = inserted, skipped = rows.len() as u64 - inserted, "Inserted product batch");
        Ok(inserted)
    }

    async fn find(&self, filter: &ProductFilter) -> Result<ProductPage> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM products");
        push_filters(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .context("Failed to count products")?;

        let mut select =
            QueryBuilder::new("SELECT id, name, price, expiration, exchange_rates FROM products");
        push_filters(&mut select, filter);
        match filter.sort_by {
            Some(field) => {
                select
                    .push(" ORDER BY ")
                    .push(field.column())
                    .push(" ")
                    .push(filter.order.keyword())
                    .push(" NULLS LAST, id ASC");
            },
            None => {
                select.push(" ORDER BY id ASC");
            },
        }
        select
            .push(" LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let data = select
            .build_query_as::<Product>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to list products")?;

        Ok(ProductPage { data, total })
    }

    async fn ping(&self) -> Result<()> {
        super::health_check(&self.pool).await?;
        Ok(())
    }
}

/// In-memory repository with the same filtering rules as Postgres
#[derive(Default)]
pub struct MemoryProductRepository {
    state: RwLock<MemoryRows>,
}

#[derive(Default)]
struct MemoryRows {
    products: Vec<Product>,
    origins: HashSet<(String, u64)>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Product> {
        self.state.read().await.products.clone()
    }
}

fn nulls_last<T: Ord>(a: &Option<T>, b: &Option<T>, order: SortOrder) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match order {
            SortOrder::Asc => a.cmp(b),
            SortOrder::Desc => b.cmp(a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl ProductRepository for MemoryProductRepository {
    async fn insert_batch(&self, source: &str, rows: &[(u64, NewProduct)]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut inserted = 0;
        for (line, product) in rows {
            if !state.origins.insert((source.to_string(), *line)) {
                continue;
            }
            let id = state.products.len() as i64 + 1;
            state.products.push(Product {
                id,
                name: product.name.clone(),
                price: product.price.clone(),
                expiration: product.expiration,
                exchange_rates: rates_to_json(&product.exchange_rates),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn find(&self, filter: &ProductFilter) -> Result<ProductPage> {
        let state = self.state.read().await;
        let mut matches: Vec<Product> = state
            .products
            .iter()
            .filter(|p| filter.name.as_ref().is_none_or(|n| p.name.contains(n.as_str())))
            .filter(|p| filter.price.is_none() || p.price == filter.price)
            .filter(|p| filter.expiration.is_none() || p.expiration == filter.expiration)
            .cloned()
            .collect();

        if let Some(field) = filter.sort_by {
            matches.sort_by(|a, b| {
                let primary = match field {
                    SortField::Name => {
                        nulls_last(&Some(&a.name), &Some(&b.name), filter.order)
                    },
                    SortField::Price => nulls_last(&a.price, &b.price, filter.order),
                    SortField::Expiration => {
                        nulls_last(&a.expiration, &b.expiration, filter.order)
                    },
                };
                primary.then(a.id.cmp(&b.id))
            });
        }

        let total = matches.len() as i64;
        let data = matches
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();

        Ok(ProductPage { data, total })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
