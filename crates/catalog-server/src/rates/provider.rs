//! Cached exchange-rate lookup with primary/fallback sources

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{ExchangeRates, RateSource, RatesError};
use crate::cache::CacheStore;

/// Cache key holding the current [`ExchangeRateSnapshot`].
pub const EXCHANGE_RATES_CACHE_KEY: &str = "exchange_rates";

/// Rates as fetched, plus when they were fetched
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRateSnapshot {
    pub rates: ExchangeRates,
    pub fetched_at: DateTime<Utc>,
}

pub struct ExchangeRateProvider {
    cache: Arc<dyn CacheStore>,
    primary: Arc<dyn RateSource>,
    fallback: Arc<dyn RateSource>,
    ttl: Duration,
}

impl ExchangeRateProvider {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        primary: Arc<dyn RateSource>,
        fallback: Arc<dyn RateSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            primary,
            fallback,
            ttl,
        }
    }

    /// Current rates: cached snapshot, else primary, else fallback.
    ///
    /// A cache write failure does not fail the call.
    pub async fn fetch_rates(&self) -> Result<ExchangeRates, RatesError> {
        if let Some(snapshot) = self.cached().await {
            tracing::debug!(fetched_at = %snapshot.fetched_at, "Using cached exchange rates");
            return Ok(snapshot.rates);
        }

        let rates = match self.primary.fetch().await {
            Ok(rates) => rates,
            Err(primary_err) => {
                tracing::warn!(
                    source = self.primary.name(),
                    error = %primary_err,
                    "Primary exchange rate source failed, trying fallback"
                );
                self.fallback.fetch().await.map_err(|fallback_err| {
                    tracing::error!(
                        source = self.fallback.name(),
                        error = %fallback_err,
                        "Failed to fetch exchange rates"
                    );
                    RatesError::Unavailable
                })?
            },
        };

        let snapshot = ExchangeRateSnapshot {
            rates,
            fetched_at: Utc::now(),
        };
        self.store(&snapshot).await;

        Ok(snapshot.rates)
    }

    async fn cached(&self) -> Option<ExchangeRateSnapshot> {
        match self.cache.get(EXCHANGE_RATES_CACHE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring undecodable exchange rate snapshot");
                    None
                },
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Exchange rate cache read failed");
                None
            },
        }
    }

    async fn store(&self, snapshot: &ExchangeRateSnapshot) {
        let value = match serde_json::to_value(snapshot) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode exchange rate snapshot");
                return;
            },
        };

        match self.cache.set(EXCHANGE_RATES_CACHE_KEY, value, self.ttl).await {
            Ok(()) => tracing::info!(ttl_secs = self.ttl.as_secs(), "Cached exchange rates"),
            Err(e) => tracing::error!(error = %e, "Failed to cache exchange rates"),
        }
    }
}
