//! Exchange rates
//!
//! [`ExchangeRateProvider`] answers "what is one USD worth in each supported
//! currency" from a TTL cache, a primary HTTP source and a fallback source,
//! in that order.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

mod provider;
mod source;

pub use provider::{ExchangeRateProvider, ExchangeRateSnapshot, EXCHANGE_RATES_CACHE_KEY};
pub use source::{HttpRateSource, RateSource};

/// Default primary rate source.
pub const DEFAULT_PRIMARY_URL: &str =
    "https://cdn.jsdelivr.net/npm/@fawazahmed0/currency-api@latest/v1/currencies/usd.json";

/// Default fallback rate source.
pub const DEFAULT_FALLBACK_URL: &str =
    "https://latest.currency-api.pages.dev/v1/currencies/usd.json";

/// Default HTTP timeout per source in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default lifetime of a cached rate snapshot (1 hour).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;

/// Currencies every product price is converted into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Jpy,
    Brl,
}

impl Currency {
    pub const ALL: [Currency; 5] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Jpy,
        Currency::Brl,
    ];

    /// Lowercase code used by the upstream rate feeds
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "usd",
            Currency::Eur => "eur",
            Currency::Gbp => "gbp",
            Currency::Jpy => "jpy",
            Currency::Brl => "brl",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code().to_uppercase())
    }
}

/// Units of each currency per one USD
pub type ExchangeRates = BTreeMap<Currency, BigDecimal>;

#[derive(Debug, Error)]
pub enum RatesError {
    #[error("Request to {source_name} failed: {message}")]
    Request { source_name: String, message: String },

    #[error("Malformed response from {source_name}: {message}")]
    Malformed { source_name: String, message: String },

    #[error("Failed to fetch exchange rates")]
    Unavailable,
}

/// Rate source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatesConfig {
    pub primary_url: String,
    pub fallback_url: String,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            primary_url: DEFAULT_PRIMARY_URL.to_string(),
            fallback_url: DEFAULT_FALLBACK_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

impl RatesConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            primary_url: std::env::var("EXCHANGE_RATE_PRIMARY_URL")
                .unwrap_or_else(|_| DEFAULT_PRIMARY_URL.to_string()),
            fallback_url: std::env::var("EXCHANGE_RATE_FALLBACK_URL")
                .unwrap_or_else(|_| DEFAULT_FALLBACK_URL.to_string()),
            timeout_secs: std::env::var("EXCHANGE_RATE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            cache_ttl_secs: std::env::var("EXCHANGE_RATE_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.primary_url.is_empty() {
            anyhow::bail!("EXCHANGE_RATE_PRIMARY_URL cannot be empty");
        }
        if self.fallback_url.is_empty() {
            anyhow::bail!("EXCHANGE_RATE_FALLBACK_URL cannot be empty");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("EXCHANGE_RATE_TIMEOUT_SECS must be greater than 0");
        }
        if self.cache_ttl_secs == 0 {
            anyhow::bail!("EXCHANGE_RATE_CACHE_TTL_SECS must be greater than 0");
        }
        Ok(())
    }
}
