//! Upstream rate feeds

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use reqwest::Client;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use super::{Currency, ExchangeRates, RatesError};

/// One place exchange rates can be fetched from
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Short label used in logs and errors
    fn name(&self) -> &str;

    async fn fetch(&self) -> Result<ExchangeRates, RatesError>;
}

/// Rate feed serving `{"usd": {"usd": 1, "eur": 0.92, ...}}`
pub struct HttpRateSource {
    name: String,
    url: String,
    client: Client,
}

impl HttpRateSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<ExchangeRates, RatesError> {
        let request_error = |e: reqwest::Error| RatesError::Request {
            source_name: self.name.clone(),
            message: e.to_string(),
        };

        let body: Value = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_error)?
            .json()
            .await
            .map_err(|e| RatesError::Malformed {
                source_name: self.name.clone(),
                message: e.to_string(),
            })?;

        parse_usd_rates(&self.name, &body)
    }
}

/// Normalize a feed body into the supported currency set.
///
/// USD falls back to 1 when the feed omits it; every other currency is
/// required.
pub(crate) fn parse_usd_rates(source_name: &str, body: &Value) -> Result<ExchangeRates, RatesError> {
    let malformed = |message: String| RatesError::Malformed {
        source_name: source_name.to_string(),
        message,
    };

    let usd = body
        .get("usd")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing 'usd' object".to_string()))?;

    let mut rates = ExchangeRates::new();
    for currency in Currency::ALL {
        let rate = match usd.get(currency.code()) {
            Some(Value::Number(n)) => BigDecimal::from_str(&n.to_string())
                .map_err(|e| malformed(format!("bad {} rate: {}", currency, e)))?,
            Some(other) => {
                return Err(malformed(format!("{} rate is not a number: {}", currency, other)))
            },
            None if currency == Currency::Usd => BigDecimal::from(1),
            None => return Err(malformed(format!("missing {} rate", currency))),
        };
        rates.insert(currency, rate);
    }

    Ok(rates)
}
