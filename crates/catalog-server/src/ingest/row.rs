//! Row validation
//!
//! Turns one raw CSV line into a [`NewProduct`] or a human-readable error.
//! Nothing here touches I/O.

use bigdecimal::{BigDecimal, RoundingMode};
use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::rates::{Currency, ExchangeRates};

static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d+(\.\d{1,2})?$").expect("static pattern compiles")
});

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static pattern compiles")
});

// Elements whose text content is dropped along with the tags
static NON_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>").expect("static pattern compiles")
});

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<[^>]*>").expect("static pattern compiles")
});

const CURRENCY_SYMBOLS: [&str; 5] = ["R$", "$", "€", "£", "¥"];

/// Strip markup and surrounding whitespace. Idempotent.
pub fn sanitize(input: &str) -> String {
    let without_scripts = NON_TEXT_RE.replace_all(input, "");
    TAG_RE.replace_all(&without_scripts, "").trim().to_string()
}

/// One data line as read from a chunk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    pub name: String,
    pub price: Option<String>,
    pub expiration: Option<String>,
}

/// A validated product ready for insertion
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    pub price: Option<BigDecimal>,
    pub expiration: Option<NaiveDate>,
    pub exchange_rates: BTreeMap<Currency, BigDecimal>,
}

impl RawRow {
    pub fn new(name: impl Into<String>, price: Option<&str>, expiration: Option<&str>) -> Self {
        Self {
            name: name.into(),
            price: price.map(str::to_string),
            expiration: expiration.map(str::to_string),
        }
    }

    /// Validate and convert. The first failing field decides the error.
    pub fn to_product(
        &self,
        exchange_rates: &ExchangeRates,
        sanitize: fn(&str) -> String,
    ) -> Result<NewProduct, String> {
        let name = sanitize(&self.name);
        if name.is_empty() {
            return Err("'name' is missing or empty after sanitization".to_string());
        }

        let price = parse_price(self.price.as_deref())?;
        let expiration = parse_expiration(self.expiration.as_deref())?;

        let exchange_rates = match &price {
            Some(price) => convert(price, exchange_rates),
            None => BTreeMap::new(),
        };

        Ok(NewProduct {
            name,
            price,
            expiration,
            exchange_rates,
        })
    }
}

fn parse_price(raw: Option<&str>) -> Result<Option<BigDecimal>, String> {
    let trimmed = raw.unwrap_or_default().trim();
    let stripped = CURRENCY_SYMBOLS
        .iter()
        .find_map(|symbol| trimmed.strip_prefix(symbol))
        .unwrap_or(trimmed)
        .trim();

    if stripped.is_empty() {
        return Ok(None);
    }

    // Report the value as written, symbol included
    let invalid = || format!("'price' must be a valid non-negative number, got '{}'", trimmed);
    if !PRICE_RE.is_match(stripped) {
        return Err(invalid());
    }
    BigDecimal::from_str(stripped).map(Some).map_err(|_| invalid())
}

fn parse_expiration(raw: Option<&str>) -> Result<Option<NaiveDate>, String> {
    let trimmed = raw.unwrap_or_default().trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if !DATE_RE.is_match(trimmed) {
        return Err(invalid_date(trimmed));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| invalid_date(trimmed))
}

fn invalid_date(raw: &str) -> String {
    format!("'expiration' must be a valid date (YYYY-MM-DD), got '{}'", raw)
}

/// `price × rate` per currency, rounded half-up to cents
fn convert(price: &BigDecimal, rates: &ExchangeRates) -> BTreeMap<Currency, BigDecimal> {
    rates
        .iter()
        .map(|(currency, rate)| {
            (*currency, (price * rate).with_scale_round(2, RoundingMode::HalfUp))
        })
        .collect()
}
