//! JSON number encoding for [`BigDecimal`]
//!
//! `bigdecimal`'s own serde impl writes strings; API clients and the
//! `exchange_rates` JSONB column expect plain numbers.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::rates::Currency;

pub fn to_number(value: &BigDecimal) -> Option<Number> {
    Number::from_str(&value.normalized().to_string()).ok()
}

fn from_number(number: &Number) -> Result<BigDecimal, String> {
    BigDecimal::from_str(&number.to_string()).map_err(|e| e.to_string())
}

/// Converted amounts as a JSON object of numbers
pub fn rates_to_json(rates: &BTreeMap<Currency, BigDecimal>) -> Value {
    Value::Object(
        rates
            .iter()
            .filter_map(|(currency, amount)| {
                to_number(amount).map(|n| (currency.to_string(), Value::Number(n)))
            })
            .collect(),
    )
}

/// `#[serde(with = "crate::db::decimal::option")]`
pub mod option {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<BigDecimal>, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_ref().and_then(to_number).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<BigDecimal>, D::Error> {
        Option::<Number>::deserialize(deserializer)?
            .map(|n| from_number(&n).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Priced {
        #[serde(with = "option")]
        price: Option<BigDecimal>,
    }

    #[test]
    fn test_price_as_number() {
        let priced = Priced {
            price: Some(BigDecimal::from_str("1.99").unwrap()),
        };
        assert_eq!(serde_json::to_value(&priced).unwrap(), json!({"price": 1.99}));

        let back: Priced = serde_json::from_value(json!({"price": 1.99})).unwrap();
        assert_eq!(back, priced);
    }

    #[test]
    fn test_null_price() {
        let priced: Priced = serde_json::from_value(json!({"price": null})).unwrap();
        assert_eq!(priced.price, None);
        assert_eq!(serde_json::to_value(&priced).unwrap(), json!({"price": null}));
    }

    #[test]
    fn test_rates_to_json() {
        let mut rates = BTreeMap::new();
        rates.insert(Currency::Usd, BigDecimal::from_str("1.99").unwrap());
        rates.insert(Currency::Jpy, BigDecimal::from_str("297.50").unwrap());
        assert_eq!(rates_to_json(&rates), json!({"USD": 1.99, "JPY": 297.5}));
    }
}
