//! Tolerant field decoders for upstream estimate exports.
//!
//! The upstream system is loose about types: costs arrive as numbers or
//! numeric strings, ids as numbers or strings, and nested objects are
//! sometimes replaced by scalars. Every decoder here maps anything it cannot
//! read to `None` instead of failing the whole record.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => parse_decimal(&number.to_string()),
        Value::String(raw) => parse_decimal(raw.trim()),
        _ => None,
    }
}

/// Reads a non-negative integer index from a number or numeric string.
pub fn index_from_value(value: &Value) -> Option<usize> {
    match value {
        Value::Number(number) => number.as_u64().and_then(|index| usize::try_from(index).ok()),
        Value::String(raw) => raw.trim().parse::<usize>().ok(),
        _ => None,
    }
}

fn parse_decimal(raw: &str) -> Option<Decimal> {
    if raw.is_empty() {
        return None;
    }
    Decimal::from_str(raw).ok().or_else(|| Decimal::from_scientific(raw).ok())
}

pub fn optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(decimal_from_value))
}

pub fn optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(raw)) => Some(raw),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

/// Ids arrive as numbers or strings; anything else becomes an empty id.
pub fn identifier<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    Ok(T::from(optional_string(deserializer)?.unwrap_or_default()))
}

/// Decodes a nested object, dropping it when its shape does not match.
pub fn optional_object<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(value @ Value::Object(_)) => serde_json::from_value(value).ok(),
        _ => None,
    })
}

/// Drops explicit JSON nulls so they read the same as a missing key.
pub fn optional_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.is_null()))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{decimal_from_value, index_from_value};

    #[test]
    fn decimals_accept_numbers_and_numeric_strings() {
        assert_eq!(decimal_from_value(&json!(5000)), Some(Decimal::new(5000, 0)));
        assert_eq!(decimal_from_value(&json!(2.5)), Some(Decimal::new(25, 1)));
        assert_eq!(decimal_from_value(&json!(" 1700.50 ")), Some(Decimal::new(170_050, 2)));
        assert_eq!(decimal_from_value(&json!("1e3")), Some(Decimal::new(1000, 0)));
    }

    #[test]
    fn unreadable_decimals_degrade_to_none() {
        assert_eq!(decimal_from_value(&json!("")), None);
        assert_eq!(decimal_from_value(&json!("n/a")), None);
        assert_eq!(decimal_from_value(&json!(true)), None);
        assert_eq!(decimal_from_value(&json!({"value": 1})), None);
    }

    #[test]
    fn indices_reject_negative_and_fractional_values() {
        assert_eq!(index_from_value(&json!(1)), Some(1));
        assert_eq!(index_from_value(&json!("2")), Some(2));
        assert_eq!(index_from_value(&json!(-1)), None);
        assert_eq!(index_from_value(&json!(1.5)), None);
        assert_eq!(index_from_value(&json!(null)), None);
    }
}
