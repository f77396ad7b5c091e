// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dynamically typed SQL values and conversions to and from Rust types.

use std::fmt;

use crate::error::{KeelsonError, KeelsonResult};

/// A single SQL value as stored by SQLite.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the storage class, used in mapping errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
            Value::Text(_) => "TEXT",
            Value::Blob(_) => "BLOB",
        }
    }

}

impl fmt::Display for Value {
    /// Renders values the way echoed statements show bound parameters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("None"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v:?}"),
            Value::Text(v) => write!(f, "'{v}'"),
            Value::Blob(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a borrowed [`Value`] into an owned Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> KeelsonResult<Self>;
}

fn mismatch<T>(expected: &str, value: &Value) -> KeelsonResult<T> {
    Err(KeelsonError::Mapping(format!(
        "expected {expected}, found {}",
        value.kind()
    )))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        match value {
            Value::Integer(v) => Ok(*v),
            other => mismatch("INTEGER", other),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        let wide = i64::from_value(value)?;
        i32::try_from(wide)
            .map_err(|_| KeelsonError::Mapping(format!("integer {wide} out of range for i32")))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        Ok(i64::from_value(value)? != 0)
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        match value {
            Value::Real(v) => Ok(*v),
            // REAL affinity columns may hand back whole numbers as INTEGER.
            Value::Integer(v) => Ok(*v as f64),
            other => mismatch("REAL", other),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        match value {
            Value::Text(v) => Ok(v.clone()),
            other => mismatch("TEXT", other),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        match value {
            Value::Blob(v) => Ok(v.clone()),
            other => mismatch("BLOB", other),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> KeelsonResult<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_maps_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("sandy")), Value::Text("sandy".into()));
    }

    #[test]
    fn display_matches_echo_format() {
        assert_eq!(Value::Integer(4).to_string(), "4");
        assert_eq!(Value::Text("ed".into()).to_string(), "'ed'");
        assert_eq!(Value::Null.to_string(), "None");
        assert_eq!(Value::Real(1.5).to_string(), "1.5");
    }

    #[test]
    fn typed_extraction_reports_mismatch() {
        let err = i64::from_value(&Value::Text("x".into())).unwrap_err();
        assert!(matches!(err, KeelsonError::Mapping(ref m) if m.contains("INTEGER")));
        assert_eq!(Option::<String>::from_value(&Value::Null).unwrap(), None);
        assert!(bool::from_value(&Value::Integer(1)).unwrap());
    }

    #[test]
    fn i32_rejects_out_of_range() {
        assert!(i32::from_value(&Value::Integer(i64::MAX)).is_err());
        assert_eq!(i32::from_value(&Value::Integer(-7)).unwrap(), -7);
    }
}
