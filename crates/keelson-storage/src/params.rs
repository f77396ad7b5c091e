// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named statement parameters and their binding onto prepared statements.

use std::collections::BTreeMap;
use std::fmt;

use keelson_core::{KeelsonError, KeelsonResult, Value};
use rusqlite::types::Value as SqlValue;

/// One set of named parameter values, keyed without the `:` prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named value, builder style.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A copy of `self` overlaid with `other`; values in `other` win.
    pub(crate) fn merged(&self, other: &Params) -> Params {
        let mut values = self.values.clone();
        values.extend(other.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        Params { values }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

/// Build a [`Params`] set from `name => value` pairs.
///
/// ```
/// let p = keelson_storage::params! { "x" => 1, "y" => 4 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Params::new()$(.bind($name, $value))+
    };
}

/// What to bind when executing a statement.
///
/// `Many` runs the statement once per parameter set (executemany).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Parameters {
    #[default]
    None,
    Single(Params),
    Many(Vec<Params>),
}

impl From<()> for Parameters {
    fn from(_: ()) -> Self {
        Parameters::None
    }
}

impl From<Params> for Parameters {
    fn from(params: Params) -> Self {
        Parameters::Single(params)
    }
}

impl From<&Params> for Parameters {
    fn from(params: &Params) -> Self {
        Parameters::Single(params.clone())
    }
}

impl From<Vec<Params>> for Parameters {
    fn from(sets: Vec<Params>) -> Self {
        Parameters::Many(sets)
    }
}

impl<const N: usize> From<[Params; N]> for Parameters {
    fn from(sets: [Params; N]) -> Self {
        Parameters::Many(sets.into())
    }
}

pub(crate) fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(v) => SqlValue::Integer(*v),
        Value::Real(v) => SqlValue::Real(*v),
        Value::Text(v) => SqlValue::Text(v.clone()),
        Value::Blob(v) => SqlValue::Blob(v.clone()),
    }
}

pub(crate) fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(v),
        SqlValue::Real(v) => Value::Real(v),
        SqlValue::Text(v) => Value::Text(v),
        SqlValue::Blob(v) => Value::Blob(v),
    }
}

/// Bind every named placeholder of `stmt` from `params`.
///
/// `:x`, `@x` and `$x` all look up `x`. Extra entries in `params` are ignored.
pub(crate) fn bind_named(
    stmt: &mut rusqlite::Statement<'_>,
    sql: &str,
    params: &Params,
) -> KeelsonResult<()> {
    for index in 1..=stmt.parameter_count() {
        let name = match stmt.parameter_name(index) {
            Some(raw) => raw.trim_start_matches([':', '@', '$']).to_string(),
            None => {
                return Err(KeelsonError::InvalidArgument(format!(
                    "positional parameter #{index} is not supported, use a named parameter such as :x"
                )));
            }
        };
        let value = params.get(&name).ok_or_else(|| {
            KeelsonError::InvalidArgument(format!("missing value for bound parameter `{name}`"))
        })?;
        stmt.raw_bind_parameter(index, to_sql(value))
            .map_err(|e| KeelsonError::statement(sql, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_builds_params() {
        let p = crate::params! { "x" => 1, "name" => "ed" };
        assert_eq!(p.get("x"), Some(&Value::Integer(1)));
        assert_eq!(p.get("name"), Some(&Value::Text("ed".into())));
        assert!(crate::params! {}.is_empty());
    }

    #[test]
    fn merge_prefers_overlay() {
        let base = Params::new().bind("p1", 1).bind("y", 2);
        let merged = base.merged(&Params::new().bind("y", 9));
        assert_eq!(merged.get("p1"), Some(&Value::Integer(1)));
        assert_eq!(merged.get("y"), Some(&Value::Integer(9)));
    }

    #[test]
    fn display_lists_pairs_in_name_order() {
        let p = Params::new().bind("y", 4).bind("x", 2);
        assert_eq!(p.to_string(), "{x: 2, y: 4}");
    }

    #[test]
    fn conversions_pick_the_right_shape() {
        assert_eq!(Parameters::from(()), Parameters::None);
        assert!(matches!(Parameters::from(Params::new()), Parameters::Single(_)));
        assert!(matches!(
            Parameters::from([Params::new(), Params::new()]),
            Parameters::Many(ref sets) if sets.len() == 2
        ));
    }

    #[test]
    fn binding_reports_missing_and_positional_parameters() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();

        let mut stmt = conn.prepare("SELECT :x + :y").unwrap();
        let err = bind_named(&mut stmt, "SELECT :x + :y", &Params::new().bind("x", 1)).unwrap_err();
        assert!(matches!(err, KeelsonError::InvalidArgument(ref m) if m.contains("`y`")));

        let mut stmt = conn.prepare("SELECT ?").unwrap();
        let err = bind_named(&mut stmt, "SELECT ?", &Params::new()).unwrap_err();
        assert!(matches!(err, KeelsonError::InvalidArgument(ref m) if m.contains("positional")));
    }
}
