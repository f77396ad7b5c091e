// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Result rows and the forward-only cursor returned by `execute`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use keelson_core::{FromValue, KeelsonError, KeelsonResult, Value};

/// Something that selects a column of a [`Row`]: a position or a column name.
pub trait ColumnIndex {
    fn position(&self, columns: &[String]) -> KeelsonResult<usize>;
}

impl ColumnIndex for usize {
    fn position(&self, columns: &[String]) -> KeelsonResult<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(KeelsonError::Mapping(format!(
                "column index {self} out of range for {} columns",
                columns.len()
            )))
        }
    }
}

impl ColumnIndex for &str {
    fn position(&self, columns: &[String]) -> KeelsonResult<usize> {
        columns
            .iter()
            .position(|c| c == self)
            .or_else(|| columns.iter().position(|c| c.eq_ignore_ascii_case(self)))
            .ok_or_else(|| KeelsonError::Mapping(format!("no column named `{self}` in result")))
    }
}

/// One result row. Column names are shared by every row of a result.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub(crate) fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw value at `index`.
    pub fn value<I: ColumnIndex>(&self, index: I) -> KeelsonResult<&Value> {
        let position = index.position(&self.columns)?;
        Ok(&self.values[position])
    }

    /// Typed value at `index`.
    ///
    /// ```ignore
    /// let name: String = row.get("name")?;
    /// let x = row.get::<_, i64>(0)?;
    /// ```
    pub fn get<I: ColumnIndex, T: FromValue>(&self, index: I) -> KeelsonResult<T> {
        let position = index.position(&self.columns)?;
        T::from_value(&self.values[position]).map_err(|err| match err {
            KeelsonError::Mapping(msg) => {
                KeelsonError::Mapping(format!("column `{}`: {msg}", self.columns[position]))
            }
            other => other,
        })
    }

    pub fn to_map(&self) -> BTreeMap<String, Value> {
        self.columns
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        if self.values.len() == 1 {
            f.write_str(",")?;
        }
        f.write_str(")")
    }
}

/// Outcome of one `execute` call.
///
/// Rows are read while the statement runs and handed out once, in order,
/// through [`Iterator`]. Statements that return no rows report
/// `rows_affected` and, for single inserts, `last_insert_id`.
#[derive(Debug)]
pub struct CursorResult {
    sql: String,
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Row>,
    rows_affected: usize,
    last_insert_id: Option<i64>,
}

impl CursorResult {
    pub(crate) fn with_rows(sql: &str, columns: Arc<[String]>, rows: Vec<Row>) -> Self {
        Self {
            sql: sql.to_string(),
            columns,
            rows: rows.into_iter(),
            rows_affected: 0,
            last_insert_id: None,
        }
    }

    pub(crate) fn with_count(sql: &str, rows_affected: usize, last_insert_id: Option<i64>) -> Self {
        Self {
            sql: sql.to_string(),
            columns: Arc::from(Vec::new()),
            rows: Vec::new().into_iter(),
            rows_affected,
            last_insert_id,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn rows_affected(&self) -> usize {
        self.rows_affected
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.last_insert_id
    }

    /// Every remaining row.
    pub fn all(self) -> Vec<Row> {
        self.rows.collect()
    }

    pub fn first(mut self) -> Option<Row> {
        self.rows.next()
    }

    /// Exactly one row, or `NotFound` / `MultipleResults`.
    pub fn one(self) -> KeelsonResult<Row> {
        let sql = self.sql;
        exactly_one(self.rows, &sql)
    }

    /// At most one row; `MultipleResults` if there are more.
    pub fn one_or_none(self) -> KeelsonResult<Option<Row>> {
        let sql = self.sql;
        at_most_one(self.rows, &sql)
    }

    /// First column of the first row, `None` when there are no rows.
    pub fn scalar<T: FromValue>(mut self) -> KeelsonResult<Option<T>> {
        match self.rows.next() {
            Some(row) if !row.is_empty() => row.get(0).map(Some),
            _ => Ok(None),
        }
    }

    /// First column of every remaining row.
    pub fn scalars<T: FromValue>(self) -> KeelsonResult<Vec<T>> {
        self.rows.map(|row| row.get(0)).collect()
    }
}

impl Iterator for CursorResult {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

pub(crate) fn exactly_one<T>(mut items: impl Iterator<Item = T>, what: &str) -> KeelsonResult<T> {
    let Some(first) = items.next() else {
        return Err(KeelsonError::NotFound(what.to_string()));
    };
    let extra = items.count();
    if extra > 0 {
        return Err(KeelsonError::MultipleResults {
            what: what.to_string(),
            count: extra + 1,
        });
    }
    Ok(first)
}

pub(crate) fn at_most_one<T>(
    mut items: impl Iterator<Item = T>,
    what: &str,
) -> KeelsonResult<Option<T>> {
    let first = items.next();
    let extra = items.count();
    if extra > 0 {
        return Err(KeelsonError::MultipleResults {
            what: what.to_string(),
            count: extra + 1,
        });
    }
    Ok(first)
}
