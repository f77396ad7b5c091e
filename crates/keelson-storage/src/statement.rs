// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anything that can be handed to `execute`: raw SQL strings, [`Text`]
//! statements and composed [`Select`](crate::query::Select) queries.

use keelson_core::KeelsonResult;

use crate::params::Params;

/// SQL text plus the parameters the statement itself carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Params,
}

impl Compiled {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
        }
    }
}

/// A statement that compiles to SQL for the connection to run.
pub trait Executable {
    fn compile(&self) -> KeelsonResult<Compiled>;
}

/// A textual SQL statement with named placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text(String);

/// Wrap a SQL string as a [`Text`] statement.
pub fn text(sql: impl Into<String>) -> Text {
    Text(sql.into())
}

impl Text {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Executable for Text {
    fn compile(&self) -> KeelsonResult<Compiled> {
        Ok(Compiled::new(self.0.as_str()))
    }
}

impl Executable for str {
    fn compile(&self) -> KeelsonResult<Compiled> {
        Ok(Compiled::new(self))
    }
}

impl Executable for String {
    fn compile(&self) -> KeelsonResult<Compiled> {
        Ok(Compiled::new(self.as_str()))
    }
}

/// Double-quote an identifier for SQLite.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL with leading whitespace and comments removed.
pub(crate) fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(line) = rest.strip_prefix("--") {
            rest = match line.find('\n') {
                Some(end) => line[end + 1..].trim_start(),
                None => "",
            };
        } else if let Some(block) = rest.strip_prefix("/*") {
            rest = match block.find("*/") {
                Some(end) => block[end + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

/// Upper-cased leading keywords of `sql`, comments skipped.
fn keywords(sql: &str) -> impl Iterator<Item = String> + '_ {
    strip_leading_comments(sql)
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
}

/// True for raw `BEGIN`/`COMMIT`/`END`/`ROLLBACK` statements. Those must go
/// through the connection's transaction methods.
pub(crate) fn is_transaction_control(sql: &str) -> bool {
    let mut words = keywords(sql).filter(|w| w != "TRANSACTION");
    match words.next().as_deref() {
        Some("BEGIN" | "COMMIT" | "END") => true,
        Some("ROLLBACK") => !matches!(words.next().as_deref(), Some("TO")),
        _ => false,
    }
}

/// True for `INSERT` and `REPLACE` statements.
pub(crate) fn is_insert(sql: &str) -> bool {
    matches!(keywords(sql).next().as_deref(), Some("INSERT" | "REPLACE"))
}
