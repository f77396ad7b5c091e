// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A leased link to the store with explicit transaction control.
//!
//! The first statement outside a transaction begins one implicitly. Dropping
//! a connection with an open transaction rolls it back.

use std::sync::Arc;

use keelson_core::{KeelsonError, KeelsonResult, TransactionState};
use tracing::{debug, info, trace, warn};

use crate::cursor::{CursorResult, Row};
use crate::params::{Parameters, Params, bind_named, from_sql};
use crate::statement::{Executable, is_insert, is_transaction_control};

/// One live link to the store. Owned by a single caller; `Send` but not `Sync`.
#[derive(Debug)]
pub struct Connection {
    raw: rusqlite::Connection,
    id: u64,
    echo: bool,
    state: Option<TransactionState>,
}

impl Connection {
    pub(crate) fn new(raw: rusqlite::Connection, id: u64, echo: bool) -> Self {
        Self {
            raw,
            id,
            echo,
            state: None,
        }
    }

    /// Identifier used in log events.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// State of the current or most recent transaction, `None` before the first.
    pub fn transaction_state(&self) -> Option<TransactionState> {
        self.state
    }

    pub fn in_transaction(&self) -> bool {
        self.state == Some(TransactionState::Active)
    }

    /// Run one statement.
    ///
    /// `params` is `()`, a [`Params`] set, or a `Vec<Params>` to run the
    /// statement once per set.
    pub fn execute<S>(
        &mut self,
        statement: &S,
        params: impl Into<Parameters>,
    ) -> KeelsonResult<CursorResult>
    where
        S: Executable + ?Sized,
    {
        let compiled = statement.compile()?;
        if is_transaction_control(&compiled.sql) {
            return Err(KeelsonError::InvalidArgument(
                "use Connection::begin, commit or rollback for transaction control".to_string(),
            ));
        }
        self.autobegin()?;
        let result = self.run(&compiled.sql, &compiled.params, params.into());
        self.sync_after_failure(&result);
        result
    }

    /// Run generated SQL inside the current (or an implicit) transaction.
    pub(crate) fn execute_sql(&mut self, sql: &str, params: Params) -> KeelsonResult<CursorResult> {
        self.autobegin()?;
        let result = self.run(sql, &Params::new(), Parameters::Single(params));
        self.sync_after_failure(&result);
        result
    }

    fn run(&self, sql: &str, base: &Params, params: Parameters) -> KeelsonResult<CursorResult> {
        let mut stmt = self
            .raw
            .prepare(sql)
            .map_err(|e| KeelsonError::statement(sql, e))?;
        let returns_rows = stmt.column_count() > 0;

        match params {
            Parameters::Many(sets) => {
                if returns_rows {
                    return Err(KeelsonError::InvalidArgument(
                        "executemany cannot run a statement that returns rows".to_string(),
                    ));
                }
                self.echo_statement(sql, &format!("[{} parameter sets]", sets.len()));
                let mut affected = 0;
                for set in &sets {
                    let merged = base.merged(set);
                    self.echo_parameters(&merged);
                    bind_named(&mut stmt, sql, &merged)?;
                    affected += stmt
                        .raw_execute()
                        .map_err(|e| KeelsonError::statement(sql, e))?;
                }
                Ok(CursorResult::with_count(sql, affected, None))
            }
            Parameters::Single(set) => self.run_once(&mut stmt, sql, &base.merged(&set), returns_rows),
            Parameters::None => self.run_once(&mut stmt, sql, base, returns_rows),
        }
    }

    fn run_once(
        &self,
        stmt: &mut rusqlite::Statement<'_>,
        sql: &str,
        params: &Params,
        returns_rows: bool,
    ) -> KeelsonResult<CursorResult> {
        self.echo_statement(sql, &params.to_string());
        bind_named(stmt, sql, params)?;

        if !returns_rows {
            let affected = stmt
                .raw_execute()
                .map_err(|e| KeelsonError::statement(sql, e))?;
            let last_insert_id =
                (is_insert(sql) && affected > 0).then(|| self.raw.last_insert_rowid());
            return Ok(CursorResult::with_count(sql, affected, last_insert_id));
        }

        let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = Vec::new();
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next().map_err(|e| KeelsonError::statement(sql, e))? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                let value: rusqlite::types::Value =
                    row.get(index).map_err(|e| KeelsonError::statement(sql, e))?;
                values.push(from_sql(value));
            }
            rows.push(Row::new(Arc::clone(&columns), values));
        }
        Ok(CursorResult::with_rows(sql, columns, rows))
    }

    /// Begin a transaction explicitly.
    pub fn begin(&mut self) -> KeelsonResult<()> {
        if self.in_transaction() {
            return Err(KeelsonError::transaction(
                "a transaction is already active on this connection",
            ));
        }
        self.start("BEGIN")
    }

    fn autobegin(&mut self) -> KeelsonResult<()> {
        if self.in_transaction() {
            return Ok(());
        }
        self.start("BEGIN (implicit)")
    }

    fn start(&mut self, marker: &str) -> KeelsonResult<()> {
        self.echo_marker(marker);
        self.raw
            .execute_batch("BEGIN")
            .map_err(|e| store_transaction_error("could not begin a transaction", e))?;
        self.state = Some(TransactionState::Active);
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// A commit the store rejects leaves the transaction rolled back.
    pub fn commit(&mut self) -> KeelsonResult<()> {
        if !self.in_transaction() {
            return Err(KeelsonError::transaction("no active transaction to commit"));
        }
        if self.raw.is_autocommit() {
            self.state = Some(TransactionState::RolledBack);
            return Err(KeelsonError::transaction(
                "the store already rolled this transaction back",
            ));
        }

        self.echo_marker("COMMIT");
        match self.raw.execute_batch("COMMIT") {
            Ok(()) => {
                self.state = Some(TransactionState::Committed);
                Ok(())
            }
            Err(err) => {
                if !self.raw.is_autocommit() {
                    self.echo_marker("ROLLBACK");
                    if let Err(rollback_err) = self.raw.execute_batch("ROLLBACK") {
                        warn!(conn = self.id, error = %rollback_err, "rollback after failed commit also failed");
                    }
                }
                self.state = Some(TransactionState::RolledBack);
                Err(store_transaction_error(
                    "commit rejected by the store, transaction rolled back",
                    err,
                ))
            }
        }
    }

    /// Roll back the active transaction.
    pub fn rollback(&mut self) -> KeelsonResult<()> {
        if !self.in_transaction() {
            return Err(KeelsonError::transaction("no active transaction to roll back"));
        }
        self.state = Some(TransactionState::RolledBack);
        if self.raw.is_autocommit() {
            return Ok(());
        }
        self.echo_marker("ROLLBACK");
        self.raw
            .execute_batch("ROLLBACK")
            .map_err(|e| store_transaction_error("rollback failed", e))
    }

    /// Release the link, rolling back an open transaction first.
    pub fn close(mut self) -> KeelsonResult<()> {
        if self.in_transaction() {
            self.rollback()?;
        }
        Ok(())
    }

    /// Some store errors end the transaction on the SQLite side.
    fn sync_after_failure(&mut self, result: &KeelsonResult<CursorResult>) {
        if result.is_err() && self.in_transaction() && self.raw.is_autocommit() {
            warn!(conn = self.id, "store rolled back the transaction after a failed statement");
            self.state = Some(TransactionState::RolledBack);
        }
    }

    fn echo_statement(&self, sql: &str, params: &str) {
        if self.echo {
            info!(conn = self.id, %params, "{sql}");
        } else {
            trace!(conn = self.id, %params, "{sql}");
        }
    }

    fn echo_parameters(&self, params: &Params) {
        if self.echo {
            info!(conn = self.id, "{params}");
        } else {
            trace!(conn = self.id, "{params}");
        }
    }

    fn echo_marker(&self, marker: &str) {
        if self.echo {
            info!(conn = self.id, "{marker}");
        } else {
            trace!(conn = self.id, "{marker}");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.in_transaction()
            && let Err(err) = self.rollback()
        {
            warn!(conn = self.id, error = %err, "implicit rollback on release failed");
        }
        debug!(conn = self.id, "connection released");
    }
}

fn store_transaction_error(message: &str, err: rusqlite::Error) -> KeelsonError {
    KeelsonError::Transaction {
        message: message.to_string(),
        source: Some(Box::new(err)),
    }
}

/// True when `err` was caused by a constraint the store enforces
/// (unique, not null, foreign key, check).
pub fn is_constraint_violation(err: &KeelsonError) -> bool {
    let source: &(dyn std::error::Error + Send + Sync + 'static) = match err {
        KeelsonError::Statement { source, .. } | KeelsonError::Commit { source } => &**source,
        KeelsonError::Transaction {
            source: Some(source),
            ..
        } => &**source,
        _ => return false,
    };
    if let Some(inner) = source.downcast_ref::<KeelsonError>() {
        return is_constraint_violation(inner);
    }
    source
        .downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        == Some(rusqlite::ErrorCode::ConstraintViolation)
}
