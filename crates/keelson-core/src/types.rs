// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle states shared by connections and sessions.

use strum::{Display, EnumString};

/// State of one transaction on a connection.
///
/// A transaction starts `Active` and makes exactly one terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionState::Active)
    }
}

/// State of an entity tracked by a session.
///
/// `Pending` is pending-insert, `Persistent` is persistent-clean, `Dirty` is
/// persistent with unflushed changes and `Deleted` is pending-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ObjectState {
    Pending,
    Persistent,
    Dirty,
    Deleted,
    Detached,
}
