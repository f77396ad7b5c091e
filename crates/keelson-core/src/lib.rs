// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Keelson persistence layer.
//!
//! Holds the error taxonomy, the dynamic SQL value model and the lifecycle
//! state enums shared by the storage, config and tutorial crates.

pub mod error;
pub mod types;
pub mod value;

pub use error::{BoxError, KeelsonError, KeelsonResult};
pub use types::{ObjectState, TransactionState};
pub use value::{FromValue, Value};
