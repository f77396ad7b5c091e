// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Keelson integration tests.
//!
//! # Components
//!
//! - [`TestDb`] - an engine on a private memory or temp-file database with
//!   the tutorial schema already created, plus seeders and row counters

pub mod harness;

pub use harness::{TestDb, TestDbBuilder};
