// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Guided walkthroughs of the Keelson persistence layer.
//!
//! Each walkthrough drives an engine or session through one part of the API
//! and writes a transcript of what it saw to any [`std::io::Write`]. Turn on
//! the engine's `echo` flag to interleave the emitted SQL through `tracing`.
//!
//! # Components
//!
//! - [`models`] - `User`, `Address` and `SomeTable`
//! - [`basics`] - connections, commit-as-you-go, `begin` blocks and text statements
//! - [`quickstart`] - the ORM quickstart: mapping, cascades and joins
//! - [`crud`] - `filter_by`, column selection, add, delete and `get`
//! - [`factory`] - sessions from a shared [`SessionFactory`]

pub mod basics;
pub mod crud;
pub mod factory;
pub mod models;
pub mod quickstart;

use std::io::Write;

use keelson_core::KeelsonError;
use keelson_storage::SessionFactory;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// Errors a walkthrough can end with.
#[derive(Debug, Error)]
pub enum TutorialError {
    #[error(transparent)]
    Keelson(#[from] KeelsonError),

    #[error("could not write the transcript: {0}")]
    Io(#[from] std::io::Error),

    /// The store returned something the walkthrough did not expect.
    #[error("unexpected result: {0}")]
    Unexpected(String),
}

pub type TutorialResult<T> = Result<T, TutorialError>;

/// The available walkthroughs, in the order `all` runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Walkthrough {
    Basics,
    Quickstart,
    Crud,
    Factory,
}

impl Walkthrough {
    pub fn summary(self) -> &'static str {
        match self {
            Walkthrough::Basics => "raw connections, commit-as-you-go and text statements",
            Walkthrough::Quickstart => "mapped users and addresses with cascades and joins",
            Walkthrough::Crud => "filter_by, column selection, add, delete and get",
            Walkthrough::Factory => "sessions from a shared session factory",
        }
    }

    /// Run against the factory's engine, writing the transcript to `out`.
    pub fn run(self, factory: &SessionFactory, out: &mut dyn Write) -> TutorialResult<()> {
        tracing::debug!(walkthrough = %self, target = %factory.engine().target(), "starting walkthrough");
        writeln!(out, "== {self}: {} ==", self.summary())?;
        match self {
            Walkthrough::Basics => basics::run(factory, out),
            Walkthrough::Quickstart => quickstart::run(factory, out),
            Walkthrough::Crud => crud::run(factory, out),
            Walkthrough::Factory => factory::run(factory, out),
        }
    }
}
