// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for Keelson.
//!
//! Two levels of API share one engine:
//!
//! - the core level: [`Engine`], [`Connection`] and [`CursorResult`], with
//!   explicit transactions and named-parameter statements;
//! - the unit-of-work level: [`Session`] tracks mapped entities through an
//!   identity map and turns their changes into SQL on flush or commit.
//!
//! Mapped types implement [`Entity`] against a static [`EntityMeta`];
//! [`Select`] builds queries from that metadata.

pub mod connection;
pub mod cursor;
pub mod engine;
pub mod factory;
pub mod model;
pub mod params;
pub mod query;
pub mod schema;
pub mod session;
pub mod statement;

pub use connection::{Connection, is_constraint_violation};
pub use cursor::{ColumnIndex, CursorResult, Row};
pub use engine::{Engine, Target};
pub use factory::SessionFactory;
pub use model::{
    AnyEntity, Cascade, Collection, ColumnDef, Entity, EntityMeta, ForeignKey, Reference,
    RelationshipDef, SqlType, load_entity,
};
pub use params::{Parameters, Params};
pub use query::{Column, CompareOp, Expr, Order, Select, and_, column, or_};
pub use schema::{create_all, create_table_sql, drop_all};
pub use session::{Handle, ObjectKey, ScalarResult, Session};
pub use statement::{Compiled, Executable, Text, quote_ident, text};

pub use keelson_core::{
    FromValue, KeelsonError, KeelsonResult, ObjectState, TransactionState, Value,
};
