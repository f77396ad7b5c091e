// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Walking and loading aggregates: a root entity plus everything it owns
//! through its relationships.

use keelson_core::{KeelsonError, KeelsonResult, Value};

use crate::connection::Connection;
use crate::cursor::Row;
use crate::model::{AnyEntity, EntityMeta, RelationshipDef};
use crate::params::Params;
use crate::session::identity::ObjectKey;
use crate::session::state::ChildRecord;
use crate::statement::quote_ident;

/// One hop from a parent into its collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    pub relationship: &'static str,
    pub index: usize,
}

/// A descendant reached while walking an aggregate.
#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub path: Vec<Step>,
    pub meta: &'static EntityMeta,
    pub relationship: &'static RelationshipDef,
    pub id: Option<i64>,
    pub values: Vec<Value>,
}

impl Node {
    pub fn key(&self) -> Option<ObjectKey> {
        self.id.map(|id| ObjectKey::new(self.meta, id))
    }

    pub fn parent_path(&self) -> &[Step] {
        &self.path[..self.path.len().saturating_sub(1)]
    }
}

/// Every descendant of `root`, parents before their children.
pub(crate) fn descendants(root: &dyn AnyEntity) -> Vec<Node> {
    let mut out = Vec::new();
    collect(root, &mut Vec::new(), &mut out);
    out
}

fn collect(entity: &dyn AnyEntity, path: &mut Vec<Step>, out: &mut Vec<Node>) {
    for rel in entity.entity_meta().relationships {
        let Some(children) = entity.children(rel.name) else {
            continue;
        };
        for index in 0..children.len() {
            let Some(child) = children.member(index) else {
                continue;
            };
            path.push(Step {
                relationship: rel.name,
                index,
            });
            out.push(Node {
                path: path.clone(),
                meta: child.entity_meta(),
                relationship: rel,
                id: child.entity_id(),
                values: child.column_values(),
            });
            collect(child, path, out);
            path.pop();
        }
    }
}

pub(crate) fn node<'a>(root: &'a dyn AnyEntity, path: &[Step]) -> Option<&'a dyn AnyEntity> {
    let mut current = root;
    for step in path {
        current = current.children(step.relationship)?.member(step.index)?;
    }
    Some(current)
}

pub(crate) fn node_mut<'a>(
    root: &'a mut dyn AnyEntity,
    path: &[Step],
) -> Option<&'a mut dyn AnyEntity> {
    let mut current = root;
    for step in path {
        current = current.children_mut(step.relationship)?.member_mut(step.index)?;
    }
    Some(current)
}

/// Path to the descendant identified by `key`.
pub(crate) fn find(root: &dyn AnyEntity, key: ObjectKey) -> Option<Vec<Step>> {
    descendants(root)
        .into_iter()
        .find(|node| node.key() == Some(key))
        .map(|node| node.path)
}

pub(crate) fn root_key(entity: &dyn AnyEntity) -> Option<ObjectKey> {
    entity
        .entity_id()
        .map(|id| ObjectKey::new(entity.entity_meta(), id))
}

/// A freshly read aggregate and the snapshot of its descendants.
#[derive(Debug)]
pub(crate) struct Loaded {
    pub key: ObjectKey,
    pub entity: Box<dyn AnyEntity>,
    pub children: Vec<(ObjectKey, ChildRecord)>,
}

pub(crate) fn select_sql(meta: &EntityMeta, column: &str) -> String {
    let columns: Vec<String> = meta.column_names().into_iter().map(quote_ident).collect();
    format!(
        "SELECT {} FROM {} WHERE {} = :key ORDER BY {}",
        columns.join(", "),
        quote_ident(meta.table),
        quote_ident(column),
        quote_ident(meta.primary_key)
    )
}

/// Point lookup of one row by primary key.
pub(crate) fn fetch_row(
    conn: &mut Connection,
    meta: &EntityMeta,
    id: i64,
) -> KeelsonResult<Option<Row>> {
    conn.execute_sql(
        &select_sql(meta, meta.primary_key),
        Params::new().bind("key", id),
    )?
    .one_or_none()
}

pub(crate) fn load_by_id(
    conn: &mut Connection,
    meta: &'static EntityMeta,
    id: i64,
) -> KeelsonResult<Option<Loaded>> {
    match fetch_row(conn, meta, id)? {
        Some(row) => load_from_row(conn, meta, &row).map(Some),
        None => Ok(None),
    }
}

/// Build the aggregate rooted at `row`, reading every owned collection.
pub(crate) fn load_from_row(
    conn: &mut Connection,
    meta: &'static EntityMeta,
    row: &Row,
) -> KeelsonResult<Loaded> {
    let mut entity = (meta.load)(row)?;
    let key = root_key(entity.as_ref()).ok_or_else(|| {
        KeelsonError::Mapping(format!("{} row loaded without a primary key", meta.name))
    })?;
    let mut children = Vec::new();
    load_children(conn, entity.as_mut(), key, &mut children)?;
    Ok(Loaded {
        key,
        entity,
        children,
    })
}

fn load_children(
    conn: &mut Connection,
    entity: &mut dyn AnyEntity,
    key: ObjectKey,
    out: &mut Vec<(ObjectKey, ChildRecord)>,
) -> KeelsonResult<()> {
    let meta = entity.entity_meta();
    for rel in meta.relationships {
        let target = rel.target();
        let rows = conn
            .execute_sql(
                &select_sql(target, rel.foreign_key),
                Params::new().bind("key", key.id()),
            )?
            .all();
        let children = entity.children_mut(rel.name).ok_or_else(|| {
            KeelsonError::Mapping(format!(
                "{} does not expose relationship `{}`",
                meta.name, rel.name
            ))
        })?;
        children.load_rows(&rows)?;
        for index in 0..children.len() {
            let Some(child) = children.member_mut(index) else {
                continue;
            };
            let child_key = root_key(child).ok_or_else(|| {
                KeelsonError::Mapping(format!("{} row loaded without a primary key", target.name))
            })?;
            out.push((
                child_key,
                ChildRecord {
                    meta: target,
                    relationship: rel,
                    parent: key,
                    values: child.column_values(),
                },
            ));
            load_children(conn, child, child_key, out)?;
        }
    }
    Ok(())
}
