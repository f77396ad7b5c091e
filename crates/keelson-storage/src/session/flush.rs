// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unit-of-work flush: pending state to `INSERT`, `UPDATE` and `DELETE`.
//!
//! Statement order is fixed. Inserts come first: pending roots in add order,
//! each followed by its new descendants, then new descendants of persistent
//! roots. Updates follow, then foreign-key nulling for released children.
//! Deletes run last, children before parents.

use std::collections::HashSet;

use keelson_core::{KeelsonError, KeelsonResult, Value};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::model::{AnyEntity, EntityMeta, RelationshipDef};
use crate::params::Params;
use crate::session::aggregate;
use crate::session::identity::ObjectKey;
use crate::session::state::{Bookkeeping, ChildRecord, Lifecycle, Tracker};
use crate::statement::quote_ident;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FlushStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug)]
struct Removal {
    slot: usize,
    key: ObjectKey,
    meta: &'static EntityMeta,
}

#[derive(Debug)]
struct Release {
    slot: usize,
    key: ObjectKey,
    meta: &'static EntityMeta,
    column: &'static str,
}

impl Tracker {
    pub(crate) fn flush(&mut self, conn: &mut Connection) -> KeelsonResult<FlushStats> {
        self.begin_journal();
        let mut stats = FlushStats::default();

        let (pending, persistent): (Vec<usize>, Vec<usize>) = {
            let mut pending = Vec::new();
            let mut persistent = Vec::new();
            for (index, slot) in self.slots.iter().enumerate() {
                match slot.book.lifecycle {
                    Lifecycle::Pending => pending.push(index),
                    Lifecycle::Persistent => persistent.push(index),
                    Lifecycle::Deleted | Lifecycle::Detached => {}
                }
            }
            (pending, persistent)
        };

        for &index in &pending {
            self.insert_root(conn, index, &mut stats)?;
            self.insert_descendants(conn, index, &mut stats)?;
        }
        for &index in &persistent {
            self.insert_descendants(conn, index, &mut stats)?;
        }

        let live: Vec<usize> = pending.iter().chain(&persistent).copied().collect();
        for &index in &live {
            self.update_root(conn, index, &mut stats)?;
        }
        for &index in &live {
            self.update_descendants(conn, index, &mut stats)?;
        }

        let (releases, removals) = self.plan_removals(&live);
        for release in &releases {
            release_row(conn, release)?;
            stats.updated += 1;
        }
        for removal in &removals {
            delete_row(conn, removal)?;
            stats.deleted += 1;
        }
        self.apply_removals(&releases, &removals);

        debug!(
            inserted = stats.inserted,
            updated = stats.updated,
            deleted = stats.deleted,
            "flush complete"
        );
        Ok(stats)
    }

    fn insert_root(
        &mut self,
        conn: &mut Connection,
        index: usize,
        stats: &mut FlushStats,
    ) -> KeelsonResult<()> {
        self.save(index);
        let slot = &mut self.slots[index];
        let (key, generated) = insert_entity(conn, slot.entity.as_mut())?;
        slot.book.lifecycle = Lifecycle::Persistent;
        slot.book.snapshot = Some(slot.entity.column_values());
        if generated {
            self.record_generated(index, key);
        }
        self.identity.insert(key, index);
        stats.inserted += 1;
        Ok(())
    }

    /// Point every descendant's foreign key at its parent and insert the new ones.
    fn insert_descendants(
        &mut self,
        conn: &mut Connection,
        index: usize,
        stats: &mut FlushStats,
    ) -> KeelsonResult<()> {
        self.save(index);
        let nodes = aggregate::descendants(self.slots[index].entity.as_ref());
        for node in nodes {
            let parent = {
                let root = self.slots[index].entity.as_ref();
                aggregate::node(root, node.parent_path()).and_then(aggregate::root_key)
            }
            .ok_or_else(|| {
                KeelsonError::Mapping(format!("parent of a {} has no primary key", node.meta.name))
            })?;

            let known = match node.key() {
                Some(key) if self.slots[index].book.children.contains_key(&key) => {
                    if let Some(record) = self.slots[index].book.children.get_mut(&key) {
                        record.parent = parent;
                        record.relationship = node.relationship;
                    }
                    true
                }
                Some(key) => self.adopt(index, key, parent, node.relationship),
                None => false,
            };

            let slot = &mut self.slots[index];
            let child = aggregate::node_mut(slot.entity.as_mut(), &node.path).ok_or_else(|| {
                KeelsonError::Mapping(format!("{} vanished from its collection", node.meta.name))
            })?;
            child.assign_foreign_key(node.relationship.foreign_key, Some(parent.id()))?;
            if known {
                continue;
            }

            let (key, generated) = insert_entity(conn, child)?;
            let values = child.column_values();
            slot.book.children.insert(
                key,
                ChildRecord {
                    meta: node.meta,
                    relationship: node.relationship,
                    parent,
                    values,
                },
            );
            if generated {
                self.record_generated(index, key);
            }
            self.identity.insert(key, index);
            stats.inserted += 1;
        }
        Ok(())
    }

    /// Move a persisted descendant tracked under another aggregate into `index`.
    fn adopt(
        &mut self,
        index: usize,
        key: ObjectKey,
        parent: ObjectKey,
        relationship: &'static RelationshipDef,
    ) -> bool {
        let Some(from) = self.identity.get(&key) else {
            return false;
        };
        if from == index
            || !self
                .slots
                .get(from)
                .is_some_and(|slot| slot.book.children.contains_key(&key))
        {
            return false;
        }
        self.save(from);
        let Some(mut record) = self.slots[from].book.children.remove(&key) else {
            return false;
        };
        record.parent = parent;
        record.relationship = relationship;
        self.slots[index].book.children.insert(key, record);
        self.identity.insert(key, index);
        debug!(%key, "descendant moved to another aggregate");
        true
    }

    fn update_root(
        &mut self,
        conn: &mut Connection,
        index: usize,
        stats: &mut FlushStats,
    ) -> KeelsonResult<()> {
        let slot = &self.slots[index];
        let values = slot.entity.column_values();
        let Some(snapshot) = slot.book.snapshot.as_ref() else {
            return Ok(());
        };
        if *snapshot == values {
            return Ok(());
        }
        let meta = slot.entity.entity_meta();
        let id = slot.entity.entity_id().ok_or_else(|| {
            KeelsonError::Mapping(format!("persistent {} lost its primary key", meta.name))
        })?;
        update_row(conn, meta, id, snapshot, &values)?;
        self.save(index);
        self.slots[index].book.snapshot = Some(values);
        stats.updated += 1;
        Ok(())
    }

    fn update_descendants(
        &mut self,
        conn: &mut Connection,
        index: usize,
        stats: &mut FlushStats,
    ) -> KeelsonResult<()> {
        let nodes = aggregate::descendants(self.slots[index].entity.as_ref());
        for node in nodes {
            let Some(key) = node.key() else {
                continue;
            };
            let Some(record) = self.slots[index].book.children.get(&key) else {
                continue;
            };
            if record.values == node.values {
                continue;
            }
            update_row(conn, node.meta, key.id(), &record.values, &node.values)?;
            self.save(index);
            if let Some(record) = self.slots[index].book.children.get_mut(&key) {
                record.values = node.values;
            }
            stats.updated += 1;
        }
        Ok(())
    }

    /// Decide what happens to descendants no longer reachable and to deleted
    /// roots: key nulling (`releases`) or deletion (`removals`, children first).
    fn plan_removals(&self, live: &[usize]) -> (Vec<Release>, Vec<Removal>) {
        let mut releases = Vec::new();
        let mut removals = Vec::new();

        for &index in live {
            let slot = &self.slots[index];
            let Some(root) = slot.root_key() else {
                continue;
            };
            let present: HashSet<ObjectKey> = aggregate::descendants(slot.entity.as_ref())
                .iter()
                .filter_map(|node| node.key())
                .collect();
            let mut orphans: Vec<(&ObjectKey, &ChildRecord)> = slot
                .book
                .children
                .iter()
                .filter(|(key, record)| {
                    !present.contains(*key)
                        && (record.parent == root || present.contains(&record.parent))
                })
                .collect();
            orphans.sort_by_key(|(key, _)| **key);
            for (key, record) in orphans {
                if slot.book.doomed.contains(key) || record.relationship.cascade.delete_orphan {
                    plan_subtree(&slot.book, index, *key, record.meta, &mut releases, &mut removals);
                } else {
                    releases.push(Release {
                        slot: index,
                        key: *key,
                        meta: record.meta,
                        column: record.relationship.foreign_key,
                    });
                }
            }
        }

        for (index, slot) in self.slots.iter().enumerate() {
            if slot.book.lifecycle != Lifecycle::Deleted {
                continue;
            }
            let Some(root) = slot.root_key() else {
                continue;
            };
            plan_subtree(
                &slot.book,
                index,
                root,
                slot.entity.entity_meta(),
                &mut releases,
                &mut removals,
            );
        }
        (releases, removals)
    }

    fn apply_removals(&mut self, releases: &[Release], removals: &[Removal]) {
        let mut touched = HashSet::new();
        for release in releases {
            self.save(release.slot);
            self.slots[release.slot].book.children.remove(&release.key);
            self.identity.remove(&release.key);
            touched.insert(release.slot);
        }
        for removal in removals {
            self.save(removal.slot);
            let slot = &mut self.slots[removal.slot];
            if slot.root_key() == Some(removal.key) {
                slot.book.lifecycle = Lifecycle::Detached;
                let keys: Vec<ObjectKey> = slot.book.children.drain().map(|(key, _)| key).collect();
                slot.book.doomed.clear();
                for key in keys {
                    self.identity.remove(&key);
                }
            } else {
                slot.book.children.remove(&removal.key);
                slot.book.doomed.remove(&removal.key);
                touched.insert(removal.slot);
            }
            self.identity.remove(&removal.key);
        }
        for index in touched {
            self.prune(index);
        }
    }

    /// Drop records whose parent chain no longer reaches the root.
    fn prune(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        let Some(root) = slot.root_key() else {
            return;
        };
        loop {
            let stranded: Vec<ObjectKey> = slot
                .book
                .children
                .iter()
                .filter(|(_, record)| {
                    record.parent != root && !slot.book.children.contains_key(&record.parent)
                })
                .map(|(key, _)| *key)
                .collect();
            if stranded.is_empty() {
                break;
            }
            for key in stranded {
                slot.book.children.remove(&key);
                slot.book.doomed.remove(&key);
                if self.identity.get(&key) == Some(index) {
                    self.identity.remove(&key);
                }
            }
        }
        let children = &slot.book.children;
        slot.book.doomed.retain(|key| children.contains_key(key));
    }
}

/// Delete `key` and, following each relationship's cascade, its descendants.
fn plan_subtree(
    book: &Bookkeeping,
    slot: usize,
    key: ObjectKey,
    meta: &'static EntityMeta,
    releases: &mut Vec<Release>,
    removals: &mut Vec<Removal>,
) {
    let mut children: Vec<(&ObjectKey, &ChildRecord)> = book
        .children
        .iter()
        .filter(|(_, record)| record.parent == key)
        .collect();
    children.sort_by_key(|(child, _)| **child);
    for (child, record) in children {
        if record.relationship.cascade.delete {
            plan_subtree(book, slot, *child, record.meta, releases, removals);
        } else {
            releases.push(Release {
                slot,
                key: *child,
                meta: record.meta,
                column: record.relationship.foreign_key,
            });
        }
    }
    removals.push(Removal { slot, key, meta });
}

/// Parameter names in generated `UPDATE`/`DELETE` statements are positional
/// (`:c0`, `:c1`, ..., `:pk`) so they cannot collide with column names.
const KEY_PARAM: &str = "pk";

fn value_param(position: usize) -> String {
    format!("c{position}")
}

/// `INSERT` one entity and write the key back. Returns the key and whether
/// the store generated it.
fn insert_entity(
    conn: &mut Connection,
    entity: &mut dyn AnyEntity,
) -> KeelsonResult<(ObjectKey, bool)> {
    let meta = entity.entity_meta();
    let values = checked_values(meta, entity.column_values())?;
    let explicit = entity.entity_id();

    let mut columns = Vec::with_capacity(values.len() + 1);
    let mut placeholders = Vec::with_capacity(values.len() + 1);
    let mut params = Params::new();
    if let Some(id) = explicit {
        columns.push(quote_ident(meta.primary_key));
        placeholders.push(format!(":{}", meta.primary_key));
        params.insert(meta.primary_key, id);
    }
    for (def, value) in meta.columns.iter().zip(values) {
        columns.push(quote_ident(def.name));
        placeholders.push(format!(":{}", def.name));
        params.insert(def.name, value);
    }

    let sql = if columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(meta.table))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(meta.table),
            columns.join(", "),
            placeholders.join(", ")
        )
    };
    let result = conn.execute_sql(&sql, params)?;
    let id = match explicit {
        Some(id) => id,
        None => result.last_insert_id().ok_or_else(|| {
            KeelsonError::statement(sql.as_str(), "the store reported no generated key")
        })?,
    };
    entity.set_entity_id(Some(id));
    Ok((ObjectKey::new(meta, id), explicit.is_none()))
}

fn update_row(
    conn: &mut Connection,
    meta: &EntityMeta,
    id: i64,
    before: &[Value],
    after: &[Value],
) -> KeelsonResult<()> {
    checked_len(meta, after.len())?;
    let mut sets = Vec::new();
    let mut params = Params::new();
    for (position, ((def, old), new)) in meta.columns.iter().zip(before).zip(after).enumerate() {
        if old != new {
            let name = value_param(position);
            sets.push(format!("{} = :{name}", quote_ident(def.name)));
            params.insert(name, new.clone());
        }
    }
    if sets.is_empty() {
        return Ok(());
    }
    params.insert(KEY_PARAM, id);
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = :{KEY_PARAM}",
        quote_ident(meta.table),
        sets.join(", "),
        quote_ident(meta.primary_key)
    );
    let affected = conn.execute_sql(&sql, params)?.rows_affected();
    if affected != 1 {
        return Err(KeelsonError::statement(
            sql.as_str(),
            format!("expected to update 1 row in {}, matched {affected}", meta.table),
        ));
    }
    Ok(())
}

fn release_row(conn: &mut Connection, release: &Release) -> KeelsonResult<()> {
    let sql = format!(
        "UPDATE {} SET {} = NULL WHERE {} = :{KEY_PARAM}",
        quote_ident(release.meta.table),
        quote_ident(release.column),
        quote_ident(release.meta.primary_key)
    );
    conn.execute_sql(&sql, Params::new().bind(KEY_PARAM, release.key.id()))?;
    Ok(())
}

fn delete_row(conn: &mut Connection, removal: &Removal) -> KeelsonResult<()> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = :{KEY_PARAM}",
        quote_ident(removal.meta.table),
        quote_ident(removal.meta.primary_key)
    );
    let affected = conn
        .execute_sql(&sql, Params::new().bind(KEY_PARAM, removal.key.id()))?
        .rows_affected();
    if affected != 1 {
        warn!(key = %removal.key, affected, "delete matched an unexpected number of rows");
    }
    Ok(())
}

fn checked_len(meta: &EntityMeta, len: usize) -> KeelsonResult<()> {
    if len != meta.columns.len() {
        return Err(KeelsonError::Mapping(format!(
            "{} returned {len} values for {} columns",
            meta.name,
            meta.columns.len()
        )));
    }
    Ok(())
}

fn checked_values(meta: &EntityMeta, values: Vec<Value>) -> KeelsonResult<Vec<Value>> {
    checked_len(meta, values.len())?;
    Ok(values)
}
