// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identity map: one in-memory instance per persisted row.

use std::collections::HashMap;
use std::fmt;

use crate::model::EntityMeta;

/// Identity of a persisted row: table plus primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    table: &'static str,
    id: i64,
}

impl ObjectKey {
    pub fn new(meta: &EntityMeta, id: i64) -> Self {
        Self {
            table: meta.table,
            id,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn id(&self) -> i64 {
        self.id
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

/// Maps each tracked key to the session slot holding its aggregate.
#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<ObjectKey, usize>,
}

impl IdentityMap {
    pub(crate) fn get(&self, key: &ObjectKey) -> Option<usize> {
        self.entries.get(key).copied()
    }

    pub(crate) fn contains(&self, key: &ObjectKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn insert(&mut self, key: ObjectKey, slot: usize) {
        self.entries.insert(key, slot);
    }

    /// Keep an existing mapping; returns false when `key` was already mapped
    /// to another slot.
    pub(crate) fn insert_if_absent(&mut self, key: ObjectKey, slot: usize) -> bool {
        let entry = self.entries.entry(key).or_insert(slot);
        *entry == slot
    }

    pub(crate) fn remove(&mut self, key: &ObjectKey) {
        self.entries.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
