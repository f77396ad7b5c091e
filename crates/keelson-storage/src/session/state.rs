// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-aggregate bookkeeping, the identity map and the transaction journal.

use std::collections::{HashMap, HashSet};

use keelson_core::{ObjectState, Value};

use crate::model::{AnyEntity, EntityMeta, RelationshipDef};
use crate::session::aggregate::{self, Loaded};
use crate::session::identity::{IdentityMap, ObjectKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Pending,
    Persistent,
    Deleted,
    Detached,
}

/// Last flushed state of one descendant.
#[derive(Debug, Clone)]
pub(crate) struct ChildRecord {
    pub meta: &'static EntityMeta,
    pub relationship: &'static RelationshipDef,
    pub parent: ObjectKey,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone)]
pub(crate) struct Bookkeeping {
    pub lifecycle: Lifecycle,
    /// Root column values as last flushed.
    pub snapshot: Option<Vec<Value>>,
    /// Descendants present in the store, by key.
    pub children: HashMap<ObjectKey, ChildRecord>,
    /// Descendants removed through `Session::delete`.
    pub doomed: HashSet<ObjectKey>,
}

impl Bookkeeping {
    fn pending() -> Self {
        Self {
            lifecycle: Lifecycle::Pending,
            snapshot: None,
            children: HashMap::new(),
            doomed: HashSet::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub entity: Box<dyn AnyEntity>,
    pub book: Bookkeeping,
}

impl Slot {
    pub fn root_key(&self) -> Option<ObjectKey> {
        aggregate::root_key(self.entity.as_ref())
    }

    /// True when the aggregate differs from what was last flushed.
    pub fn is_modified(&self) -> bool {
        if self.book.snapshot.as_ref() != Some(&self.entity.column_values()) {
            return true;
        }
        if !self.book.doomed.is_empty() {
            return true;
        }
        let nodes = aggregate::descendants(self.entity.as_ref());
        if nodes.len() != self.book.children.len() {
            return true;
        }
        nodes.iter().any(|node| match node.key() {
            None => true,
            Some(key) => self
                .book
                .children
                .get(&key)
                .is_none_or(|record| record.values != node.values),
        })
    }

    /// Public state of the root entity.
    pub fn root_state(&self) -> ObjectState {
        match self.book.lifecycle {
            Lifecycle::Pending => ObjectState::Pending,
            Lifecycle::Persistent if self.is_modified() => ObjectState::Dirty,
            Lifecycle::Persistent => ObjectState::Persistent,
            Lifecycle::Deleted => ObjectState::Deleted,
            Lifecycle::Detached => ObjectState::Detached,
        }
    }

    /// Public state of the descendant `key`.
    pub fn child_state(&self, key: ObjectKey) -> ObjectState {
        match self.book.lifecycle {
            Lifecycle::Detached => return ObjectState::Detached,
            Lifecycle::Deleted => return ObjectState::Deleted,
            Lifecycle::Pending | Lifecycle::Persistent => {}
        }
        let Some(path) = aggregate::find(self.entity.as_ref(), key) else {
            return if self.book.doomed.contains(&key) {
                ObjectState::Deleted
            } else {
                ObjectState::Detached
            };
        };
        let Some(record) = self.book.children.get(&key) else {
            return ObjectState::Pending;
        };
        let current = aggregate::node(self.entity.as_ref(), &path).map(|n| n.column_values());
        if current.as_ref() == Some(&record.values) {
            ObjectState::Persistent
        } else {
            ObjectState::Dirty
        }
    }
}

/// A removal the caller asked for, as opposed to one a flush carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Delete(usize),
    Doom(usize, ObjectKey),
    Detach(usize),
}

/// Bookkeeping as it stood before the current transaction's first change.
#[derive(Debug, Default)]
struct Journal {
    saved: HashMap<usize, Bookkeeping>,
    generated: Vec<(usize, ObjectKey)>,
    intents: Vec<Intent>,
}

#[derive(Debug, Default)]
pub(crate) struct Tracker {
    pub slots: Vec<Slot>,
    pub identity: IdentityMap,
    journal: Option<Journal>,
}

impl Tracker {
    pub fn push_pending(&mut self, entity: Box<dyn AnyEntity>) -> usize {
        self.slots.push(Slot {
            entity,
            book: Bookkeeping::pending(),
        });
        self.slots.len() - 1
    }

    /// Track a loaded aggregate as persistent.
    pub fn register(&mut self, loaded: Loaded) -> usize {
        let index = self.slots.len();
        self.identity.insert(loaded.key, index);
        let mut children = HashMap::with_capacity(loaded.children.len());
        for (key, record) in loaded.children {
            if !self.identity.insert_if_absent(key, index) {
                tracing::debug!(%key, "row already tracked elsewhere, keeping the existing instance");
            }
            children.insert(key, record);
        }
        let snapshot = Some(loaded.entity.column_values());
        self.slots.push(Slot {
            entity: loaded.entity,
            book: Bookkeeping {
                lifecycle: Lifecycle::Persistent,
                snapshot,
                children,
                doomed: HashSet::new(),
            },
        });
        index
    }

    /// Replace a slot's aggregate with freshly loaded state.
    pub fn replace(&mut self, index: usize, loaded: Loaded) {
        self.save(index);
        self.forget_keys(index);
        let slot = &mut self.slots[index];
        slot.book.snapshot = Some(loaded.entity.column_values());
        slot.book.lifecycle = Lifecycle::Persistent;
        slot.book.doomed.clear();
        slot.book.children = loaded.children.into_iter().collect();
        slot.entity = loaded.entity;
        self.identity.insert(loaded.key, index);
        let keys: Vec<ObjectKey> = self.slots[index].book.children.keys().copied().collect();
        for key in keys {
            self.identity.insert_if_absent(key, index);
        }
    }

    /// Slot and (for descendants) key of a tracked, non-detached row.
    pub fn locate(&self, key: ObjectKey) -> Option<(usize, Option<ObjectKey>)> {
        let index = self.identity.get(&key)?;
        let slot = self.slots.get(index)?;
        if slot.book.lifecycle == Lifecycle::Detached {
            return None;
        }
        if slot.root_key() == Some(key) {
            Some((index, None))
        } else {
            Some((index, Some(key)))
        }
    }

    pub fn has_changes(&self) -> bool {
        self.slots.iter().any(|slot| match slot.book.lifecycle {
            Lifecycle::Pending | Lifecycle::Deleted => true,
            Lifecycle::Persistent => slot.is_modified(),
            Lifecycle::Detached => false,
        })
    }

    pub fn begin_journal(&mut self) {
        self.journal.get_or_insert_with(Journal::default);
    }

    /// Remember a slot's bookkeeping before its first change in this transaction.
    pub fn save(&mut self, index: usize) {
        if let Some(journal) = self.journal.as_mut()
            && let Some(slot) = self.slots.get(index)
        {
            journal
                .saved
                .entry(index)
                .or_insert_with(|| slot.book.clone());
        }
    }

    /// Mark a persistent root for deletion at the next flush.
    pub fn mark_deleted(&mut self, index: usize) {
        self.begin_journal();
        self.save(index);
        if let Some(slot) = self.slots.get_mut(index) {
            slot.book.lifecycle = Lifecycle::Deleted;
        }
        self.note(Intent::Delete(index));
    }

    /// Mark a descendant already taken out of its collection for deletion.
    pub fn mark_doomed(&mut self, index: usize, key: ObjectKey) {
        self.begin_journal();
        self.save(index);
        if let Some(slot) = self.slots.get_mut(index) {
            slot.book.doomed.insert(key);
        }
        self.note(Intent::Doom(index, key));
    }

    fn note(&mut self, intent: Intent) {
        if let Some(journal) = self.journal.as_mut() {
            journal.intents.push(intent);
        }
    }

    /// Note a store-generated key so a rollback can clear it again.
    pub fn record_generated(&mut self, index: usize, key: ObjectKey) {
        if let Some(journal) = self.journal.as_mut() {
            journal.generated.push((index, key));
        }
    }

    /// Restore bookkeeping to where it stood before the transaction's first
    /// flush and clear generated keys.
    pub fn revert(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for (index, key) in journal.generated.into_iter().rev() {
            let Some(slot) = self.slots.get_mut(index) else {
                continue;
            };
            if slot.root_key() == Some(key) {
                slot.entity.set_entity_id(None);
            } else if let Some(path) = aggregate::find(slot.entity.as_ref(), key)
                && let Some(node) = aggregate::node_mut(slot.entity.as_mut(), &path)
            {
                node.set_entity_id(None);
            }
        }
        for (index, book) in journal.saved {
            if let Some(slot) = self.slots.get_mut(index) {
                slot.book = book;
            }
        }
        self.rebuild_identity();
    }

    /// Undo what the failed transaction flushed but keep the deletions and
    /// detaches the caller asked for, so a retry applies them.
    ///
    /// The journal is carried over with the bookkeeping from before those
    /// requests, so a later [`Tracker::revert`] still undoes them.
    pub fn revert_flushes(&mut self) {
        let Some(journal) = self.journal.as_ref() else {
            return;
        };
        let intents = journal.intents.clone();
        let carried: HashMap<usize, Bookkeeping> = intents
            .iter()
            .map(|intent| match *intent {
                Intent::Delete(index) | Intent::Doom(index, _) | Intent::Detach(index) => index,
            })
            .filter_map(|index| journal.saved.get(&index).map(|book| (index, book.clone())))
            .collect();
        self.revert();
        if intents.is_empty() {
            return;
        }
        for intent in &intents {
            match *intent {
                Intent::Delete(index) => {
                    if let Some(slot) = self.slots.get_mut(index)
                        && slot.book.lifecycle == Lifecycle::Persistent
                    {
                        slot.book.lifecycle = Lifecycle::Deleted;
                    }
                }
                Intent::Doom(index, key) => {
                    if let Some(slot) = self.slots.get_mut(index)
                        && slot.book.children.contains_key(&key)
                    {
                        slot.book.doomed.insert(key);
                    }
                }
                Intent::Detach(index) => {
                    if let Some(slot) = self.slots.get_mut(index) {
                        slot.book.lifecycle = Lifecycle::Detached;
                        slot.book.children.clear();
                        slot.book.doomed.clear();
                    }
                }
            }
        }
        self.rebuild_identity();
        self.journal = Some(Journal {
            saved: carried,
            generated: Vec::new(),
            intents,
        });
    }

    /// The transaction committed; its journal is no longer needed.
    pub fn settle(&mut self) {
        self.journal = None;
    }

    pub fn detach(&mut self, index: usize) {
        self.save(index);
        self.note(Intent::Detach(index));
        self.forget_keys(index);
        if let Some(slot) = self.slots.get_mut(index) {
            slot.book.lifecycle = Lifecycle::Detached;
            slot.book.children.clear();
            slot.book.doomed.clear();
        }
    }

    /// Drop every slot. Returns how many were released.
    pub fn clear(&mut self) -> usize {
        let released = self.slots.len();
        self.slots.clear();
        self.identity.clear();
        self.journal = None;
        released
    }

    /// Remove identity entries that point at `index`.
    fn forget_keys(&mut self, index: usize) {
        let Some(slot) = self.slots.get(index) else {
            return;
        };
        let mut keys: Vec<ObjectKey> = slot.book.children.keys().copied().collect();
        keys.extend(slot.root_key());
        for key in keys {
            if self.identity.get(&key) == Some(index) {
                self.identity.remove(&key);
            }
        }
    }

    pub fn rebuild_identity(&mut self) {
        self.identity.clear();
        let live = |slot: &Slot| {
            matches!(
                slot.book.lifecycle,
                Lifecycle::Persistent | Lifecycle::Deleted
            )
        };
        for (index, slot) in self.slots.iter().enumerate() {
            if live(slot)
                && let Some(key) = slot.root_key()
            {
                self.identity.insert(key, index);
            }
        }
        for (index, slot) in self.slots.iter().enumerate() {
            if live(slot) {
                for key in slot.book.children.keys() {
                    self.identity.insert_if_absent(*key, index);
                }
            }
        }
    }
}
