// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unit of work over an [`Engine`].
//!
//! A session tracks entities by typed [`Handle`]s. Each tracked root owns its
//! aggregate (the root plus the children in its collections), and the
//! identity map guarantees one in-memory instance per persisted row. Pending
//! state turns into SQL on [`Session::flush`] or [`Session::commit`].
//!
//! The session acquires a connection lazily and gives it back after every
//! commit or rollback.

pub(crate) mod aggregate;
mod flush;
pub mod identity;
pub(crate) mod state;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use keelson_config::model::SessionConfig;
use keelson_core::{KeelsonError, KeelsonResult, ObjectState, TransactionState};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::cursor::{CursorResult, Row, at_most_one, exactly_one};
use crate::engine::Engine;
use crate::model::{Entity, EntityMeta, Reference};
use crate::params::Parameters;
use crate::query::Select;
use crate::statement::Executable;

pub use identity::ObjectKey;
use state::{Lifecycle, Slot, Tracker};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Typed reference to an entity tracked by one [`Session`].
pub struct Handle<E> {
    session: u64,
    generation: u64,
    slot: usize,
    child: Option<ObjectKey>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Handle<E> {
    fn new(session: u64, generation: u64, slot: usize, child: Option<ObjectKey>) -> Self {
        Self {
            session,
            generation,
            slot,
            child,
            _entity: PhantomData,
        }
    }

    /// True for entities that live inside another entity's collection.
    pub fn is_owned(&self) -> bool {
        self.child.is_some()
    }
}

impl<E> Clone for Handle<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Handle<E> {}

impl<E> PartialEq for Handle<E> {
    fn eq(&self, other: &Self) -> bool {
        self.session == other.session
            && self.generation == other.generation
            && self.slot == other.slot
            && self.child == other.child
    }
}

impl<E> Eq for Handle<E> {}

impl<E> Hash for Handle<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.session.hash(state);
        self.generation.hash(state);
        self.slot.hash(state);
        self.child.hash(state);
    }
}

impl<E: Entity> fmt::Debug for Handle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.child {
            Some(key) => write!(f, "Handle<{}>({key})", E::meta().name),
            None => write!(f, "Handle<{}>(slot {})", E::meta().name, self.slot),
        }
    }
}

/// Entity handles produced by [`Session::scalars`].
#[derive(Debug)]
pub struct ScalarResult<E: Entity> {
    handles: Vec<Handle<E>>,
    sql: String,
}

impl<E: Entity> ScalarResult<E> {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn all(self) -> Vec<Handle<E>> {
        self.handles
    }

    pub fn first(self) -> Option<Handle<E>> {
        self.handles.into_iter().next()
    }

    pub fn one(self) -> KeelsonResult<Handle<E>> {
        exactly_one(self.handles.into_iter(), &self.sql)
    }

    pub fn one_or_none(self) -> KeelsonResult<Option<Handle<E>>> {
        at_most_one(self.handles.into_iter(), &self.sql)
    }
}

impl<E: Entity> IntoIterator for ScalarResult<E> {
    type Item = Handle<E>;
    type IntoIter = std::vec::IntoIter<Handle<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.handles.into_iter()
    }
}

/// The unit of work. `Send`, not `Sync`: one caller at a time.
#[derive(Debug)]
pub struct Session {
    id: u64,
    engine: Engine,
    config: SessionConfig,
    conn: Option<Connection>,
    tracker: Tracker,
    /// Bumped whenever the tracker is emptied; older handles are detached.
    generation: u64,
}

impl Session {
    pub fn new(engine: Engine, config: SessionConfig) -> Self {
        let id = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "session opened");
        Self {
            id,
            engine,
            config,
            conn: None,
            tracker: Tracker::default(),
            generation: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// True while the session holds a connection with an open transaction.
    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(Connection::in_transaction)
    }

    /// True if a flush would emit any statement.
    pub fn has_pending_changes(&self) -> bool {
        self.tracker.has_changes()
    }

    fn connection(&mut self) -> KeelsonResult<&mut Connection> {
        match &mut self.conn {
            Some(conn) => Ok(conn),
            slot @ None => Ok(slot.insert(self.engine.connect()?)),
        }
    }

    // --- Tracking ---

    /// Track `entity` as pending-insert, together with its owned children.
    pub fn add<E: Entity>(&mut self, entity: E) -> KeelsonResult<Handle<E>> {
        if let Some(id) = entity.id() {
            let key = ObjectKey::new(E::meta(), id);
            if self.tracker.locate(key).is_some() {
                return Err(KeelsonError::InvalidArgument(format!(
                    "{key} is already tracked by this session"
                )));
            }
        }
        let slot = self.tracker.push_pending(Box::new(entity));
        Ok(Handle::new(self.id, self.generation, slot, None))
    }

    pub fn add_all<E: Entity>(
        &mut self,
        entities: impl IntoIterator<Item = E>,
    ) -> KeelsonResult<Vec<Handle<E>>> {
        entities.into_iter().map(|e| self.add(e)).collect()
    }

    /// Like [`Session::add`], but an absent entity is an error.
    pub fn add_optional<E: Entity>(&mut self, entity: Option<E>) -> KeelsonResult<Handle<E>> {
        match entity {
            Some(entity) => self.add(entity),
            None => Err(KeelsonError::InvalidArgument(format!(
                "cannot add an absent {} to the session",
                E::meta().name
            ))),
        }
    }

    fn slot<E>(&self, handle: &Handle<E>) -> KeelsonResult<&Slot> {
        if handle.session != self.id {
            return Err(KeelsonError::InvalidArgument(
                "handle belongs to a different session".to_string(),
            ));
        }
        if handle.generation != self.generation {
            return Err(KeelsonError::InvalidArgument(
                "handle refers to an entity detached when the session was cleared".to_string(),
            ));
        }
        self.tracker.slots.get(handle.slot).ok_or_else(|| {
            KeelsonError::InvalidArgument("handle does not refer to a tracked entity".to_string())
        })
    }

    pub fn entity<E: Entity>(&self, handle: &Handle<E>) -> KeelsonResult<&E> {
        let slot = self.slot(handle)?;
        let entity = match handle.child {
            None => slot.entity.as_ref(),
            Some(key) => aggregate::find(slot.entity.as_ref(), key)
                .and_then(|path| aggregate::node(slot.entity.as_ref(), &path))
                .ok_or_else(|| released(key))?,
        };
        entity
            .as_any()
            .downcast_ref::<E>()
            .ok_or_else(|| type_mismatch::<E>())
    }

    /// Mutable access. Changes are picked up at the next flush.
    pub fn entity_mut<E: Entity>(&mut self, handle: &Handle<E>) -> KeelsonResult<&mut E> {
        let current = self.slot(handle)?;
        if current.book.lifecycle == Lifecycle::Detached {
            return Err(KeelsonError::InvalidArgument(format!(
                "cannot modify a detached {}",
                E::meta().name
            )));
        }
        let path = match handle.child {
            None => Vec::new(),
            Some(key) => {
                aggregate::find(current.entity.as_ref(), key).ok_or_else(|| released(key))?
            }
        };
        let slot = &mut self.tracker.slots[handle.slot];
        aggregate::node_mut(slot.entity.as_mut(), &path)
            .and_then(|entity| entity.as_any_mut().downcast_mut::<E>())
            .ok_or_else(|| type_mismatch::<E>())
    }

    pub fn state<E: Entity>(&self, handle: &Handle<E>) -> KeelsonResult<ObjectState> {
        if handle.session == self.id && handle.generation != self.generation {
            return Ok(ObjectState::Detached);
        }
        let slot = self.slot(handle)?;
        Ok(match handle.child {
            None => slot.root_state(),
            Some(key) => slot.child_state(key),
        })
    }

    /// Mark for deletion.
    ///
    /// Pending entities are dropped at once. An owned child is removed from
    /// its owner's collection and deleted at the next flush.
    pub fn delete<E: Entity>(&mut self, handle: &Handle<E>) -> KeelsonResult<()> {
        let lifecycle = self.slot(handle)?.book.lifecycle;
        let index = handle.slot;
        match (handle.child, lifecycle) {
            (_, Lifecycle::Detached) => Err(KeelsonError::InvalidArgument(format!(
                "cannot delete a detached {}",
                E::meta().name
            ))),
            (None, Lifecycle::Pending) => {
                self.tracker.detach(index);
                Ok(())
            }
            (None, Lifecycle::Persistent) => {
                self.tracker.mark_deleted(index);
                Ok(())
            }
            (_, Lifecycle::Deleted) => Ok(()),
            (Some(key), Lifecycle::Pending | Lifecycle::Persistent) => {
                let slot = &mut self.tracker.slots[index];
                let path = aggregate::find(slot.entity.as_ref(), key).ok_or_else(|| released(key))?;
                let (last, parent_path) = path.split_last().ok_or_else(|| released(key))?;
                let parent = aggregate::node_mut(slot.entity.as_mut(), parent_path)
                    .ok_or_else(|| released(key))?;
                let collection = parent
                    .children_mut(last.relationship)
                    .ok_or_else(|| released(key))?;
                collection.remove_member(last.index);
                self.tracker.mark_doomed(index, key);
                Ok(())
            }
        }
    }

    /// Stop tracking an entity without touching the store.
    pub fn expunge<E: Entity>(&mut self, handle: &Handle<E>) -> KeelsonResult<()> {
        self.slot(handle)?;
        if let Some(key) = handle.child {
            return Err(KeelsonError::InvalidArgument(format!(
                "{key} is owned by another entity, expunge its owner instead"
            )));
        }
        self.tracker.detach(handle.slot);
        Ok(())
    }

    // --- Loading ---

    /// Entity by primary key: from the identity map, else from the store.
    pub fn get<E: Entity>(&mut self, id: i64) -> KeelsonResult<Option<Handle<E>>> {
        let key = ObjectKey::new(E::meta(), id);
        if let Some(found) = self.lookup::<E>(key) {
            return Ok(found);
        }
        self.autoflush()?;
        if let Some(found) = self.lookup::<E>(key) {
            return Ok(found);
        }
        let row = aggregate::fetch_row(self.connection()?, E::meta(), id)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let (slot, child) = self.track_row(E::meta(), &row)?;
        Ok(self.live_handle(slot, child))
    }

    /// Follow a many-to-one reference.
    pub fn resolve<T: Entity>(&mut self, reference: &Reference<T>) -> KeelsonResult<Option<Handle<T>>> {
        match reference.id() {
            Some(id) => self.get::<T>(id),
            None => Ok(None),
        }
    }

    /// Identity-map hit: `Some(Some(h))` if tracked, `Some(None)` if tracked
    /// but deleted or dropped from its owner's collection, `None` if unknown.
    fn lookup<E: Entity>(&self, key: ObjectKey) -> Option<Option<Handle<E>>> {
        let (slot, child) = self.tracker.locate(key)?;
        Some(self.live_handle(slot, child))
    }

    fn live_handle<E: Entity>(&self, index: usize, child: Option<ObjectKey>) -> Option<Handle<E>> {
        let slot = &self.tracker.slots[index];
        if slot.book.lifecycle == Lifecycle::Deleted {
            return None;
        }
        if let Some(key) = child
            && aggregate::find(slot.entity.as_ref(), key).is_none()
        {
            return None;
        }
        Some(Handle::new(self.id, self.generation, index, child))
    }

    /// Run a `Select::entity::<E>()` query and return identity-mapped handles.
    pub fn scalars<E: Entity>(&mut self, select: &Select) -> KeelsonResult<ScalarResult<E>> {
        if !select.entity_meta().is_some_and(|meta| meta.is(E::meta())) {
            return Err(KeelsonError::InvalidArgument(format!(
                "scalars::<{0}> needs Select::entity::<{0}>()",
                E::meta().name
            )));
        }
        self.autoflush()?;
        let result = self.connection()?.execute(select, ())?;
        let sql = result.sql().to_string();
        let rows = result.all();
        let mut handles = Vec::with_capacity(rows.len());
        for row in &rows {
            let (slot, child) = self.track_row(E::meta(), row)?;
            if let Some(handle) = self.live_handle(slot, child) {
                handles.push(handle);
            }
        }
        Ok(ScalarResult { handles, sql })
    }

    /// Locate or load the aggregate holding `row`.
    ///
    /// Rows of owned types are loaded through their owner, so each key has
    /// one instance.
    fn track_row(
        &mut self,
        meta: &'static EntityMeta,
        row: &Row,
    ) -> KeelsonResult<(usize, Option<ObjectKey>)> {
        let id: i64 = row.get(meta.primary_key)?;
        let key = ObjectKey::new(meta, id);
        if let Some(found) = self.tracker.locate(key) {
            return Ok(found);
        }

        if let Some((owner, rel)) = meta.owning_relationship()
            && let Some(owner_id) = row.get::<_, Option<i64>>(rel.foreign_key)?
        {
            let owner_key = ObjectKey::new(owner, owner_id);
            if self.tracker.locate(owner_key).is_none()
                && let Some(owner_row) = aggregate::fetch_row(self.connection()?, owner, owner_id)?
            {
                self.track_row(owner, &owner_row)?;
            }
            if let Some(found) = self.tracker.locate(key) {
                return Ok(found);
            }
            debug!(%key, owner = %owner_key, "row is not in its owner's loaded collection, tracking it on its own");
        }

        let loaded = aggregate::load_from_row(self.connection()?, meta, row)?;
        let slot = self.tracker.register(loaded);
        Ok((slot, None))
    }

    /// Reload an aggregate from the store, discarding in-memory changes.
    pub fn refresh<E: Entity>(&mut self, handle: &Handle<E>) -> KeelsonResult<()> {
        let slot = self.slot(handle)?;
        if !matches!(slot.book.lifecycle, Lifecycle::Persistent | Lifecycle::Deleted) {
            return Err(KeelsonError::InvalidArgument(format!(
                "only persistent entities can be refreshed, {} is {}",
                E::meta().name,
                slot.root_state()
            )));
        }
        let meta = slot.entity.entity_meta();
        let id = slot.entity.entity_id().ok_or_else(|| {
            KeelsonError::Mapping(format!("persistent {} has no primary key", meta.name))
        })?;
        let index = handle.slot;
        let loaded = aggregate::load_by_id(self.connection()?, meta, id)?
            .ok_or_else(|| KeelsonError::NotFound(format!("{} #{id} no longer exists", meta.name)))?;
        self.tracker.replace(index, loaded);
        Ok(())
    }

    // --- Statements ---

    /// Run a statement inside the session's transaction.
    pub fn execute<S>(
        &mut self,
        statement: &S,
        params: impl Into<Parameters>,
    ) -> KeelsonResult<CursorResult>
    where
        S: Executable + ?Sized,
    {
        self.autoflush()?;
        let conn = self.connection()?;
        let result = conn.execute(statement, params);
        if result.is_err()
            && conn.transaction_state() == Some(TransactionState::RolledBack)
        {
            warn!(session = self.id, "transaction ended by the store, restoring session state");
            self.conn = None;
            self.tracker.revert_flushes();
        }
        result
    }

    // --- Unit of work ---

    fn autoflush(&mut self) -> KeelsonResult<()> {
        if self.config.autoflush {
            self.flush()?;
        }
        Ok(())
    }

    /// Emit pending changes inside the current transaction.
    pub fn flush(&mut self) -> KeelsonResult<()> {
        if !self.tracker.has_changes() {
            return Ok(());
        }
        if let Err(err) = self.flush_pending() {
            self.abort();
            return Err(err);
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> KeelsonResult<()> {
        let Self { engine, conn, tracker, .. } = self;
        let conn = match conn {
            Some(conn) => conn,
            slot @ None => slot.insert(engine.connect()?),
        };
        tracker.flush(conn)?;
        Ok(())
    }

    /// Flush, then commit. On failure the transaction is rolled back, the
    /// session is restored to its state before the transaction's first flush,
    /// and `Commit` is returned.
    pub fn commit(&mut self) -> KeelsonResult<()> {
        let changes = self.tracker.has_changes();
        if !changes && !self.in_transaction() {
            self.conn = None;
            self.tracker.settle();
            return Ok(());
        }
        if changes && let Err(err) = self.flush_pending() {
            self.abort();
            return Err(err.into_commit());
        }
        if let Some(mut conn) = self.conn.take()
            && conn.in_transaction()
            && let Err(err) = conn.commit()
        {
            self.tracker.revert_flushes();
            return Err(err.into_commit());
        }
        self.tracker.settle();
        debug!(session = self.id, "session committed");
        Ok(())
    }

    /// Roll back the transaction and restore the session's bookkeeping.
    pub fn rollback(&mut self) -> KeelsonResult<()> {
        let result = match self.conn.take() {
            Some(mut conn) if conn.in_transaction() => conn.rollback(),
            _ => Ok(()),
        };
        self.tracker.revert();
        debug!(session = self.id, "session rolled back");
        result
    }

    fn abort(&mut self) {
        if let Some(mut conn) = self.conn.take()
            && conn.in_transaction()
            && let Err(err) = conn.rollback()
        {
            warn!(session = self.id, error = %err, "rollback after failed flush also failed");
        }
        self.tracker.revert_flushes();
    }

    /// Run `f` as one unit of work: commit on `Ok`, roll back on `Err`.
    pub fn begin<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<KeelsonError>,
    {
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(session = self.id, error = %rollback_err, "rollback after failed unit of work failed");
                }
                Err(err)
            }
        }
    }

    /// Detach every tracked entity and release their slots.
    ///
    /// Pending changes are discarded; the transaction is left alone.
    pub fn expunge_all(&mut self) {
        let released = self.tracker.clear();
        self.generation += 1;
        debug!(session = self.id, released, "expunged all entities");
    }

    /// Roll back and detach every entity. The session stays usable.
    pub fn close(&mut self) -> KeelsonResult<()> {
        let result = self.rollback();
        self.expunge_all();
        debug!(session = self.id, "session closed");
        result
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.conn.is_some()
            && let Err(err) = self.close()
        {
            warn!(session = self.id, error = %err, "closing session on drop failed");
        }
    }
}

fn released(key: ObjectKey) -> KeelsonError {
    KeelsonError::InvalidArgument(format!("{key} is no longer part of the session"))
}

fn type_mismatch<E: Entity>() -> KeelsonError {
    KeelsonError::Mapping(format!("handle does not point at a {}", E::meta().name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{CHILD, Child, NODE, NOTE, Node, Note, PARENT, Parent, parent};
    use crate::query::column;
    use crate::schema::create_all;

    fn engine() -> Engine {
        let engine = Engine::in_memory().unwrap();
        create_all(&engine, &[&PARENT, &CHILD, &NOTE, &NODE]).unwrap();
        engine
    }

    fn session(engine: &Engine) -> Session {
        Session::new(engine.clone(), SessionConfig::default())
    }

    fn count(engine: &Engine, table: &str) -> i64 {
        let mut conn = engine.connect().unwrap();
        let n = conn
            .execute(format!("SELECT count(*) FROM {table}").as_str(), ())
            .unwrap()
            .scalar::<i64>()
            .unwrap()
            .unwrap();
        conn.close().unwrap();
        n
    }

    #[test]
    fn commit_persists_the_aggregate() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &["a", "b"])).unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Pending);
        s.commit().unwrap();

        assert_eq!(s.state(&h).unwrap(), ObjectState::Persistent);
        let saved = s.entity(&h).unwrap().clone();
        let id = saved.id.unwrap();
        assert!(saved.children.iter().all(|c| c.parent_id == Some(id)));
        assert_eq!(count(&engine, "child"), 2);

        let mut fresh = session(&engine);
        let loaded = fresh.get::<Parent>(id).unwrap().unwrap();
        let loaded = fresh.entity(&loaded).unwrap();
        assert_eq!(loaded, &saved);
    }

    #[test]
    fn identity_map_returns_one_instance() {
        let engine = engine();
        let mut s = session(&engine);
        s.add(parent("sandy", &["a"])).unwrap();
        s.commit().unwrap();

        let mut fresh = session(&engine);
        let first = fresh.get::<Parent>(1).unwrap().unwrap();
        let again = fresh.get::<Parent>(1).unwrap().unwrap();
        assert_eq!(first, again);

        let child = fresh.get::<Child>(1).unwrap().unwrap();
        assert!(child.is_owned());
        fresh.entity_mut(&child).unwrap().label = "changed".into();
        assert_eq!(fresh.entity(&first).unwrap().children[0].label, "changed");
        assert_eq!(fresh.state(&child).unwrap(), ObjectState::Dirty);
        assert_eq!(fresh.state(&first).unwrap(), ObjectState::Dirty);
    }

    #[test]
    fn missing_rows_are_none() {
        let engine = engine();
        let mut s = session(&engine);
        assert!(s.get::<Parent>(42).unwrap().is_none());
        assert!(s.resolve(&Reference::<Parent>::none()).unwrap().is_none());
    }

    #[test]
    fn rollback_clears_generated_keys() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &["a"])).unwrap();
        s.flush().unwrap();
        assert!(s.in_transaction());
        assert_eq!(s.entity(&h).unwrap().id, Some(1));

        s.rollback().unwrap();
        assert!(!s.in_transaction());
        assert_eq!(s.state(&h).unwrap(), ObjectState::Pending);
        let restored = s.entity(&h).unwrap();
        assert_eq!(restored.id, None);
        assert_eq!(restored.children[0].id, None);
        assert_eq!(count(&engine, "parent"), 0);

        s.commit().unwrap();
        assert_eq!(count(&engine, "parent"), 1);
    }

    #[test]
    fn failed_commit_restores_pending_state() {
        let engine = engine();
        let mut s = session(&engine);
        let p = s.add(parent("sandy", &[])).unwrap();
        let orphan = s.add(Child {
            label: "no parent".into(),
            ..Child::default()
        })
        .unwrap();

        let err = s.commit().unwrap_err();
        assert!(matches!(err, KeelsonError::Commit { .. }));
        assert!(crate::connection::is_constraint_violation(&err));
        assert_eq!(s.state(&p).unwrap(), ObjectState::Pending);
        assert_eq!(s.entity(&p).unwrap().id, None);

        s.expunge(&orphan).unwrap();
        s.commit().unwrap();
        assert_eq!(s.state(&p).unwrap(), ObjectState::Persistent);
        assert_eq!(count(&engine, "parent"), 1);
    }

    #[test]
    fn deleting_a_parent_cascades_per_relationship() {
        let engine = engine();
        let mut s = session(&engine);
        let mut p = parent("sandy", &["a", "b"]);
        p.notes.push(Note {
            body: "keep me".into(),
            ..Note::default()
        });
        let h = s.add(p).unwrap();
        s.commit().unwrap();

        s.delete(&h).unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Deleted);
        s.commit().unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Detached);

        assert_eq!(count(&engine, "parent"), 0);
        assert_eq!(count(&engine, "child"), 0);
        assert_eq!(count(&engine, "note"), 1);
        let mut fresh = session(&engine);
        let note = fresh.get::<Note>(1).unwrap().unwrap();
        assert!(!note.is_owned());
        assert_eq!(fresh.entity(&note).unwrap().parent_id, None);
    }

    #[test]
    fn removed_children_are_orphan_deleted() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &["a", "b", "c"])).unwrap();
        s.commit().unwrap();

        s.entity_mut(&h).unwrap().children.remove(0);
        let child = s.get::<Child>(3).unwrap().unwrap();
        s.delete(&child).unwrap();
        assert_eq!(s.state(&child).unwrap(), ObjectState::Deleted);
        s.commit().unwrap();

        assert_eq!(count(&engine, "child"), 1);
        let labels: Vec<_> = s
            .entity(&h)
            .unwrap()
            .children
            .iter()
            .map(|c| c.label.clone())
            .collect();
        assert_eq!(labels, ["b"]);
    }

    #[test]
    fn rollback_undoes_an_unflushed_delete() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &[])).unwrap();
        s.commit().unwrap();

        s.delete(&h).unwrap();
        s.rollback().unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Persistent);
        assert!(!s.has_pending_changes());
    }

    #[test]
    fn deleting_a_pending_root_just_forgets_it() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &[])).unwrap();
        s.delete(&h).unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Detached);
        assert!(!s.has_pending_changes());
        assert!(s.entity_mut(&h).is_err());
        assert!(s.delete(&h).is_err());
    }

    #[test]
    fn scalars_run_queries_through_the_identity_map() {
        let engine = engine();
        let mut s = session(&engine);
        let sandy = s.add(parent("sandy", &[])).unwrap();
        s.add(parent("patrick", &[])).unwrap();

        // autoflush makes the pending rows visible
        let select = Select::entity::<Parent>().filter(column::<Parent>("name").eq("sandy"));
        let found = s.scalars::<Parent>(&select).unwrap().one().unwrap();
        assert_eq!(found, sandy);

        let all = s
            .scalars::<Parent>(&Select::entity::<Parent>().order_by(column::<Parent>("name")))
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(s.scalars::<Child>(&select).is_err());
    }

    #[test]
    fn adding_a_tracked_key_twice_is_rejected() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &[])).unwrap();
        s.commit().unwrap();
        let copy = s.entity(&h).unwrap().clone();
        let err = s.add(copy).unwrap_err();
        assert!(matches!(err, KeelsonError::InvalidArgument(_)));
        assert!(s.add_optional::<Parent>(None).is_err());
    }

    #[test]
    fn handles_are_bound_to_their_session() {
        let engine = engine();
        let mut a = session(&engine);
        let b = session(&engine);
        let h = a.add(parent("sandy", &[])).unwrap();
        assert!(b.entity(&h).is_err());
    }

    #[test]
    fn begin_commits_or_rolls_back() {
        let engine = engine();
        let mut s = session(&engine);
        s.begin(|s| s.add(parent("sandy", &[])).map(|_| ()))
            .unwrap();
        assert_eq!(count(&engine, "parent"), 1);

        let result: KeelsonResult<()> = s.begin(|s| {
            s.add(parent("patrick", &[]))?;
            s.flush()?;
            Err(KeelsonError::InvalidArgument("stop".into()))
        });
        assert!(result.is_err());
        assert_eq!(count(&engine, "parent"), 1);
    }

    #[test]
    fn refresh_discards_local_edits() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &["a"])).unwrap();
        s.commit().unwrap();

        s.entity_mut(&h).unwrap().name = "squidward".into();
        s.refresh(&h).unwrap();
        assert_eq!(s.entity(&h).unwrap().name, "sandy");
        assert_eq!(s.state(&h).unwrap(), ObjectState::Persistent);
    }

    #[test]
    fn close_detaches_everything() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &[])).unwrap();
        s.commit().unwrap();
        s.close().unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Detached);
        assert!(s.get::<Parent>(1).unwrap().is_some());
    }

    #[test]
    fn close_releases_tracked_slots() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &["a"])).unwrap();
        s.commit().unwrap();
        let child = s.entity(&h).unwrap().children[0].id.unwrap();
        let c = s.get::<Child>(child).unwrap().unwrap();
        s.close().unwrap();
        assert!(s.tracker.slots.is_empty());
        assert_eq!(s.state(&c).unwrap(), ObjectState::Detached);
        assert!(matches!(s.entity(&h), Err(KeelsonError::InvalidArgument(_))));

        let again = s.get::<Parent>(1).unwrap().unwrap();
        assert_ne!(again, h);
        assert_eq!(s.state(&again).unwrap(), ObjectState::Persistent);
    }

    #[test]
    fn expunge_all_discards_pending_entities() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s.add(parent("sandy", &[])).unwrap();
        s.expunge_all();
        assert!(!s.has_pending_changes());
        assert_eq!(s.state(&h).unwrap(), ObjectState::Detached);
        assert!(s.delete(&h).is_err());
        s.commit().unwrap();
        assert!(s.get::<Parent>(1).unwrap().is_none());
    }

    fn orphan_child(s: &mut Session) -> Handle<Child> {
        s.add(Child {
            label: "no parent".into(),
            ..Child::default()
        })
        .unwrap()
    }

    #[test]
    fn failed_commit_keeps_a_requested_delete_for_the_retry() {
        let engine = engine();
        let mut s = session(&engine);
        let gone = s.add(parent("gone", &[])).unwrap();
        s.commit().unwrap();

        s.delete(&gone).unwrap();
        let orphan = orphan_child(&mut s);
        let err = s.commit().unwrap_err();
        assert!(matches!(err, KeelsonError::Commit { .. }));
        assert_eq!(s.state(&gone).unwrap(), ObjectState::Deleted);
        assert_eq!(count(&engine, "parent"), 1);

        s.expunge(&orphan).unwrap();
        s.commit().unwrap();
        assert_eq!(s.state(&gone).unwrap(), ObjectState::Detached);
        assert_eq!(count(&engine, "parent"), 0);
    }

    #[test]
    fn failed_commit_keeps_a_deleted_child_doomed() {
        let engine = engine();
        let mut s = session(&engine);
        let p = s.add(parent("sandy", &["a", "b"])).unwrap();
        s.commit().unwrap();
        let first = s.entity(&p).unwrap().children[0].id.unwrap();
        let child = s.get::<Child>(first).unwrap().unwrap();

        s.delete(&child).unwrap();
        let orphan = orphan_child(&mut s);
        assert!(s.commit().is_err());
        assert_eq!(s.state(&child).unwrap(), ObjectState::Deleted);
        assert_eq!(s.entity(&p).unwrap().children.len(), 1);

        s.expunge(&orphan).unwrap();
        s.commit().unwrap();
        assert_eq!(count(&engine, "child"), 1);
        assert_eq!(s.state(&p).unwrap(), ObjectState::Persistent);
    }

    #[test]
    fn rollback_after_a_failed_commit_undoes_the_delete() {
        let engine = engine();
        let mut s = session(&engine);
        let kept = s.add(parent("kept", &[])).unwrap();
        s.commit().unwrap();

        s.delete(&kept).unwrap();
        orphan_child(&mut s);
        assert!(s.commit().is_err());
        s.rollback().unwrap();
        assert_eq!(s.state(&kept).unwrap(), ObjectState::Persistent);
        assert_eq!(count(&engine, "parent"), 1);
    }

    #[test]
    fn column_named_like_the_table_key_is_written_as_set() {
        let engine = engine();
        let mut s = session(&engine);
        let h = s
            .add(Node {
                label: "n".into(),
                ..Node::default()
            })
            .unwrap();
        s.commit().unwrap();

        s.entity_mut(&h).unwrap().node_id = Some(42);
        s.commit().unwrap();
        assert_eq!(s.state(&h).unwrap(), ObjectState::Persistent);

        let mut conn = engine.connect().unwrap();
        let stored = conn
            .execute("SELECT node_id FROM node", ())
            .unwrap()
            .scalar::<i64>()
            .unwrap();
        assert_eq!(stored, Some(42));
        conn.close().unwrap();

        s.delete(&h).unwrap();
        s.commit().unwrap();
        assert_eq!(count(&engine, "node"), 0);
    }

    #[test]
    fn transaction_ended_by_the_store_restores_pending_state() {
        let engine = engine();
        let mut s = session(&engine);
        let kept = s.add(parent("kept", &[])).unwrap();
        s.commit().unwrap();
        let kept_id = s.entity(&kept).unwrap().id.unwrap();

        let fresh = s.add(parent("fresh", &[])).unwrap();
        s.flush().unwrap();
        assert!(s.entity(&fresh).unwrap().id.is_some());
        assert!(s.in_transaction());

        let err = s
            .execute(
                format!("INSERT OR ROLLBACK INTO parent (id, name) VALUES ({kept_id}, 'dup')")
                    .as_str(),
                (),
            )
            .unwrap_err();
        assert!(crate::connection::is_constraint_violation(&err));
        assert!(!s.in_transaction());
        assert_eq!(s.state(&fresh).unwrap(), ObjectState::Pending);
        assert_eq!(s.entity(&fresh).unwrap().id, None);

        s.commit().unwrap();
        assert_eq!(count(&engine, "parent"), 2);
    }

    #[test]
    fn session_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Session>();
    }
}
