// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed entities and the static metadata that maps them to tables.
//!
//! An entity is a plain struct with an integer primary key. Its table layout
//! lives in a `static EntityMeta`. One-to-many relationships are owned
//! `Vec<Child>` fields exposed through [`Entity::collection`]. Many-to-one
//! links are [`Reference`] fields and are lookups only.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use keelson_core::{KeelsonError, KeelsonResult, Value};

use crate::cursor::Row;

/// Declared SQL type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Integer,
    Real,
    Text,
    Blob,
    Varchar(u32),
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::Integer => f.write_str("INTEGER"),
            SqlType::Real => f.write_str("REAL"),
            SqlType::Text => f.write_str("TEXT"),
            SqlType::Blob => f.write_str("BLOB"),
            SqlType::Varchar(n) => write!(f, "VARCHAR({n})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
}

/// A non-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub references: Option<ForeignKey>,
    pub deferred: bool,
}

impl ColumnDef {
    /// A NOT NULL column.
    pub const fn new(name: &'static str, sql_type: SqlType) -> Self {
        Self {
            name,
            sql_type,
            nullable: false,
            references: None,
            deferred: false,
        }
    }

    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub const fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some(ForeignKey { table, column });
        self
    }

    /// Check the foreign key at commit rather than per statement.
    pub const fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }
}

/// What happens to children when their owner is deleted or lets go of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cascade {
    pub delete: bool,
    pub delete_orphan: bool,
}

impl Cascade {
    /// Children are saved with the owner; on delete their key is nulled.
    pub const SAVE_UPDATE: Cascade = Cascade {
        delete: false,
        delete_orphan: false,
    };

    /// Children are saved and deleted with the owner, and deleted when
    /// removed from the collection.
    pub const ALL_DELETE_ORPHAN: Cascade = Cascade {
        delete: true,
        delete_orphan: true,
    };
}

/// An owned one-to-many relationship.
#[derive(Debug, Clone, Copy)]
pub struct RelationshipDef {
    /// Name passed to [`Entity::collection`].
    pub name: &'static str,
    pub target: fn() -> &'static EntityMeta,
    /// Column on the target table holding the owner's key.
    pub foreign_key: &'static str,
    pub cascade: Cascade,
}

impl RelationshipDef {
    pub fn target(&self) -> &'static EntityMeta {
        (self.target)()
    }
}

/// Static mapping of an entity type onto its table.
#[derive(Debug)]
pub struct EntityMeta {
    pub name: &'static str,
    pub table: &'static str,
    /// Integer primary key column.
    pub primary_key: &'static str,
    /// Non-key columns, in the order [`Entity::values`] returns them.
    pub columns: &'static [ColumnDef],
    pub relationships: &'static [RelationshipDef],
    /// The entity type whose relationship owns this one, if any.
    pub owner: Option<fn() -> &'static EntityMeta>,
    /// Type-erased constructor, normally `load_entity::<Self>`.
    pub load: fn(&Row) -> KeelsonResult<Box<dyn AnyEntity>>,
}

impl EntityMeta {
    pub fn column(&self, name: &str) -> Option<&'static ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        name == self.primary_key || self.column(name).is_some()
    }

    /// Primary key first, then every other column.
    pub fn column_names(&self) -> Vec<&'static str> {
        std::iter::once(self.primary_key)
            .chain(self.columns.iter().map(|c| c.name))
            .collect()
    }

    pub fn relationship(&self, name: &str) -> Option<&'static RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn is(&self, other: &EntityMeta) -> bool {
        self.table == other.table
    }

    /// The owning entity and the relationship through which it owns `self`.
    pub fn owning_relationship(&self) -> Option<(&'static EntityMeta, &'static RelationshipDef)> {
        let owner = (self.owner?)();
        owner
            .relationships
            .iter()
            .find(|rel| rel.target().is(self))
            .map(|rel| (owner, rel))
    }

    /// Position of `column` inside [`Entity::values`].
    pub fn value_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

/// A mapped record type.
pub trait Entity: Clone + PartialEq + fmt::Debug + Send + 'static {
    fn meta() -> &'static EntityMeta;

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: Option<i64>);

    /// Values of `meta().columns`, in declaration order.
    fn values(&self) -> Vec<Value>;

    /// Build from a row holding the primary key and every column by name.
    /// Collections start empty.
    fn from_row(row: &Row) -> KeelsonResult<Self>;

    /// Set a foreign key column that points at an owner.
    fn set_foreign_key(&mut self, column: &str, _value: Option<i64>) -> KeelsonResult<()> {
        Err(KeelsonError::Mapping(format!(
            "{} has no foreign key column `{column}`",
            Self::meta().name
        )))
    }

    fn collection(&self, _relationship: &str) -> Option<&dyn Collection> {
        None
    }

    fn collection_mut(&mut self, _relationship: &str) -> Option<&mut dyn Collection> {
        None
    }
}

/// Type-erased constructor suitable for [`EntityMeta::load`].
pub fn load_entity<E: Entity>(row: &Row) -> KeelsonResult<Box<dyn AnyEntity>> {
    Ok(Box::new(E::from_row(row)?))
}

/// Object-safe view of any [`Entity`], used by the session to hold
/// aggregates of different types side by side.
pub trait AnyEntity: Any + Send + fmt::Debug {
    fn entity_meta(&self) -> &'static EntityMeta;
    fn entity_id(&self) -> Option<i64>;
    fn set_entity_id(&mut self, id: Option<i64>);
    fn column_values(&self) -> Vec<Value>;
    fn assign_foreign_key(&mut self, column: &str, value: Option<i64>) -> KeelsonResult<()>;
    fn children(&self, relationship: &str) -> Option<&dyn Collection>;
    fn children_mut(&mut self, relationship: &str) -> Option<&mut dyn Collection>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Entity> AnyEntity for E {
    fn entity_meta(&self) -> &'static EntityMeta {
        E::meta()
    }

    fn entity_id(&self) -> Option<i64> {
        self.id()
    }

    fn set_entity_id(&mut self, id: Option<i64>) {
        self.set_id(id);
    }

    fn column_values(&self) -> Vec<Value> {
        self.values()
    }

    fn assign_foreign_key(&mut self, column: &str, value: Option<i64>) -> KeelsonResult<()> {
        self.set_foreign_key(column, value)
    }

    fn children(&self, relationship: &str) -> Option<&dyn Collection> {
        self.collection(relationship)
    }

    fn children_mut(&mut self, relationship: &str) -> Option<&mut dyn Collection> {
        self.collection_mut(relationship)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// An owned collection of child entities.
pub trait Collection: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn member(&self, index: usize) -> Option<&dyn AnyEntity>;

    fn member_mut(&mut self, index: usize) -> Option<&mut dyn AnyEntity>;

    fn remove_member(&mut self, index: usize);

    /// Replace the contents with entities built from `rows`.
    fn load_rows(&mut self, rows: &[Row]) -> KeelsonResult<()>;
}

impl<C: Entity> Collection for Vec<C> {
    fn len(&self) -> usize {
        <[C]>::len(self)
    }

    fn member(&self, index: usize) -> Option<&dyn AnyEntity> {
        self.get(index).map(|c| c as &dyn AnyEntity)
    }

    fn member_mut(&mut self, index: usize) -> Option<&mut dyn AnyEntity> {
        self.get_mut(index).map(|c| c as &mut dyn AnyEntity)
    }

    fn remove_member(&mut self, index: usize) {
        if index < <[C]>::len(self) {
            self.remove(index);
        }
    }

    fn load_rows(&mut self, rows: &[Row]) -> KeelsonResult<()> {
        *self = rows.iter().map(C::from_row).collect::<KeelsonResult<_>>()?;
        Ok(())
    }
}

/// Many-to-one lookup of a `T` by primary key. Never cascades.
pub struct Reference<T> {
    id: Option<i64>,
    _target: PhantomData<fn() -> T>,
}

impl<T> Reference<T> {
    pub const fn new(id: i64) -> Self {
        Self {
            id: Some(id),
            _target: PhantomData,
        }
    }

    pub const fn none() -> Self {
        Self {
            id: None,
            _target: PhantomData,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set(&mut self, id: Option<i64>) {
        self.id = id;
    }

    pub fn is_set(&self) -> bool {
        self.id.is_some()
    }
}

impl<T> Clone for Reference<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Reference<T> {}

impl<T> PartialEq for Reference<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Reference<T> {}

impl<T> Default for Reference<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T> From<Option<i64>> for Reference<T> {
    fn from(id: Option<i64>) -> Self {
        Self {
            id,
            _target: PhantomData,
        }
    }
}

impl<T> From<Reference<T>> for Value {
    fn from(reference: Reference<T>) -> Self {
        reference.id.into()
    }
}

impl<T: Entity> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "Reference<{}>({id})", T::meta().name),
            None => write!(f, "Reference<{}>(None)", T::meta().name),
        }
    }
}
