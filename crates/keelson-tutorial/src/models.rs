// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tutorial models: users with owned addresses, and the untyped `some_table`.

use std::fmt;

use keelson_core::{KeelsonError, KeelsonResult, Value};
use keelson_storage::{
    Cascade, Collection, ColumnDef, Entity, EntityMeta, Reference, RelationshipDef, Row, SqlType,
    load_entity,
};

/// `user_account`: a user and the addresses it owns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub fullname: Option<String>,
    pub addresses: Vec<Address>,
}

impl User {
    pub fn new(name: impl Into<String>, fullname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fullname: Some(fullname.into()),
            ..Self::default()
        }
    }

    /// A user with only a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, email_address: impl Into<String>) -> Self {
        self.addresses.push(Address::new(email_address));
        self
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User(id={}, name={:?}, fullname={})",
            Value::from(self.id),
            self.name,
            Value::from(self.fullname.as_deref())
        )
    }
}

/// `address`: an email address owned by a [`User`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Address {
    pub id: Option<i64>,
    pub email_address: String,
    /// Set when the owning user is flushed.
    pub user: Reference<User>,
}

impl Address {
    pub fn new(email_address: impl Into<String>) -> Self {
        Self {
            email_address: email_address.into(),
            ..Self::default()
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Address(id={}, email_address={:?})",
            Value::from(self.id),
            self.email_address
        )
    }
}

pub static USER: EntityMeta = EntityMeta {
    name: "User",
    table: "user_account",
    primary_key: "id",
    columns: &[
        ColumnDef::new("name", SqlType::Varchar(30)),
        ColumnDef::new("fullname", SqlType::Text).nullable(),
    ],
    relationships: &[RelationshipDef {
        name: "addresses",
        target: Address::meta,
        foreign_key: "user_id",
        cascade: Cascade::ALL_DELETE_ORPHAN,
    }],
    owner: None,
    load: load_entity::<User>,
};

pub static ADDRESS: EntityMeta = EntityMeta {
    name: "Address",
    table: "address",
    primary_key: "id",
    columns: &[
        ColumnDef::new("email_address", SqlType::Text),
        ColumnDef::new("user_id", SqlType::Integer).references("user_account", "id"),
    ],
    relationships: &[],
    owner: Some(User::meta),
    load: load_entity::<Address>,
};

/// Every mapped table, parents first.
pub fn metadata() -> [&'static EntityMeta; 2] {
    [&USER, &ADDRESS]
}

impl Entity for User {
    fn meta() -> &'static EntityMeta {
        &USER
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn values(&self) -> Vec<Value> {
        vec![self.name.as_str().into(), self.fullname.as_deref().into()]
    }

    fn from_row(row: &Row) -> KeelsonResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            fullname: row.get("fullname")?,
            addresses: Vec::new(),
        })
    }

    fn collection(&self, relationship: &str) -> Option<&dyn Collection> {
        (relationship == "addresses").then_some(&self.addresses as &dyn Collection)
    }

    fn collection_mut(&mut self, relationship: &str) -> Option<&mut dyn Collection> {
        (relationship == "addresses").then_some(&mut self.addresses as &mut dyn Collection)
    }
}

impl Entity for Address {
    fn meta() -> &'static EntityMeta {
        &ADDRESS
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    fn values(&self) -> Vec<Value> {
        vec![self.email_address.as_str().into(), self.user.into()]
    }

    fn from_row(row: &Row) -> KeelsonResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            email_address: row.get("email_address")?,
            user: row.get::<_, Option<i64>>("user_id")?.into(),
        })
    }

    fn set_foreign_key(&mut self, column: &str, value: Option<i64>) -> KeelsonResult<()> {
        if column != "user_id" {
            return Err(KeelsonError::Mapping(format!(
                "Address has no foreign key `{column}`"
            )));
        }
        self.user.set(value);
        Ok(())
    }
}

/// A row of the untyped `some_table (x int, y int)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SomeTable {
    pub x: i64,
    pub y: i64,
}

impl SomeTable {
    pub const CREATE: &'static str = "CREATE TABLE some_table (x int, y int)";
    pub const DROP: &'static str = "DROP TABLE IF EXISTS some_table";

    pub fn from_row(row: &Row) -> KeelsonResult<Self> {
        Ok(Self {
            x: row.get("x")?,
            y: row.get("y")?,
        })
    }
}

impl fmt::Display for SomeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x: {}  y: {}", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keelson_storage::create_table_sql;

    #[test]
    fn user_renders_like_its_row() {
        let mut user = User::new("sandy", "Sandy Cheeks");
        assert_eq!(
            user.to_string(),
            r#"User(id=None, name="sandy", fullname='Sandy Cheeks')"#
        );
        user.id = Some(2);
        user.fullname = None;
        assert_eq!(user.to_string(), r#"User(id=2, name="sandy", fullname=None)"#);
    }

    #[test]
    fn address_table_references_users() {
        let ddl = create_table_sql(&ADDRESS);
        assert!(ddl.contains(r#""user_id" INTEGER NOT NULL"#));
        assert!(ddl.contains(r#"REFERENCES "user_account" ("id")"#));
        let users = create_table_sql(&USER);
        assert!(users.contains(r#""name" VARCHAR(30) NOT NULL"#));
        assert!(!users.contains(r#""fullname" TEXT NOT NULL"#));
    }

    #[test]
    fn foreign_key_assignment_sets_the_reference() {
        let mut address = Address::new("sandy@example.org");
        address.set_foreign_key("user_id", Some(4)).unwrap();
        assert_eq!(address.user, Reference::new(4));
        assert!(address.set_foreign_key("owner_id", Some(4)).is_err());
    }
}
