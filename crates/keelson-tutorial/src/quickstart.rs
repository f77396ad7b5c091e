// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ORM quickstart: users owning addresses, `IN` and join queries,
//! collection edits and cascading deletes.

use std::io::Write;

use keelson_storage::{Select, SessionFactory, column, create_all, drop_all};

use crate::models::{Address, User, metadata};
use crate::{TutorialError, TutorialResult};

pub fn run(factory: &SessionFactory, out: &mut dyn Write) -> TutorialResult<()> {
    drop_all(factory.engine(), &metadata())?;
    create_all(factory.engine(), &metadata())?;

    let mut session = factory.session();
    let spongebob = User::new("spongebob", "Spongebob Squarepants")
        .with_address("spongebob@sqlalchemy.org");
    let sandy = User::new("sandy", "Sandy Cheeks")
        .with_address("sandy@sqlalchemy.org")
        .with_address("sandy@squirrelpower.org");
    let patrick = User::new("patrick", "Patrick Star");
    session.add_all([spongebob, sandy, patrick])?;
    session.commit()?;

    let stmt = Select::entity::<User>()
        .filter(column::<User>("name").in_(["spongebob", "sandy"]));
    for user in session.scalars::<User>(&stmt)? {
        writeln!(out, "{}", session.entity(&user)?)?;
    }

    let stmt = Select::entity::<Address>()
        .join::<User>()
        .filter(column::<User>("name").eq("sandy"))
        .filter(column::<Address>("email_address").eq("sandy@sqlalchemy.org"));
    let sandy_address = session.scalars::<Address>(&stmt)?.one()?;
    writeln!(out, "{}", session.entity(&sandy_address)?)?;

    let stmt = Select::entity::<User>().filter(column::<User>("name").eq("patrick"));
    let patrick = session.scalars::<User>(&stmt)?.one()?;
    session
        .entity_mut(&patrick)?
        .addresses
        .push(Address::new("patrickstar@sqlalchemy.org"));
    session.entity_mut(&sandy_address)?.email_address = "sandy_cheeks@sqlalchemy.org".into();
    session.commit()?;

    writeln!(out, "-- deletion --")?;
    let removed = session.entity(&sandy_address)?.id;
    let sandy = session
        .get::<User>(2)?
        .ok_or_else(|| TutorialError::Unexpected("user 2 is missing".into()))?;
    session
        .entity_mut(&sandy)?
        .addresses
        .retain(|address| address.id != removed);
    session.delete(&patrick)?;
    session.commit()?;

    let stmt = Select::entity::<User>().order_by(column::<User>("id"));
    for user in session.scalars::<User>(&stmt)? {
        let user = session.entity(&user)?;
        writeln!(out, "{user}")?;
        for address in &user.addresses {
            writeln!(out, "  {address}")?;
        }
    }
    session.close()?;
    Ok(())
}
