// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Create, read and delete through a session, plus `get` by primary key.

use std::io::Write;

use keelson_core::ObjectState;
use keelson_storage::{Select, SessionFactory, column, create_all, drop_all};

use crate::TutorialResult;
use crate::models::{User, metadata};

pub fn run(factory: &SessionFactory, out: &mut dyn Write) -> TutorialResult<()> {
    drop_all(factory.engine(), &metadata())?;
    create_all(factory.engine(), &metadata())?;

    let mut session = factory.session();
    session.add_all([User::new("ed", "Ed Jones"), User::new("wendy", "Wendy Williams")])?;
    session.commit()?;

    let stmt = Select::entity::<User>().filter_by("name", "ed");
    for user in session.scalars::<User>(&stmt)?.all() {
        writeln!(out, "filter_by: {}", session.entity(&user)?)?;
    }

    let stmt = Select::columns([column::<User>("name"), column::<User>("fullname")]);
    for row in session.execute(&stmt, ())? {
        writeln!(out, "columns: {row}")?;
    }

    let user1 = session.add(User::named("user1"))?;
    session.commit()?;
    writeln!(out, "added: {}", session.entity(&user1)?)?;

    session.add_all(["squidward", "krabs", "plankton"].map(User::named))?;

    // Marked deleted now, deleted at the next flush.
    session.delete(&user1)?;
    writeln!(out, "user1 is {}", session.state(&user1)?)?;

    // A miss flushes the pending batch before it reads.
    match session.get::<User>(5)? {
        Some(user) => writeln!(out, "get(5): {}", session.entity(&user)?)?,
        None => writeln!(out, "get(5): nothing")?,
    }
    session.commit()?;
    if session.state(&user1)? == ObjectState::Detached {
        writeln!(out, "user1 deleted")?;
    }

    let remaining = session.scalars::<User>(&Select::entity::<User>().order_by(column::<User>("id")))?;
    let mut names = Vec::with_capacity(remaining.len());
    for user in remaining {
        names.push(session.entity(&user)?.name.clone());
    }
    writeln!(out, "remaining: {}", names.join(", "))?;
    session.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use keelson_config::SessionConfig;
    use keelson_storage::Engine;

    use super::*;

    #[test]
    fn crud_transcript() {
        let factory = SessionFactory::new(Engine::in_memory().unwrap(), SessionConfig::default());
        let mut out = Vec::new();
        run(&factory, &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "filter_by: User(id=1, name=\"ed\", fullname='Ed Jones')",
                "columns: ('ed', 'Ed Jones')",
                "columns: ('wendy', 'Wendy Williams')",
                "added: User(id=3, name=\"user1\", fullname=None)",
                "user1 is deleted",
                "get(5): User(id=5, name=\"krabs\", fullname=None)",
                "user1 deleted",
                "remaining: ed, wendy, squidward, krabs, plankton",
            ]
        );
    }
}
