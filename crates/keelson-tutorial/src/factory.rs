// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sessions opened through a shared [`SessionFactory`] instead of an engine.

use std::io::Write;
use std::thread;

use keelson_core::{KeelsonError, KeelsonResult};
use keelson_storage::{Select, Session, SessionFactory, column, create_all, drop_all};

use crate::models::{User, metadata};
use crate::{TutorialError, TutorialResult};

pub fn run(factory: &SessionFactory, out: &mut dyn Write) -> TutorialResult<()> {
    drop_all(factory.engine(), &metadata())?;
    create_all(factory.engine(), &metadata())?;

    {
        let mut session = factory.session();
        match session.add_optional::<User>(None) {
            Err(err @ KeelsonError::InvalidArgument(_)) => writeln!(out, "rejected: {err}")?,
            Err(err) => return Err(err.into()),
            Ok(_) => return Err(TutorialError::Unexpected("an absent user was added".into())),
        }
        session.add(User::new("mr krabs", "Eugene Krabs"))?;
        session.commit()?;
        session.close()?;
    }

    // Commits on Ok.
    factory.begin(|session| {
        session.add(User::named("pearl"))?;
        TutorialResult::Ok(())
    })?;

    // Rolls back on Err, including the flushed insert.
    let failed = factory.begin(|session| {
        session.add(User::named("plankton"))?;
        session.flush()?;
        session.add_optional::<User>(None)?;
        TutorialResult::Ok(())
    });
    if let Err(err) = failed {
        writeln!(out, "begin rolled back: {err}")?;
    }

    // The factory is cheap to clone and can be handed to other threads.
    for name in ["gary", "larry"] {
        let factory = factory.clone();
        thread::spawn(move || {
            factory.begin(|session| {
                session.add(User::named(name))?;
                KeelsonResult::Ok(())
            })
        })
        .join()
        .map_err(|_| TutorialError::Unexpected(format!("worker for {name} panicked")))??;
    }

    let mut session = factory.session();
    writeln!(out, "users: {}", user_names(&mut session)?.join(", "))?;
    session.close()?;
    Ok(())
}

fn user_names(session: &mut Session) -> TutorialResult<Vec<String>> {
    let stmt = Select::entity::<User>().order_by(column::<User>("id"));
    let mut names = Vec::new();
    for user in session.scalars::<User>(&stmt)? {
        names.push(session.entity(&user)?.name.clone());
    }
    Ok(names)
}
