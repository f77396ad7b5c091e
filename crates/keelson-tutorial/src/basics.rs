// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core-level tour: connections, commit-as-you-go, `begin` blocks,
//! executemany and text statements run through a session.

use std::io::Write;

use keelson_core::KeelsonResult;
use keelson_storage::{CursorResult, SessionFactory, params, text};

use crate::TutorialResult;
use crate::models::SomeTable;

pub fn run(factory: &SessionFactory, out: &mut dyn Write) -> TutorialResult<()> {
    let engine = factory.engine();
    engine.begin(|conn| {
        conn.execute(SomeTable::DROP, ())?;
        KeelsonResult::Ok(())
    })?;

    // Nothing is committed here, so releasing the connection rolls back.
    {
        let mut conn = engine.connect()?;
        let rows = conn.execute(&text("select 'hello world'"), ())?.all();
        let rendered: Vec<String> = rows.iter().map(ToString::to_string).collect();
        writeln!(out, "[{}]", rendered.join(", "))?;
    }

    // Commit as you go.
    {
        let mut conn = engine.connect()?;
        conn.execute(&text(SomeTable::CREATE), ())?;
        conn.execute(
            &text("INSERT INTO some_table (x, y) VALUES (:x, :y)"),
            vec![params! { "x" => 1, "y" => 1 }, params! { "x" => 2, "y" => 4 }],
        )?;
        conn.commit()?;
    }

    // A begin block commits on Ok and rolls back on Err.
    engine.begin(|conn| {
        conn.execute(
            &text("INSERT INTO some_table (x, y) VALUES (:x, :y)"),
            vec![params! { "x" => 6, "y" => 8 }, params! { "x" => 9, "y" => 10 }],
        )?;
        KeelsonResult::Ok(())
    })?;

    {
        let mut conn = engine.connect()?;
        writeln!(out, "all rows:")?;
        print_rows(out, conn.execute(&text("SELECT x, y FROM some_table"), ())?)?;
    }

    {
        let mut conn = engine.connect()?;
        writeln!(out, "rows with y > 2:")?;
        let result = conn.execute(
            &text("SELECT x, y FROM some_table WHERE y > :y"),
            params! { "y" => 2 },
        )?;
        print_rows(out, result)?;
    }

    {
        let mut conn = engine.connect()?;
        let result = conn.execute(
            &text("INSERT INTO some_table (x, y) VALUES (:x, :y)"),
            vec![params! { "x" => 11, "y" => 12 }, params! { "x" => 13, "y" => 14 }],
        )?;
        writeln!(out, "executemany inserted {} rows", result.rows_affected())?;
        conn.commit()?;
    }

    // Sessions run text statements in their own transaction.
    let stmt = text("SELECT x, y FROM some_table WHERE y > :y ORDER BY x, y");
    {
        let mut session = factory.session();
        writeln!(out, "session read, y > 6:")?;
        print_rows(out, session.execute(&stmt, params! { "y" => 6 })?)?;
        session.close()?;
    }

    {
        let mut session = factory.session();
        let result = session.execute(
            &text("UPDATE some_table SET y=:y WHERE x=:x"),
            vec![params! { "x" => 9, "y" => 11 }, params! { "x" => 13, "y" => 15 }],
        )?;
        writeln!(out, "session updated {} rows", result.rows_affected())?;
        session.commit()?;
    }

    let mut conn = engine.connect()?;
    writeln!(out, "final state:")?;
    print_rows(out, conn.execute(&text("SELECT x, y FROM some_table ORDER BY x"), ())?)?;
    Ok(())
}

fn print_rows(out: &mut dyn Write, result: CursorResult) -> TutorialResult<()> {
    for row in result {
        writeln!(out, "  {}", SomeTable::from_row(&row)?)?;
    }
    Ok(())
}
