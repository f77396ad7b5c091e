// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `CREATE TABLE` / `DROP TABLE` from entity metadata.

use keelson_core::KeelsonResult;
use tracing::debug;

use crate::engine::Engine;
use crate::model::EntityMeta;
use crate::statement::quote_ident;

/// DDL for one entity's table.
pub fn create_table_sql(meta: &EntityMeta) -> String {
    let mut lines = vec![format!(
        "{} INTEGER NOT NULL PRIMARY KEY",
        quote_ident(meta.primary_key)
    )];
    for column in meta.columns {
        let mut line = format!("{} {}", quote_ident(column.name), column.sql_type);
        if !column.nullable {
            line.push_str(" NOT NULL");
        }
        lines.push(line);
    }
    for column in meta.columns {
        if let Some(fk) = column.references {
            let mut line = format!(
                "FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(column.name),
                quote_ident(fk.table),
                quote_ident(fk.column)
            );
            if column.deferred {
                line.push_str(" DEFERRABLE INITIALLY DEFERRED");
            }
            lines.push(line);
        }
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        quote_ident(meta.table),
        lines.join(",\n    ")
    )
}

/// Create every table in `metas`, parents before children, in one transaction.
pub fn create_all(engine: &Engine, metas: &[&EntityMeta]) -> KeelsonResult<()> {
    engine.begin(|conn| {
        for meta in metas {
            conn.execute(create_table_sql(meta).as_str(), ())?;
            debug!(table = meta.table, "table ensured");
        }
        Ok(())
    })
}

/// Drop every table in `metas`, in reverse order.
pub fn drop_all(engine: &Engine, metas: &[&EntityMeta]) -> KeelsonResult<()> {
    engine.begin(|conn| {
        for meta in metas.iter().rev() {
            conn.execute(
                format!("DROP TABLE IF EXISTS {}", quote_ident(meta.table)).as_str(),
                (),
            )?;
            debug!(table = meta.table, "table dropped");
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Entity;
    use crate::model::fixtures::{Child, Note, Parent};

    #[test]
    fn ddl_carries_types_nullability_and_keys() {
        let sql = create_table_sql(Child::meta());
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "child" ("#));
        assert!(sql.contains(r#""id" INTEGER NOT NULL PRIMARY KEY"#));
        assert!(sql.contains(r#""label" TEXT NOT NULL"#));
        assert!(sql.contains(r#"FOREIGN KEY ("parent_id") REFERENCES "parent" ("id")"#));

        let parent = create_table_sql(Parent::meta());
        assert!(parent.contains(r#""name" VARCHAR(30) NOT NULL"#));

        let note = create_table_sql(Note::meta());
        assert!(note.contains(r#""parent_id" INTEGER,"#));
    }

    #[test]
    fn create_then_drop() {
        let engine = Engine::in_memory().unwrap();
        let metas = [Parent::meta(), Child::meta(), Note::meta()];
        create_all(&engine, &metas).unwrap();
        create_all(&engine, &metas).unwrap();

        let mut conn = engine.connect().unwrap();
        let tables = conn
            .execute("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name", ())
            .unwrap()
            .scalars::<String>()
            .unwrap();
        assert_eq!(tables, ["child", "note", "parent"]);
        conn.close().unwrap();

        drop_all(&engine, &metas).unwrap();
        let mut conn = engine.connect().unwrap();
        let count = conn
            .execute("SELECT count(*) FROM sqlite_master WHERE type = 'table'", ())
            .unwrap()
            .scalar::<i64>()
            .unwrap();
        assert_eq!(count, Some(0));
    }
}
