// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `TestDb` assembles an engine, the tutorial schema and a session factory
//! on an isolated database.

use keelson_config::{EngineConfig, SessionConfig};
use keelson_core::{KeelsonError, KeelsonResult};
use keelson_storage::{Engine, Params, Session, SessionFactory, create_all, params, quote_ident};
use keelson_tutorial::models::{SomeTable, User, metadata};

/// Builder for [`TestDb`].
#[derive(Debug, Default)]
pub struct TestDbBuilder {
    file: bool,
    echo: bool,
    autoflush: Option<bool>,
}

impl TestDbBuilder {
    /// Back the database with a file in a temp directory instead of memory.
    pub fn on_disk(mut self) -> Self {
        self.file = true;
        self
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn with_autoflush(mut self, autoflush: bool) -> Self {
        self.autoflush = Some(autoflush);
        self
    }

    /// Create the engine and the `user_account`, `address` and `some_table` tables.
    pub fn build(self) -> KeelsonResult<TestDb> {
        let temp_dir = if self.file {
            Some(tempfile::TempDir::new().map_err(|e| KeelsonError::Connection {
                target: "temp dir".to_string(),
                source: e.into(),
            })?)
        } else {
            None
        };
        let url = match &temp_dir {
            Some(dir) => format!("sqlite:///{}", dir.path().join("test.db").display()),
            None => "sqlite://".to_string(),
        };

        let engine = Engine::new(EngineConfig::with_url(url).echo(self.echo))?;
        create_all(&engine, &metadata())?;
        engine.begin(|conn| {
            conn.execute(SomeTable::CREATE, ())?;
            KeelsonResult::Ok(())
        })?;
        tracing::debug!(target = %engine.target(), "test database ready");

        let mut session = SessionConfig::default();
        if let Some(autoflush) = self.autoflush {
            session.autoflush = autoflush;
        }
        Ok(TestDb {
            factory: SessionFactory::new(engine, session),
            _temp_dir: temp_dir,
        })
    }
}

/// An isolated database with the tutorial schema.
///
/// File-backed databases live in a temp directory removed on drop.
#[derive(Debug)]
pub struct TestDb {
    factory: SessionFactory,
    _temp_dir: Option<tempfile::TempDir>,
}

impl TestDb {
    pub fn builder() -> TestDbBuilder {
        TestDbBuilder::default()
    }

    /// In-memory database with default settings.
    pub fn memory() -> KeelsonResult<Self> {
        Self::builder().build()
    }

    pub fn engine(&self) -> &Engine {
        self.factory.engine()
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn session(&self) -> Session {
        self.factory.session()
    }

    /// Insert and commit users, returning their keys in order.
    pub fn seed_users(&self, users: impl IntoIterator<Item = User>) -> KeelsonResult<Vec<i64>> {
        self.factory.begin(|session| {
            let handles = session.add_all(users)?;
            session.flush()?;
            handles
                .iter()
                .map(|handle| {
                    session.entity(handle)?.id.ok_or_else(|| {
                        KeelsonError::Mapping("seeded user has no key after flush".to_string())
                    })
                })
                .collect()
        })
    }

    /// Insert and commit `some_table` rows.
    pub fn seed_some_table(&self, rows: &[(i64, i64)]) -> KeelsonResult<()> {
        let sets: Vec<Params> = rows.iter().map(|(x, y)| params! { "x" => *x, "y" => *y }).collect();
        self.engine().begin(|conn| {
            conn.execute("INSERT INTO some_table (x, y) VALUES (:x, :y)", sets)?;
            Ok(())
        })
    }

    /// Committed row count of `table`, read on a fresh connection.
    pub fn count(&self, table: &str) -> KeelsonResult<i64> {
        let mut conn = self.engine().connect()?;
        let sql = format!("SELECT count(*) FROM {}", quote_ident(table));
        let count = conn.execute(sql.as_str(), ())?.scalar::<i64>()?.unwrap_or_default();
        conn.close()?;
        Ok(count)
    }
}
