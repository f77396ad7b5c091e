// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection factory for one SQLite target.
//!
//! In-memory targets are named shared-cache databases. The engine holds an
//! anchor link so the database lives as long as the engine, and every
//! connection it hands out sees the same data.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use keelson_config::model::EngineConfig;
use keelson_core::{KeelsonError, KeelsonResult};
use rusqlite::OpenFlags;
use tracing::debug;

use crate::connection::Connection;

/// Where an engine's connections point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A private in-memory database, unique per engine.
    Memory { name: String },
    File(PathBuf),
}

impl Target {
    /// Parse a `sqlite://` URL.
    ///
    /// `sqlite://`, `sqlite:///:memory:` and a bare `:memory:` are in-memory;
    /// `sqlite:///rel.db` is relative and `sqlite:////abs.db` absolute.
    /// A `+driver` suffix on the scheme is accepted and ignored.
    pub fn parse(url: &str) -> KeelsonResult<Self> {
        let url = url.trim();
        if url == ":memory:" {
            return Ok(Self::memory());
        }
        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(KeelsonError::Config(format!(
                "`{url}` is not a database URL, expected sqlite://..."
            )));
        };
        let backend = scheme.split('+').next().unwrap_or_default();
        if !backend.eq_ignore_ascii_case("sqlite") {
            return Err(KeelsonError::Config(format!(
                "unsupported database scheme `{scheme}`, only sqlite is available"
            )));
        }
        let path = rest.strip_prefix('/').unwrap_or(rest);
        match path {
            "" | ":memory:" => Ok(Self::memory()),
            path => Ok(Self::File(PathBuf::from(path))),
        }
    }

    fn memory() -> Self {
        Self::Memory {
            name: format!("keelson-mem-{}", uuid::Uuid::new_v4().simple()),
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }

    fn open_path(&self) -> PathBuf {
        match self {
            Self::Memory { name } => PathBuf::from(format!("file:{name}?mode=memory&cache=shared")),
            Self::File(path) => path.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory { .. } => f.write_str(":memory:"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug)]
struct EngineInner {
    config: EngineConfig,
    target: Target,
    _anchor: Option<Mutex<rusqlite::Connection>>,
    next_connection: AtomicU64,
}

/// A cloneable, thread-safe connection factory.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> KeelsonResult<Self> {
        let target = Target::parse(&config.url)?;
        let anchor = if target.is_memory() {
            Some(Mutex::new(open_raw(&target, &config)?))
        } else {
            None
        };
        debug!(url = %config.url, target = %target, echo = config.echo, "engine created");
        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                target,
                _anchor: anchor,
                next_connection: AtomicU64::new(1),
            }),
        })
    }

    /// An engine over a fresh private in-memory database.
    pub fn in_memory() -> KeelsonResult<Self> {
        Self::new(EngineConfig::default())
    }

    pub fn from_url(url: &str) -> KeelsonResult<Self> {
        Self::new(EngineConfig::with_url(url))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    pub fn echo(&self) -> bool {
        self.inner.config.echo
    }

    /// Open a new connection.
    pub fn connect(&self) -> KeelsonResult<Connection> {
        let raw = open_raw(&self.inner.target, &self.inner.config)?;
        let id = self.inner.next_connection.fetch_add(1, Ordering::Relaxed);
        debug!(conn = id, target = %self.inner.target, "connection opened");
        Ok(Connection::new(raw, id, self.inner.config.echo))
    }

    /// Run `f` inside a transaction on a fresh connection.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    pub fn begin<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Connection) -> Result<T, E>,
        E: From<KeelsonError>,
    {
        let mut conn = self.connect()?;
        conn.begin()?;
        match f(&mut conn) {
            Ok(value) => {
                if conn.in_transaction() {
                    conn.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                if conn.in_transaction() {
                    conn.rollback()?;
                }
                Err(err)
            }
        }
    }

    /// Health check: `SELECT 1` on a fresh connection.
    pub fn ping(&self) -> KeelsonResult<()> {
        let mut conn = self.connect()?;
        conn.execute("SELECT 1", ())?.scalar::<i64>()?;
        conn.close()
    }
}

fn open_raw(target: &Target, config: &EngineConfig) -> KeelsonResult<rusqlite::Connection> {
    let path = target.open_path();
    let connection_error = |e: rusqlite::Error| KeelsonError::Connection {
        target: target.to_string(),
        source: Box::new(e),
    };

    if let Target::File(file) = target {
        ensure_parent_exists(file).map_err(|e| KeelsonError::Connection {
            target: target.to_string(),
            source: e.into(),
        })?;
    }

    let raw = rusqlite::Connection::open_with_flags(&path, OpenFlags::default())
        .map_err(connection_error)?;

    raw.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(connection_error)?;
    let fk = if config.foreign_keys { "ON" } else { "OFF" };
    raw.execute_batch(&format!("PRAGMA foreign_keys = {fk};"))
        .map_err(connection_error)?;
    if config.wal_mode && !target.is_memory() {
        raw.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))
            .map_err(connection_error)?;
    }
    Ok(raw)
}

fn ensure_parent_exists(path: &Path) -> Result<(), String> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => Err(format!(
            "directory `{}` does not exist",
            parent.display()
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls() {
        for url in ["sqlite://", "sqlite:///:memory:", "sqlite+pysqlite:///:memory:", ":memory:"] {
            assert!(Target::parse(url).unwrap().is_memory(), "{url}");
        }
    }

    #[test]
    fn file_urls() {
        assert_eq!(
            Target::parse("sqlite:///app.db").unwrap(),
            Target::File(PathBuf::from("app.db"))
        );
        assert_eq!(
            Target::parse("sqlite:////var/lib/app.db").unwrap(),
            Target::File(PathBuf::from("/var/lib/app.db"))
        );
    }

    #[test]
    fn foreign_schemes_are_config_errors() {
        assert!(matches!(Target::parse("postgresql://db"), Err(KeelsonError::Config(_))));
        assert!(matches!(Target::parse("app.db"), Err(KeelsonError::Config(_))));
    }

    #[test]
    fn memory_targets_are_unique() {
        assert_ne!(Target::parse("sqlite://").unwrap(), Target::parse("sqlite://").unwrap());
    }

    #[test]
    fn connections_share_the_memory_database() {
        let engine = Engine::in_memory().unwrap();
        let mut first = engine.connect().unwrap();
        first.execute("CREATE TABLE t (x INTEGER)", ()).unwrap();
        first.execute("INSERT INTO t VALUES (1)", ()).unwrap();
        first.commit().unwrap();

        let mut second = engine.connect().unwrap();
        let count = second.execute("SELECT count(*) FROM t", ()).unwrap().scalar::<i64>().unwrap();
        assert_eq!(count, Some(1));
    }

    #[test]
    fn engines_do_not_share_memory() {
        let a = Engine::in_memory().unwrap();
        let b = Engine::in_memory().unwrap();
        a.begin(|conn| conn.execute("CREATE TABLE only_a (x INTEGER)", ()).map(|_| ()))
            .unwrap();
        let err = b.connect().unwrap().execute("SELECT * FROM only_a", ()).unwrap_err();
        assert!(matches!(err, KeelsonError::Statement { .. }));
    }

    #[test]
    fn missing_directory_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:///{}/missing/app.db", dir.path().display());
        let engine = Engine::from_url(&url).unwrap();
        assert!(matches!(engine.connect(), Err(KeelsonError::Connection { .. })));
    }

    #[test]
    fn ping_succeeds() {
        Engine::in_memory().unwrap().ping().unwrap();
    }

    #[test]
    fn engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }
}
