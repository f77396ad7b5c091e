// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session factory: one engine and session configuration, many sessions.

use keelson_config::model::SessionConfig;
use keelson_core::KeelsonError;

use crate::engine::Engine;
use crate::session::Session;

/// Builds [`Session`]s bound to one engine.
///
/// Cheap to clone and safe to share across threads; each session it creates
/// belongs to a single caller.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    engine: Engine,
    config: SessionConfig,
}

impl SessionFactory {
    pub fn new(engine: Engine, config: SessionConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> Session {
        Session::new(self.engine.clone(), self.config.clone())
    }

    /// Open a session, run `f` as one unit of work and close the session.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`.
    pub fn begin<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Session) -> Result<T, E>,
        E: From<KeelsonError>,
    {
        let mut session = self.session();
        let result = session.begin(f)?;
        session.close()?;
        Ok(result)
    }
}
