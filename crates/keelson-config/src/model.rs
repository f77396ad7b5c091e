// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs.
//!
//! All structs use `#[serde(deny_unknown_fields)]` so a misspelled key fails
//! at startup instead of silently falling back to a default.

use serde::{Deserialize, Serialize};

/// Top-level Keelson configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KeelsonConfig {
    /// Backing store and statement echo.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Unit-of-work behaviour.
    #[serde(default)]
    pub session: SessionConfig,

    /// Diagnostic output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine configuration. Immutable once an engine is built from it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Connection target, e.g. `sqlite://` (in-memory) or `sqlite:///data.db`.
    #[serde(default = "default_url")]
    pub url: String,

    /// Emit every statement and its bound parameters to the log.
    #[serde(default)]
    pub echo: bool,

    /// Enforce foreign key constraints on every connection.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    /// How long a connection waits on a locked database file, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Put file databases in WAL journal mode. Ignored for in-memory targets.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            echo: false,
            foreign_keys: true,
            busy_timeout_ms: default_busy_timeout_ms(),
            wal_mode: true,
        }
    }
}

impl EngineConfig {
    /// Config for the given URL with every other option at its default.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Same config with statement echo switched on or off.
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

fn default_url() -> String {
    "sqlite://".to_string()
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Session (unit of work) configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Flush pending changes before queries and identity-map misses.
    #[serde(default = "default_true")]
    pub autoflush: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { autoflush: true }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
