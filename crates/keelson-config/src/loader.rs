// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. `/etc/keelson/keelson.toml`
//! 3. `~/.config/keelson/keelson.toml`
//! 4. `./keelson.toml`
//! 5. `KEELSON_*` environment variables

#![allow(clippy::result_large_err)] // figment::Error is external

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::KeelsonConfig;

pub(crate) const LOCAL_FILE: &str = "keelson.toml";
pub(crate) const SYSTEM_FILE: &str = "/etc/keelson/keelson.toml";

/// Path of the per-user config file, if the platform has a config dir.
pub(crate) fn user_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("keelson").join(LOCAL_FILE))
}

/// Load configuration from the standard hierarchy with env var overrides.
pub fn load_config() -> Result<KeelsonConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<KeelsonConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(KeelsonConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from one explicit file, still honouring env overrides.
pub fn load_config_from_path(path: &Path) -> Result<KeelsonConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(KeelsonConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// The full layered Figment, before extraction.
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(KeelsonConfig::default()))
        .merge(Toml::file(SYSTEM_FILE))
        .merge(Toml::file(user_file().unwrap_or_default()))
        .merge(Toml::file(LOCAL_FILE))
        .merge(env_provider())
}

/// `KEELSON_ENGINE_BUSY_TIMEOUT_MS` must land on `engine.busy_timeout_ms`, so the
/// section prefix is mapped explicitly instead of splitting on every underscore.
fn env_provider() -> Env {
    Env::prefixed("KEELSON_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("engine_", "engine.", 1)
            .replacen("session_", "session.", 1)
            .replacen("logging_", "logging.", 1);
        mapped.into()
    })
}
