// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keelson - a transactional persistence layer over SQLite.
//!
//! This binary replays the tutorial walkthroughs against the configured
//! engine and prints their transcripts.

mod runner;

use clap::{Parser, Subcommand};
use keelson_config::KeelsonConfig;

/// Keelson - replay the persistence walkthroughs.
#[derive(Parser, Debug)]
#[command(name = "keelson", version, about, long_about = None)]
struct Cli {
    /// Database URL, e.g. `sqlite://` or `sqlite:///tutorial.db`.
    #[arg(long, global = true, value_name = "URL")]
    url: Option<String>,

    /// Log every statement and its parameters.
    #[arg(long, global = true)]
    echo: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Raw connections, commit-as-you-go, begin blocks and text statements.
    Basics,
    /// Mapped users and addresses with cascades and joins.
    Quickstart,
    /// filter_by, column selection, add, delete and get.
    Crud,
    /// Sessions from a shared session factory.
    Factory,
    /// Every walkthrough, in order.
    All,
}

impl Cli {
    /// Command-line flags win over every configuration source.
    fn apply_overrides(&self, config: &mut KeelsonConfig) {
        if let Some(url) = &self.url {
            config.engine.url = url.clone();
        }
        if self.echo {
            config.engine.echo = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let mut config = match keelson_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            keelson_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);
    if let Err(errors) = keelson_config::validation::validate_config(&config) {
        keelson_config::render_errors(&errors);
        std::process::exit(1);
    }

    init_tracing(&config.logging.level.to_ascii_lowercase(), config.engine.echo);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(err) = runner::run(cli.command, &config, &mut out) {
        tracing::debug!(error = ?err, "walkthrough failed");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// Initializes the tracing subscriber with the given log level.
///
/// Echoed SQL is logged at INFO, so `echo` keeps the storage crate at INFO
/// or more verbose.
fn init_tracing(log_level: &str, echo: bool) {
    use tracing_subscriber::EnvFilter;

    let storage_level = match log_level {
        "warn" | "error" if echo => "info",
        level => level,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "keelson={log_level},keelson_tutorial={log_level},keelson_storage={storage_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_parse_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "keelson",
            "quickstart",
            "--echo",
            "--url",
            "sqlite:///tutorial.db",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.command, Commands::Quickstart);

        let mut config = KeelsonConfig::default();
        cli.apply_overrides(&mut config);
        assert!(config.engine.echo);
        assert_eq!(config.engine.url, "sqlite:///tutorial.db");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn flags_left_out_keep_the_config() {
        let cli = Cli::try_parse_from(["keelson", "all"]).unwrap();
        let mut config = KeelsonConfig::default();
        config.engine.url = "sqlite:///from-file.db".into();
        cli.apply_overrides(&mut config);
        assert_eq!(config.engine.url, "sqlite:///from-file.db");
        assert!(!config.engine.echo);
    }

    #[test]
    fn a_subcommand_is_required() {
        assert!(Cli::try_parse_from(["keelson"]).is_err());
        assert!(Cli::try_parse_from(["keelson", "migrate"]).is_err());
    }

    #[test]
    fn binary_loads_config_defaults() {
        let config = keelson_config::load_and_validate_str("").expect("default config should be valid");
        assert_eq!(config.engine.url, "sqlite://");
        assert!(config.session.autoflush);
    }
}
