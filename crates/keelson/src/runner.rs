// SPDX-FileCopyrightText: 2026 Keelson Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs the selected walkthroughs against engines built from configuration.

use std::io::Write;

use keelson_config::KeelsonConfig;
use keelson_storage::{Engine, SessionFactory};
use keelson_tutorial::{TutorialResult, Walkthrough};
use strum::IntoEnumIterator;
use tracing::info;

use crate::Commands;

fn selected(command: Commands) -> Vec<Walkthrough> {
    match command {
        Commands::Basics => vec![Walkthrough::Basics],
        Commands::Quickstart => vec![Walkthrough::Quickstart],
        Commands::Crud => vec![Walkthrough::Crud],
        Commands::Factory => vec![Walkthrough::Factory],
        Commands::All => Walkthrough::iter().collect(),
    }
}

/// Each walkthrough gets its own engine, so in-memory targets start empty.
pub(crate) fn run(
    command: Commands,
    config: &KeelsonConfig,
    out: &mut dyn Write,
) -> TutorialResult<()> {
    for (index, walkthrough) in selected(command).into_iter().enumerate() {
        if index > 0 {
            writeln!(out)?;
        }
        let engine = Engine::new(config.engine.clone())?;
        let factory = SessionFactory::new(engine, config.session.clone());
        walkthrough.run(&factory, out)?;
        info!(%walkthrough, "walkthrough complete");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_runs_every_walkthrough_in_order() {
        let mut out = Vec::new();
        run(Commands::All, &KeelsonConfig::default(), &mut out).unwrap();
        let out = String::from_utf8(out).unwrap();
        let headers: Vec<&str> = out.lines().filter(|l| l.starts_with("== ")).collect();
        assert_eq!(headers.len(), 4);
        assert!(headers[0].starts_with("== basics:"));
        assert!(headers[3].starts_with("== factory:"));
    }

    #[test]
    fn bad_urls_surface_as_errors() {
        let mut config = KeelsonConfig::default();
        config.engine.url = "postgres://localhost/db".into();
        let err = run(Commands::Crud, &config, &mut Vec::new()).unwrap_err();
        assert!(err.to_string().contains("unsupported database scheme"));
    }
}
