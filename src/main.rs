// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use commands::{InstallOptions, Session};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let session = Session::open(cli.config.as_deref(), &cli.repos)?;

    match cli.command {
        Commands::Spec { spec, json, fresh } => commands::cmd_spec(&session, &spec, json, fresh),
        Commands::Versions { name } => commands::cmd_versions(&session, &name),
        Commands::Install {
            spec,
            jobs,
            fail_fast,
            dry_run,
            retries,
            fresh,
        } => commands::cmd_install(
            &session,
            &spec,
            InstallOptions {
                jobs,
                fail_fast,
                dry_run,
                retries,
                fresh,
            },
        ),
        Commands::Status { name, json } => commands::cmd_status(&session, name.as_deref(), json),
    }
}
