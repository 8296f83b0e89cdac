// src/commands/query.rs

//! Read-only commands: spec, versions, status

use super::Session;
use anyhow::{Context, Result};
use cookbook::resolver::Concretizer;
use cookbook::spec::{AbstractSpec, ConcreteGraph};
use tracing::info;

/// Concretize `spec` with the session's configuration
pub(super) fn concretize(session: &Session, spec: &str, fresh: bool) -> Result<ConcreteGraph> {
    let request: AbstractSpec = spec
        .parse()
        .with_context(|| format!("Invalid spec: {}", spec))?;

    let mut options = session.config.concretizer_options()?;
    if fresh {
        options.reuse = false;
    }
    info!("Concretizing {}", request);

    let concretizer =
        Concretizer::new(&session.registry, options).with_install_state(&session.state);
    let graph = concretizer
        .concretize(&request)
        .with_context(|| format!("Failed to concretize {}", spec))?;
    Ok(graph)
}

/// Print the concrete graph for a spec
pub fn cmd_spec(session: &Session, spec: &str, json: bool, fresh: bool) -> Result<()> {
    let graph = concretize(session, spec, fresh)?;
    if json {
        println!("{}", graph.to_json()?);
    } else {
        print!("{}", graph);
    }
    Ok(())
}

/// List known versions of a package, marking installed ones
pub fn cmd_versions(session: &Session, name: &str) -> Result<()> {
    let versions = session.registry.list_versions(name)?;
    let installed = session.state.installed_versions(name)?;

    println!("{} ({} versions):", name, versions.len());
    for version in versions {
        if installed.contains(&version) {
            println!("  {}  [installed]", version);
        } else {
            println!("  {}", version);
        }
    }
    Ok(())
}

/// Show install records
pub fn cmd_status(session: &Session, name: Option<&str>, json: bool) -> Result<()> {
    let records: Vec<_> = session
        .state
        .list()?
        .into_iter()
        .filter(|r| name.is_none_or(|n| r.name == n))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No install records");
        return Ok(());
    }
    for record in &records {
        print!(
            "{:<11} {}@{} /{} {}",
            record.status.as_str(),
            record.name,
            record.version,
            cookbook::hash::short(&record.hash),
            record.prefix.display()
        );
        if let Some(error) = &record.error {
            print!("  ({})", error);
        }
        println!();
    }
    Ok(())
}
