// src/commands/install.rs

//! Install command - concretize, plan and build

use super::Session;
use super::progress::CliProgress;
use super::query::concretize;
use anyhow::{Result, bail};
use cookbook::kitchen::{Kitchen, cancel_on_interrupt};
use cookbook::scheduler::schedule;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Options for [`cmd_install`] that override the configuration
#[derive(Debug, Default)]
pub struct InstallOptions {
    pub jobs: Option<usize>,
    pub fail_fast: bool,
    pub dry_run: bool,
    pub retries: Option<u32>,
    pub fresh: bool,
}

/// Concretize `spec` and build every node that is not installed yet
pub fn cmd_install(session: &Session, spec: &str, options: InstallOptions) -> Result<()> {
    let graph = concretize(session, spec, options.fresh)?;
    let plan = schedule(graph, &session.state)?;
    print!("{}", plan);

    if options.dry_run {
        println!("Dry run, nothing built");
        return Ok(());
    }
    if plan.pending().is_empty() {
        println!("Everything is already installed");
        return Ok(());
    }

    let mut config = session.config.kitchen_config();
    config.fail_fast |= options.fail_fast;
    if let Some(retries) = options.retries {
        config.retries = retries;
    }
    let max_parallel = options.jobs.unwrap_or(session.config.build.max_parallel);

    let interrupted = cancel_on_interrupt()?;
    let kitchen = Kitchen::new(config, &session.registry, &session.state)
        .with_progress(Arc::new(CliProgress::new()))
        .with_cancel(Arc::clone(&interrupted));
    let report = kitchen.execute(&plan, max_parallel)?;

    println!();
    println!("{}", report);
    if interrupted.load(Ordering::SeqCst) {
        bail!("interrupted, {} package(s) not built", report.skipped());
    }
    if !report.success() {
        bail!(
            "{} package(s) failed, {} skipped",
            report.failed(),
            report.skipped()
        );
    }
    Ok(())
}
