// src/commands/progress.rs
//! Terminal progress for builds
//!
//! An overall bar on top with one spinner line per running build below.

use cookbook::kitchen::NodeOutcome;
use cookbook::progress::BuildProgress;
use cookbook::spec::ConcreteSpec;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub struct CliProgress {
    multi: MultiProgress,
    overall: ProgressBar,
    running: Mutex<HashMap<String, ProgressBar>>,
}

impl CliProgress {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let overall = ProgressBar::new(0);
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        overall.set_message("Cooking");
        let overall = multi.add(overall);

        Self {
            multi,
            overall,
            running: Mutex::new(HashMap::new()),
        }
    }
}

impl BuildProgress for CliProgress {
    fn start(&self, total: u64) {
        self.overall.set_length(total);
    }

    fn cooking(&self, spec: &ConcreteSpec) {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("  {spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("{}@{}", spec.name, spec.version));
        spinner.enable_steady_tick(Duration::from_millis(100));
        let spinner = self.multi.add(spinner);
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(spec.name.clone(), spinner);
    }

    fn finished(&self, spec: &ConcreteSpec, outcome: &NodeOutcome) {
        let spinner = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&spec.name);
        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
            self.multi.remove(&spinner);
        }
        if !outcome.is_success() {
            self.multi
                .println(format!("  {} {}", outcome.label(), spec.name))
                .ok();
        }
        self.overall.inc(1);
    }

    fn done(&self, success: bool) {
        if success {
            self.overall.finish_with_message("Cooked");
        } else {
            self.overall.abandon_with_message("Cooked with failures");
        }
    }
}
