// src/progress.rs

//! Build progress reporting
//!
//! The kitchen reports node starts and terminal outcomes through the
//! `BuildProgress` trait. Implementations include:
//! - `LogProgress`: Logs progress to tracing
//! - `SilentProgress`: No-op for scripted/quiet modes
//!
//! The binary adds an indicatif progress bar on top of the same trait.

use crate::kitchen::NodeOutcome;
use crate::spec::ConcreteSpec;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{info, warn};

/// Receives build events
///
/// Implementations must be thread-safe; events arrive from the dispatcher
/// and worker threads.
pub trait BuildProgress: Send + Sync {
    /// A run is starting with `total` nodes to build
    fn start(&self, total: u64);

    /// A node was handed to a worker
    fn cooking(&self, spec: &ConcreteSpec);

    /// A node reached a terminal state
    fn finished(&self, spec: &ConcreteSpec, outcome: &NodeOutcome);

    /// The run is over
    fn done(&self, success: bool);
}

/// Silent progress (counts only)
#[derive(Debug, Default)]
pub struct SilentProgress {
    total: AtomicU64,
    finished: AtomicU64,
    done: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes that reached a terminal state so far
    pub fn finished_count(&self) -> u64 {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }
}

impl BuildProgress for SilentProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    fn cooking(&self, _spec: &ConcreteSpec) {}

    fn finished(&self, _spec: &ConcreteSpec, _outcome: &NodeOutcome) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }

    fn done(&self, _success: bool) {
        self.done.store(true, Ordering::Relaxed);
    }
}

/// Logging progress
///
/// One tracing line per event, prefixed with `[finished/total]`.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: AtomicU64,
    finished: AtomicU64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BuildProgress for LogProgress {
    fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        info!("Cooking {} packages", total);
    }

    fn cooking(&self, spec: &ConcreteSpec) {
        info!("Cooking {}", spec.format_short());
    }

    fn finished(&self, spec: &ConcreteSpec, outcome: &NodeOutcome) {
        let n = self.finished.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.total.load(Ordering::Relaxed);
        if outcome.is_success() {
            info!("[{}/{}] {} {}", n, total, outcome.label(), spec.name);
        } else {
            warn!("[{}/{}] {} {}", n, total, outcome.label(), spec.name);
        }
    }

    fn done(&self, success: bool) {
        if success {
            info!("All packages cooked");
        } else {
            warn!("Some packages were not cooked");
        }
    }
}
