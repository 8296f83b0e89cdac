// src/kitchen/mod.rs

//! Kitchen: executes a build plan
//!
//! The Kitchen walks a [`BuildPlan`] and cooks every pending node once all
//! of its dependencies are installed. It handles:
//! - Dispatching ready nodes to a pool of scoped worker threads
//! - Exclusive scheduling for packages that cannot build in parallel
//! - Retries with rollback of the partial prefix
//! - Skipping everything downstream of a failure
//! - Recording each node in the install state
//!
//! One dispatcher (the calling thread) owns the [`ReadyQueue`]; workers
//! pull jobs from a shared channel and report back on another, so no node
//! is ever handed out twice.

mod adapter;
mod args;
mod cook;
mod interrupt;
mod lock;
mod report;

pub use adapter::{
    Autotools, BuildContext, BuildSystem, CMake, Custom, LOG_EXCERPT_LINES, StepCommands,
    default_adapters, log_tail,
};
pub use args::{ArgContext, ArgsHook, DepInfo};
pub use cook::Cook;
pub use interrupt::cancel_on_interrupt;
pub use lock::{InstallLock, LOCK_FILE};
pub use report::{BuildReport, NodeOutcome, ReportEntry, SkipReason};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash;
use crate::progress::{BuildProgress, SilentProgress};
use crate::recipe::{BuildSystemKind, Registry};
use crate::scheduler::{BuildPlan, ReadyQueue};
use crate::spec::{ConcreteGraph, ConcreteSpec, NodeId};
use crate::state::InstallState;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often the dispatcher checks the cancel flag while builds run
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Executor settings
#[derive(Debug, Clone)]
pub struct KitchenConfig {
    /// Prefixes are created under here
    pub install_root: PathBuf,
    /// Staging directories and build logs
    pub build_root: PathBuf,
    /// Unpacked sources as `<name>-<version>` directories
    pub source_root: PathBuf,
    /// Jobs per parallel build (0 = available parallelism)
    pub jobs: usize,
    /// Extra attempts after a failed build
    pub retries: u32,
    /// Stop dispatching after the first failure
    pub fail_fast: bool,
    pub step_timeout: Option<Duration>,
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Config::default().kitchen_config()
    }
}

/// A job handed to a worker
struct Job {
    id: NodeId,
    /// Prefix of every direct dependency
    deps: BTreeMap<String, PathBuf>,
}

/// A worker's report
struct Finished {
    id: NodeId,
    attempts: u32,
    result: Result<PathBuf>,
}

/// The Kitchen: where build plans are cooked
pub struct Kitchen<'a> {
    config: KitchenConfig,
    registry: &'a Registry,
    state: &'a InstallState,
    adapters: BTreeMap<BuildSystemKind, Arc<dyn BuildSystem>>,
    progress: Arc<dyn BuildProgress>,
    cancel: Arc<AtomicBool>,
}

impl<'a> Kitchen<'a> {
    pub fn new(config: KitchenConfig, registry: &'a Registry, state: &'a InstallState) -> Self {
        Self {
            config,
            registry,
            state,
            adapters: default_adapters(),
            progress: Arc::new(SilentProgress::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the adapter used for one build-system kind
    pub fn with_adapter(mut self, kind: BuildSystemKind, adapter: Arc<dyn BuildSystem>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn BuildProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &KitchenConfig {
        &self.config
    }

    /// Share an externally owned cancel flag, such as the one set on SIGINT
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag that stops dispatching when set; running builds finish
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// `<install_root>/<name>-<version>-<hash>`
    pub fn prefix_for(&self, spec: &ConcreteSpec) -> PathBuf {
        self.config.install_root.join(format!(
            "{}-{}-{}",
            spec.name,
            spec.version,
            hash::short(&spec.hash)
        ))
    }

    /// Jobs passed to the build of `spec`
    pub fn jobs_for(&self, spec: &ConcreteSpec) -> usize {
        if !spec.parallel {
            1
        } else if self.config.jobs == 0 {
            available_parallelism()
        } else {
            self.config.jobs
        }
    }

    fn adapter(&self, kind: BuildSystemKind) -> Result<Arc<dyn BuildSystem>> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::ConfigError(format!("no adapter for build system {}", kind)))
    }

    /// Build every pending node of `plan`, at most `max_parallel` at a time
    /// (0 = available parallelism)
    ///
    /// Only setup problems, or a cancel that came before anything started,
    /// are returned as errors. Node failures are
    /// contained and reported in the [`BuildReport`].
    pub fn execute(&self, plan: &BuildPlan, max_parallel: usize) -> Result<BuildReport> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let started = Instant::now();
        let _lock = InstallLock::try_acquire(&self.config.install_root)?;

        for record in self.state.recover_interrupted()? {
            warn!(
                "Rolled back interrupted build of {}@{} at {}",
                record.name,
                record.version,
                record.prefix.display()
            );
        }

        let graph = plan.graph();
        let pending = plan.pending();
        let workers = match max_parallel {
            0 => available_parallelism(),
            n => n,
        };
        info!(
            "Cooking {} packages with up to {} workers",
            pending.len(),
            workers
        );
        self.progress.start(pending.len() as u64);

        let mut outcomes: Vec<Option<NodeOutcome>> = vec![None; graph.len()];
        for (id, prefix) in plan.satisfied() {
            outcomes[id] = Some(NodeOutcome::Reused {
                prefix: prefix.to_path_buf(),
            });
        }

        let mut queue = plan.ready_queue();
        let (job_tx, job_rx) = mpsc::channel::<Job>();
        let job_rx = Mutex::new(job_rx);
        let (done_tx, done_rx) = mpsc::channel::<Finished>();

        thread::scope(|scope| {
            for _ in 0..workers.min(pending.len()) {
                let job_rx = &job_rx;
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    loop {
                        let next = job_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
                        let Ok(job) = next else { break };
                        if done_tx.send(self.cook_node(graph, job)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut dispatcher = Dispatcher {
                kitchen: self,
                plan,
                queue: &mut queue,
                outcomes: &mut outcomes,
                built: HashMap::new(),
                workers,
            };
            dispatcher.run(&job_tx, &done_rx);
            drop(job_tx);
        });

        let entries = plan
            .order()
            .iter()
            .map(|&id| {
                let spec = graph.node(id);
                ReportEntry {
                    node: id,
                    name: spec.name.clone(),
                    spec: spec.format_short(),
                    hash: spec.hash.clone(),
                    outcome: outcomes[id].take().unwrap_or_else(|| NodeOutcome::Failed {
                        error: "build worker exited unexpectedly".to_string(),
                        exit_code: None,
                        log_excerpt: None,
                        attempts: 0,
                    }),
                }
            })
            .collect();

        let report = BuildReport {
            entries,
            duration: started.elapsed(),
        };
        self.progress.done(report.success());
        info!(
            "Finished: {} installed, {} reused, {} failed, {} skipped",
            report.installed(),
            report.reused(),
            report.failed(),
            report.skipped()
        );
        Ok(report)
    }

    /// Build one node, retrying up to the configured count
    ///
    /// Every failure, including one before the first attempt, leaves a
    /// `failed` record for the node's hash.
    fn cook_node(&self, graph: &ConcreteGraph, job: Job) -> Finished {
        let spec = graph.node(job.id);
        let (attempts, result) = match Cook::new(self, graph, job.id, &job.deps) {
            Ok(cook) => self.cook_with_retries(spec, &cook),
            Err(e) => (0, Err(e)),
        };
        if let Err(err) = &result {
            warn!("Build of {} failed: {}", spec.name, err);
            let prefix = self.prefix_for(spec);
            if let Err(db) = self.state.mark_failed(spec, &prefix, &err.to_string()) {
                warn!("Failed to record failure of {}: {}", spec.name, db);
            }
        }
        Finished {
            id: job.id,
            attempts,
            result,
        }
    }

    fn cook_with_retries(&self, spec: &ConcreteSpec, cook: &Cook<'_>) -> (u32, Result<PathBuf>) {
        let prefix = cook.prefix().to_path_buf();
        if let Err(e) = self.state.mark_in_progress(spec, &prefix) {
            return (0, Err(e));
        }

        let max_attempts = self.config.retries + 1;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let err = match cook
                .run()
                .and_then(|()| self.state.mark_installed(spec, &prefix))
            {
                Ok(()) => return (attempts, Ok(prefix)),
                Err(e) => e,
            };

            cook.rollback();
            let retryable = !matches!(err, Error::ToolNotFound(_)) && !self.is_cancelled();
            if !retryable || attempts >= max_attempts {
                return (attempts, Err(err));
            }
            warn!(
                "Build of {} failed (attempt {}/{}), retrying: {}",
                spec.name, attempts, max_attempts, err
            );
        }
    }
}

/// Dispatcher-side state for one `execute` call
struct Dispatcher<'k, 'p> {
    kitchen: &'k Kitchen<'k>,
    plan: &'p BuildPlan,
    queue: &'p mut ReadyQueue,
    outcomes: &'p mut Vec<Option<NodeOutcome>>,
    /// Prefixes built in this run
    built: HashMap<NodeId, PathBuf>,
    workers: usize,
}

impl Dispatcher<'_, '_> {
    fn run(&mut self, jobs: &Sender<Job>, done: &Receiver<Finished>) {
        let plan = self.plan;
        let graph = plan.graph();
        let mut in_flight = 0usize;
        let mut exclusive = false;
        let mut stopped = false;

        loop {
            if !stopped && self.kitchen.is_cancelled() {
                info!("Cancelled; waiting for {} running builds", in_flight);
                stopped = true;
                let skipped = self.queue.skip_remaining();
                self.skip(skipped, SkipReason::Cancelled);
            }

            // A serial node waits at the head of the queue until nothing is
            // running, and blocks further dispatch while it runs
            while !stopped && !exclusive && in_flight < self.workers {
                let Some(id) = self.queue.peek_ready() else {
                    break;
                };
                let serial = !graph.node(id).parallel;
                if serial && in_flight > 0 {
                    break;
                }
                self.queue.take_ready();
                let job = Job {
                    id,
                    deps: self.dep_prefixes(id),
                };
                debug!("Dispatching {}", graph.node(id).name);
                self.kitchen.progress.cooking(graph.node(id));
                if jobs.send(job).is_err() {
                    warn!("Build workers are gone");
                    stopped = true;
                    break;
                }
                in_flight += 1;
                exclusive = serial;
            }

            if in_flight == 0 {
                if !self.queue.is_finished() {
                    let skipped = self.queue.skip_remaining();
                    self.skip(skipped, SkipReason::Cancelled);
                }
                break;
            }

            let finished = match done.recv_timeout(CANCEL_POLL) {
                Ok(finished) => finished,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            in_flight -= 1;
            if !graph.node(finished.id).parallel {
                exclusive = false;
            }
            self.finish(finished, &mut stopped);
        }
    }

    fn finish(&mut self, finished: Finished, stopped: &mut bool) {
        let plan = self.plan;
        let graph = plan.graph();
        let spec = graph.node(finished.id);
        let outcome = match finished.result {
            Ok(prefix) => {
                self.queue.complete(finished.id);
                self.built.insert(finished.id, prefix.clone());
                NodeOutcome::Installed {
                    prefix,
                    attempts: finished.attempts,
                }
            }
            Err(err) => {
                let skipped = self.queue.fail(finished.id);
                let outcome = failed_outcome(&err, finished.attempts);
                self.kitchen.progress.finished(spec, &outcome);
                self.outcomes[finished.id] = Some(outcome);
                self.skip(skipped, SkipReason::DependencyFailed(spec.name.clone()));
                if self.kitchen.config.fail_fast && !*stopped {
                    info!("Fail-fast: not starting any more builds");
                    *stopped = true;
                    let rest = self.queue.skip_remaining();
                    self.skip(rest, SkipReason::FailFast);
                }
                return;
            }
        };
        self.kitchen.progress.finished(spec, &outcome);
        self.outcomes[finished.id] = Some(outcome);
    }

    fn skip(&mut self, ids: Vec<NodeId>, reason: SkipReason) {
        let plan = self.plan;
        for id in ids {
            let spec = plan.graph().node(id);
            debug!("Skipping {} ({})", spec.name, reason);
            let outcome = NodeOutcome::Skipped {
                reason: reason.clone(),
            };
            self.kitchen.progress.finished(spec, &outcome);
            self.outcomes[id] = Some(outcome);
        }
    }

    fn dep_prefixes(&self, id: NodeId) -> BTreeMap<String, PathBuf> {
        self.plan
            .graph()
            .node(id)
            .dependencies
            .iter()
            .filter_map(|(name, link)| {
                let prefix = self
                    .plan
                    .satisfied_prefix(link.node)
                    .map(|p| p.to_path_buf())
                    .or_else(|| self.built.get(&link.node).cloned())?;
                Some((name.clone(), prefix))
            })
            .collect()
    }
}

fn failed_outcome(err: &Error, attempts: u32) -> NodeOutcome {
    match err {
        Error::BuildFailure {
            exit_code,
            log_excerpt,
            ..
        } => {
            let (error, tail) = match log_excerpt.split_once('\n') {
                Some((first, rest)) => (first.to_string(), Some(rest.to_string())),
                None => (log_excerpt.clone(), None),
            };
            NodeOutcome::Failed {
                error,
                exit_code: *exit_code,
                log_excerpt: tail,
                attempts,
            }
        }
        other => NodeOutcome::Failed {
            error: other.to_string(),
            exit_code: None,
            log_excerpt: None,
            attempts,
        },
    }
}

fn available_parallelism() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}
