// src/lib.rs

//! Cookbook: recipe concretizer and build orchestrator
//!
//! Turns an abstract package request such as `ipopt+coinhsl ^mumps@5.1.1`
//! into a fully pinned dependency graph, then builds that graph in
//! dependency order with as much parallelism as it allows.
//!
//! # Architecture
//!
//! - Recipes: declarative TOML package descriptions, loaded through a [`Registry`]
//! - Concretizer: backtracking search from abstract to concrete specs
//! - Scheduler: dependency-ordered [`BuildPlan`] with reuse of installed nodes
//! - Kitchen: parallel executor with per-node retries and failure isolation
//! - Install state: SQLite record of every prefix, keyed by content hash

pub mod config;
mod error;
pub mod hash;
pub mod kitchen;
pub mod progress;
pub mod recipe;
pub mod resolver;
pub mod scheduler;
pub mod spec;
pub mod state;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use kitchen::{BuildReport, Kitchen, KitchenConfig, NodeOutcome};
pub use recipe::{PackageRecipe, Registry};
pub use resolver::{Concretizer, ConcretizerOptions};
pub use scheduler::{BuildPlan, schedule};
pub use spec::{AbstractSpec, ConcreteGraph, ConcreteSpec};
pub use state::{InstallState, InstallStatus};
pub use version::{Version, VersionConstraint};
