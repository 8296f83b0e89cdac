// src/cli.rs
//! CLI definitions for cookbook
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cookbook")]
#[command(author = "Cookbook Contributors")]
#[command(version)]
#[command(about = "Concretize package specs and build them from recipes", long_about = None)]
pub struct Cli {
    /// Configuration file (default: $COOKBOOK_CONFIG, ./cookbook.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra recipe repository, searched before the configured ones
    #[arg(long = "repo", global = true)]
    pub repos: Vec<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Concretize a spec and print the resulting graph
    Spec {
        /// Abstract spec, e.g. "ipopt+coinhsl ^mumps@5.1.1"
        spec: String,

        /// Print the graph as JSON
        #[arg(long)]
        json: bool,

        /// Ignore installed versions when choosing versions
        #[arg(long)]
        fresh: bool,
    },

    /// List the known versions of a package
    Versions {
        /// Package name
        name: String,
    },

    /// Concretize a spec and build everything not yet installed
    Install {
        /// Abstract spec
        spec: String,

        /// Concurrent builds (default: config, 0 = auto)
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Stop dispatching after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Print the build plan without building
        #[arg(long)]
        dry_run: bool,

        /// Extra attempts for a failed build
        #[arg(long)]
        retries: Option<u32>,

        /// Ignore installed versions when choosing versions
        #[arg(long)]
        fresh: bool,
    },

    /// Show install records
    Status {
        /// Only records for this package
        name: Option<String>,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
}
