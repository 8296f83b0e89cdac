// src/commands/mod.rs
//! Command handlers for the cookbook CLI

mod install;
pub mod progress;
mod query;

pub use install::{InstallOptions, cmd_install};
pub use query::{cmd_spec, cmd_status, cmd_versions};

use anyhow::{Context, Result};
use cookbook::config::Config;
use cookbook::recipe::Registry;
use cookbook::state::InstallState;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Configuration, recipes and install state shared by every command
pub struct Session {
    pub config: Config,
    pub registry: Registry,
    pub state: InstallState,
}

impl Session {
    /// Load configuration and open the recipe registry and install state
    ///
    /// `extra_repos` are searched before the configured repositories.
    pub fn open(config_path: Option<&Path>, extra_repos: &[PathBuf]) -> Result<Self> {
        let mut config = Config::discover(config_path).context("Failed to load configuration")?;
        if !extra_repos.is_empty() {
            let mut repos = extra_repos.to_vec();
            repos.append(&mut config.paths.repos);
            config.paths.repos = repos;
        }
        debug!("Recipe repositories: {:?}", config.paths.repos);

        let registry = Registry::new(config.paths.repos.clone());
        let state = InstallState::open(&config.paths.state_db).with_context(|| {
            format!(
                "Failed to open install state at {}",
                config.paths.state_db.display()
            )
        })?;

        Ok(Self {
            config,
            registry,
            state,
        })
    }
}
