// src/config.rs
//! Configuration file parsing
//!
//! `cookbook.toml` has three sections, every field optional:
//! - [paths] - Recipe repositories, install root, state database, build and source roots
//! - [concretizer] - Default platform, compilers, reuse, backtrack bound
//! - [build] - Jobs per build, retries, fail-fast, step timeout

use crate::error::{Error, Result};
use crate::kitchen::KitchenConfig;
use crate::resolver::{ConcretizerOptions, DEFAULT_MAX_BACKTRACKS};
use crate::spec::Compiler;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "COOKBOOK_CONFIG";

/// Configuration file name looked up in the working and user config directories
pub const CONFIG_FILE: &str = "cookbook.toml";

/// Host platform as `<os>-<arch>`, e.g. `linux-x86_64`
pub fn host_platform() -> String {
    format!("{}-{}", env::consts::OS, env::consts::ARCH)
}

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsSection,

    #[serde(default)]
    pub concretizer: ConcretizerSection,

    #[serde(default)]
    pub build: BuildSection,
}

/// Filesystem layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Recipe repositories, earlier entries shadow later ones
    #[serde(default = "default_repos")]
    pub repos: Vec<PathBuf>,

    /// Where prefixes are installed
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    /// Install state database
    #[serde(default = "default_state_db")]
    pub state_db: PathBuf,

    /// Per-build staging directories and logs
    #[serde(default = "default_build_root")]
    pub build_root: PathBuf,

    /// Unpacked sources, one `<name>-<version>` directory each
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            repos: default_repos(),
            install_root: default_install_root(),
            state_db: default_state_db(),
            build_root: default_build_root(),
            source_root: default_source_root(),
        }
    }
}

/// Concretizer defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcretizerSection {
    /// Platform for nodes that do not pin one (defaults to the host)
    #[serde(default)]
    pub platform: Option<String>,

    /// Available compilers as `name@version`, preferred first
    ///
    /// Empty means detect gcc and clang on PATH.
    #[serde(default)]
    pub compilers: Vec<String>,

    /// Prefer already-installed versions
    #[serde(default = "default_true")]
    pub reuse: bool,

    #[serde(default = "default_max_backtracks")]
    pub max_backtracks: usize,
}

impl Default for ConcretizerSection {
    fn default() -> Self {
        Self {
            platform: None,
            compilers: Vec::new(),
            reuse: true,
            max_backtracks: DEFAULT_MAX_BACKTRACKS,
        }
    }
}

/// Build executor defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Concurrent builds (0 = auto)
    #[serde(default)]
    pub max_parallel: usize,

    /// Jobs passed to each parallel build (0 = auto)
    #[serde(default)]
    pub jobs: usize,

    /// Extra attempts for a failed node
    #[serde(default)]
    pub retries: u32,

    /// Stop dispatching after the first failure
    #[serde(default)]
    pub fail_fast: bool,

    /// Per-step timeout in seconds (0 = none)
    #[serde(default)]
    pub step_timeout: u64,
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cookbook")
}

fn default_repos() -> Vec<PathBuf> {
    vec![PathBuf::from("recipes")]
}

fn default_install_root() -> PathBuf {
    data_dir().join("opt")
}

fn default_state_db() -> PathBuf {
    data_dir().join("state.db")
}

fn default_build_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("cookbook")
        .join("stage")
}

fn default_source_root() -> PathBuf {
    data_dir().join("sources")
}

fn default_true() -> bool {
    true
}

fn default_max_backtracks() -> usize {
    DEFAULT_MAX_BACKTRACKS
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content).map_err(|e| {
            Error::ConfigError(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Find the configuration file to use
    ///
    /// Order: explicit path, `COOKBOOK_CONFIG`, `./cookbook.toml`, then the
    /// user config directory. Only the explicit and environment paths are
    /// returned without checking that they exist.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Some(path) = env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let local = PathBuf::from(CONFIG_FILE);
        if local.is_file() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("cookbook").join(CONFIG_FILE))
            .filter(|p| p.is_file())
    }

    /// Load the located configuration, or defaults if there is none
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        match Self::locate(explicit) {
            Some(path) => {
                debug!("Using configuration {}", path.display());
                Self::load(&path)
            }
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.paths.repos.is_empty() {
            return Err(Error::ConfigError(
                "paths.repos must name at least one recipe repository".to_string(),
            ));
        }
        for compiler in &self.concretizer.compilers {
            Compiler::parse(compiler).map_err(|e| {
                Error::ConfigError(format!("invalid compiler '{}': {}", compiler, e))
            })?;
        }
        if self.concretizer.max_backtracks == 0 {
            return Err(Error::ConfigError(
                "concretizer.max_backtracks must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn platform(&self) -> String {
        self.concretizer
            .platform
            .clone()
            .unwrap_or_else(host_platform)
    }

    /// Configured compilers, or those detected on PATH when none are configured
    pub fn compilers(&self) -> Result<Vec<Compiler>> {
        if !self.concretizer.compilers.is_empty() {
            return self
                .concretizer
                .compilers
                .iter()
                .map(|c| Compiler::parse(c))
                .collect();
        }
        let detected = detect_compilers();
        if detected.is_empty() {
            warn!("No compilers configured and none found on PATH");
        }
        Ok(detected)
    }

    pub fn concretizer_options(&self) -> Result<ConcretizerOptions> {
        Ok(ConcretizerOptions {
            platform: self.platform(),
            compilers: self.compilers()?,
            reuse: self.concretizer.reuse,
            max_backtracks: self.concretizer.max_backtracks,
        })
    }

    pub fn kitchen_config(&self) -> KitchenConfig {
        KitchenConfig {
            install_root: self.paths.install_root.clone(),
            build_root: self.paths.build_root.clone(),
            source_root: self.paths.source_root.clone(),
            jobs: self.build.jobs,
            retries: self.build.retries,
            fail_fast: self.build.fail_fast,
            step_timeout: (self.build.step_timeout > 0)
                .then(|| Duration::from_secs(self.build.step_timeout)),
        }
    }
}

/// Compilers found on PATH, gcc before clang
pub fn detect_compilers() -> Vec<Compiler> {
    ["gcc", "clang"]
        .iter()
        .filter_map(|name| {
            let path = which::which(name).ok()?;
            let output = Command::new(&path).arg("-dumpversion").output().ok()?;
            if !output.status.success() {
                return None;
            }
            let text = String::from_utf8_lossy(&output.stdout);
            let version = Version::parse(text.trim()).ok()?;
            debug!("Detected compiler {}@{} at {}", name, version, path.display());
            Some(Compiler {
                name: name.to_string(),
                version,
            })
        })
        .collect()
}
