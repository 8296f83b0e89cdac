// src/kitchen/adapter.rs

//! Build-system adapters
//!
//! Each [`BuildSystemKind`] maps to a [`BuildSystem`] that knows how to
//! configure, build and install a package. Steps run as subprocesses with
//! their output appended to the node's `build.log`.

use crate::error::{Error, Result};
use crate::recipe::{BuildSystemKind, PackageRecipe};
use crate::spec::ConcreteSpec;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use wait_timeout::ChildExt;

/// Lines of build output carried in a failure
pub const LOG_EXCERPT_LINES: usize = 20;

/// Custom build-system commands, placeholders already substituted
#[derive(Debug, Clone, Default)]
pub struct StepCommands {
    pub configure: Option<String>,
    pub build: Option<String>,
    pub install: Option<String>,
}

/// Everything an adapter needs to build one node
#[derive(Debug)]
pub struct BuildContext<'a> {
    pub spec: &'a ConcreteSpec,
    pub recipe: &'a PackageRecipe,
    /// Unpacked sources
    pub source_dir: PathBuf,
    /// Scratch tree for out-of-source builds
    pub build_dir: PathBuf,
    pub prefix: PathBuf,
    pub jobs: usize,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub log_path: PathBuf,
    pub commands: StepCommands,
}

impl BuildContext<'_> {
    /// Directory the autotools and custom steps run in
    pub fn work_dir(&self) -> PathBuf {
        match &self.recipe.build.build_directory {
            Some(dir) => self.build_dir.join(dir),
            None => self.build_dir.clone(),
        }
    }

    fn failure(&self, exit_code: Option<i32>, message: impl Into<String>) -> Error {
        let mut log_excerpt = message.into();
        let tail = log_tail(&self.log_path, LOG_EXCERPT_LINES);
        if !tail.is_empty() {
            log_excerpt.push('\n');
            log_excerpt.push_str(&tail);
        }
        Error::BuildFailure {
            node: self.spec.name.clone(),
            exit_code,
            log_excerpt,
        }
    }

    fn require_source(&self) -> Result<()> {
        if self.source_dir.is_dir() {
            Ok(())
        } else {
            Err(self.failure(
                None,
                format!("source directory {} not found", self.source_dir.display()),
            ))
        }
    }

    /// Run one build step, appending its output to the build log
    pub fn run(&self, step: &str, program: &Path, args: &[String], cwd: &Path) -> Result<()> {
        fs::create_dir_all(cwd)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| {
                Error::IoError(format!("failed to open {}: {}", self.log_path.display(), e))
            })?;
        writeln!(log, "==> {}: {} {}", step, program.display(), args.join(" "))?;
        debug!("[{}] {} {}", self.spec.name, program.display(), args.join(" "));

        let stdout = log.try_clone()?;
        let stderr = log.try_clone()?;
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .spawn()
            .map_err(|e| self.failure(None, format!("failed to spawn {} step: {}", step, e)))?;

        let status = match self.timeout {
            Some(timeout) => match child.wait_timeout(timeout)? {
                Some(status) => status,
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(self.failure(
                        None,
                        format!("{} step timed out after {} seconds", step, timeout.as_secs()),
                    ));
                }
            },
            None => child.wait()?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(self.failure(
                status.code(),
                format!("{} step failed with exit code {:?}", step, status.code()),
            ))
        }
    }
}

/// Last `lines` lines of a log file, empty if it cannot be read
pub fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(file) = File::open(path) else {
        return String::new();
    };
    let all: Vec<String> = BufReader::new(file).lines().map_while(|l| l.ok()).collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

fn tool(name: &str) -> Result<PathBuf> {
    which::which(name).map_err(|_| Error::ToolNotFound(name.to_string()))
}

/// A build system: the three steps of building a node
pub trait BuildSystem: Send + Sync {
    fn configure(&self, ctx: &BuildContext<'_>, args: &[String]) -> Result<()>;
    fn build(&self, ctx: &BuildContext<'_>) -> Result<()>;
    fn install(&self, ctx: &BuildContext<'_>) -> Result<()>;
}

/// `configure && make && make install`
#[derive(Debug, Default)]
pub struct Autotools;

impl BuildSystem for Autotools {
    fn configure(&self, ctx: &BuildContext<'_>, args: &[String]) -> Result<()> {
        ctx.require_source()?;
        let script = ctx.source_dir.join("configure");
        if !script.is_file() {
            return Err(ctx.failure(
                None,
                format!("no configure script in {}", ctx.source_dir.display()),
            ));
        }
        let mut full = vec![format!("--prefix={}", ctx.prefix.display())];
        full.extend(args.iter().cloned());
        info!("Configuring {}", ctx.spec.name);
        ctx.run("configure", &script, &full, &ctx.work_dir())
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<()> {
        let make = tool("make")?;
        ctx.run("build", &make, &[format!("-j{}", ctx.jobs)], &ctx.work_dir())
    }

    fn install(&self, ctx: &BuildContext<'_>) -> Result<()> {
        let make = tool("make")?;
        ctx.run("install", &make, &["install".to_string()], &ctx.work_dir())
    }
}

/// `cmake -S -B`, `cmake --build`, `cmake --install`
#[derive(Debug, Default)]
pub struct CMake;

impl CMake {
    fn binary_dir(ctx: &BuildContext<'_>) -> PathBuf {
        ctx.build_dir.join(
            ctx.recipe
                .build
                .build_directory
                .as_deref()
                .unwrap_or("build"),
        )
    }
}

impl BuildSystem for CMake {
    fn configure(&self, ctx: &BuildContext<'_>, args: &[String]) -> Result<()> {
        ctx.require_source()?;
        let cmake = tool("cmake")?;
        let binary_dir = Self::binary_dir(ctx);
        let mut full = vec![
            "-S".to_string(),
            ctx.source_dir.display().to_string(),
            "-B".to_string(),
            binary_dir.display().to_string(),
            format!("-DCMAKE_INSTALL_PREFIX={}", ctx.prefix.display()),
            "-DCMAKE_BUILD_TYPE=Release".to_string(),
        ];
        full.extend(args.iter().cloned());
        info!("Configuring {}", ctx.spec.name);
        ctx.run("configure", &cmake, &full, &ctx.build_dir)
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<()> {
        let cmake = tool("cmake")?;
        let args = vec![
            "--build".to_string(),
            Self::binary_dir(ctx).display().to_string(),
            "-j".to_string(),
            ctx.jobs.to_string(),
        ];
        ctx.run("build", &cmake, &args, &ctx.build_dir)
    }

    fn install(&self, ctx: &BuildContext<'_>) -> Result<()> {
        let cmake = tool("cmake")?;
        let args = vec![
            "--install".to_string(),
            Self::binary_dir(ctx).display().to_string(),
        ];
        ctx.run("install", &cmake, &args, &ctx.build_dir)
    }
}

/// Recipe-provided shell commands
///
/// The configure command receives the resolved arguments as `"$@"`. Steps
/// that are not given are skipped, except install.
#[derive(Debug, Default)]
pub struct Custom;

impl Custom {
    fn shell(ctx: &BuildContext<'_>, step: &str, command: &str, args: &[String]) -> Result<()> {
        let sh = tool("sh")?;
        let mut full = vec![
            "-c".to_string(),
            command.to_string(),
            format!("cookbook-{}", step),
        ];
        full.extend(args.iter().cloned());
        // Custom builds run in-source when there is a source tree
        let cwd = if ctx.source_dir.is_dir() {
            match &ctx.recipe.build.build_directory {
                Some(dir) => ctx.source_dir.join(dir),
                None => ctx.source_dir.clone(),
            }
        } else {
            ctx.work_dir()
        };
        ctx.run(step, &sh, &full, &cwd)
    }
}

impl BuildSystem for Custom {
    fn configure(&self, ctx: &BuildContext<'_>, args: &[String]) -> Result<()> {
        match &ctx.commands.configure {
            Some(command) => Self::shell(ctx, "configure", &format!("{} \"$@\"", command), args),
            None => Ok(()),
        }
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<()> {
        match &ctx.commands.build {
            Some(command) => Self::shell(ctx, "build", command, &[]),
            None => Ok(()),
        }
    }

    fn install(&self, ctx: &BuildContext<'_>) -> Result<()> {
        match &ctx.commands.install {
            Some(command) => Self::shell(ctx, "install", command, &[]),
            None => Err(ctx.failure(None, "custom build system has no install command")),
        }
    }
}

/// Adapters for every build-system kind
pub fn default_adapters() -> BTreeMap<BuildSystemKind, Arc<dyn BuildSystem>> {
    let mut adapters: BTreeMap<BuildSystemKind, Arc<dyn BuildSystem>> = BTreeMap::new();
    adapters.insert(BuildSystemKind::Autotools, Arc::new(Autotools));
    adapters.insert(BuildSystemKind::CMake, Arc::new(CMake));
    adapters.insert(BuildSystemKind::Custom, Arc::new(Custom));
    adapters
}
