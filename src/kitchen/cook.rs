// src/kitchen/cook.rs

//! Cook: building a single concrete node

use super::Kitchen;
use super::adapter::{BuildContext, StepCommands};
use super::args::{ArgContext, DepInfo};
use crate::error::{Error, Result};
use crate::hash;
use crate::recipe::{BuildSystemKind, PackageRecipe};
use crate::spec::{ConcreteGraph, ConcreteSpec, NodeId};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// One node's build
pub struct Cook<'a> {
    kitchen: &'a Kitchen<'a>,
    spec: &'a ConcreteSpec,
    recipe: Arc<PackageRecipe>,
    prefix: PathBuf,
    deps: BTreeMap<String, DepInfo>,
    jobs: usize,
}

impl<'a> Cook<'a> {
    /// Prepare a cook for `id`; `dep_prefixes` maps each direct dependency
    /// to the prefix it is installed at
    pub(super) fn new(
        kitchen: &'a Kitchen<'a>,
        graph: &'a ConcreteGraph,
        id: NodeId,
        dep_prefixes: &BTreeMap<String, PathBuf>,
    ) -> Result<Self> {
        let spec = graph.node(id);
        let recipe = kitchen.registry.load(&spec.name)?;

        let mut deps = BTreeMap::new();
        for (name, link) in &spec.dependencies {
            let prefix = dep_prefixes.get(name).ok_or_else(|| {
                Error::NotFound(format!("prefix of {} needed by {}", name, spec.name))
            })?;
            let libraries = kitchen.registry.load(name)?.libraries.clone();
            deps.insert(
                name.clone(),
                DepInfo {
                    version: graph.node(link.node).version.clone(),
                    prefix: prefix.clone(),
                    libraries,
                },
            );
        }

        Ok(Self {
            kitchen,
            spec,
            recipe,
            prefix: kitchen.prefix_for(spec),
            deps,
            jobs: kitchen.jobs_for(spec),
        })
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// `<build_root>/<name>-<version>-<hash>`, holding `build.log`
    ///
    /// Recreated for every attempt. Custom builds work on a copy of the
    /// sources under `src/` in here.
    pub fn stage_dir(&self) -> PathBuf {
        self.kitchen.config.build_root.join(format!(
            "{}-{}-{}",
            self.spec.name,
            self.spec.version,
            hash::short(&self.spec.hash)
        ))
    }

    pub fn source_dir(&self) -> PathBuf {
        self.kitchen
            .config
            .source_root
            .join(format!("{}-{}", self.spec.name, self.spec.version))
    }

    /// One attempt: configure, build, install
    pub(super) fn run(&self) -> Result<()> {
        let stage = self.stage_dir();
        if stage.exists() {
            fs::remove_dir_all(&stage)?;
        }
        fs::create_dir_all(&stage)?;
        fs::create_dir_all(&self.prefix)?;
        let build_tree = tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(&stage)
            .map_err(|e| Error::IoError(format!("failed to create build directory: {}", e)))?;

        let arg_ctx = ArgContext {
            spec: self.spec,
            recipe: &self.recipe,
            prefix: &self.prefix,
            jobs: self.jobs,
            deps: &self.deps,
        };
        let mut args = arg_ctx.resolve()?;
        if let Some(hook) = self.kitchen.registry.hook(&self.spec.name) {
            args.extend(hook.args(&arg_ctx)?);
        }
        debug!("{} configure args: {:?}", self.spec.name, args);

        let build = &self.recipe.build;
        let substitute = |cmd: &Option<String>| -> Result<Option<String>> {
            cmd.as_deref().map(|c| arg_ctx.substitute(c)).transpose()
        };
        let commands = StepCommands {
            configure: substitute(&build.configure)?,
            build: substitute(&build.build)?,
            install: substitute(&build.install)?,
        };

        let mut source_dir = self.source_dir();
        if self.spec.build_system == BuildSystemKind::Custom && source_dir.is_dir() {
            let copy = stage.join("src");
            copy_tree(&source_dir, &copy)?;
            source_dir = copy;
        }

        let ctx = BuildContext {
            spec: self.spec,
            recipe: &self.recipe,
            source_dir,
            build_dir: build_tree.path().to_path_buf(),
            prefix: self.prefix.clone(),
            jobs: self.jobs,
            env: self.environment(&arg_ctx)?,
            timeout: self.kitchen.config.step_timeout,
            log_path: stage.join("build.log"),
            commands,
        };

        let adapter = self.kitchen.adapter(self.spec.build_system)?;
        adapter.configure(&ctx, &args)?;
        adapter.build(&ctx)?;
        adapter.install(&ctx)?;
        info!("Cooked {} into {}", self.spec.name, self.prefix.display());
        Ok(())
    }

    /// Recipe environment plus search paths for the dependencies
    fn environment(&self, arg_ctx: &ArgContext<'_>) -> Result<BTreeMap<String, String>> {
        let mut env_vars = BTreeMap::new();

        let prefixes: Vec<&Path> = self.deps.values().map(|d| d.prefix.as_path()).collect();
        if !prefixes.is_empty() {
            env_vars.insert("CMAKE_PREFIX_PATH".to_string(), join_paths(prefixes.iter().copied())?);
            env_vars.insert(
                "PKG_CONFIG_PATH".to_string(),
                join_paths(self.deps.values().map(|d| d.lib_dir().join("pkgconfig")))?,
            );
            let mut path: Vec<PathBuf> = self.deps.values().map(|d| d.bin_dir()).collect();
            if let Some(existing) = env::var_os("PATH") {
                path.extend(env::split_paths(&existing));
            }
            env_vars.insert("PATH".to_string(), join_paths(path)?);
        }

        for (key, value) in &self.recipe.build.environment {
            env_vars.insert(key.clone(), arg_ctx.substitute(value)?);
        }
        Ok(env_vars)
    }

    /// Remove whatever a failed attempt left in the prefix
    pub(super) fn rollback(&self) {
        if self.prefix.exists() {
            debug!("Rolling back {}", self.prefix.display());
            if let Err(e) = fs::remove_dir_all(&self.prefix) {
                warn!("Failed to remove {}: {}", self.prefix.display(), e);
            }
        }
    }
}

/// Copy the tree at `from` to `to`, keeping symlinks as links
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry
            .map_err(|e| Error::IoError(format!("failed to read {}: {}", from.display(), e)))?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::IoError(e.to_string()))?;
        let target = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn join_paths<I, P>(paths: I) -> Result<String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let joined: OsString = env::join_paths(paths.into_iter().map(|p| p.as_ref().to_path_buf()))
        .map_err(|e| Error::IoError(format!("invalid search path: {}", e)))?;
    Ok(joined.to_string_lossy().into_owned())
}
