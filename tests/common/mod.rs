// tests/common/mod.rs

//! Shared helpers for integration tests: in-memory recipe sets and a
//! build-system adapter that never shells out.

#![allow(dead_code)]

use cookbook::kitchen::{BuildContext, BuildSystem, KitchenConfig};
use cookbook::recipe::parse_recipe;
use cookbook::spec::Compiler;
use cookbook::{ConcretizerOptions, Error, PackageRecipe, Registry, Result};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

pub const CHECKSUM: &str = "35e5c663a25912e4bdc94f168e827ed2";

pub fn recipe(text: &str) -> PackageRecipe {
    PackageRecipe::try_from(parse_recipe(text).unwrap()).unwrap()
}

/// A plain recipe with the given versions and dependency specs
pub fn simple(name: &str, versions: &[&str], deps: &[&str]) -> PackageRecipe {
    let mut text = format!("[package]\nname = \"{}\"\n", name);
    for version in versions {
        text.push_str(&format!(
            "\n[[versions]]\nid = \"{}\"\nchecksum = \"{}\"\n",
            version, CHECKSUM
        ));
    }
    for dep in deps {
        text.push_str(&format!("\n[[dependencies]]\nspec = \"{}\"\n", dep));
    }
    recipe(&text)
}

/// Same as [`simple`] but built with `parallel = false`
pub fn serial(name: &str, deps: &[&str]) -> PackageRecipe {
    let mut text = format!(
        "[package]\nname = \"{}\"\nparallel = false\n\n[[versions]]\nid = \"1.0\"\nchecksum = \"{}\"\n",
        name, CHECKSUM
    );
    for dep in deps {
        text.push_str(&format!("\n[[dependencies]]\nspec = \"{}\"\n", dep));
    }
    recipe(&text)
}

pub fn registry(recipes: Vec<PackageRecipe>) -> Registry {
    Registry::from_recipes(recipes)
}

pub fn options() -> ConcretizerOptions {
    ConcretizerOptions {
        platform: "linux-x86_64".to_string(),
        compilers: vec![
            Compiler::parse("gcc@12.2.0").unwrap(),
            Compiler::parse("clang@16.0.0").unwrap(),
        ],
        reuse: true,
        max_backtracks: 1000,
    }
}

/// Install, build and source roots under one temporary directory
pub struct Roots {
    pub dir: TempDir,
}

impl Roots {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn install_root(&self) -> PathBuf {
        self.dir.path().join("opt")
    }

    pub fn kitchen_config(&self) -> KitchenConfig {
        KitchenConfig {
            install_root: self.install_root(),
            build_root: self.dir.path().join("stage"),
            source_root: self.dir.path().join("sources"),
            jobs: 2,
            retries: 0,
            fail_fast: false,
            step_timeout: None,
        }
    }
}

/// Adapter that "builds" by populating the prefix
///
/// Records completion order and peak concurrency, and can be told to fail
/// named packages.
#[derive(Default)]
pub struct MockBuild {
    /// Packages that always fail
    pub fail: HashSet<String>,
    /// Packages that fail this many times before succeeding
    pub flaky: Mutex<HashMap<String, u32>>,
    /// Sets this flag when the named package is built
    pub cancel_on: Option<(String, Arc<AtomicBool>)>,
    pub delay: Duration,
    pub order: Mutex<Vec<String>>,
    pub attempts: Mutex<HashMap<String, u32>>,
    /// Configure arguments of the last attempt per package
    pub args: Mutex<HashMap<String, Vec<String>>>,
    pub running: AtomicUsize,
    pub serial_running: AtomicBool,
    pub peak: AtomicUsize,
    pub serial_overlap: AtomicBool,
}

impl MockBuild {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(names: &[&str]) -> Self {
        Self {
            fail: names.iter().map(|n| n.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn built(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn args_of(&self, name: &str) -> Vec<String> {
        self.args.lock().unwrap().get(name).cloned().unwrap_or_default()
    }

    pub fn attempts_of(&self, name: &str) -> u32 {
        self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn should_fail(&self, name: &str) -> bool {
        if self.fail.contains(name) {
            return true;
        }
        let mut flaky = self.flaky.lock().unwrap();
        match flaky.get_mut(name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

impl BuildSystem for MockBuild {
    fn configure(&self, ctx: &BuildContext<'_>, args: &[String]) -> Result<()> {
        let name = ctx.spec.name.clone();
        self.args.lock().unwrap().insert(name.clone(), args.to_vec());
        *self.attempts.lock().unwrap().entry(name.clone()).or_insert(0) += 1;

        let serial = !ctx.spec.parallel;
        let before = self.running.fetch_add(1, Ordering::SeqCst);
        if (serial && before > 0) || self.serial_running.load(Ordering::SeqCst) {
            self.serial_overlap.store(true, Ordering::SeqCst);
        }
        if serial {
            self.serial_running.store(true, Ordering::SeqCst);
        }
        self.peak.fetch_max(before + 1, Ordering::SeqCst);

        thread::sleep(self.delay);
        let failed = self.should_fail(&name);

        if serial {
            self.serial_running.store(false, Ordering::SeqCst);
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if failed {
            return Err(Error::BuildFailure {
                node: name,
                exit_code: Some(2),
                log_excerpt: "configure step failed with exit code 2\nerror: mock failure"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn build(&self, _ctx: &BuildContext<'_>) -> Result<()> {
        Ok(())
    }

    fn install(&self, ctx: &BuildContext<'_>) -> Result<()> {
        fs::create_dir_all(ctx.prefix.join("lib"))?;
        fs::create_dir_all(ctx.prefix.join("include"))?;
        fs::write(ctx.prefix.join("lib").join(format!("lib{}.so", ctx.spec.name)), b"")?;
        self.order.lock().unwrap().push(ctx.spec.name.clone());
        if let Some((name, flag)) = &self.cancel_on
            && name == &ctx.spec.name
        {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}
