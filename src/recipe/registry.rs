// src/recipe/registry.rs

//! Recipe registry: name-keyed, read-through recipe cache
//!
//! Recipes live under one or more repository roots, either as
//! `<root>/<name>.toml` or `<root>/<name>/recipe.toml`. Earlier roots shadow
//! later ones. A loaded recipe stays cached until [`Registry::reload`] or
//! [`Registry::reload_one`] is called.

use crate::error::{Error, Result};
use crate::kitchen::ArgsHook;
use crate::recipe::format::PackageRecipe;
use crate::recipe::parser::load_recipe_file;
use crate::version::Version;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Result of [`Registry::preload`]
#[derive(Debug, Default)]
pub struct PreloadReport {
    /// Number of recipes parsed and cached
    pub loaded: usize,
    /// Recipe files that failed to load
    pub errors: Vec<(PathBuf, Error)>,
}

/// Process-wide recipe lookup
pub struct Registry {
    roots: Vec<PathBuf>,
    /// Recipes handed in directly, not backed by files
    memory: HashMap<String, Arc<PackageRecipe>>,
    cache: RwLock<HashMap<String, Arc<PackageRecipe>>>,
    hooks: RwLock<HashMap<String, Arc<dyn ArgsHook>>>,
}

impl Registry {
    /// Registry backed by recipe repository directories
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            memory: HashMap::new(),
            cache: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// In-memory registry, for tests and embedding
    pub fn from_recipes(recipes: impl IntoIterator<Item = PackageRecipe>) -> Self {
        let memory = recipes
            .into_iter()
            .map(|r| (r.name.clone(), Arc::new(r)))
            .collect();
        Self {
            roots: Vec::new(),
            memory,
            cache: RwLock::new(HashMap::new()),
            hooks: RwLock::new(HashMap::new()),
        }
    }

    /// Load a recipe by name
    pub fn load(&self, name: &str) -> Result<Arc<PackageRecipe>> {
        if let Some(recipe) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(recipe));
        }

        let recipe = match self.find_file(name) {
            Some(path) => {
                debug!("Loading recipe {} from {}", name, path.display());
                let recipe = load_recipe_file(&path)?;
                if recipe.name != name {
                    return Err(Error::ParseError(format!(
                        "{} declares package '{}', expected '{}'",
                        path.display(),
                        recipe.name,
                        name
                    )));
                }
                Arc::new(recipe)
            }
            None => match self.memory.get(name) {
                Some(recipe) => Arc::clone(recipe),
                None => return Err(Error::NotFound(format!("no recipe for package '{}'", name))),
            },
        };

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have loaded it meanwhile; keep the first copy
        let entry = cache.entry(name.to_string()).or_insert(recipe);
        Ok(Arc::clone(entry))
    }

    /// Whether a recipe exists for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
            || self.memory.contains_key(name)
            || self.find_file(name).is_some()
    }

    /// Known versions of a package, highest first
    pub fn list_versions(&self, name: &str) -> Result<Vec<Version>> {
        Ok(self.load(name)?.sorted_versions())
    }

    /// Drop every cached recipe; the next `load` re-reads from disk
    pub fn reload(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        info!("Dropping {} cached recipes", cache.len());
        cache.clear();
    }

    /// Drop one cached recipe
    pub fn reload_one(&self, name: &str) {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            debug!("Dropped cached recipe {}", name);
        }
    }

    /// Register imperative argument computation for a package
    pub fn register_hook(&self, name: &str, hook: Arc<dyn ArgsHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), hook);
    }

    pub fn hook(&self, name: &str) -> Option<Arc<dyn ArgsHook>> {
        self.hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All package names available, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.recipe_files()?.into_keys().collect();
        names.extend(self.memory.keys().cloned());
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Parse every recipe under the repository roots in parallel
    ///
    /// Invalid files are collected in the report rather than aborting. When
    /// everything loaded, the whole set is checked for dependency cycles.
    pub fn preload(&self) -> Result<PreloadReport> {
        let files: Vec<(String, PathBuf)> = self.recipe_files()?.into_iter().collect();
        info!("Preloading {} recipes", files.len());

        let results: Vec<(String, PathBuf, Result<PackageRecipe>)> = files
            .par_iter()
            .map(|(name, path)| (name.clone(), path.clone(), load_recipe_file(path)))
            .collect();

        let mut report = PreloadReport::default();
        {
            let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            for (name, path, result) in results {
                match result {
                    Ok(recipe) if recipe.name == name => {
                        cache.insert(name, Arc::new(recipe));
                        report.loaded += 1;
                    }
                    Ok(recipe) => {
                        let err = Error::ParseError(format!(
                            "declares package '{}', expected '{}'",
                            recipe.name, name
                        ));
                        warn!("{}: {}", path.display(), err);
                        report.errors.push((path, err));
                    }
                    Err(err) => {
                        warn!("{}: {}", path.display(), err);
                        report.errors.push((path, err));
                    }
                }
            }
        }

        if report.errors.is_empty() {
            for name in self.names()? {
                self.check_acyclic(&name)?;
            }
        }
        Ok(report)
    }

    /// Check that no declared dependency path leads from `root` back to itself
    ///
    /// All edges are followed regardless of their `when` predicate. Names
    /// without a recipe are treated as leaves; the concretizer reports them
    /// if they are actually needed.
    pub fn check_acyclic(&self, root: &str) -> Result<()> {
        let mut done = HashSet::new();
        let mut stack = Vec::new();
        self.visit(root, &mut done, &mut stack)
    }

    fn visit(&self, name: &str, done: &mut HashSet<String>, stack: &mut Vec<String>) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut cycle = stack[pos..].to_vec();
            cycle.push(name.to_string());
            return Err(Error::Cycle { cycle });
        }

        let recipe = match self.load(name) {
            Ok(recipe) => recipe,
            Err(Error::NotFound(_)) => {
                done.insert(name.to_string());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        stack.push(name.to_string());
        for dep in &recipe.dependencies {
            self.visit(&dep.name, done, stack)?;
        }
        stack.pop();
        done.insert(name.to_string());
        Ok(())
    }

    fn find_file(&self, name: &str) -> Option<PathBuf> {
        self.roots.iter().find_map(|root| recipe_path(root, name))
    }

    /// Map package name to recipe file, honouring root precedence
    fn recipe_files(&self) -> Result<BTreeMap<String, PathBuf>> {
        let mut files = BTreeMap::new();
        for root in &self.roots {
            if !root.is_dir() {
                warn!("Recipe repository {} does not exist", root.display());
                continue;
            }
            for entry in fs::read_dir(root)? {
                let path = entry?.path();
                let name = if path.is_dir() {
                    path.join("recipe.toml")
                        .is_file()
                        .then(|| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
                        .flatten()
                } else if path.extension().is_some_and(|e| e == "toml") {
                    path.file_stem().and_then(|n| n.to_str()).map(str::to_string)
                } else {
                    None
                };
                if let Some(name) = name
                    && let Some(found) = recipe_path(root, &name)
                {
                    files.entry(name).or_insert(found);
                }
            }
        }
        Ok(files)
    }
}

fn recipe_path(root: &Path, name: &str) -> Option<PathBuf> {
    let flat = root.join(format!("{}.toml", name));
    if flat.is_file() {
        return Some(flat);
    }
    let nested = root.join(name).join("recipe.toml");
    nested.is_file().then_some(nested)
}
