// src/kitchen/args.rs

//! Configure argument resolution
//!
//! Arguments come from three places, in this order: the recipe's
//! unconditional `configure_args`, each `[[build.args]]` group whose `when`
//! holds for the concrete node, and an optional [`ArgsHook`] registered for
//! the package. Recipe arguments are templates:
//!
//! | Placeholder            | Value                                  |
//! |------------------------|----------------------------------------|
//! | `%(name)s`             | package name                           |
//! | `%(version)s`          | concrete version                       |
//! | `%(prefix)s`           | install prefix of the node             |
//! | `%(jobs)s`             | build jobs for the node                |
//! | `%(dep.prefix)s`       | install prefix of dependency `dep`     |
//! | `%(dep.lib)s`          | `<prefix>/lib`                         |
//! | `%(dep.include)s`      | `<prefix>/include`                     |
//! | `%(dep.bin)s`          | `<prefix>/bin`                         |
//! | `%(dep.version)s`      | concrete version of `dep`              |
//! | `%(dep.ld_flags)s`     | `-L<prefix>/lib -l<lib>...`            |

use crate::error::{Error, Result};
use crate::recipe::PackageRecipe;
use crate::spec::ConcreteSpec;
use crate::version::Version;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// What a node's build knows about one of its direct dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepInfo {
    pub version: Version,
    pub prefix: PathBuf,
    /// Libraries to link, without the `lib` prefix
    pub libraries: Vec<String>,
}

impl DepInfo {
    pub fn lib_dir(&self) -> PathBuf {
        self.prefix.join("lib")
    }

    pub fn include_dir(&self) -> PathBuf {
        self.prefix.join("include")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.prefix.join("bin")
    }

    /// Linker flags for the dependency's libraries
    pub fn ld_flags(&self) -> String {
        let mut flags = vec![format!("-L{}", self.lib_dir().display())];
        flags.extend(self.libraries.iter().map(|l| format!("-l{}", l)));
        flags.join(" ")
    }
}

/// Everything argument computation may look at for one node
pub struct ArgContext<'a> {
    pub spec: &'a ConcreteSpec,
    pub recipe: &'a PackageRecipe,
    pub prefix: &'a Path,
    pub jobs: usize,
    /// Direct dependencies by package name
    pub deps: &'a BTreeMap<String, DepInfo>,
}

impl ArgContext<'_> {
    /// Look up a direct dependency
    pub fn dep(&self, name: &str) -> Result<&DepInfo> {
        self.deps.get(name).ok_or_else(|| {
            self.failure(format!(
                "'{}' is not a dependency of {}",
                name,
                self.spec.format_short()
            ))
        })
    }

    /// Recipe arguments whose conditions hold, with placeholders substituted
    pub fn resolve(&self) -> Result<Vec<String>> {
        let build = &self.recipe.build;
        let mut args = Vec::new();
        for template in &build.configure_args {
            args.push(self.substitute(template)?);
        }
        for group in &build.args {
            if !group.when.evaluate(self.spec) {
                continue;
            }
            for template in &group.values {
                args.push(self.substitute(template)?);
            }
        }
        Ok(args)
    }

    /// Replace every `%(key)s` placeholder in `template`
    pub fn substitute(&self, template: &str) -> Result<String> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("%(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find(")s").ok_or_else(|| {
                self.failure(format!("unterminated placeholder in '{}'", template))
            })?;
            out.push_str(&self.lookup(&after[..end])?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }

    fn lookup(&self, key: &str) -> Result<String> {
        match key {
            "name" => return Ok(self.spec.name.clone()),
            "version" => return Ok(self.spec.version.to_string()),
            "prefix" => return Ok(self.prefix.display().to_string()),
            "jobs" => return Ok(self.jobs.to_string()),
            _ => {}
        }

        let (package, attr) = key
            .split_once('.')
            .ok_or_else(|| self.failure(format!("unknown placeholder '%({})s'", key)))?;
        let dep = self.dep(package)?;
        let value = match attr {
            "prefix" => dep.prefix.display().to_string(),
            "lib" => dep.lib_dir().display().to_string(),
            "include" => dep.include_dir().display().to_string(),
            "bin" => dep.bin_dir().display().to_string(),
            "version" => dep.version.to_string(),
            "ld_flags" => dep.ld_flags(),
            _ => {
                return Err(self.failure(format!(
                    "unknown attribute '{}' in '%({})s'",
                    attr, key
                )));
            }
        };
        Ok(value)
    }

    fn failure(&self, message: String) -> Error {
        Error::BuildFailure {
            node: self.spec.name.clone(),
            exit_code: None,
            log_excerpt: message,
        }
    }
}

/// Imperative argument computation for packages whose arguments cannot be
/// expressed as templates
///
/// Hook arguments are appended after the recipe's own.
pub trait ArgsHook: Send + Sync {
    fn args(&self, ctx: &ArgContext<'_>) -> Result<Vec<String>>;
}

impl<F> ArgsHook for F
where
    F: Fn(&ArgContext<'_>) -> Result<Vec<String>> + Send + Sync,
{
    fn args(&self, ctx: &ArgContext<'_>) -> Result<Vec<String>> {
        self(ctx)
    }
}
