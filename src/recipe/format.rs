// src/recipe/format.rs

//! Recipe file format definitions
//!
//! Recipes are TOML files. The raw file structs ([`RecipeFile`] and its
//! sections) mirror the TOML layout; [`PackageRecipe`] is the validated,
//! immutable form the rest of the engine works with.

use crate::spec::{Clause, DepTypes, VariantDomain, VariantValue, When};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A recipe file as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeFile {
    /// Package metadata
    pub package: PackageSection,

    /// Known versions with their checksums
    #[serde(default)]
    pub versions: Vec<VersionEntry>,

    /// Build options
    #[serde(default)]
    pub variants: Vec<VariantEntry>,

    /// Dependency edges, optionally conditional
    #[serde(default)]
    pub dependencies: Vec<DependencyEntry>,

    /// Forbidden configurations
    #[serde(default)]
    pub conflicts: Vec<ConflictEntry>,

    /// Build arguments and commands
    #[serde(default)]
    pub build: BuildSection,
}

/// Package metadata section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSection {
    /// Package name
    pub name: String,

    /// Project homepage
    #[serde(default)]
    pub homepage: Option<String>,

    /// Source URL template (`%(version)s` is substituted)
    #[serde(default)]
    pub url: Option<String>,

    /// Short description
    #[serde(default)]
    pub description: Option<String>,

    /// Build system used to build the package
    #[serde(default)]
    pub build_system: BuildSystemKind,

    /// Whether the build may use more than one job
    #[serde(default = "default_parallel")]
    pub parallel: bool,

    /// Libraries the package installs, without the `lib` prefix
    ///
    /// Used for `%(pkg.ld_flags)s`. Defaults to the package name.
    #[serde(default)]
    pub libraries: Option<Vec<String>>,
}

fn default_parallel() -> bool {
    true
}

/// One `[[versions]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    pub checksum: String,
}

/// One `[[variants]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantEntry {
    pub name: String,

    /// Default value; `false` for boolean variants, the first value otherwise
    #[serde(default)]
    pub default: Option<VariantValue>,

    #[serde(default)]
    pub description: Option<String>,

    /// Allowed values; absent for boolean variants
    #[serde(default)]
    pub values: Option<Vec<String>>,
}

/// One `[[dependencies]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEntry {
    /// Target package and constraints, e.g. `mumps+double~mpi`
    pub spec: String,

    /// Dependency types; `["build", "link"]` when omitted
    #[serde(default, rename = "type")]
    pub types: Option<DepTypes>,

    /// Condition on the depending package
    #[serde(default)]
    pub when: Option<String>,
}

/// One `[[conflicts]]` entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictEntry {
    /// Configuration that is not allowed
    pub when: String,

    #[serde(default, alias = "message")]
    pub msg: Option<String>,
}

/// Build arguments and custom commands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSection {
    /// Arguments always passed to the configure step
    #[serde(default)]
    pub configure_args: Vec<String>,

    /// Arguments passed only when their predicate holds
    #[serde(default)]
    pub args: Vec<ConditionalArgs>,

    /// Subdirectory of the build tree to build in
    #[serde(default)]
    pub build_directory: Option<String>,

    /// Extra environment for every build step
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Custom build system: configure command
    #[serde(default)]
    pub configure: Option<String>,

    /// Custom build system: build command
    #[serde(default)]
    pub build: Option<String>,

    /// Custom build system: install command
    #[serde(default)]
    pub install: Option<String>,
}

/// A group of arguments guarded by a `when` predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalArgs {
    pub when: When,
    pub values: Vec<String>,
}

/// Which build-system adapter builds a package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSystemKind {
    #[default]
    Autotools,
    #[serde(rename = "cmake")]
    CMake,
    Custom,
}

impl BuildSystemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildSystemKind::Autotools => "autotools",
            BuildSystemKind::CMake => "cmake",
            BuildSystemKind::Custom => "custom",
        }
    }
}

impl fmt::Display for BuildSystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A known version of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeVersion {
    pub version: Version,
    pub checksum: String,
}

/// A declared variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantDecl {
    pub name: String,
    pub default: VariantValue,
    pub description: Option<String>,
    pub domain: VariantDomain,
}

/// A declared dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDecl {
    /// Target package name
    pub name: String,
    /// Constraints on the target
    pub constraint: Clause,
    pub types: DepTypes,
    pub when: When,
}

/// A declared conflict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecl {
    pub when: When,
    pub message: String,
}

/// A validated, immutable package recipe
#[derive(Debug, Clone)]
pub struct PackageRecipe {
    pub name: String,
    pub homepage: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    /// Versions in declaration order
    pub versions: Vec<RecipeVersion>,
    /// Variants in declaration order
    pub variants: Vec<VariantDecl>,
    /// Dependencies in declaration order
    pub dependencies: Vec<DependencyDecl>,
    pub conflicts: Vec<ConflictDecl>,
    pub build_system: BuildSystemKind,
    pub parallel: bool,
    pub libraries: Vec<String>,
    pub build: BuildSection,
}

impl PackageRecipe {
    /// Versions sorted highest first
    pub fn sorted_versions(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.versions.iter().map(|v| v.version.clone()).collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions
    }

    pub fn variant(&self, name: &str) -> Option<&VariantDecl> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn has_version(&self, version: &Version) -> bool {
        self.versions.iter().any(|v| &v.version == version)
    }

    /// Source URL for a version, when the recipe has a URL template
    pub fn source_url(&self, version: &Version) -> Option<String> {
        self.url
            .as_ref()
            .map(|url| url.replace("%(version)s", version.as_str()))
    }
}
