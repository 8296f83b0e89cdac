// src/recipe/mod.rs

//! Package recipes
//!
//! A recipe is the declarative description of one package: the versions
//! it can be built at, its variants and their defaults, dependencies that
//! may apply only under a condition, conflicts, and how to configure and
//! install it.
//!
//! # Culinary Terminology
//!
//! - **Recipe**: The package description (like a recipe card)
//! - **Registry**: The cookbook shelf recipes are looked up on
//! - **Kitchen**: Where the build plan gets executed
//! - **Cook**: Building one concrete node
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "ipopt"
//! homepage = "https://projects.coin-or.org/Ipopt"
//! url = "http://www.coin-or.org/download/source/Ipopt/Ipopt-3.12.10.tgz"
//! build_system = "autotools"
//! parallel = false
//!
//! [[versions]]
//! id = "3.12.10"
//! checksum = "e1a3ad09e41edbfe41948555ece0bdc78757a5ca764b6be5a9a127af2e202d2e"
//!
//! [[variants]]
//! name = "coinhsl"
//! default = false
//! description = "Build with Coin Harwell Subroutine Libraries"
//!
//! [[dependencies]]
//! spec = "coinhsl"
//! when = "+coinhsl"
//!
//! [[build.args]]
//! when = "+coinhsl"
//! values = ["--with-hsl-lib=%(coinhsl.ld_flags)s"]
//! ```

mod format;
pub mod parser;
mod registry;

pub use format::{
    BuildSection, BuildSystemKind, ConditionalArgs, ConflictDecl, DependencyDecl, PackageRecipe,
    RecipeFile, RecipeVersion, VariantDecl,
};
pub use parser::{load_recipe_file, parse_recipe, parse_recipe_file, validate_recipe};
pub use registry::{PreloadReport, Registry};
