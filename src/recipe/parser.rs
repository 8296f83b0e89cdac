// src/recipe/parser.rs

//! Recipe file parsing and validation

use crate::error::{Error, Result};
use crate::hash::ChecksumKind;
use crate::recipe::format::{
    ConflictDecl, DependencyDecl, PackageRecipe, RecipeFile, RecipeVersion, VariantDecl,
};
use crate::spec::predicate::{Atom, Expr};
use crate::spec::{AbstractSpec, VariantDomain, VariantValue, When};
use crate::version::Version;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<RecipeFile> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<RecipeFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read recipe file {}: {}", path.display(), e)))?;

    parse_recipe(&content).map_err(|e| match e {
        Error::ParseError(msg) => Error::ParseError(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Parse, validate and compile a recipe from a file
///
/// Validation warnings are logged.
pub fn load_recipe_file(path: &Path) -> Result<PackageRecipe> {
    let file = parse_recipe_file(path)?;
    for warning in validate_recipe(&file)? {
        warn!("{}: {}", path.display(), warning);
    }
    PackageRecipe::try_from(file)
}

/// Validate a recipe for completeness and correctness
///
/// Returns warnings for things that are allowed but probably unintended.
pub fn validate_recipe(recipe: &RecipeFile) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let name = &recipe.package.name;

    if name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }
    if !crate::spec::is_identifier(name) {
        return Err(Error::ParseError(format!("Invalid package name '{}'", name)));
    }

    if recipe.versions.is_empty() {
        return Err(Error::ParseError(format!("Recipe '{}' declares no versions", name)));
    }
    let mut seen = HashSet::new();
    for entry in &recipe.versions {
        let version = Version::parse(&entry.id)?;
        if !seen.insert(version) {
            return Err(Error::ParseError(format!(
                "Recipe '{}' declares version {} twice",
                name, entry.id
            )));
        }
        ChecksumKind::from_hex(&entry.checksum).map_err(|e| {
            Error::ParseError(format!("Recipe '{}' version {}: {}", name, entry.id, e))
        })?;
    }

    let mut variant_names = HashSet::new();
    for variant in &recipe.variants {
        if !crate::spec::is_identifier(&variant.name) {
            return Err(Error::ParseError(format!(
                "Recipe '{}' has invalid variant name '{}'",
                name, variant.name
            )));
        }
        if !variant_names.insert(variant.name.as_str()) {
            return Err(Error::ParseError(format!(
                "Recipe '{}' declares variant '{}' twice",
                name, variant.name
            )));
        }
        if let Some(values) = &variant.values {
            let unique: HashSet<&String> = values.iter().collect();
            if values.is_empty() || unique.len() != values.len() {
                return Err(Error::ParseError(format!(
                    "Variant '{}' of '{}' needs a non-empty list of distinct values",
                    variant.name, name
                )));
            }
        }
        if variant.description.is_none() {
            warnings.push(format!("Variant '{}' has no description", variant.name));
        }
    }

    if recipe.package.build_system == crate::recipe::BuildSystemKind::Custom
        && recipe.build.install.is_none()
    {
        return Err(Error::ParseError(format!(
            "Recipe '{}' uses a custom build system but has no install command",
            name
        )));
    }

    if recipe.package.homepage.is_none() {
        warnings.push("Missing homepage".to_string());
    }
    if recipe.package.description.is_none() {
        warnings.push("Missing description".to_string());
    }
    if recipe.package.url.is_none() {
        warnings.push("Missing source url".to_string());
    }

    Ok(warnings)
}

impl TryFrom<RecipeFile> for PackageRecipe {
    type Error = Error;

    fn try_from(file: RecipeFile) -> Result<Self> {
        validate_recipe(&file)?;
        let name = file.package.name.clone();

        let versions = file
            .versions
            .iter()
            .map(|entry| {
                Ok(RecipeVersion {
                    version: Version::parse(&entry.id)?,
                    checksum: entry.checksum.to_lowercase(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut variants = Vec::with_capacity(file.variants.len());
        for entry in &file.variants {
            let domain = match &entry.values {
                Some(values) => VariantDomain::Values(values.clone()),
                None => VariantDomain::Bool,
            };
            let default = match (&entry.default, &domain) {
                (Some(VariantValue::Value(text)), VariantDomain::Bool) => VariantValue::from_text(text),
                (Some(value), _) => value.clone(),
                (None, VariantDomain::Bool) => VariantValue::Bool(false),
                (None, VariantDomain::Values(values)) => VariantValue::Value(values[0].clone()),
            };
            domain.check_default(&entry.name, &default)?;
            variants.push(VariantDecl {
                name: entry.name.clone(),
                default,
                description: entry.description.clone(),
                domain,
            });
        }

        let mut dependencies = Vec::with_capacity(file.dependencies.len());
        for entry in &file.dependencies {
            let spec = AbstractSpec::parse(&entry.spec).map_err(|e| context(&name, e))?;
            if !spec.dependencies.is_empty() {
                return Err(Error::ParseError(format!(
                    "Dependency '{}' of '{}' cannot use '^'",
                    entry.spec, name
                )));
            }
            if spec.name == name {
                return Err(Error::ParseError(format!("Recipe '{}' depends on itself", name)));
            }
            let types = entry.types.clone().unwrap_or_default();
            if types.is_empty() {
                return Err(Error::ParseError(format!(
                    "Dependency '{}' of '{}' has an empty type list",
                    entry.spec, name
                )));
            }
            let when = parse_when(&name, entry.when.as_deref())?;
            check_predicate(&name, &variants, &when)?;
            dependencies.push(DependencyDecl {
                name: spec.name.clone(),
                constraint: spec.clause(),
                types,
                when,
            });
        }

        let mut conflicts = Vec::with_capacity(file.conflicts.len());
        for entry in &file.conflicts {
            let when = parse_when(&name, Some(&entry.when))?;
            if when.is_always() {
                return Err(Error::ParseError(format!(
                    "Recipe '{}' has a conflict with an empty condition",
                    name
                )));
            }
            check_predicate(&name, &variants, &when)?;
            conflicts.push(ConflictDecl {
                message: entry
                    .msg
                    .clone()
                    .unwrap_or_else(|| format!("'{}' is not supported", when)),
                when,
            });
        }

        for group in &file.build.args {
            check_predicate(&name, &variants, &group.when)?;
        }

        let libraries = file
            .package
            .libraries
            .clone()
            .unwrap_or_else(|| vec![name.clone()]);

        Ok(PackageRecipe {
            name,
            homepage: file.package.homepage,
            url: file.package.url,
            description: file.package.description,
            versions,
            variants,
            dependencies,
            conflicts,
            build_system: file.package.build_system,
            parallel: file.package.parallel,
            libraries,
            build: file.build,
        })
    }
}

fn parse_when(recipe: &str, text: Option<&str>) -> Result<When> {
    match text {
        Some(text) => When::parse(text).map_err(|e| context(recipe, e)),
        None => Ok(When::always()),
    }
}

fn context(recipe: &str, err: Error) -> Error {
    match err {
        Error::ParseError(msg) => Error::ParseError(format!("Recipe '{}': {}", recipe, msg)),
        other => other,
    }
}

/// Predicates may only mention variants the recipe declares
fn check_predicate(recipe: &str, variants: &[VariantDecl], when: &When) -> Result<()> {
    fn walk(recipe: &str, variants: &[VariantDecl], expr: &Expr, source: &When) -> Result<()> {
        match expr {
            Expr::Always | Expr::Atom(Atom::Version(_) | Atom::Platform(_) | Atom::Compiler(_)) => Ok(()),
            Expr::Atom(Atom::Variant(name, value)) => {
                let decl = variants.iter().find(|v| &v.name == name).ok_or_else(|| {
                    Error::ParseError(format!(
                        "Recipe '{}': predicate '{}' uses undeclared variant '{}'",
                        recipe, source, name
                    ))
                })?;
                if decl.domain.contains(value) {
                    Ok(())
                } else {
                    Err(Error::ParseError(format!(
                        "Recipe '{}': predicate '{}' uses value '{}' outside the domain of '{}'",
                        recipe, source, value, name
                    )))
                }
            }
            Expr::Not(inner) => walk(recipe, variants, inner, source),
            Expr::And(terms) | Expr::Or(terms) => terms
                .iter()
                .try_for_each(|t| walk(recipe, variants, t, source)),
        }
    }
    walk(recipe, variants, when.expr(), when)
}
