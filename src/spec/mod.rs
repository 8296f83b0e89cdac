// src/spec/mod.rs

//! Spec model: abstract package requests and concrete spec graphs
//!
//! An abstract spec describes what the user (or a recipe dependency) asks
//! for, possibly leaving most things open:
//!
//! ```text
//! ipopt@3.12:+coinhsl~debug %gcc@11 arch=linux-x86_64 ^mumps+double
//! ```
//!
//! - `@range` version constraint
//! - `+name` / `~name` boolean variant on / off, `name=value` valued variant
//! - `%compiler[@range]` compiler constraint
//! - `arch=` (or `platform=`, `target=`) platform pin
//! - `^dep ...` constraints on a dependency anywhere in the graph
//!
//! Concretization turns it into a [`ConcreteGraph`].

pub mod concrete;
pub mod predicate;
pub mod variant;

pub use concrete::{ConcreteGraph, ConcreteSpec, DepType, DepTypes, DependencyLink, NodeId};
pub use predicate::{PredicateContext, When};
pub use variant::{VariantDomain, VariantValue};

use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A concrete compiler: name and exact version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Compiler {
    pub name: String,
    pub version: Version,
}

impl Compiler {
    /// Parse `name@version`, e.g. `gcc@11.4.0`
    pub fn parse(s: &str) -> Result<Self> {
        let (name, version) = s.trim().split_once('@').ok_or_else(|| {
            Error::ParseError(format!("compiler '{}' must be written as name@version", s))
        })?;
        if !is_identifier(name) {
            return Err(Error::ParseError(format!("invalid compiler name '{}'", name)));
        }
        Ok(Self {
            name: name.to_string(),
            version: Version::parse(version)?,
        })
    }
}

impl fmt::Display for Compiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A compiler requirement: name plus optional version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConstraint {
    pub name: String,
    pub version: VersionConstraint,
}

impl CompilerConstraint {
    pub fn satisfied_by(&self, compiler: &Compiler) -> bool {
        self.name == compiler.name && self.version.satisfies(&compiler.version)
    }
}

impl fmt::Display for CompilerConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.name)?;
        if !self.version.is_any() {
            write!(f, "{}", self.version)?;
        }
        Ok(())
    }
}

/// Constraints on one node, as parsed from a single `^`-separated clause
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clause {
    pub name: Option<String>,
    pub version: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub platform: Option<String>,
    pub compiler: Option<CompilerConstraint>,
}

impl Clause {
    /// Parse a clause such as `mumps@5:+double~mpi %gcc arch=linux-x86_64`
    pub fn parse(text: &str) -> Result<Self> {
        let mut clause = Clause::default();
        for (i, token) in text.split_whitespace().enumerate() {
            clause.parse_token(token, i == 0)?;
        }
        Ok(clause)
    }

    /// Whether the clause constrains nothing beyond (maybe) a name
    pub fn is_unconstrained(&self) -> bool {
        self.version.is_any()
            && self.variants.is_empty()
            && self.platform.is_none()
            && self.compiler.is_none()
    }

    fn parse_token(&mut self, token: &str, first: bool) -> Result<()> {
        // key=value form
        if let Some((key, value)) = token.split_once('=')
            && is_identifier(key)
        {
            if value.is_empty() {
                return Err(Error::ParseError(format!("missing value in '{}'", token)));
            }
            return match key {
                "arch" | "platform" | "target" => self.set_platform(value),
                _ => self.set_variant(key, VariantValue::from_text(value)),
            };
        }

        let chars: Vec<char> = token.chars().collect();
        let mut pos = 0;

        if chars.first().is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_') {
            if !first {
                return Err(Error::ParseError(format!(
                    "unexpected package name '{}' (did you forget '^'?)",
                    token
                )));
            }
            let name = take_while(&chars, &mut pos, is_ident_char);
            if self.name.is_some() {
                return Err(Error::ParseError(format!("more than one name in '{}'", token)));
            }
            self.name = Some(name);
        }

        while pos < chars.len() {
            let sigil = chars[pos];
            pos += 1;
            match sigil {
                '@' => {
                    let text = take_while(&chars, &mut pos, is_version_char);
                    if text.is_empty() {
                        return Err(Error::ParseError(format!("missing version after '@' in '{}'", token)));
                    }
                    self.add_version(VersionConstraint::parse(&text)?, token)?;
                }
                '+' | '~' => {
                    let name = take_while(&chars, &mut pos, is_ident_char);
                    if name.is_empty() {
                        return Err(Error::ParseError(format!(
                            "missing variant name after '{}' in '{}'",
                            sigil, token
                        )));
                    }
                    self.set_variant(&name, VariantValue::Bool(sigil == '+'))?;
                }
                '%' => {
                    let name = take_while(&chars, &mut pos, is_ident_char);
                    if name.is_empty() {
                        return Err(Error::ParseError(format!("missing compiler name in '{}'", token)));
                    }
                    let mut version = VersionConstraint::Any;
                    if chars.get(pos) == Some(&'@') {
                        pos += 1;
                        let text = take_while(&chars, &mut pos, is_version_char);
                        version = VersionConstraint::parse(&text)?;
                    }
                    if self.compiler.is_some() {
                        return Err(Error::ParseError(format!("more than one compiler in '{}'", token)));
                    }
                    self.compiler = Some(CompilerConstraint { name, version });
                }
                other => {
                    return Err(Error::ParseError(format!(
                        "unexpected '{}' in '{}'",
                        other, token
                    )));
                }
            }
        }
        Ok(())
    }

    fn add_version(&mut self, constraint: VersionConstraint, token: &str) -> Result<()> {
        self.version = self.version.intersect(&constraint).ok_or_else(|| {
            Error::ParseError(format!("version constraints in '{}' cannot overlap", token))
        })?;
        Ok(())
    }

    fn set_variant(&mut self, name: &str, value: VariantValue) -> Result<()> {
        match self.variants.get(name) {
            Some(existing) if *existing != value => Err(Error::ParseError(format!(
                "variant '{}' given both '{}' and '{}'",
                name, existing, value
            ))),
            _ => {
                self.variants.insert(name.to_string(), value);
                Ok(())
            }
        }
    }

    fn set_platform(&mut self, value: &str) -> Result<()> {
        match &self.platform {
            Some(existing) if existing != value => Err(Error::ParseError(format!(
                "platform given both '{}' and '{}'",
                existing, value
            ))),
            _ => {
                self.platform = Some(value.to_string());
                Ok(())
            }
        }
    }

    fn write_constraints(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.version.is_any() {
            write!(f, "{}", self.version)?;
        }
        for (name, value) in &self.variants {
            write!(f, "{}", value.render(name))?;
        }
        if let Some(compiler) = &self.compiler {
            write!(f, " {}", compiler)?;
        }
        if let Some(platform) = &self.platform {
            write!(f, " arch={}", platform)?;
        }
        Ok(())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}", name)?;
        }
        self.write_constraints(f)
    }
}

/// An abstract (possibly underspecified) package request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbstractSpec {
    pub name: String,
    pub version: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub platform: Option<String>,
    pub compiler: Option<CompilerConstraint>,
    /// `^dep` constraints, applied wherever that package appears
    pub dependencies: Vec<AbstractSpec>,
}

impl AbstractSpec {
    /// A request for any version of a package
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: VersionConstraint::Any,
            variants: BTreeMap::new(),
            platform: None,
            compiler: None,
            dependencies: Vec::new(),
        }
    }

    /// Parse a full spec with optional `^` dependency clauses
    pub fn parse(s: &str) -> Result<Self> {
        let mut segments = s.split('^');
        let root = segments.next().unwrap_or_default();
        let mut spec = Self::from_clause(Clause::parse(root)?, s)?;

        for segment in segments {
            let dep = Self::from_clause(Clause::parse(segment)?, s)?;
            if dep.name == spec.name {
                return Err(Error::ParseError(format!(
                    "'{}' cannot depend on itself in '{}'",
                    dep.name, s
                )));
            }
            if spec.dependencies.iter().any(|d| d.name == dep.name) {
                return Err(Error::ParseError(format!(
                    "dependency '{}' given twice in '{}'",
                    dep.name, s
                )));
            }
            spec.dependencies.push(dep);
        }
        Ok(spec)
    }

    fn from_clause(clause: Clause, source: &str) -> Result<Self> {
        let name = clause
            .name
            .ok_or_else(|| Error::ParseError(format!("missing package name in '{}'", source)))?;
        Ok(Self {
            name,
            version: clause.version,
            variants: clause.variants,
            platform: clause.platform,
            compiler: clause.compiler,
            dependencies: Vec::new(),
        })
    }

    /// The node-level constraints of this spec, without its `^` clauses
    pub fn clause(&self) -> Clause {
        Clause {
            name: Some(self.name.clone()),
            version: self.version.clone(),
            variants: self.variants.clone(),
            platform: self.platform.clone(),
            compiler: self.compiler.clone(),
        }
    }
}

impl FromStr for AbstractSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for AbstractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.clause())?;
        for dep in &self.dependencies {
            write!(f, " ^{}", dep)?;
        }
        Ok(())
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn is_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | ',')
}

pub(crate) fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        && s.chars().all(is_ident_char)
}

fn take_while(chars: &[char], pos: &mut usize, pred: fn(char) -> bool) -> String {
    let start = *pos;
    while *pos < chars.len() && pred(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}
