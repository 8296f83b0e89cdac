// src/resolver/constraint.rs

//! Accumulated constraints on one node during concretization

use crate::spec::{Clause, Compiler, CompilerConstraint, VariantValue};
use crate::version::{Version, VersionConstraint};
use std::collections::BTreeMap;

/// Everything required of a node so far, with where each requirement came from
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    pub version: VersionConstraint,
    pub variants: BTreeMap<String, VariantValue>,
    pub platform: Option<String>,
    pub compiler: Option<CompilerConstraint>,
    /// (requirer, constraint text) in arrival order
    origins: Vec<(String, String)>,
}

impl ConstraintSet {
    /// Intersect a clause into the set
    ///
    /// On contradiction the set is left unchanged and the reason is returned.
    pub fn add(&mut self, clause: &Clause, origin: &str) -> Result<(), String> {
        let text = clause_text(clause);

        let version = self
            .version
            .intersect(&clause.version)
            .ok_or_else(|| format!("version {} cannot meet {}", clause.version, self.version))?;

        let mut variants = self.variants.clone();
        for (name, value) in &clause.variants {
            match variants.get(name) {
                Some(existing) if existing != value => {
                    return Err(format!(
                        "variant '{}' required as '{}' and '{}'",
                        name, existing, value
                    ));
                }
                _ => {
                    variants.insert(name.clone(), value.clone());
                }
            }
        }

        let platform = match (&self.platform, &clause.platform) {
            (Some(a), Some(b)) if a != b => {
                return Err(format!("platform required as '{}' and '{}'", a, b));
            }
            (a, b) => a.clone().or_else(|| b.clone()),
        };

        let compiler = match (&self.compiler, &clause.compiler) {
            (Some(a), Some(b)) => {
                if a.name != b.name {
                    return Err(format!("compiler required as '{}' and '{}'", a.name, b.name));
                }
                let version = a.version.intersect(&b.version).ok_or_else(|| {
                    format!("compiler versions {} and {} do not overlap", a, b)
                })?;
                Some(CompilerConstraint {
                    name: a.name.clone(),
                    version,
                })
            }
            (a, b) => a.clone().or_else(|| b.clone()),
        };

        self.version = version;
        self.variants = variants;
        self.platform = platform;
        self.compiler = compiler;
        if !text.is_empty() {
            self.origins.push((origin.to_string(), text));
        }
        Ok(())
    }

    pub fn allows_version(&self, version: &Version) -> bool {
        self.version.satisfies(version)
    }

    pub fn allows_compiler(&self, compiler: &Compiler) -> bool {
        self.compiler
            .as_ref()
            .is_none_or(|c| c.satisfied_by(compiler))
    }

    /// Human-readable list of requirements for error reports
    pub fn describe(&self) -> Vec<String> {
        self.origins
            .iter()
            .map(|(origin, text)| format!("{} ({})", text, origin))
            .collect()
    }
}

fn clause_text(clause: &Clause) -> String {
    let anonymous = Clause {
        name: None,
        ..clause.clone()
    };
    anonymous.to_string().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(s: &str) -> Clause {
        Clause::parse(s).unwrap()
    }

    #[test]
    fn test_intersection_accumulates() {
        let mut set = ConstraintSet::default();
        set.add(&clause("@4.0:"), "required by ipopt").unwrap();
        set.add(&clause("@:5.1 +double"), "requested").unwrap();

        assert!(set.allows_version(&Version::parse("5.0").unwrap()));
        assert!(!set.allows_version(&Version::parse("3.0").unwrap()));
        assert!(!set.allows_version(&Version::parse("5.2").unwrap()));
        assert_eq!(set.variants.get("double"), Some(&VariantValue::Bool(true)));
        assert_eq!(
            set.describe(),
            vec!["@4.0: (required by ipopt)", "@:5.1+double (requested)"]
        );
    }

    #[test]
    fn test_contradictions_leave_set_unchanged() {
        let mut set = ConstraintSet::default();
        set.add(&clause("@5: ~mpi %gcc"), "requested").unwrap();

        assert!(set.add(&clause("@:4"), "required by a").is_err());
        assert!(set.add(&clause("+mpi"), "required by b").is_err());
        assert!(set.add(&clause("%clang"), "required by c").is_err());
        assert_eq!(set.describe().len(), 1);

        set.add(&clause("arch=linux-x86_64"), "required by d").unwrap();
        assert!(set.add(&clause("arch=linux-ppc64le"), "required by e").is_err());
    }

    #[test]
    fn test_compiler_versions_intersect() {
        let mut set = ConstraintSet::default();
        set.add(&clause("%gcc@9:"), "requested").unwrap();
        set.add(&clause("%gcc@:12"), "required by x").unwrap();
        assert!(set.allows_compiler(&Compiler::parse("gcc@11.4.0").unwrap()));
        assert!(!set.allows_compiler(&Compiler::parse("gcc@13.1.0").unwrap()));
        assert!(!set.allows_compiler(&Compiler::parse("clang@15").unwrap()));
    }

    #[test]
    fn test_empty_clause_not_listed() {
        let mut set = ConstraintSet::default();
        set.add(&clause(""), "required by ipopt").unwrap();
        assert!(set.describe().is_empty());
    }
}
