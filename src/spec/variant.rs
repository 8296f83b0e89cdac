// src/spec/variant.rs

//! Variant values and domains
//!
//! A variant is a named build option. Boolean variants are written `+name`
//! (on) and `~name` (off); valued variants are written `name=value`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value a variant takes in a spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
    Bool(bool),
    Value(String),
}

impl VariantValue {
    /// Parse the right-hand side of `name=value`
    ///
    /// `true`/`false` are normalized to boolean values so `debug=false` and
    /// `~debug` mean the same thing.
    pub fn from_text(s: &str) -> Self {
        match s {
            "true" | "True" => VariantValue::Bool(true),
            "false" | "False" => VariantValue::Bool(false),
            other => VariantValue::Value(other.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            VariantValue::Bool(b) => Some(*b),
            VariantValue::Value(_) => None,
        }
    }

    /// Render as it appears inside a spec: `+name`, `~name` or ` name=value`
    pub fn render(&self, name: &str) -> String {
        match self {
            VariantValue::Bool(true) => format!("+{}", name),
            VariantValue::Bool(false) => format!("~{}", name),
            VariantValue::Value(v) => format!(" {}={}", name, v),
        }
    }
}

impl fmt::Display for VariantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariantValue::Bool(b) => write!(f, "{}", b),
            VariantValue::Value(v) => write!(f, "{}", v),
        }
    }
}

/// The set of values a variant may take
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VariantDomain {
    /// On or off
    #[default]
    Bool,
    /// One of an enumerated list
    Values(Vec<String>),
}

impl VariantDomain {
    /// Check whether a value belongs to this domain
    pub fn contains(&self, value: &VariantValue) -> bool {
        match (self, value) {
            (VariantDomain::Bool, VariantValue::Bool(_)) => true,
            (VariantDomain::Values(values), VariantValue::Value(v)) => values.contains(v),
            _ => false,
        }
    }

    /// Candidate values in search order: the default first, then the rest of
    /// the domain in declaration order
    pub fn candidates(&self, default: &VariantValue) -> Vec<VariantValue> {
        let all: Vec<VariantValue> = match self {
            VariantDomain::Bool => vec![VariantValue::Bool(false), VariantValue::Bool(true)],
            VariantDomain::Values(values) => {
                values.iter().cloned().map(VariantValue::Value).collect()
            }
        };

        let mut ordered = vec![default.clone()];
        ordered.extend(all.into_iter().filter(|v| v != default));
        ordered
    }

    /// Validate a declared default against the domain
    pub fn check_default(&self, variant: &str, default: &VariantValue) -> Result<()> {
        if self.contains(default) {
            Ok(())
        } else {
            Err(Error::ParseError(format!(
                "default '{}' of variant '{}' is outside its domain",
                default, variant
            )))
        }
    }
}
