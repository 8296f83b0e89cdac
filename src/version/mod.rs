// src/version/mod.rs

//! Version handling and range constraints for recipes
//!
//! Versions are dotted identifiers (`3.12.10`, `1.9.4`, `2.0rc1`). Ranges use
//! the `@lo:hi` syntax where both bounds are optional and the upper bound is
//! inclusive of every version it prefixes:
//!
//! - `@3.12` → 3.12 and any 3.12.x
//! - `@4.0:` → 4.0 or newer
//! - `@:2` → anything up to and including 2.x
//! - `@1.0:2.0` → between 1.0 and 2.0.x
//! - `@1.2,1.4:` → union of ranges

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// One component of a version, split on `.`, `-` and `_` and on
/// digit/letter boundaries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Segment {
    Numeric(u64),
    Alpha(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
            // 1.0 > 1.rc: numeric segments sort after alphabetic ones
            (Segment::Numeric(_), Segment::Alpha(_)) => Ordering::Greater,
            (Segment::Alpha(_), Segment::Numeric(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed package version
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    segments: Vec<Segment>,
}

impl Version {
    /// Parse a version string
    ///
    /// Examples: `"3.12.10"`, `"1.9.4"`, `"5.1.2-p1"`, `"2.0rc1"`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("empty version".to_string()));
        }
        if let Some(bad) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')))
        {
            return Err(Error::ParseError(format!(
                "invalid character '{}' in version '{}'",
                bad, s
            )));
        }

        let mut segments = Vec::new();
        for part in s.split(['.', '-', '_']) {
            if part.is_empty() {
                return Err(Error::ParseError(format!("empty component in version '{}'", s)));
            }
            let mut current = String::new();
            let mut numeric = None;
            for c in part.chars() {
                let is_digit = c.is_ascii_digit();
                if numeric.is_some_and(|n| n != is_digit) {
                    segments.push(Self::segment(&current)?);
                    current.clear();
                }
                numeric = Some(is_digit);
                current.push(c);
            }
            segments.push(Self::segment(&current)?);
        }

        Ok(Self {
            raw: s.to_string(),
            segments,
        })
    }

    fn segment(text: &str) -> Result<Segment> {
        if text.chars().all(|c| c.is_ascii_digit()) {
            text.parse::<u64>()
                .map(Segment::Numeric)
                .map_err(|e| Error::ParseError(format!("invalid version number '{}': {}", text, e)))
        } else {
            Ok(Segment::Alpha(text.to_string()))
        }
    }

    /// The version as written in the recipe
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether `prefix` names this version or one of its ancestors
    /// (`3.12` prefixes `3.12.10`, but not `3.1`)
    pub fn starts_with(&self, prefix: &Version) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.segments.hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A closed version interval, either bound optional
///
/// The upper bound also admits every version it prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub lo: Option<Version>,
    pub hi: Option<Version>,
}

impl VersionRange {
    /// Range matching a version and all of its descendants
    pub fn point(version: Version) -> Self {
        Self {
            lo: Some(version.clone()),
            hi: Some(version),
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::ParseError("empty version range".to_string()));
        }
        match s.split_once(':') {
            Some((lo, hi)) => {
                let lo = lo.trim();
                let hi = hi.trim();
                if lo.is_empty() && hi.is_empty() {
                    return Ok(Self { lo: None, hi: None });
                }
                let range = Self {
                    lo: (!lo.is_empty()).then(|| Version::parse(lo)).transpose()?,
                    hi: (!hi.is_empty()).then(|| Version::parse(hi)).transpose()?,
                };
                if range.is_empty() {
                    return Err(Error::ParseError(format!("empty version range '{}'", s)));
                }
                Ok(range)
            }
            None => Ok(Self::point(Version::parse(s)?)),
        }
    }

    /// Check if a version falls within this range
    pub fn contains(&self, version: &Version) -> bool {
        let above = self.lo.as_ref().is_none_or(|lo| version >= lo);
        let below = self
            .hi
            .as_ref()
            .is_none_or(|hi| version <= hi || version.starts_with(hi));
        above && below
    }

    fn is_empty(&self) -> bool {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) => lo > hi && !lo.starts_with(hi),
            _ => false,
        }
    }

    /// Intersect two ranges, `None` when they cannot overlap
    pub fn intersect(&self, other: &VersionRange) -> Option<VersionRange> {
        let lo = match (&self.lo, &other.lo) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let hi = match (&self.hi, &other.hi) {
            (Some(a), Some(b)) => Some(tighter_upper(a, b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        let range = VersionRange { lo, hi };
        (!range.is_empty()).then_some(range)
    }
}

/// The stricter of two prefix-inclusive upper bounds
fn tighter_upper<'a>(a: &'a Version, b: &'a Version) -> &'a Version {
    if a.starts_with(b) {
        a
    } else if b.starts_with(a) {
        b
    } else {
        a.min(b)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) if lo == hi => write!(f, "{}", lo),
            (lo, hi) => {
                if let Some(lo) = lo {
                    write!(f, "{}", lo)?;
                }
                write!(f, ":")?;
                if let Some(hi) = hi {
                    write!(f, "{}", hi)?;
                }
                Ok(())
            }
        }
    }
}

/// A version constraint: any version, or a union of ranges
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionConstraint {
    /// Any version is acceptable
    #[default]
    Any,
    /// At least one of the ranges must contain the version
    AnyOf(Vec<VersionRange>),
}

impl VersionConstraint {
    /// Parse a constraint, with or without the leading `@`
    ///
    /// Examples: `"@4.0:"`, `"3.12"`, `"1.2,1.4:1.6"`, `":"`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('@').unwrap_or(s).trim();
        if s.is_empty() || s == "*" {
            return Ok(VersionConstraint::Any);
        }

        let ranges = s
            .split(',')
            .map(VersionRange::parse)
            .collect::<Result<Vec<_>>>()?;

        if ranges.iter().any(|r| r.lo.is_none() && r.hi.is_none()) {
            return Ok(VersionConstraint::Any);
        }
        Ok(VersionConstraint::AnyOf(ranges))
    }

    /// Check if a version satisfies this constraint
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionConstraint::Any => true,
            VersionConstraint::AnyOf(ranges) => ranges.iter().any(|r| r.contains(version)),
        }
    }

    /// Whether this constraint accepts every version
    pub fn is_any(&self) -> bool {
        matches!(self, VersionConstraint::Any)
    }

    /// Intersect two constraints
    ///
    /// Returns `None` when no version can satisfy both.
    pub fn intersect(&self, other: &VersionConstraint) -> Option<VersionConstraint> {
        match (self, other) {
            (VersionConstraint::Any, c) | (c, VersionConstraint::Any) => Some(c.clone()),
            (VersionConstraint::AnyOf(a), VersionConstraint::AnyOf(b)) => {
                let mut ranges = Vec::new();
                for left in a {
                    for right in b {
                        if let Some(r) = left.intersect(right)
                            && !ranges.contains(&r)
                        {
                            ranges.push(r);
                        }
                    }
                }
                (!ranges.is_empty()).then_some(VersionConstraint::AnyOf(ranges))
            }
        }
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionConstraint::Any => write!(f, "@:"),
            VersionConstraint::AnyOf(ranges) => {
                write!(f, "@")?;
                for (i, range) in ranges.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", range)?;
                }
                Ok(())
            }
        }
    }
}
