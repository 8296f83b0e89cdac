// src/spec/predicate.rs

//! `when` predicates
//!
//! Dependencies, conflicts and conditional arguments in recipes are guarded
//! by small boolean expressions over the node they belong to:
//!
//! ```text
//! +coinhsl
//! +metis ~debug
//! @3.12: & (%gcc | arch=x86_64)
//! !+mpi
//! ```
//!
//! Juxtaposition and `&` mean "and", `|` means "or", `!` negates. Atoms use
//! the same syntax as spec clauses but never carry a package name. Values
//! that are not bound yet evaluate to false.

use super::{Clause, Compiler, CompilerConstraint, VariantValue};
use crate::error::{Error, Result};
use crate::version::{Version, VersionConstraint};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// What a predicate can observe about a node
pub trait PredicateContext {
    fn variant(&self, name: &str) -> Option<&VariantValue>;
    fn version(&self) -> Option<&Version>;
    fn platform(&self) -> Option<&str>;
    fn compiler(&self) -> Option<&Compiler>;
}

/// A single test against a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    Variant(String, VariantValue),
    Version(VersionConstraint),
    Platform(String),
    Compiler(CompilerConstraint),
}

impl Atom {
    fn evaluate(&self, ctx: &dyn PredicateContext) -> bool {
        match self {
            Atom::Variant(name, value) => ctx.variant(name) == Some(value),
            Atom::Version(constraint) => ctx.version().is_some_and(|v| constraint.satisfies(v)),
            Atom::Platform(wanted) => ctx
                .platform()
                .is_some_and(|p| p == wanted || p.split('-').any(|part| part == wanted)),
            Atom::Compiler(constraint) => ctx.compiler().is_some_and(|c| constraint.satisfied_by(c)),
        }
    }
}

/// Parsed predicate expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Always,
    Atom(Atom),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    pub fn evaluate(&self, ctx: &dyn PredicateContext) -> bool {
        match self {
            Expr::Always => true,
            Expr::Atom(atom) => atom.evaluate(ctx),
            Expr::Not(inner) => !inner.evaluate(ctx),
            Expr::And(terms) => terms.iter().all(|t| t.evaluate(ctx)),
            Expr::Or(terms) => terms.iter().any(|t| t.evaluate(ctx)),
        }
    }
}

/// A `when` predicate together with its source text
///
/// Stored unevaluated in recipes and evaluated lazily against a node's
/// assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct When {
    source: String,
    expr: Expr,
}

impl When {
    /// The predicate that always holds
    pub fn always() -> Self {
        Self {
            source: String::new(),
            expr: Expr::Always,
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let source = s.trim().to_string();
        if source.is_empty() {
            return Ok(Self::always());
        }
        let tokens = tokenize(&source)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            source: &source,
        };
        let expr = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(Error::ParseError(format!(
                "unexpected trailing input in predicate '{}'",
                source
            )));
        }
        Ok(Self { source, expr })
    }

    pub fn is_always(&self) -> bool {
        matches!(self.expr, Expr::Always)
    }

    pub fn evaluate(&self, ctx: &dyn PredicateContext) -> bool {
        self.expr.evaluate(ctx)
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for When {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Display for When {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl Serialize for When {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for When {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        When::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Atom(String),
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token::Atom(std::mem::take(current)));
        }
    };

    for c in source.chars() {
        let token = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '&' => Some(Token::And),
            '|' => Some(Token::Or),
            '!' => Some(Token::Not),
            c if c.is_whitespace() => {
                flush(&mut current, &mut tokens);
                continue;
            }
            c => {
                current.push(c);
                None
            }
        };
        if let Some(token) = token {
            flush(&mut current, &mut tokens);
            tokens.push(token);
        }
    }
    flush(&mut current, &mut tokens);
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn error(&self, what: &str) -> Error {
        Error::ParseError(format!("{} in predicate '{}'", what, self.source))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(collapse(terms, Expr::Or))
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut terms = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(Token::And) => {
                    self.pos += 1;
                    terms.push(self.parse_unary()?);
                }
                Some(Token::Not | Token::LParen | Token::Atom(_)) => {
                    terms.push(self.parse_unary()?);
                }
                _ => break,
            }
        }
        Ok(collapse(terms, Expr::And))
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek().cloned() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(Token::Atom(text)) => {
                self.pos += 1;
                parse_atoms(&text).map_err(|e| match e {
                    Error::ParseError(msg) => self.error(&msg),
                    other => other,
                })
            }
            Some(_) => Err(self.error("unexpected operator")),
            None => Err(self.error("unexpected end")),
        }
    }
}

fn collapse(mut terms: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        wrap(terms)
    }
}

/// One atom token may pack several tests, e.g. `@3.12:+coinhsl~debug`
fn parse_atoms(text: &str) -> Result<Expr> {
    let clause = Clause::parse(text)?;
    if let Some(name) = clause.name {
        return Err(Error::ParseError(format!(
            "package name '{}' is not allowed here",
            name
        )));
    }

    let mut atoms = Vec::new();
    if !clause.version.is_any() {
        atoms.push(Expr::Atom(Atom::Version(clause.version)));
    }
    for (name, value) in clause.variants {
        atoms.push(Expr::Atom(Atom::Variant(name, value)));
    }
    if let Some(compiler) = clause.compiler {
        atoms.push(Expr::Atom(Atom::Compiler(compiler)));
    }
    if let Some(platform) = clause.platform {
        atoms.push(Expr::Atom(Atom::Platform(platform)));
    }

    if atoms.is_empty() {
        return Err(Error::ParseError(format!("empty atom '{}'", text)));
    }
    Ok(collapse(atoms, Expr::And))
}
