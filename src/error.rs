// src/error.rs

//! Error types for the cookbook engine
//!
//! Concretization errors (`NotFound`, `Unsatisfiable`, `Conflict`, `Cycle`)
//! abort the whole request. `BuildFailure` is per node and normally ends up
//! in a [`crate::kitchen::BuildReport`] rather than being returned.

use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Unknown recipe or version
    #[error("not found: {0}")]
    NotFound(String),

    /// No assignment satisfies the accumulated constraints of a node
    #[error("cannot concretize '{node}': {}", constraints.join("; "))]
    Unsatisfiable {
        node: String,
        constraints: Vec<String>,
    },

    /// A declared conflict was triggered by the chosen assignment
    #[error("conflict in '{node}': {message}")]
    Conflict { node: String, message: String },

    /// The dependency graph is not a DAG
    #[error("dependency cycle: {}", cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    /// A single node failed to build
    #[error("build of '{node}' failed (exit code {}): {log_excerpt}", exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()))]
    BuildFailure {
        node: String,
        exit_code: Option<i32>,
        log_excerpt: String,
    },

    /// A required external tool is missing
    #[error("required tool not found: {0}")]
    ToolNotFound(String),

    /// Recipe, spec or predicate syntax error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Filesystem error with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Install state database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run was cancelled before any build started
    #[error("operation cancelled")]
    Cancelled,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsatisfiable_display_lists_constraints() {
        let err = Error::Unsatisfiable {
            node: "mumps".to_string(),
            constraints: vec!["@5.0: (required by ipopt)".to_string(), "@:4 (requested)".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("mumps"));
        assert!(msg.contains("@5.0: (required by ipopt); @:4 (requested)"));
    }

    #[test]
    fn test_cycle_display() {
        let err = Error::Cycle {
            cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn test_build_failure_display() {
        let err = Error::BuildFailure {
            node: "zlib".to_string(),
            exit_code: Some(2),
            log_excerpt: "make: *** [all] Error 2".to_string(),
        };
        assert!(err.to_string().contains("exit code 2"));
        assert!(err.to_string().contains("zlib"));
    }
}
