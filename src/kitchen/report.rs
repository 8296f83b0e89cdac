// src/kitchen/report.rs

//! Per-node build outcomes

use crate::spec::NodeId;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Why a node was not attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SkipReason {
    /// A dependency (named) failed or was itself skipped
    DependencyFailed(String),
    /// Another node failed and fail-fast stopped dispatching
    FailFast,
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::DependencyFailed(dep) => write!(f, "dependency {} failed", dep),
            SkipReason::FailFast => write!(f, "fail-fast"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal status of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum NodeOutcome {
    /// Built and installed in this run
    Installed { prefix: PathBuf, attempts: u32 },
    /// Already installed before the run
    Reused { prefix: PathBuf },
    Failed {
        error: String,
        exit_code: Option<i32>,
        log_excerpt: Option<String>,
        attempts: u32,
    },
    Skipped { reason: SkipReason },
}

impl NodeOutcome {
    /// Installed or reused
    pub fn is_success(&self) -> bool {
        matches!(self, NodeOutcome::Installed { .. } | NodeOutcome::Reused { .. })
    }

    pub fn prefix(&self) -> Option<&PathBuf> {
        match self {
            NodeOutcome::Installed { prefix, .. } | NodeOutcome::Reused { prefix } => Some(prefix),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeOutcome::Installed { .. } => "installed",
            NodeOutcome::Reused { .. } => "reused",
            NodeOutcome::Failed { .. } => "failed",
            NodeOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// One line of the report
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    #[serde(skip)]
    pub node: NodeId,
    pub name: String,
    pub spec: String,
    pub hash: String,
    pub outcome: NodeOutcome,
}

/// Outcome of every node in a plan, in build order
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub entries: Vec<ReportEntry>,
    #[serde(skip)]
    pub duration: Duration,
}

impl BuildReport {
    /// Every node installed or reused
    pub fn success(&self) -> bool {
        self.entries.iter().all(|e| e.outcome.is_success())
    }

    pub fn outcome(&self, name: &str) -> Option<&NodeOutcome> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.outcome)
    }

    fn count(&self, label: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome.label() == label)
            .count()
    }

    pub fn installed(&self) -> usize {
        self.count("installed")
    }

    pub fn reused(&self) -> usize {
        self.count("reused")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match &entry.outcome {
                NodeOutcome::Installed { prefix, attempts } => {
                    write!(f, "  [installed] {} -> {}", entry.spec, prefix.display())?;
                    if *attempts > 1 {
                        write!(f, " (after {} attempts)", attempts)?;
                    }
                    writeln!(f)?;
                }
                NodeOutcome::Reused { prefix } => {
                    writeln!(f, "  [reused]    {} -> {}", entry.spec, prefix.display())?
                }
                NodeOutcome::Failed {
                    error,
                    log_excerpt,
                    ..
                } => {
                    writeln!(f, "  [failed]    {}: {}", entry.spec, error)?;
                    if let Some(excerpt) = log_excerpt {
                        for line in excerpt.lines() {
                            writeln!(f, "      | {}", line)?;
                        }
                    }
                }
                NodeOutcome::Skipped { reason } => {
                    writeln!(f, "  [skipped]   {} ({})", entry.spec, reason)?
                }
            }
        }
        write!(
            f,
            "{} installed, {} reused, {} failed, {} skipped in {:.1}s",
            self.installed(),
            self.reused(),
            self.failed(),
            self.skipped(),
            self.duration.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, outcome: NodeOutcome) -> ReportEntry {
        ReportEntry {
            node: 0,
            name: name.to_string(),
            spec: format!("{}@1.0", name),
            hash: "abc".to_string(),
            outcome,
        }
    }

    #[test]
    fn test_success_requires_every_node() {
        let mut report = BuildReport {
            entries: vec![
                entry("a", NodeOutcome::Reused { prefix: PathBuf::from("/opt/a") }),
                entry(
                    "b",
                    NodeOutcome::Installed {
                        prefix: PathBuf::from("/opt/b"),
                        attempts: 1,
                    },
                ),
            ],
            duration: Duration::from_secs(3),
        };
        assert!(report.success());

        report.entries.push(entry(
            "c",
            NodeOutcome::Skipped {
                reason: SkipReason::DependencyFailed("b".to_string()),
            },
        ));
        assert!(!report.success());
        assert_eq!(report.skipped(), 1);
        assert!(report.to_string().contains("[skipped]   c@1.0 (dependency b failed)"));
    }

    #[test]
    fn test_failure_excerpt_rendered() {
        let report = BuildReport {
            entries: vec![entry(
                "mumps",
                NodeOutcome::Failed {
                    error: "build step failed".to_string(),
                    exit_code: Some(2),
                    log_excerpt: Some("make: *** [all] Error 2".to_string()),
                    attempts: 1,
                },
            )],
            duration: Duration::ZERO,
        };
        let text = report.to_string();
        assert!(text.contains("[failed]    mumps@1.0: build step failed"));
        assert!(text.contains("      | make: *** [all] Error 2"));
        assert!(text.ends_with("0 installed, 0 reused, 1 failed, 0 skipped in 0.0s"));
    }

    #[test]
    fn test_outcome_json_is_tagged() {
        let outcome = NodeOutcome::Skipped {
            reason: SkipReason::Cancelled,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"]["reason"], "cancelled");
    }
}
