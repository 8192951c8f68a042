//! Formula Guard - Admission Control
//!
//! Rules produce structured violations.
//! The guard rejects on the first violation, before any workspace exists.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticSink};

/// Directives that can touch the filesystem, load code, or escape the engine.
pub const FORBIDDEN_DIRECTIVES: &[&str] = &[
    // file write
    "\\write",
    "\\immediate",
    "\\openout",
    "\\closeout",
    // external file inclusion
    "\\openin",
    "\\read",
    "\\input",
    "\\include",
    "\\verbatiminput",
    // package loading
    "\\usepackage",
    "\\RequirePackage",
    "\\documentclass",
    "\\loadclass",
    // engine escapes
    "\\special",
    "\\catcode",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Forbidden directive: {directive}")]
    ForbiddenDirective { directive: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardViolation {
    pub rule: String,
    pub directive: String,
    pub message: String,
}

/// Guard rule trait - produces violations
pub trait GuardRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, formula: &str) -> Option<GuardViolation>;
}

/// Plain, case-sensitive substring search over a fixed denylist.
pub struct DirectiveDenylistRule {
    directives: &'static [&'static str],
}

impl DirectiveDenylistRule {
    pub fn new() -> Self {
        Self {
            directives: FORBIDDEN_DIRECTIVES,
        }
    }
}

impl Default for DirectiveDenylistRule {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardRule for DirectiveDenylistRule {
    fn name(&self) -> &'static str {
        "directive_denylist"
    }

    fn check(&self, formula: &str) -> Option<GuardViolation> {
        self.directives
            .iter()
            .find(|directive| formula.contains(*directive))
            .map(|directive| GuardViolation {
                rule: self.name().to_string(),
                directive: directive.to_string(),
                message: format!("Formula uses forbidden directive {directive}"),
            })
    }
}

/// Guard orchestrates rules and reports rejections to the diagnostic sink
pub struct FormulaGuard {
    rules: Vec<Box<dyn GuardRule>>,
}

impl FormulaGuard {
    pub fn new() -> Self {
        Self {
            rules: vec![Box::new(DirectiveDenylistRule::new())],
        }
    }

    /// First violation found, if any. Pure: no diagnostics are emitted.
    pub fn inspect(&self, formula: &str) -> Option<GuardViolation> {
        self.rules.iter().find_map(|rule| rule.check(formula))
    }

    pub fn validate(
        &self,
        formula: &str,
        sink: Option<&Arc<dyn DiagnosticSink>>,
    ) -> Result<(), GuardError> {
        let Some(violation) = self.inspect(formula) else {
            return Ok(());
        };

        if let Some(sink) = sink {
            sink.record(
                Diagnostic::new("Formula rejected by guard")
                    .with("rule", violation.rule.as_str())
                    .with("directive", violation.directive.as_str())
                    .with("formula", formula),
            );
        }

        Err(GuardError::ForbiddenDirective {
            directive: violation.directive,
        })
    }
}

impl Default for FormulaGuard {
    fn default() -> Self {
        Self::new()
    }
}
