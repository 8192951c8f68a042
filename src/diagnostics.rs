//! Diagnostic Sink
//!
//! Structured failure records for post-hoc debugging of formula-specific
//! failures. Sinks never fail the render that emits into them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

/// Receiver of diagnostic records.
pub trait DiagnosticSink: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

/// Forwards records to the `tracing` subscriber at WARN level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn record(&self, diagnostic: Diagnostic) {
        let context = serde_json::to_string(&diagnostic.context).unwrap_or_default();
        warn!(
            target = "mathrender::diagnostics",
            op = "diagnostics::record",
            context = %context,
            "{}",
            diagnostic.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_keys_sorted_in_json() {
        let d = Diagnostic::new("boom")
            .with("source", "x^2")
            .with("command", "latex");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(
            json,
            r#"{"message":"boom","context":{"command":"latex","source":"x^2"}}"#
        );
    }
}
