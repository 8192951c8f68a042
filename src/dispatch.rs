//! Pre-render Dispatch Contract
//!
//! After serving one representation, the caller may ask a background worker
//! to render the other one so it is already cached. Only the message shape
//! lives here; the transport does not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hashing::{cache_key, canonical_json};
use crate::output::OutputKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerenderJob {
    pub formula: String,
    pub kind: OutputKind,
    pub cache_key: String,
    pub requested_at: DateTime<Utc>,
}

impl PrerenderJob {
    pub fn new(formula: &str, kind: OutputKind) -> Self {
        Self {
            formula: formula.to_string(),
            kind,
            cache_key: cache_key(formula, kind),
            requested_at: Utc::now(),
        }
    }

    /// Job for the representation that was *not* just served.
    pub fn for_alternate(formula: &str, served: OutputKind) -> Self {
        Self::new(formula, served.alternate())
    }

    /// One line of canonical JSON.
    pub fn to_wire(&self) -> Result<String, serde_json::Error> {
        canonical_json(self)
    }

    pub fn from_wire(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternate_job_targets_other_kind() {
        let job = PrerenderJob::for_alternate(r"\alpha", OutputKind::Vector);
        assert_eq!(job.kind, OutputKind::Raster);
        assert_eq!(job.cache_key, cache_key(r"\alpha", OutputKind::Raster));
    }

    #[test]
    fn test_wire_format_is_single_sorted_line() {
        let job = PrerenderJob::new("a+b", OutputKind::Raster);
        let wire = job.to_wire().unwrap();
        assert!(!wire.contains('\n'));
        assert!(wire.starts_with(r#"{"cacheKey":"#));
        assert!(wire.contains(r#""kind":"raster""#));
        assert_eq!(PrerenderJob::from_wire(&format!("{wire}\n")).unwrap(), job);
    }
}
