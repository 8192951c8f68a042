//! Output Kind
//!
//! Which representation of a formula the caller asked for.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested representation of a rendered formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// SVG document with embedded layout metadata
    Vector,
    /// PNG bytes
    Raster,
}

impl Default for OutputKind {
    fn default() -> Self {
        Self::Vector
    }
}

impl OutputKind {
    /// The other representation, used when scheduling a pre-render.
    pub fn alternate(self) -> Self {
        match self {
            Self::Vector => Self::Raster,
            Self::Raster => Self::Vector,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Vector => "svg",
            Self::Raster => "png",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Vector => "image/svg+xml",
            Self::Raster => "image/png",
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "svg" | "vector" => Ok(Self::Vector),
            "png" | "raster" => Ok(Self::Raster),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alternate_flips() {
        assert_eq!(OutputKind::Vector.alternate(), OutputKind::Raster);
        assert_eq!(OutputKind::Raster.alternate(), OutputKind::Vector);
    }

    #[test]
    fn test_parse_accepts_extension_and_name() {
        assert_eq!("SVG".parse::<OutputKind>().unwrap(), OutputKind::Vector);
        assert_eq!("raster".parse::<OutputKind>().unwrap(), OutputKind::Raster);
        assert!("gif".parse::<OutputKind>().is_err());
    }
}
