//! Render Configuration
//!
//! Toolchain command lines, the output scale factor and the primary stage
//! timeout, passed into the renderer at construction.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder substituted with the workspace base path in command templates.
pub const BASE_PLACEHOLDER: &str = "{base}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderConfig {
    /// Directory holding per-request workspaces
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Typesetting command; the workspace base is appended as last argument
    #[serde(default = "default_primary_command")]
    pub primary_command: String,
    #[serde(default = "default_vectorize_command_template")]
    pub vectorize_command_template: String,
    /// Legacy intermediate-to-raster command, used when no converter is set
    #[serde(default)]
    pub raster_command_template: Option<String>,
    /// Vector-to-raster converter; `{input}` is the SVG path, PNG on stdout
    #[serde(default)]
    pub raster_converter_command: Option<String>,
    /// Vectorizer coordinate units to device units
    #[serde(default = "default_output_scale")]
    pub output_scale: f64,
    /// Primary stage budget in seconds
    #[serde(default = "default_primary_timeout")]
    pub primary_timeout: f64,
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_primary_command() -> String {
    "latex -interaction=nonstopmode -halt-on-error".to_string()
}

fn default_vectorize_command_template() -> String {
    "dvisvgm --no-fonts --exact -o {base}.svg {base}.dvi".to_string()
}

fn default_output_scale() -> f64 {
    1.0
}

fn default_primary_timeout() -> f64 {
    8.0
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            primary_command: default_primary_command(),
            vectorize_command_template: default_vectorize_command_template(),
            raster_command_template: None,
            raster_converter_command: None,
            output_scale: default_output_scale(),
            primary_timeout: default_primary_timeout(),
        }
    }
}

impl RenderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.output_scale.is_finite() || self.output_scale <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "outputScale",
                reason: format!("must be a positive number, got {}", self.output_scale),
            });
        }
        if !self.primary_timeout.is_finite() || self.primary_timeout <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "primaryTimeout",
                reason: format!("must be a positive number, got {}", self.primary_timeout),
            });
        }
        if self.primary_command.split_whitespace().next().is_none() {
            return Err(ConfigError::Invalid {
                field: "primaryCommand",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.vectorize_command_template.contains(BASE_PLACEHOLDER) {
            return Err(ConfigError::Invalid {
                field: "vectorizeCommandTemplate",
                reason: format!("must contain {BASE_PLACEHOLDER}"),
            });
        }
        if let Some(template) = &self.raster_command_template {
            if !template.contains(BASE_PLACEHOLDER) {
                return Err(ConfigError::Invalid {
                    field: "rasterCommandTemplate",
                    reason: format!("must contain {BASE_PLACEHOLDER}"),
                });
            }
        }
        Ok(())
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.primary_timeout)
    }
}

/// Splits a command template on whitespace and fills in the base path.
pub fn expand_command(template: &str, base: &Path) -> Vec<String> {
    let base = base.to_string_lossy();
    template
        .split_whitespace()
        .map(|part| part.replace(BASE_PLACEHOLDER, &base))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.primary_timeout(), Duration::from_secs(8));
        assert_eq!(config.output_scale, 1.0);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RenderConfig =
            serde_json::from_str(r#"{"outputScale": 0.8, "primaryTimeout": 2.5}"#).unwrap();
        assert_eq!(config.output_scale, 0.8);
        assert_eq!(config.primary_timeout(), Duration::from_millis(2500));
        assert_eq!(config.primary_command, default_primary_command());
        assert!(config.raster_command_template.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = RenderConfig {
            primary_timeout: 0.0,
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RenderConfig {
            output_scale: f64::NAN,
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RenderConfig {
            vectorize_command_template: "dvisvgm out.svg".to_string(),
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_command_substitutes_base() {
        let args = expand_command("dvisvgm -o {base}.svg {base}.dvi", Path::new("/tmp/w1"));
        assert_eq!(args, vec!["dvisvgm", "-o", "/tmp/w1.svg", "/tmp/w1.dvi"]);
    }
}
