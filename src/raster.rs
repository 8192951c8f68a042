//! Raster Conversion
//!
//! Vector-to-raster collaborator. When none is configured the pipeline
//! falls back to the legacy intermediate-to-raster command.

use std::io::{self, ErrorKind};
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Placeholder for the SVG path in a converter command.
pub const INPUT_PLACEHOLDER: &str = "{input}";

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("raster converter unavailable: {0}")]
    NotFound(io::Error),
    #[error("raster converter failed to run: {0}")]
    Io(io::Error),
    #[error("raster converter failed (exit {exit_code:?}): {stderr}")]
    Cli {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("raster converter command is empty")]
    EmptyCommand,
}

pub trait RasterConverter: Send + Sync {
    fn convert(&self, svg_path: &Path) -> Result<Vec<u8>, RasterError>;
}

/// Runs a converter command that writes PNG bytes to stdout,
/// e.g. `rsvg-convert --format=png {input}`.
#[derive(Debug, Clone)]
pub struct CommandRasterConverter {
    template: String,
}

impl CommandRasterConverter {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

impl RasterConverter for CommandRasterConverter {
    fn convert(&self, svg_path: &Path) -> Result<Vec<u8>, RasterError> {
        let started_at = Instant::now();
        let input = svg_path.to_string_lossy();
        let mut argv: Vec<String> = self
            .template
            .split_whitespace()
            .map(|part| part.replace(INPUT_PLACEHOLDER, &input))
            .collect();
        if argv.is_empty() {
            return Err(RasterError::EmptyCommand);
        }
        if !self.template.contains(INPUT_PLACEHOLDER) {
            argv.push(input.into_owned());
        }

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| {
                warn!(
                    target = "mathrender::raster",
                    op = "raster::convert",
                    result = "error",
                    error_code = "spawn_cli",
                    error = %err,
                    "Failed to spawn raster converter"
                );
                if err.kind() == ErrorKind::NotFound {
                    RasterError::NotFound(err)
                } else {
                    RasterError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = "mathrender::raster",
                op = "raster::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "raster_cli",
                stderr = %stderr,
                "Raster converter failed"
            );
            return Err(RasterError::Cli { exit_code, stderr });
        }

        info!(
            target = "mathrender::raster",
            op = "raster::convert",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            png_bytes = output.stdout.len(),
            "Rasterized SVG"
        );
        Ok(output.stdout)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn make_executable(path: &PathBuf) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    #[test]
    fn test_converts_via_stdout() {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fake-rsvg");
        fs::write(&script, "#!/bin/sh\nprintf 'PNG:'\ncat \"$1\"\n").expect("write script");
        make_executable(&script);
        let svg = dir.path().join("a.svg");
        fs::write(&svg, "<svg/>").expect("write svg");

        let converter = CommandRasterConverter::new(format!("{} {{input}}", script.display()));
        let png = converter.convert(&svg).expect("converted");
        assert_eq!(png, b"PNG:<svg/>");
    }

    #[test]
    fn test_appends_input_without_placeholder() {
        let dir = TempDir::new().expect("temp dir");
        let svg = dir.path().join("b.svg");
        fs::write(&svg, "<svg>b</svg>").expect("write svg");

        let converter = CommandRasterConverter::new("cat");
        assert_eq!(converter.convert(&svg).expect("converted"), b"<svg>b</svg>");
    }

    #[test]
    fn test_surfaces_cli_errors() {
        let dir = TempDir::new().expect("temp dir");
        let script = dir.path().join("fail");
        fs::write(&script, "#!/bin/sh\necho boom >&2\nexit 7\n").expect("write script");
        make_executable(&script);

        let converter = CommandRasterConverter::new(script.display().to_string());
        match converter.convert(Path::new("/nonexistent.svg")) {
            Err(RasterError::Cli { exit_code, stderr }) => {
                assert_eq!(exit_code, Some(7));
                assert!(stderr.contains("boom"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_binary_is_not_found() {
        let converter = CommandRasterConverter::new("/nonexistent/rsvg-convert {input}");
        assert!(matches!(
            converter.convert(Path::new("x.svg")),
            Err(RasterError::NotFound(_))
        ));
    }
}
