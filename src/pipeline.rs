//! Compilation Pipeline - Single Entry Point
//!
//! guard → template → workspace → typeset → vectorize → [rasterize]
//!
//! CRITICAL: once a workspace exists it is cleaned exactly once, whatever
//! stage fails. Typesetting success is judged by the presence of the DVI
//! file, never by the exit code: latex exits nonzero on warnings it
//! recovers from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::assemble::assemble;
use crate::config::{expand_command, ConfigError, RenderConfig};
use crate::diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
use crate::guard::{FormulaGuard, GuardError};
use crate::hashing::cache_key;
use crate::metadata::{extract, LayoutMetadata};
use crate::output::OutputKind;
use crate::raster::{CommandRasterConverter, RasterConverter, RasterError};
use crate::stage::{self, StageCommand, StageOutcome};
use crate::templates::{CompiledSource, DocumentTemplate, TemplateError, Templater};
use crate::workspace::{Artifact, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Typeset,
    Vectorize,
    Rasterize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Typeset => "typeset",
            Self::Vectorize => "vectorize",
            Self::Rasterize => "rasterize",
        })
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Forbidden directive: {directive}")]
    ForbiddenDirective { directive: String },

    #[error("{stage} stage timed out after {timeout:?}")]
    StageTimeout { stage: Stage, timeout: Duration },

    #[error("{stage} stage failed to run: {reason}")]
    StageLaunchFailure { stage: Stage, reason: String },

    #[error("Invalid formula: {reason}")]
    InvalidFormula { reason: String, log: String },

    #[error("Templating failed: {0}")]
    Templating(#[from] TemplateError),

    #[error("Workspace error: {0}")]
    Workspace(io::Error),

    #[error("Failed to read {path}: {source}")]
    ArtifactRead { path: PathBuf, source: io::Error },

    #[error("Rasterization failed: {0}")]
    Raster(#[from] RasterError),
}

impl From<GuardError> for RenderError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::ForbiddenDirective { directive } => Self::ForbiddenDirective { directive },
        }
    }
}

/// Raw formula plus the representation requested for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub text: String,
    #[serde(default)]
    pub kind: OutputKind,
}

impl Formula {
    pub fn new(text: impl Into<String>, kind: OutputKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    /// Same formula, other representation.
    pub fn alternate(&self) -> Self {
        Self {
            text: self.text.clone(),
            kind: self.kind.alternate(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedAsset {
    pub kind: OutputKind,
    pub bytes: Vec<u8>,
    pub metadata: Option<LayoutMetadata>,
    pub cache_key: String,
    pub rendered_at: DateTime<Utc>,
}

/// The compilation pipeline - single entry point for all render operations
pub struct CompilationPipeline {
    config: RenderConfig,
    guard: FormulaGuard,
    templater: Box<dyn Templater>,
    raster: Option<Box<dyn RasterConverter>>,
    sink: Option<Arc<dyn DiagnosticSink>>,
}

impl CompilationPipeline {
    pub fn new(config: RenderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let raster: Option<Box<dyn RasterConverter>> = match &config.raster_converter_command {
            Some(command) => Some(Box::new(CommandRasterConverter::new(command.clone()))),
            None => None,
        };
        Ok(Self {
            config,
            guard: FormulaGuard::new(),
            templater: Box::new(DocumentTemplate::default()),
            raster,
            sink: Some(Arc::new(TracingSink)),
        })
    }

    pub fn with_templater(mut self, templater: impl Templater + 'static) -> Self {
        self.templater = Box::new(templater);
        self
    }

    pub fn with_raster_converter(mut self, converter: impl RasterConverter + 'static) -> Self {
        self.raster = Some(Box::new(converter));
        self
    }

    /// `None` disables diagnostics.
    pub fn with_diagnostics(mut self, sink: Option<Arc<dyn DiagnosticSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Guard check only. No workspace is created.
    pub fn validate_formula(&self, formula: &str) -> Result<(), RenderError> {
        Ok(self.guard.validate(formula, self.sink.as_ref())?)
    }

    pub fn render(&self, formula: &str, kind: OutputKind) -> Result<Vec<u8>, RenderError> {
        self.render_asset(&Formula::new(formula, kind))
            .map(|asset| asset.bytes)
    }

    /// Render a formula
    ///
    /// CRITICAL: the guard ALWAYS runs first, and the workspace is ALWAYS
    /// cleaned once it exists.
    pub fn render_asset(&self, formula: &Formula) -> Result<RenderedAsset, RenderError> {
        let started_at = Instant::now();
        self.validate_formula(&formula.text)?;

        let (workspace, source) = self.materialize(&formula.text)?;
        let result = self.compile(&workspace, &source, formula);
        workspace.cleanup();

        match &result {
            Ok(asset) => info!(
                target = "mathrender::pipeline",
                op = "pipeline::render",
                result = "ok",
                kind = %formula.kind,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                bytes = asset.bytes.len(),
                has_metadata = asset.metadata.is_some(),
                "Formula rendered"
            ),
            Err(err) => warn!(
                target = "mathrender::pipeline",
                op = "pipeline::render",
                result = "error",
                kind = %formula.kind,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "Formula render failed"
            ),
        }

        result
    }

    /// Expands the formula and writes it into a fresh workspace.
    fn materialize(&self, formula: &str) -> Result<(Workspace, CompiledSource), RenderError> {
        let source = self.templater.run(formula)?;
        let workspace = Workspace::create(&self.config.work_dir).map_err(|err| {
            self.fatal("Workspace allocation failed", None, "", RenderError::Workspace(err), &source)
        })?;
        if let Err(err) = workspace.write_source(&source.text) {
            workspace.cleanup();
            return Err(self.fatal(
                "Writing source failed",
                None,
                "",
                RenderError::Workspace(err),
                &source,
            ));
        }
        Ok((workspace, source))
    }

    fn compile(
        &self,
        workspace: &Workspace,
        source: &CompiledSource,
        formula: &Formula,
    ) -> Result<RenderedAsset, RenderError> {
        self.typeset(workspace, source)?;
        let svg = self.vectorize(workspace, source)?;

        let metadata = extract(&svg, source.has_baseline, self.config.output_scale);
        if metadata.is_none() {
            debug!(
                target = "mathrender::pipeline",
                op = "pipeline::extract",
                base = %workspace.base().display(),
                "No layout annotations in SVG; serving it unmodified"
            );
        }

        let bytes = match formula.kind {
            OutputKind::Vector => assemble(svg, metadata.as_ref()).into_bytes(),
            OutputKind::Raster => self.rasterize(workspace, source)?,
        };

        Ok(RenderedAsset {
            kind: formula.kind,
            bytes,
            metadata,
            cache_key: cache_key(&formula.text, formula.kind),
            rendered_at: Utc::now(),
        })
    }

    fn typeset(&self, workspace: &Workspace, source: &CompiledSource) -> Result<(), RenderError> {
        let command = StageCommand::from_argv(
            self.config
                .primary_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        )
        .ok_or_else(|| RenderError::StageLaunchFailure {
            stage: Stage::Typeset,
            reason: "empty command".to_string(),
        })?
        .arg(workspace.base().to_string_lossy())
        .current_dir(workspace.dir());

        let timeout = self.config.primary_timeout();
        let outcome = stage::run(&command, Some(timeout));
        if !matches!(outcome, StageOutcome::Completed { .. }) {
            return Err(self.stage_failure(Stage::Typeset, &command, outcome, source));
        }

        if !workspace.exists(Artifact::Intermediate) {
            let log = fs::read_to_string(workspace.path(Artifact::Log)).unwrap_or_default();
            let reason = tex_error_summary(&log);
            self.report(
                Diagnostic::new("Typesetting produced no output")
                    .with("command", command.command_line())
                    .with("reason", reason.as_str())
                    .with("output", outcome.output())
                    .with("log", log.as_str())
                    .with("source", source.text.as_str()),
            );
            return Err(RenderError::InvalidFormula { reason, log });
        }
        Ok(())
    }

    fn vectorize(&self, workspace: &Workspace, source: &CompiledSource) -> Result<String, RenderError> {
        let command = self.templated_command(
            Stage::Vectorize,
            &self.config.vectorize_command_template,
            workspace,
        )?;
        let outcome = stage::run(&command, None);
        if !matches!(outcome, StageOutcome::Completed { .. }) {
            return Err(self.stage_failure(Stage::Vectorize, &command, outcome, source));
        }

        let path = workspace.path(Artifact::Vector);
        fs::read_to_string(&path).map_err(|err| {
            self.fatal(
                "Vectorizer produced no output",
                Some(&command),
                outcome.output(),
                RenderError::ArtifactRead { path, source: err },
                source,
            )
        })
    }

    /// Converter first, legacy command second; empty output if neither.
    fn rasterize(&self, workspace: &Workspace, source: &CompiledSource) -> Result<Vec<u8>, RenderError> {
        if let Some(converter) = &self.raster {
            return converter
                .convert(&workspace.path(Artifact::Vector))
                .map_err(|err| {
                    self.fatal("Raster conversion failed", None, "", err.into(), source)
                });
        }

        let Some(template) = &self.config.raster_command_template else {
            warn!(
                target = "mathrender::pipeline",
                op = "pipeline::rasterize",
                result = "unconfigured",
                "Raster output requested but no raster path is configured"
            );
            return Ok(Vec::new());
        };

        let command = self.templated_command(Stage::Rasterize, template, workspace)?;
        let outcome = stage::run(&command, None);
        if !matches!(outcome, StageOutcome::Completed { .. }) {
            return Err(self.stage_failure(Stage::Rasterize, &command, outcome, source));
        }

        let path = workspace.path(Artifact::Raster);
        fs::read(&path).map_err(|err| {
            self.fatal(
                "Raster command produced no output",
                Some(&command),
                outcome.output(),
                RenderError::ArtifactRead { path, source: err },
                source,
            )
        })
    }

    fn templated_command(
        &self,
        stage: Stage,
        template: &str,
        workspace: &Workspace,
    ) -> Result<StageCommand, RenderError> {
        StageCommand::from_argv(expand_command(template, workspace.base()))
            .map(|command| command.current_dir(workspace.dir()))
            .ok_or_else(|| RenderError::StageLaunchFailure {
                stage,
                reason: "empty command".to_string(),
            })
    }

    /// Maps a non-completed outcome to its error, reporting full context.
    fn stage_failure(
        &self,
        stage: Stage,
        command: &StageCommand,
        outcome: StageOutcome,
        source: &CompiledSource,
    ) -> RenderError {
        let output = outcome.output().to_string();
        let err = match outcome {
            StageOutcome::TimedOut { timeout } => RenderError::StageTimeout { stage, timeout },
            StageOutcome::LaunchFailed { reason } => RenderError::StageLaunchFailure { stage, reason },
            StageOutcome::Crashed { .. } => RenderError::StageLaunchFailure {
                stage,
                reason: "terminated by signal".to_string(),
            },
            StageOutcome::Completed { exit_code, .. } => RenderError::StageLaunchFailure {
                stage,
                reason: format!("unexpected completion with exit code {exit_code}"),
            },
        };
        self.fatal(&format!("{stage} stage failed"), Some(command), &output, err, source)
    }

    /// Reports a fatal error with whatever context is at hand, then returns it.
    fn fatal(
        &self,
        message: &str,
        command: Option<&StageCommand>,
        output: &str,
        err: RenderError,
        source: &CompiledSource,
    ) -> RenderError {
        let mut diagnostic = Diagnostic::new(message)
            .with("error", err.to_string())
            .with("source", source.text.as_str());
        if let Some(command) = command {
            diagnostic = diagnostic.with("command", command.command_line());
        }
        if !output.is_empty() {
            diagnostic = diagnostic.with("output", output);
        }
        self.report(diagnostic);
        err
    }

    fn report(&self, diagnostic: Diagnostic) {
        if let Some(sink) = &self.sink {
            sink.record(diagnostic);
        }
    }
}

/// First `! ...` error line of a TeX log, if any.
fn tex_error_summary(log: &str) -> String {
    log.lines()
        .find_map(|line| line.strip_prefix("! "))
        .map(|line| line.trim().to_string())
        .unwrap_or_else(|| "typesetting produced no output".to_string())
}

impl Default for CompilationPipeline {
    fn default() -> Self {
        Self {
            config: RenderConfig::default(),
            guard: FormulaGuard::new(),
            templater: Box::new(DocumentTemplate::default()),
            raster: None,
            sink: Some(Arc::new(TracingSink)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tex_error_summary_picks_first_error() {
        let log = "This is TeX\n! Undefined control sequence.\nl.5 \\foo\n! Emergency stop.\n";
        assert_eq!(tex_error_summary(log), "Undefined control sequence.");
        assert_eq!(tex_error_summary(""), "typesetting produced no output");
    }

    #[test]
    fn test_formula_alternate_keeps_text() {
        let formula = Formula::new("x", OutputKind::Vector);
        let alt = formula.alternate();
        assert_eq!(alt.text, "x");
        assert_eq!(alt.kind, OutputKind::Raster);
    }

    #[test]
    fn test_guard_error_maps_to_forbidden_directive() {
        let err: RenderError = GuardError::ForbiddenDirective {
            directive: "\\input".to_string(),
        }
        .into();
        assert!(matches!(err, RenderError::ForbiddenDirective { directive } if directive == "\\input"));
    }
}
