//! MathRender Core - Formula Render Pipeline
//!
//! # The Five Rules (Non-Negotiable)
//! 1. Guard Before Workspace
//! 2. Artifacts Decide Success, Exit Codes Do Not
//! 3. Every Workspace Is Cleaned Exactly Once
//! 4. Missing Metadata Degrades, Never Fails
//! 5. No Retries

pub mod assemble;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod guard;
pub mod hashing;
pub mod metadata;
pub mod output;
pub mod pipeline;
pub mod raster;
pub mod stage;
pub mod templates;
pub mod workspace;

pub use config::{ConfigError, RenderConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
pub use dispatch::PrerenderJob;
pub use guard::{FormulaGuard, GuardError};
pub use hashing::{cache_key, canonical_json};
pub use metadata::LayoutMetadata;
pub use output::OutputKind;
pub use pipeline::{CompilationPipeline, Formula, RenderError, RenderedAsset, Stage};
pub use raster::{CommandRasterConverter, RasterConverter, RasterError};
pub use stage::{StageCommand, StageOutcome};
pub use templates::{CompiledSource, DocumentTemplate, TemplateError, Templater};
pub use workspace::Workspace;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
