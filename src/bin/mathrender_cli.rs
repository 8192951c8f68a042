//! MathRender CLI - Bridge interface for the HTTP front end
//!
//! Commands: render, check, metadata, prerender-job
//! Outputs JSON to stdout, logs to stderr
//! Returns non-zero on failure

use base64::Engine as _;
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use mathrender_core::{
    metadata, CompilationPipeline, DocumentTemplate, OutputKind, PrerenderJob, RenderConfig,
    RenderError,
};

#[derive(Parser)]
#[command(name = "mathrender-cli")]
#[command(about = "MathRender CLI - LaTeX formula to SVG/PNG")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON render config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a JSON document template
    #[arg(short, long)]
    template: Option<PathBuf>,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a formula
    Render {
        /// LaTeX formula
        #[arg(short, long)]
        formula: String,

        /// svg or png
        #[arg(long, default_value = "svg")]
        format: OutputKind,

        /// Write the image here instead of embedding it in the JSON output
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run the formula guard only
    Check {
        #[arg(short, long)]
        formula: String,
    },

    /// Extract layout metadata from an SVG file
    Metadata {
        /// SVG produced by the vectorizer
        #[arg(long)]
        svg: PathBuf,

        /// Treat the formula as display-style
        #[arg(long)]
        no_baseline: bool,
    },

    /// Print the pre-render job for the other format
    PrerenderJob {
        #[arg(short, long)]
        formula: String,

        /// Format that was just served
        #[arg(long, default_value = "svg")]
        format: OutputKind,
    },
}

fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

fn error_code(err: &RenderError) -> &'static str {
    match err {
        RenderError::ForbiddenDirective { .. } => "forbidden_directive",
        RenderError::StageTimeout { .. } => "stage_timeout",
        RenderError::StageLaunchFailure { .. } => "stage_launch_failure",
        RenderError::InvalidFormula { .. } => "invalid_formula",
        RenderError::Templating(_) => "templating_failure",
        RenderError::Workspace(_) | RenderError::ArtifactRead { .. } => "io",
        RenderError::Raster(_) => "raster_failure",
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    let output = serde_json::json!({
        "success": false,
        "error": error.to_string(),
    });
    println!("{}", serde_json::to_string(&output).unwrap());
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    let config = match &cli.config {
        Some(path) => match RenderConfig::load(path) {
            Ok(c) => c,
            Err(e) => return fail(format!("Failed to load config: {e}")),
        },
        None => RenderConfig::default(),
    };

    let pipeline = match CompilationPipeline::new(config) {
        Ok(p) => p,
        Err(e) => return fail(e),
    };
    let pipeline = match &cli.template {
        Some(path) => match DocumentTemplate::load(path) {
            Ok(t) => pipeline.with_templater(t),
            Err(e) => return fail(format!("Failed to load template: {e}")),
        },
        None => pipeline,
    };

    match cli.command {
        Commands::Render {
            formula,
            format,
            out,
        } => {
            let asset = match pipeline.render_asset(&mathrender_core::Formula::new(formula, format))
            {
                Ok(a) => a,
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "code": error_code(&e),
                        "error": e.to_string(),
                    });
                    println!("{}", serde_json::to_string(&output).unwrap());
                    return ExitCode::from(2); // Render failure
                }
            };

            if asset.bytes.is_empty() {
                return fail(format!("No {} output produced; raster path not configured", format));
            }

            let mut output = serde_json::json!({
                "success": true,
                "format": format.extension(),
                "mimeType": format.mime_type(),
                "cacheKey": asset.cache_key,
                "metadata": asset.metadata,
                "renderedAt": asset.rendered_at,
            });
            match out {
                Some(path) => {
                    if let Err(e) = fs::write(&path, &asset.bytes) {
                        return fail(format!("Failed to write {}: {e}", path.display()));
                    }
                    output["path"] = serde_json::json!(path);
                }
                None => {
                    output["dataBase64"] = serde_json::json!(
                        base64::engine::general_purpose::STANDARD.encode(&asset.bytes)
                    );
                }
            }
            println!("{}", serde_json::to_string_pretty(&output).unwrap());
            ExitCode::SUCCESS
        }

        Commands::Check { formula } => match pipeline.validate_formula(&formula) {
            Ok(()) => {
                println!(r#"{{"valid": true}}"#);
                ExitCode::SUCCESS
            }
            Err(e) => {
                let output = serde_json::json!({
                    "valid": false,
                    "error": e.to_string(),
                });
                println!("{}", serde_json::to_string(&output).unwrap());
                ExitCode::from(2) // Guard rejection
            }
        },

        Commands::Metadata { svg, no_baseline } => {
            let text = match fs::read_to_string(&svg) {
                Ok(t) => t,
                Err(e) => return fail(format!("Failed to read {}: {e}", svg.display())),
            };
            let meta = metadata::extract(&text, !no_baseline, pipeline.config().output_scale);
            let output = serde_json::json!({
                "success": true,
                "metadata": meta,
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap());
            ExitCode::SUCCESS
        }

        Commands::PrerenderJob { formula, format } => {
            match PrerenderJob::for_alternate(&formula, format).to_wire() {
                Ok(line) => {
                    println!("{line}");
                    ExitCode::SUCCESS
                }
                Err(e) => fail(e),
            }
        }
    }
}
