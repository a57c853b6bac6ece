//! Watermark removal CLI tool
//!
//! Command-line host for the batch pipeline: collects image files, runs them
//! through an in-process inference worker and writes the results.

use super::config::CliConfigBuilder;
use super::reporter::{JsonLinesReporter, ProgressBarReporter};
use crate::{
    backends::DefaultModelLoader,
    batch::BatchController,
    config::OutputFormat,
    inference::ModelLoader,
    services::{OutputFormatHandler, ProgressReporter},
    tracing_config::{spans, TracingConfig, TracingFormat},
    types::{mime_from_extension, JobId, JobStatus, SourceImage},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn, Instrument};

/// Extensions the pipeline can decode
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Watermark removal CLI tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "imgly-dewatermark")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required_unless_present = "show_providers")]
    pub input: Vec<String>,

    /// Output directory [default: next to each input]
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
    pub format: CliOutputFormat,

    /// Inference engine
    #[arg(long, value_enum, default_value_t = CliEngine::Demo)]
    pub engine: CliEngine,

    /// Path to an ONNX model file (required for the onnx and tract engines)
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, default_value = "auto")]
    pub execution_provider: String,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = 90)]
    pub jpeg_quality: u8,

    /// Longest side of the normalized image in pixels (32-4096)
    #[arg(long, default_value_t = crate::config::DEFAULT_MAX_DIMENSION)]
    pub max_dimension: u32,

    /// Decoded-size ceiling per image in MiB
    #[arg(long, default_value_t = 1024)]
    pub memory_limit_mb: u64,

    /// Divisor applied to the max dimension for the capacity recovery pass
    #[arg(long, default_value_t = crate::config::DEFAULT_RECOVERY_DIVISOR)]
    pub recovery_divisor: u32,

    /// Number of inference threads (0 = auto-detect)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Emit progress as JSON lines on stdout instead of a progress bar
    #[arg(long)]
    pub json: bool,

    /// Show available engines and execution providers and exit
    #[arg(long)]
    pub show_providers: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Webp => OutputFormat::WebP,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliEngine {
    /// Built-in placeholder network
    Demo,
    /// ONNX Runtime
    Onnx,
    /// Tract (pure Rust ONNX)
    Tract,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing = TracingConfig::new()
        .with_verbosity(cli.verbose)
        .with_format(if cli.json { TracingFormat::Compact } else { TracingFormat::Console })
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;
    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    let files = collect_input_files(&cli)?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }

    let output_dir = prepare_output_dir(cli.output.as_deref())?;
    info!(
        files = files.len(),
        engine = %config.engine.model.display_name(),
        provider = %config.engine.execution_provider,
        "Starting watermark removal"
    );

    let reporter: Box<dyn ProgressReporter> = if cli.json {
        Box::new(JsonLinesReporter::new())
    } else {
        Box::new(ProgressBarReporter::new(files.len() as u64))
    };

    let output_format = config.output_format;
    let span = spans::batch_run(files.len(), &config.engine.model.display_name());
    let mut controller = BatchController::with_worker(config)
        .context("Failed to start inference worker")?
        .with_reporter(reporter);

    let mut inputs: HashMap<JobId, PathBuf> = HashMap::with_capacity(files.len());
    for path in files {
        let source = read_source(&path).await?;
        inputs.insert(controller.add_source(source), path);
    }

    let summary = controller
        .run()
        .instrument(span)
        .await
        .context("Model failed to load")?;

    let written = write_outputs(&controller, &inputs, output_dir.as_deref(), output_format)
        .instrument(spans::export(summary.done))
        .await?;

    for job in controller.jobs().iter().filter(|job| job.status() == JobStatus::Error) {
        warn!(name = job.name(), error = job.error().unwrap_or_default(), "Image failed");
    }

    info!(
        written,
        failed = summary.failed,
        recovered = summary.recovered,
        "Processed {} image(s) in {:.2}s",
        summary.total,
        summary.elapsed_ms as f64 / 1000.0
    );

    if summary.has_failures() {
        anyhow::bail!("{} of {} image(s) failed", summary.failed, summary.total);
    }
    Ok(())
}

/// Write every Done job's result; returns the number of files written
async fn write_outputs(
    controller: &BatchController,
    inputs: &HashMap<JobId, PathBuf>,
    output_dir: Option<&Path>,
    format: OutputFormat,
) -> Result<usize> {
    let mut written = 0;
    for job in controller.jobs() {
        let (Some(result), Some(input)) = (job.result(), inputs.get(&job.id())) else {
            continue;
        };
        let output_path = generate_output_path(input, output_dir, format);
        tokio::fs::write(&output_path, &result.data)
            .await
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        debug!(output = %output_path.display(), recovered = result.recovered, "Wrote result");
        written += 1;
    }
    Ok(written)
}

fn show_provider_diagnostics() {
    println!("Available engines: {}", DefaultModelLoader.available_engines().join(", "));

    #[cfg(feature = "onnx")]
    {
        println!("ONNX Runtime execution providers:");
        for (name, available, description) in crate::backends::OnnxEngine::list_providers() {
            let marker = if available { "✓" } else { "✗" };
            println!("  {} {:<8} {}", marker, name, description);
        }
    }

    #[cfg(not(feature = "onnx"))]
    println!("ONNX Runtime not compiled in. Rebuild with --features onnx for GPU providers");
}

/// Expand the CLI inputs into a sorted, de-duplicated file list
fn collect_input_files(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for input in &cli.input {
        let path = PathBuf::from(input);
        if path.is_file() {
            if is_image_file(&path) {
                files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!("Input path does not exist or is not accessible: {}", path.display());
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Find all image files in a directory
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && is_image_file(path) && matches_pattern(path, pattern) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Check if file is a supported image based on extension
fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Check if the file name matches the given glob pattern
fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| glob::Pattern::new(pat).is_ok_and(|p| p.matches(name))),
        None => true,
    }
}

fn prepare_output_dir(output: Option<&Path>) -> Result<Option<PathBuf>> {
    let Some(dir) = output else {
        return Ok(None);
    };
    if dir.is_file() {
        anyhow::bail!("Output path exists and is a file, not a directory: {}", dir.display());
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    Ok(Some(dir.to_path_buf()))
}

async fn read_source(path: &Path) -> Result<SourceImage> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
    let mime_type = mime_from_extension(&name).map(str::to_string);
    Ok(SourceImage::new(name, mime_type, data))
}

/// `{stem}_clean.{ext}` in `output_dir`, or next to the input
fn generate_output_path(input_path: &Path, output_dir: Option<&Path>, format: OutputFormat) -> PathBuf {
    let stem = input_path.file_stem().unwrap_or_default();
    let dir = output_dir.unwrap_or_else(|| input_path.parent().unwrap_or(Path::new(".")));

    dir.join(format!(
        "{}_clean.{}",
        stem.to_string_lossy(),
        OutputFormatHandler::get_extension(format)
    ))
}
