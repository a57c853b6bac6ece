//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::{Cli, CliEngine};
use crate::config::{ExecutionProvider, ModelSource, PipelineConfig};
use anyhow::{Context, Result};

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Convert CLI arguments to a [`PipelineConfig`]
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration from CLI arguments
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let execution_provider: ExecutionProvider = cli
            .execution_provider
            .parse()
            .context("Invalid execution provider")?;

        PipelineConfig::builder()
            .model(Self::model_source(cli)?)
            .execution_provider(execution_provider)
            .intra_threads(cli.threads)
            .max_dimension(cli.max_dimension)
            .memory_limit_bytes(cli.memory_limit_mb.saturating_mul(BYTES_PER_MIB))
            .recovery_divisor(cli.recovery_divisor)
            .output_format(cli.format.into())
            .jpeg_quality(cli.jpeg_quality)
            .build()
            .context("Invalid configuration")
    }

    fn model_source(cli: &Cli) -> Result<ModelSource> {
        match (cli.engine, &cli.model) {
            (CliEngine::Demo, None) => Ok(ModelSource::Demo),
            (CliEngine::Demo, Some(path)) => anyhow::bail!(
                "--model {} given but --engine is demo; pass --engine onnx or --engine tract",
                path.display()
            ),
            (CliEngine::Onnx, Some(path)) => Ok(ModelSource::Onnx(path.clone())),
            (CliEngine::Tract, Some(path)) => Ok(ModelSource::Tract(path.clone())),
            (CliEngine::Onnx | CliEngine::Tract, None) => {
                anyhow::bail!("--engine {:?} requires --model <FILE>", cli.engine)
            },
        }
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        cli.execution_provider
            .parse::<ExecutionProvider>()
            .context("Invalid execution provider")?;

        if !(1..=100).contains(&cli.jpeg_quality) {
            anyhow::bail!("JPEG quality must be between 1 and 100, got {}", cli.jpeg_quality);
        }
        if cli.memory_limit_mb == 0 {
            anyhow::bail!("Memory limit must be at least 1 MiB");
        }

        if let Some(model) = &cli.model {
            if !model.is_file() {
                anyhow::bail!("Model file not found: {}", model.display());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliOutputFormat;
    use crate::config::OutputFormat;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["imgly-dewatermark"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_cli_config_conversion() {
        let cli = parse(&["-f", "jpeg", "--jpeg-quality", "75", "--max-dimension", "1024", "in.png"]);
        assert_eq!(cli.format, CliOutputFormat::Jpeg);

        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.engine.model, ModelSource::Demo);
        assert_eq!(config.engine.execution_provider, ExecutionProvider::Auto);
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 75);
        assert_eq!(config.max_dimension, 1024);
        assert_eq!(config.recovery_max_dimension(), 256);
        assert_eq!(config.memory_limit_bytes, 1024 * BYTES_PER_MIB);
    }

    #[test]
    fn test_engine_requires_model() {
        let cli = parse(&["--engine", "tract", "in.png"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());

        let cli = parse(&["--engine", "onnx", "-m", "model.onnx", "in.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.engine.model, ModelSource::Onnx("model.onnx".into()));

        let cli = parse(&["-m", "model.onnx", "in.png"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }

    #[test]
    fn test_cli_validation() {
        let cli = parse(&["in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_ok());

        let cli = parse(&["-e", "tpu", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--jpeg-quality", "0", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());

        let cli = parse(&["--engine", "onnx", "-m", "/missing/model.onnx", "in.png"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_invalid_recovery_divisor_rejected() {
        let cli = parse(&["--recovery-divisor", "0", "in.png"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
