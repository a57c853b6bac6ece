//! Configuration types for dewatermark pipeline operations

use crate::error::{DewatermarkError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default longest-side ceiling applied by the normalizer
pub const DEFAULT_MAX_DIMENSION: u32 = 2048;

/// Default decoded-size ceiling (`width * height * 4`), 1 GiB
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Default divisor applied to `max_dimension` for the capacity recovery pass
pub const DEFAULT_RECOVERY_DIVISOR: u32 = 4;

/// Smallest side the inference worker accepts
pub const MIN_DIMENSION: u32 = 32;

/// Largest side the inference worker accepts at standard quality
pub const MAX_DIMENSION: u32 = 4096;

/// Largest side the inference worker accepts at reduced quality
pub const REDUCED_MAX_DIMENSION: u32 = 1024;

/// Execution provider options for the compute backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = DewatermarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(DewatermarkError::invalid_config(format!(
                "Unknown execution provider '{}'. Expected one of: auto, cpu, cuda, coreml",
                other
            ))),
        }
    }
}

/// Encoded format for finished job results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossless PNG with alpha channel
    #[default]
    Png,
    /// JPEG (alpha dropped)
    Jpeg,
    /// Lossless WebP with alpha channel
    WebP,
}

/// Inference quality setting; lowers the worker's dimension ceiling when reduced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Standard,
    Reduced,
}

impl Quality {
    /// Largest side the worker accepts for this quality
    #[must_use]
    pub fn max_dimension(self) -> u32 {
        match self {
            Self::Standard => MAX_DIMENSION,
            Self::Reduced => REDUCED_MAX_DIMENSION,
        }
    }
}

/// Which model the inference worker loads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "engine", content = "path", rename_all = "lowercase")]
pub enum ModelSource {
    /// Built-in residual placeholder network (pure Rust, no model file)
    #[default]
    Demo,
    /// ONNX model executed by ONNX Runtime
    Onnx(PathBuf),
    /// ONNX model executed by Tract
    Tract(PathBuf),
}

impl ModelSource {
    /// Human-readable label for logs
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Demo => "demo".to_string(),
            Self::Onnx(path) => format!("onnx:{}", path.display()),
            Self::Tract(path) => format!("tract:{}", path.display()),
        }
    }
}

/// Settings the worker needs to build and configure its model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Model to load
    pub model: ModelSource,
    /// Requested compute backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
}

/// Configuration for a batch pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Model and compute backend used by the inference worker
    pub engine: EngineConfig,

    /// Longest side after normalization
    pub max_dimension: u32,

    /// Ceiling for `width * height * 4` of decoded sources
    pub memory_limit_bytes: u64,

    /// Recovery pass normalizes at `max_dimension / recovery_divisor`
    pub recovery_divisor: u32,

    /// Encoding applied to finished results
    pub output_format: OutputFormat,

    /// JPEG quality (1-100, only used for JPEG output)
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            recovery_divisor: DEFAULT_RECOVERY_DIVISOR,
            output_format: OutputFormat::default(),
            jpeg_quality: 90,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use imgly_dewatermark::{ExecutionProvider, OutputFormat, PipelineConfig};
    ///
    /// let config = PipelineConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .output_format(OutputFormat::Jpeg)
    ///     .jpeg_quality(85)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.jpeg_quality, 85);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Longest side used by the capacity recovery pass
    ///
    /// Never exceeds the reduced-quality ceiling the worker enforces.
    #[must_use]
    pub fn recovery_max_dimension(&self) -> u32 {
        (self.max_dimension / self.recovery_divisor.max(1)).min(Quality::Reduced.max_dimension())
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - `max_dimension` outside 32-4096
    /// - `recovery_divisor` of zero or a recovery dimension below 32
    /// - `memory_limit_bytes` of zero
    /// - JPEG quality outside 1-100
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&self.max_dimension) {
            return Err(DewatermarkError::config_value_error(
                "max dimension",
                self.max_dimension,
                "32-4096",
                Some(DEFAULT_MAX_DIMENSION),
            ));
        }

        if self.recovery_divisor == 0 || self.recovery_max_dimension() < MIN_DIMENSION {
            return Err(DewatermarkError::config_value_error(
                "recovery divisor",
                self.recovery_divisor,
                &format!("1-{}", self.max_dimension / MIN_DIMENSION),
                Some(DEFAULT_RECOVERY_DIVISOR),
            ));
        }

        if self.memory_limit_bytes == 0 {
            return Err(DewatermarkError::config_value_error(
                "memory limit",
                self.memory_limit_bytes,
                "> 0 bytes",
                Some(DEFAULT_MEMORY_LIMIT_BYTES),
            ));
        }

        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(DewatermarkError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "1-100",
                Some(90),
            ));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the model source
    #[must_use]
    pub fn model(mut self, model: ModelSource) -> Self {
        self.config.engine.model = model;
        self
    }

    /// Set execution provider
    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.engine.execution_provider = provider;
        self
    }

    /// Set number of intra-op threads
    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.engine.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.config.max_dimension = max_dimension;
        self
    }

    #[must_use]
    pub fn memory_limit_bytes(mut self, limit: u64) -> Self {
        self.config.memory_limit_bytes = limit;
        self
    }

    #[must_use]
    pub fn recovery_divisor(mut self, divisor: u32) -> Self {
        self.config.recovery_divisor = divisor;
        self
    }

    /// Set output format
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality.clamp(1, 100);
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// Any failure reported by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
