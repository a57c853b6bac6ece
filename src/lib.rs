#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # IMG.LY Watermark Removal Library
//!
//! A batch image restoration pipeline that keeps neural-network inference off the
//! caller's async executor. One long-lived worker thread owns the model; the host
//! side talks to it only through tagged request/response messages.
//!
//! ## Components
//!
//! - **Image Normalizer** ([`ImageNormalizer`]): decodes JPEG/PNG/WebP, enforces a
//!   decoded-size ceiling and resizes to an even-sized RGBA8 [`PixelBuffer`]
//! - **Inference Worker** ([`InferenceWorker`]): loads the model once and answers
//!   `ProcessImage` requests, returning every failure as a message
//! - **Worker Client** ([`WorkerClient`]): correlates responses with in-flight
//!   calls by request id and reports `NotReady` without touching the worker
//! - **Batch Controller** ([`BatchController`]): runs jobs one at a time, retries
//!   capacity failures once at reduced size and reports progress
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imgly_dewatermark::{BatchController, PipelineConfig, SourceImage};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder().max_dimension(1536).build()?;
//! let mut controller = BatchController::with_worker(config)?;
//!
//! let bytes = tokio::fs::read("photo.jpg").await?;
//! controller.add_source(SourceImage::from_named_bytes("photo.jpg", bytes));
//!
//! let summary = controller.run().await?;
//! for (name, result) in controller.completed_outputs() {
//!     println!("{name}: {}x{} (recovered: {})", result.width, result.height, result.recovered);
//! }
//! println!("{} done, {} failed", summary.done, summary.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Engines
//!
//! The worker builds its engine through a [`ModelLoader`]. [`DefaultModelLoader`]
//! picks one from [`ModelSource`]:
//!
//! - `Demo` (always available): pure-Rust placeholder network
//! - `Onnx` (feature `onnx`): ONNX Runtime with CUDA/CoreML/CPU providers
//! - `Tract` (feature `tract`): pure-Rust ONNX execution
//!
//! ### Feature Flags
//!
//! - `cli` (default): command-line host with progress bar and JSON output
//! - `onnx`: ONNX Runtime engine
//! - `tract`: Tract engine
//! - `tracing-json` / `tracing-files`: extra log formats for the CLI
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! imgly-dewatermark = { version = "0.1", default-features = false, features = ["onnx"] }
//! ```

pub mod backends;
pub mod batch;
#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod inference;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;
pub mod worker;

// Public API exports
pub use backends::{DefaultModelLoader, DemoEngine};
#[cfg(feature = "onnx")]
pub use backends::OnnxEngine;
#[cfg(feature = "tract")]
pub use backends::TractEngine;
pub use batch::BatchController;
pub use client::{InferenceClient, PendingResult, ReadinessState, WorkerClient};
pub use config::{
    EngineConfig, ExecutionProvider, ModelSource, OutputFormat, PipelineConfig,
    PipelineConfigBuilder, Quality,
};
pub use error::{DewatermarkError, ErrorKind, Result};
pub use inference::{EngineMemory, InferenceEngine, LoadContext, ModelLoader};
pub use services::{
    BatchSummary, ChannelProgressReporter, ConsoleProgressReporter, ImageNormalizer, JobStage,
    NoOpProgressReporter, NormalizeOptions, OutputFormatHandler, ProgressEvent, ProgressReporter,
    ProgressUpdate,
};
pub use types::{ImageJob, JobId, JobResult, JobStatus, PixelBuffer, SourceImage};
pub use utils::TensorValidator;
pub use worker::{InferenceWorker, ResourceTracker, WorkerRequest, WorkerResponse, WorkerState, WorkerTransport};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat, TracingGuard, TracingOutput};
