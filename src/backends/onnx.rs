//! ONNX Runtime engine for restoration models
//!
//! Loads an `.onnx` file and runs it through ONNX Runtime with support for
//! multiple execution providers (CPU, CUDA, `CoreML`). Providers that are
//! requested but unavailable fall back to CPU with a warning.

use crate::config::ExecutionProvider;
use crate::error::{is_capacity_message, DewatermarkError, Result};
use crate::inference::{EngineMemory, InferenceEngine};
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::{self, value::Value};
use std::path::{Path, PathBuf};

/// ONNX Runtime engine
#[derive(Debug)]
pub struct OnnxEngine {
    model_path: PathBuf,
    model_data: Vec<u8>,
    intra_threads: usize,
    session: Option<Session>,
    provider: ExecutionProvider,
}

impl OnnxEngine {
    /// List all ONNX Runtime execution providers with availability status and descriptions
    ///
    /// Returns `(name, available, description)` tuples.
    pub fn list_providers() -> Vec<(String, bool, String)> {
        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false);

        log::debug!(
            "Execution providers: CUDA={}, CoreML={}",
            cuda_available,
            coreml_available
        );

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Read the model file; the session is built by `set_backend` or `ready`
    ///
    /// # Errors
    /// - `Model` when the file cannot be read
    pub fn from_file<P: AsRef<Path>>(path: P, intra_threads: usize) -> Result<Self> {
        let model_path = path.as_ref().to_path_buf();
        let model_data = std::fs::read(&model_path).map_err(|e| {
            DewatermarkError::model(format!(
                "Failed to read ONNX model {}: {e}",
                model_path.display()
            ))
        })?;

        log::info!(
            "Loaded ONNX model {} ({:.2} MB)",
            model_path.display(),
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        Ok(Self {
            model_path,
            model_data,
            intra_threads,
            session: None,
            provider: ExecutionProvider::Cpu,
        })
    }

    fn build_session(&self, provider: ExecutionProvider) -> Result<(Session, ExecutionProvider)> {
        let session_builder = Session::builder()
            .map_err(|e| DewatermarkError::model(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| {
                DewatermarkError::model(format!("Failed to set optimization level: {e}"))
            })?;

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false);

        let (session_builder, active) = match provider {
            ExecutionProvider::Auto if cuda_available => {
                log::info!("🚀 CUDA execution provider is available and will be used");
                (
                    session_builder
                        .with_execution_providers([CUDAExecutionProvider::default().build()])
                        .map_err(|e| {
                            DewatermarkError::model(format!("Failed to set CUDA execution provider: {e}"))
                        })?,
                    ExecutionProvider::Cuda,
                )
            },
            ExecutionProvider::Auto if coreml_available => {
                log::info!("🍎 CoreML execution provider is available and will be used");
                (
                    session_builder
                        .with_execution_providers([
                            CoreMLExecutionProvider::default().with_subgraphs(true).build()
                        ])
                        .map_err(|e| {
                            DewatermarkError::model(format!("Failed to set CoreML execution provider: {e}"))
                        })?,
                    ExecutionProvider::CoreMl,
                )
            },
            ExecutionProvider::Cuda if cuda_available => {
                log::info!("Using CUDA execution provider");
                (
                    session_builder
                        .with_execution_providers([CUDAExecutionProvider::default().build()])
                        .map_err(|e| {
                            DewatermarkError::model(format!("Failed to set CUDA execution provider: {e}"))
                        })?,
                    ExecutionProvider::Cuda,
                )
            },
            ExecutionProvider::CoreMl if coreml_available => {
                log::info!("🍎 Using CoreML execution provider (explicitly requested)");
                (
                    session_builder
                        .with_execution_providers([
                            CoreMLExecutionProvider::default().with_subgraphs(true).build()
                        ])
                        .map_err(|e| {
                            DewatermarkError::model(format!("Failed to set CoreML execution provider: {e}"))
                        })?,
                    ExecutionProvider::CoreMl,
                )
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                (session_builder, ExecutionProvider::Cpu)
            },
            requested => {
                log::warn!(
                    "⚠️ {} execution provider not available, falling back to CPU",
                    requested
                );
                (session_builder, ExecutionProvider::Cpu)
            },
        };

        let intra_threads = if self.intra_threads > 0 {
            self.intra_threads
        } else {
            std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4)
        };

        let session = session_builder
            .with_intra_threads(intra_threads)
            .map_err(|e| DewatermarkError::model(format!("Failed to set intra threads: {e}")))?
            .commit_from_memory(&self.model_data)
            .map_err(|e| {
                DewatermarkError::model(format!(
                    "Failed to create session from {}: {e}",
                    self.model_path.display()
                ))
            })?;

        log::debug!(
            "✅ ONNX Runtime session created ({} intra-op threads, provider {})",
            intra_threads,
            active
        );

        Ok((session, active))
    }

    fn inference_error(message: String) -> DewatermarkError {
        if is_capacity_message(&message) {
            DewatermarkError::capacity(message)
        } else {
            DewatermarkError::processing(message)
        }
    }
}

impl InferenceEngine for OnnxEngine {
    fn name(&self) -> &str {
        "onnx"
    }

    fn set_backend(&mut self, provider: ExecutionProvider) -> Result<ExecutionProvider> {
        let (session, active) = self.build_session(provider)?;
        self.session = Some(session);
        self.provider = active;
        Ok(active)
    }

    fn ready(&mut self) -> Result<()> {
        if self.session.is_none() {
            self.set_backend(ExecutionProvider::Auto)?;
        }
        Ok(())
    }

    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| DewatermarkError::internal("ONNX session not initialized"))?;

        let inference_start = instant::Instant::now();
        log::debug!("🚀 Starting inference with input shape: {:?}", input.dim());

        let input_value = Value::from_array(input.clone()).map_err(|e| {
            DewatermarkError::processing(format!("Failed to convert input tensor: {e}"))
        })?;

        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| Self::inference_error(format!("ONNX inference failed: {e}")))?;

        // Positional access avoids depending on the model's output names
        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| DewatermarkError::processing("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| DewatermarkError::processing("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| DewatermarkError::processing(format!("Failed to extract output tensor: {e}")))?;

        let output_shape = output_tensor.shape().to_vec();
        if output_shape.len() != 4 {
            return Err(DewatermarkError::processing(format!(
                "Expected 4D output tensor, got {}D",
                output_shape.len()
            )));
        }

        let output = Array4::from_shape_vec(
            (
                output_shape.first().copied().unwrap_or(1),
                output_shape.get(1).copied().unwrap_or(1),
                output_shape.get(2).copied().unwrap_or(1),
                output_shape.get(3).copied().unwrap_or(1),
            ),
            output_tensor.iter().copied().collect(),
        )
        .map_err(|e| DewatermarkError::processing(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "📊 Inference complete on {}: {:.2}ms",
            self.provider,
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(output)
    }

    fn memory(&self) -> EngineMemory {
        // ONNX Runtime owns its arena; nothing is held between calls on our side
        EngineMemory::default()
    }

    fn sweep(&mut self) {
        log::trace!("ONNX engine sweep requested; runtime manages its own arena");
    }
}
