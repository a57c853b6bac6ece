//! Tract engine for restoration models
//!
//! Pure Rust ONNX execution with no native dependencies. Tract optimizes a
//! plan for a concrete input shape, so the engine keeps the plan for the most
//! recent shape and rebuilds it when the shape changes.

use crate::config::ExecutionProvider;
use crate::error::{DewatermarkError, Result};
use crate::inference::{EngineMemory, InferenceEngine};
use instant::Instant;
use ndarray::Array4;
use std::path::Path;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract engine
pub struct TractEngine {
    model: InferenceModel,
    /// Optimized plan and the `(height, width)` it was built for
    plan: Option<((usize, usize), TractModel)>,
}

impl std::fmt::Debug for TractEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractEngine")
            .field("planned_shape", &self.plan.as_ref().map(|(shape, _)| *shape))
            .finish_non_exhaustive()
    }
}

impl TractEngine {
    /// Parse an ONNX model file
    ///
    /// # Errors
    /// - `Model` when the file is missing or not a valid ONNX graph
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let load_start = Instant::now();

        let model = onnx().model_for_path(path).map_err(|e| {
            DewatermarkError::model(format!("Failed to load ONNX model {}: {e}", path.display()))
        })?;

        log::info!(
            "🚀 Tract engine parsed {} in {:.2}ms",
            path.display(),
            load_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Self { model, plan: None })
    }

    fn plan_for(&mut self, height: usize, width: usize) -> Result<&TractModel> {
        let stale = self
            .plan
            .as_ref()
            .map_or(true, |(shape, _)| *shape != (height, width));

        if stale {
            log::debug!("Building Tract plan for {}x{}", width, height);
            let plan = self
                .model
                .clone()
                .with_input_fact(0, f32::fact([1, 3, height, width]).into())
                .map_err(|e| DewatermarkError::model(format!("Failed to set input shape: {e}")))?
                .into_optimized()
                .map_err(|e| DewatermarkError::model(format!("Failed to optimize model: {e}")))?
                .into_runnable()
                .map_err(|e| {
                    DewatermarkError::model(format!("Failed to create runnable model: {e}"))
                })?;
            self.plan = Some(((height, width), plan));
        }

        self.plan
            .as_ref()
            .map(|(_, plan)| plan)
            .ok_or_else(|| DewatermarkError::internal("Tract plan missing after build"))
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &str {
        "tract"
    }

    fn set_backend(&mut self, provider: ExecutionProvider) -> Result<ExecutionProvider> {
        if provider != ExecutionProvider::Cpu && provider != ExecutionProvider::Auto {
            log::warn!("Tract runs on CPU only, ignoring requested {} provider", provider);
        }
        Ok(ExecutionProvider::Cpu)
    }

    fn ready(&mut self) -> Result<()> {
        Ok(())
    }

    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, _, height, width) = input.dim();
        let inference_start = Instant::now();
        let model = self.plan_for(height, width)?;

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| DewatermarkError::processing(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| DewatermarkError::processing("No output tensor found"))?
            .into_arc_tensor();

        let output_data = output_tensor.to_array_view::<f32>().map_err(|e| {
            DewatermarkError::processing(format!("Failed to convert output tensor: {e}"))
        })?;

        let output_shape = output_data.shape();
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
            output_data.iter().copied().collect(),
        )
        .map_err(|e| DewatermarkError::processing(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "✅ Tract inference completed in {:.2}ms",
            inference_start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(output)
    }

    fn memory(&self) -> EngineMemory {
        EngineMemory::default()
    }

    fn sweep(&mut self) {
        // Plans are rebuilt on demand; dropping the cached one frees its buffers
        self.plan = None;
    }
}
