//! Built-in demonstration engine
//!
//! A pure-Rust stand-in for a real restoration network: it blends each pixel
//! with a 3x3 box-filtered copy of itself. Weights and intermediates are
//! registered with the worker's [`ResourceTracker`] so the cleanup contract is
//! exercised exactly as it would be with a GPU-backed engine.

use crate::{
    config::ExecutionProvider,
    error::{DewatermarkError, Result},
    inference::{EngineMemory, InferenceEngine},
    worker::resources::{ResourceTracker, Tracked},
};
use ndarray::{s, Array2, Array4, ArrayView2};

/// Blend factor between the input and its smoothed copy
const DEFAULT_STRENGTH: f32 = 0.5;

/// Residual smoothing placeholder network
#[derive(Debug)]
pub struct DemoEngine {
    tracker: ResourceTracker,
    kernel: Tracked<Array2<f32>>,
    strength: f32,
    provider: ExecutionProvider,
    /// Last smoothed surface, kept until the next sweep
    scratch: Option<Tracked<Array4<f32>>>,
}

impl DemoEngine {
    #[must_use]
    pub fn new(tracker: ResourceTracker) -> Self {
        Self::with_strength(tracker, DEFAULT_STRENGTH)
    }

    #[must_use]
    pub fn with_strength(tracker: ResourceTracker, strength: f32) -> Self {
        let kernel = tracker.track_array(Array2::from_elem((3, 3), 1.0 / 9.0));
        Self {
            tracker,
            kernel,
            strength: strength.clamp(0.0, 1.0),
            provider: ExecutionProvider::Cpu,
            scratch: None,
        }
    }

    /// 3x3 box filter over every plane, edges replicated
    fn smooth(&self, input: &Array4<f32>) -> Array4<f32> {
        let (_, _, height, width) = input.dim();
        let mut output = Array4::<f32>::zeros(input.raw_dim());

        for (mut out_image, image) in output.outer_iter_mut().zip(input.outer_iter()) {
            for (mut out_plane, plane) in out_image.outer_iter_mut().zip(image.outer_iter()) {
                let padded = edge_padded(&plane);
                for ((ky, kx), &weight) in self.kernel.indexed_iter() {
                    out_plane.scaled_add(weight, &padded.slice(s![ky..ky + height, kx..kx + width]));
                }
            }
        }

        output
    }
}

/// Copy of `plane` with a one-pixel border that repeats its edge values
fn edge_padded(plane: &ArrayView2<'_, f32>) -> Array2<f32> {
    let (height, width) = plane.dim();
    let mut padded = Array2::<f32>::zeros((height + 2, width + 2));
    padded.slice_mut(s![1..=height, 1..=width]).assign(plane);

    let top = padded.row(1).to_owned();
    padded.row_mut(0).assign(&top);
    let bottom = padded.row(height).to_owned();
    padded.row_mut(height + 1).assign(&bottom);

    // Columns last so the corners pick up the replicated rows
    let left = padded.column(1).to_owned();
    padded.column_mut(0).assign(&left);
    let right = padded.column(width).to_owned();
    padded.column_mut(width + 1).assign(&right);

    padded
}

impl InferenceEngine for DemoEngine {
    fn name(&self) -> &str {
        "demo"
    }

    fn set_backend(&mut self, provider: ExecutionProvider) -> Result<ExecutionProvider> {
        self.provider = match provider {
            ExecutionProvider::Auto | ExecutionProvider::Cpu => ExecutionProvider::Cpu,
            ExecutionProvider::Cuda | ExecutionProvider::CoreMl => {
                log::warn!(
                    "{} execution provider requested but the demo engine is CPU-only, falling back to CPU",
                    provider
                );
                ExecutionProvider::Cpu
            },
        };
        Ok(self.provider)
    }

    fn ready(&mut self) -> Result<()> {
        // Warm-up pass so the first real call does not pay for lazy setup
        let warmup = Array4::<f32>::zeros((1, 3, 8, 8));
        self.predict(&warmup)?;
        self.sweep();
        Ok(())
    }

    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, channels, height, width) = input.dim();
        if channels != 3 || height == 0 || width == 0 {
            return Err(DewatermarkError::processing(format!(
                "Demo engine expects a non-empty 3-channel tensor, got {:?}",
                input.dim()
            )));
        }

        let smoothed = self.tracker.track_array(self.smooth(input));

        let mut output = input.mapv(|v| v * (1.0 - self.strength));
        output.scaled_add(self.strength, &*smoothed);

        self.scratch = Some(smoothed);
        Ok(output)
    }

    fn memory(&self) -> EngineMemory {
        let scratch_bytes = self.scratch.as_ref().map_or(0, Tracked::bytes);
        EngineMemory {
            num_tensors: 1 + usize::from(self.scratch.is_some()),
            num_bytes: self.kernel.bytes() + scratch_bytes,
        }
    }

    fn sweep(&mut self) {
        self.scratch = None;
    }
}
