//! Inference engine abstraction and model loading

use crate::{
    config::{EngineConfig, ExecutionProvider},
    error::Result,
    worker::resources::ResourceTracker,
};
use ndarray::Array4;

/// Tensor accounting reported by an engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMemory {
    /// Tensors currently held by the engine
    pub num_tensors: usize,
    /// Bytes held by those tensors
    pub num_bytes: u64,
}

/// Trait for inference engines owned by the worker
///
/// Input and output tensors are NCHW, RGB, values in `[0, 1]`. Engines must
/// return the same spatial shape they were given.
pub trait InferenceEngine: Send {
    /// Short engine name for logs
    fn name(&self) -> &str;

    /// Configure the compute backend, returning the provider actually in use
    ///
    /// # Errors
    /// - Backend configuration failures
    fn set_backend(&mut self, provider: ExecutionProvider) -> Result<ExecutionProvider>;

    /// Block until the engine is ready for inference
    ///
    /// # Errors
    /// - Warm-up or compilation failures
    fn ready(&mut self) -> Result<()>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - Model inference failures
    /// - Hardware capacity exhaustion
    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Tensors the engine currently holds
    fn memory(&self) -> EngineMemory;

    /// Release cached intermediates
    fn sweep(&mut self);
}

/// Everything a loader needs to build an engine inside the worker
#[derive(Debug, Clone)]
pub struct LoadContext {
    pub config: EngineConfig,
    /// Tracker the engine registers its own tensors with
    pub tracker: ResourceTracker,
}

/// Builds the worker's single engine instance
///
/// Called on the worker thread, once per successful `LoadModel`.
pub trait ModelLoader: Send {
    /// Create the engine described by `context.config`
    ///
    /// # Errors
    /// - Missing or unreadable model files
    /// - Engines not compiled into this build
    fn load(&self, context: &LoadContext) -> Result<Box<dyn InferenceEngine>>;

    /// Engine names this loader can build
    fn available_engines(&self) -> Vec<&'static str>;
}
