//! Test utilities and mock engines for worker testing
//!
//! Mock implementations of `InferenceEngine` and `ModelLoader` that exercise
//! the worker without model files or external runtimes.

use crate::{
    config::ExecutionProvider,
    error::{DewatermarkError, Result},
    inference::{EngineMemory, InferenceEngine, LoadContext, ModelLoader},
    worker::resources::{ResourceTracker, Tracked},
};
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock engine with switchable failure modes
#[derive(Debug)]
pub struct MockEngine {
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<String>>>,
    sweeps: Arc<AtomicUsize>,
    tracker: ResourceTracker,
    /// Intermediates kept between calls until `sweep`
    cached: Vec<Tracked<Array4<f32>>>,
    should_fail_inference: bool,
    /// Fail with a capacity error when either side exceeds this
    capacity_limit: Option<usize>,
    /// Fail with a capacity-sounding message but no structured kind
    capacity_as_text: bool,
    wrong_shape: bool,
    cache_intermediates: bool,
    /// Fill the output with this value instead of echoing the input
    constant_output: Option<f32>,
    panic_on_predict: bool,
}

impl Clone for MockEngine {
    fn clone(&self) -> Self {
        Self {
            call_history: Arc::clone(&self.call_history),
            sweeps: Arc::clone(&self.sweeps),
            tracker: self.tracker.clone(),
            cached: Vec::new(),
            should_fail_inference: self.should_fail_inference,
            capacity_limit: self.capacity_limit,
            capacity_as_text: self.capacity_as_text,
            wrong_shape: self.wrong_shape,
            cache_intermediates: self.cache_intermediates,
            constant_output: self.constant_output,
            panic_on_predict: self.panic_on_predict,
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Identity engine that echoes its input
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_history: Arc::new(Mutex::new(Vec::new())),
            sweeps: Arc::new(AtomicUsize::new(0)),
            tracker: ResourceTracker::new(),
            cached: Vec::new(),
            should_fail_inference: false,
            capacity_limit: None,
            capacity_as_text: false,
            wrong_shape: false,
            cache_intermediates: false,
            constant_output: None,
            panic_on_predict: false,
        }
    }

    #[must_use]
    pub fn failing_inference() -> Self {
        let mut engine = Self::new();
        engine.should_fail_inference = true;
        engine
    }

    /// Engine that reports `Capacity` for inputs larger than `limit` on either side
    #[must_use]
    pub fn with_capacity_limit(limit: usize) -> Self {
        let mut engine = Self::new();
        engine.capacity_limit = Some(limit);
        engine
    }

    /// Like `with_capacity_limit`, but the failure is an unstructured message
    #[must_use]
    pub fn with_textual_capacity_limit(limit: usize) -> Self {
        let mut engine = Self::with_capacity_limit(limit);
        engine.capacity_as_text = true;
        engine
    }

    #[must_use]
    pub fn wrong_shape() -> Self {
        let mut engine = Self::new();
        engine.wrong_shape = true;
        engine
    }

    /// Engine that holds on to an intermediate tensor after every call
    #[must_use]
    pub fn caching() -> Self {
        let mut engine = Self::new();
        engine.cache_intermediates = true;
        engine
    }

    #[must_use]
    pub fn constant(value: f32) -> Self {
        let mut engine = Self::new();
        engine.constant_output = Some(value);
        engine
    }

    /// Engine whose `predict` panics after allocating its scratch tensor
    #[must_use]
    pub fn panicking() -> Self {
        let mut engine = Self::new();
        engine.panic_on_predict = true;
        engine
    }

    /// Get the call history for verification in tests
    pub fn get_call_history(&self) -> Vec<String> {
        self.call_history.lock().unwrap().clone()
    }

    /// Shared handle to the call history, usable after the engine moves
    pub fn history_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_history)
    }

    pub fn sweep_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.sweeps)
    }

    fn record(&self, call: String) {
        self.call_history.lock().unwrap().push(call);
    }
}

impl InferenceEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn set_backend(&mut self, provider: ExecutionProvider) -> Result<ExecutionProvider> {
        self.record(format!("set_backend:{}", provider));
        Ok(provider)
    }

    fn ready(&mut self) -> Result<()> {
        self.record("ready".to_string());
        Ok(())
    }

    fn predict(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, _, height, width) = input.dim();
        self.record(format!("predict:{}x{}", width, height));

        // Transient work tensor, released on every path below
        let _scratch = self.tracker.track_array(input.clone());

        assert!(!self.panic_on_predict, "mock engine panicked");

        if self.should_fail_inference {
            return Err(DewatermarkError::processing("Mock inference failure"));
        }

        if let Some(limit) = self.capacity_limit {
            if width > limit || height > limit {
                let message = format!(
                    "Requested texture size [{}x{}] greater than maximum texture size [{}x{}]",
                    width, height, limit, limit
                );
                return Err(if self.capacity_as_text {
                    DewatermarkError::processing(message)
                } else {
                    DewatermarkError::capacity(message)
                });
            }
        }

        if self.cache_intermediates {
            self.cached.push(self.tracker.track_array(input.clone()));
        }

        if self.wrong_shape {
            return Ok(Array4::zeros((1, 3, (height / 2).max(1), (width / 2).max(1))));
        }

        Ok(match self.constant_output {
            Some(value) => Array4::from_elem(input.dim(), value),
            None => input.clone(),
        })
    }

    fn memory(&self) -> EngineMemory {
        EngineMemory {
            num_tensors: self.cached.len(),
            num_bytes: self.cached.iter().map(Tracked::bytes).sum(),
        }
    }

    fn sweep(&mut self) {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        self.cached.clear();
    }
}

/// Loader that hands out clones of a template engine
#[derive(Debug)]
pub struct MockLoader {
    template: MockEngine,
    fail_with: Option<String>,
    loads: Arc<AtomicUsize>,
}

impl MockLoader {
    #[must_use]
    pub fn new(template: MockEngine) -> Self {
        Self {
            template,
            fail_with: None,
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Loader whose every load fails with `message`
    pub fn failing<S: Into<String>>(message: S) -> Self {
        let mut loader = Self::new(MockEngine::new());
        loader.fail_with = Some(message.into());
        loader
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl ModelLoader for MockLoader {
    fn load(&self, context: &LoadContext) -> Result<Box<dyn InferenceEngine>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(DewatermarkError::model(message.clone()));
        }

        let mut engine = self.template.clone();
        engine.tracker = context.tracker.clone();
        Ok(Box::new(engine))
    }

    fn available_engines(&self) -> Vec<&'static str> {
        vec!["mock"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn context(tracker: &ResourceTracker) -> LoadContext {
        LoadContext {
            config: EngineConfig::default(),
            tracker: tracker.clone(),
        }
    }

    #[test]
    fn test_mock_engine_echoes_input() {
        let mut engine = MockEngine::new();
        let input = Array4::<f32>::from_elem((1, 3, 2, 2), 0.25);
        assert_eq!(engine.predict(&input).unwrap(), input);
        assert_eq!(engine.get_call_history(), vec!["predict:2x2".to_string()]);
    }

    #[test]
    fn test_mock_engine_capacity_modes() {
        let input = Array4::<f32>::zeros((1, 3, 8, 16));

        let err = MockEngine::with_capacity_limit(8).predict(&input).unwrap_err();
        assert!(matches!(err, DewatermarkError::Capacity(_)));

        let err = MockEngine::with_textual_capacity_limit(8).predict(&input).unwrap_err();
        assert!(matches!(err, DewatermarkError::Processing(_)));
        assert!(err.is_capacity_related());

        assert!(MockEngine::with_capacity_limit(16).predict(&input).is_ok());
    }

    #[test]
    fn test_mock_engine_caching_and_sweep() {
        let tracker = ResourceTracker::new();
        let loader = MockLoader::new(MockEngine::caching());
        let mut engine = loader.load(&context(&tracker)).unwrap();

        engine.predict(&Array4::zeros((1, 3, 2, 2))).unwrap();
        assert_eq!(engine.memory().num_tensors, 1);
        assert_eq!(tracker.live_count(), 1);

        engine.sweep();
        assert_eq!(engine.memory(), EngineMemory::default());
        assert_eq!(tracker.live_count(), 0);
    }

    #[test]
    fn test_failing_loader() {
        let loader = MockLoader::failing("weights missing");
        let tracker = ResourceTracker::new();
        let err = loader.load(&context(&tracker)).err().unwrap();
        assert!(err.to_string().contains("weights missing"));
        assert_eq!(loader.load_count(), 1);
    }
}
