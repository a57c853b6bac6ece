//! The inference worker state machine
//!
//! The worker owns the single engine instance and answers one request at a
//! time. [`InferenceWorker::handle`] is synchronous so the state machine can
//! be driven directly in tests; [`InferenceWorker::run`] wraps it in a
//! blocking receive loop for the dedicated worker thread.

use crate::{
    config::{EngineConfig, ExecutionProvider, Quality},
    error::{DewatermarkError, Result},
    inference::{EngineMemory, InferenceEngine, LoadContext, ModelLoader},
    types::PixelBuffer,
    utils::TensorValidator,
    worker::{
        protocol::{WorkerRequest, WorkerResponse},
        resources::ResourceTracker,
    },
};
use instant::Instant;
use ndarray::{s, Array4, ArrayView3, Axis, Zip};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, span, warn, Level};

/// Model lifecycle of a worker
///
/// `LoadFailed` is terminal for the worker instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Unloaded,
    Loading,
    Loaded,
    LoadFailed(String),
}

/// Owns the model and serves [`WorkerRequest`]s
pub struct InferenceWorker {
    loader: Box<dyn ModelLoader>,
    config: EngineConfig,
    tracker: ResourceTracker,
    state: WorkerState,
    engine: Option<Box<dyn InferenceEngine>>,
    /// Engine accounting right after load; anything above is swept
    engine_baseline: EngineMemory,
    active_provider: Option<ExecutionProvider>,
}

impl std::fmt::Debug for InferenceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceWorker")
            .field("state", &self.state)
            .field("engine", &self.engine.as_ref().map(|engine| engine.name().to_string()))
            .field("active_provider", &self.active_provider)
            .finish_non_exhaustive()
    }
}

impl InferenceWorker {
    #[must_use]
    pub fn new(loader: Box<dyn ModelLoader>, config: EngineConfig) -> Self {
        Self::with_tracker(loader, config, ResourceTracker::new())
    }

    /// Create a worker that reports its tensors to an existing tracker
    #[must_use]
    pub fn with_tracker(loader: Box<dyn ModelLoader>, config: EngineConfig, tracker: ResourceTracker) -> Self {
        Self {
            loader,
            config,
            tracker,
            state: WorkerState::Unloaded,
            engine: None,
            engine_baseline: EngineMemory::default(),
            active_provider: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    #[must_use]
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Provider the engine reported after `LoadModel`
    #[must_use]
    pub fn active_provider(&self) -> Option<ExecutionProvider> {
        self.active_provider
    }

    /// Answer one request
    ///
    /// Every failure becomes an unsuccessful response, engine panics included.
    /// A panic while loading leaves the worker in `LoadFailed`.
    pub fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        let request_id = match &request {
            WorkerRequest::ProcessImage { id, .. } => Some(id.clone()),
            WorkerRequest::LoadModel => None,
        };

        panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(request)))
            .unwrap_or_else(|payload| self.recover_from_panic(request_id, panic_message(payload.as_ref())))
    }

    fn dispatch(&mut self, request: WorkerRequest) -> WorkerResponse {
        match request {
            WorkerRequest::LoadModel => self.load_model(),
            WorkerRequest::ProcessImage {
                id,
                buffer,
                quality,
            } => self.process_image(id, &buffer, quality),
        }
    }

    fn recover_from_panic(&mut self, request_id: Option<String>, message: String) -> WorkerResponse {
        error!(state = ?self.state, %message, "Engine panicked while handling a request");
        match request_id {
            Some(id) => {
                self.release_engine_memory();
                WorkerResponse::failed(id, &DewatermarkError::processing(format!("Engine panicked: {message}")))
            },
            None => {
                let message = format!("Engine panicked while loading: {message}");
                self.engine = None;
                self.state = WorkerState::LoadFailed(message.clone());
                WorkerResponse::model_failed(message)
            },
        }
    }

    fn load_model(&mut self) -> WorkerResponse {
        match &self.state {
            WorkerState::Loaded => {
                debug!("LoadModel on a loaded worker, keeping the existing model");
                return WorkerResponse::model_loaded();
            },
            WorkerState::LoadFailed(message) => return WorkerResponse::model_failed(message.clone()),
            WorkerState::Unloaded | WorkerState::Loading => {},
        }

        self.state = WorkerState::Loading;
        let load_start = Instant::now();

        match self.build_engine() {
            Ok((engine, provider)) => {
                self.engine_baseline = engine.memory();
                self.engine = Some(engine);
                self.active_provider = Some(provider);
                self.state = WorkerState::Loaded;
                info!(
                    model = %self.config.model.display_name(),
                    provider = %provider,
                    load_ms = load_start.elapsed().as_millis() as u64,
                    "Model loaded"
                );
                WorkerResponse::model_loaded()
            },
            Err(e) => {
                let message = e.to_string();
                warn!(model = %self.config.model.display_name(), error = %message, "Model failed to load");
                self.state = WorkerState::LoadFailed(message.clone());
                WorkerResponse::model_failed(message)
            },
        }
    }

    fn build_engine(&self) -> Result<(Box<dyn InferenceEngine>, ExecutionProvider)> {
        let context = LoadContext {
            config: self.config.clone(),
            tracker: self.tracker.clone(),
        };
        let mut engine = self.loader.load(&context)?;
        let provider = engine.set_backend(self.config.execution_provider)?;
        engine.ready()?;
        Ok((engine, provider))
    }

    #[instrument(skip(self, buffer), fields(width = buffer.width(), height = buffer.height()))]
    fn process_image(&mut self, id: String, buffer: &PixelBuffer, quality: Quality) -> WorkerResponse {
        if self.state != WorkerState::Loaded {
            return WorkerResponse::failed(id, &DewatermarkError::not_loaded());
        }

        let baseline = self.tracker.snapshot();
        let result = self.run_inference(buffer, quality);
        self.release_engine_memory();

        let after = self.tracker.snapshot();
        if after != baseline {
            warn!(
                baseline = baseline.live,
                live = after.live,
                leaked_bytes = after.live_bytes.saturating_sub(baseline.live_bytes),
                "Tracked tensors did not return to baseline"
            );
        }

        match result {
            Ok(output) => WorkerResponse::processed(id, output),
            Err(e) => {
                debug!(error = %e, "Inference request failed");
                WorkerResponse::failed(id, &e)
            },
        }
    }

    fn run_inference(&mut self, buffer: &PixelBuffer, quality: Quality) -> Result<PixelBuffer> {
        let (width, height) = buffer.dimensions();
        TensorValidator::validate_image_dimensions(width, height, quality)?;

        let engine = self.engine.as_mut().ok_or_else(DewatermarkError::not_loaded)?;

        let input = self.tracker.track_array(Self::buffer_to_tensor(buffer)?);
        let output = {
            let _span = span!(Level::INFO, "inference", engine = %engine.name(), width, height).entered();
            let inference_start = Instant::now();
            let output = self.tracker.track_array(engine.predict(&input)?);
            debug!(inference_ms = inference_start.elapsed().as_millis() as u64, "Engine call finished");
            output
        };

        TensorValidator::validate_output_matches(&input, &output)?;
        TensorValidator::validate_finite(&output)?;

        Self::tensor_to_buffer(&output, buffer)
    }

    /// Sweep the engine if it holds more tensors than it did after loading
    fn release_engine_memory(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            let memory = engine.memory();
            if memory.num_tensors > self.engine_baseline.num_tensors {
                debug!(
                    held = memory.num_tensors,
                    baseline = self.engine_baseline.num_tensors,
                    "Sweeping engine intermediates"
                );
                engine.sweep();
            }
        }
    }

    /// RGBA8 bytes → NCHW RGB tensor in `[0, 1]`
    fn buffer_to_tensor(buffer: &PixelBuffer) -> Result<Array4<f32>> {
        let rgba = Self::pixel_view(buffer)?;
        Ok(rgba
            .slice(s![.., .., ..3])
            .permuted_axes([2, 0, 1])
            .mapv(|value| f32::from(value) / 255.0)
            .insert_axis(Axis(0)))
    }

    /// NCHW RGB tensor → RGBA8 bytes, clamped to `[0, 1]` and rounded
    ///
    /// Alpha is carried over from the input buffer. The tensor must already
    /// match the buffer's shape.
    fn tensor_to_buffer(tensor: &Array4<f32>, source: &PixelBuffer) -> Result<PixelBuffer> {
        let mut rgba = Self::pixel_view(source)?.to_owned();
        let rgb = tensor.index_axis(Axis(0), 0).permuted_axes([1, 2, 0]);

        Zip::from(rgba.slice_mut(s![.., .., ..3]))
            .and(&rgb)
            .for_each(|byte, &value| *byte = (value.clamp(0.0, 1.0) * 255.0).round() as u8);

        let (width, height) = source.dimensions();
        PixelBuffer::new(width, height, rgba.into_raw_vec_and_offset().0)
    }

    /// `(height, width, 4)` view over a buffer's bytes
    fn pixel_view(buffer: &PixelBuffer) -> Result<ArrayView3<'_, u8>> {
        let shape = (buffer.height() as usize, buffer.width() as usize, 4);
        ArrayView3::from_shape(shape, buffer.data())
            .map_err(|e| DewatermarkError::internal(format!("pixel buffer does not match its dimensions: {e}")))
    }

    /// Serve requests until the request channel closes or the host stops listening
    pub fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
        responses: mpsc::UnboundedSender<WorkerResponse>,
    ) {
        info!("Inference worker started");
        while let Some(request) = requests.blocking_recv() {
            let kind = request.kind_name();
            let response = self.handle(request);
            if responses.send(response).is_err() {
                debug!(kind, "Response receiver dropped, stopping worker");
                break;
            }
        }
        info!("Inference worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
