//! Host-side adapter for the inference worker
//!
//! [`WorkerClient`] owns the worker transport, issues `LoadModel` as soon as
//! it is constructed, and turns `ProcessingComplete` messages back into call
//! results through a [`CorrelationTable`].

use crate::{
    client::correlation::{Completion, CorrelationTable, PendingCompletion},
    config::{EngineConfig, Quality},
    error::{DewatermarkError, Result},
    inference::ModelLoader,
    types::PixelBuffer,
    worker::{
        protocol::{completion_result, WorkerRequest, WorkerResponse},
        InferenceWorker, WorkerTransport,
    },
};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable model state of the worker behind a client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessState {
    /// A worker is attached and has not been terminated
    pub initialized: bool,
    /// `LoadModel` is outstanding
    pub loading: bool,
    pub model_loaded: bool,
    /// Load failure reported by the worker
    pub last_error: Option<String>,
}

impl ReadinessState {
    /// Check whether a `ProcessImage` may be sent
    ///
    /// # Errors
    /// - `NotReady` describing why not
    pub fn check(&self) -> Result<()> {
        if !self.initialized {
            return Err(DewatermarkError::not_ready("Worker not initialized"));
        }
        if let Some(error) = &self.last_error {
            return Err(DewatermarkError::not_ready(format!("Model failed to load: {}", error)));
        }
        if !self.model_loaded {
            return Err(DewatermarkError::not_ready("Model is still loading"));
        }
        Ok(())
    }
}

/// Awaitable result of a submitted `ProcessImage`
#[derive(Debug)]
pub struct PendingResult {
    id: String,
    receiver: oneshot::Receiver<Completion>,
}

impl PendingResult {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for PendingResult {
    type Output = Result<PixelBuffer>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(DewatermarkError::processing("Worker terminated before responding"))
            })
        })
    }
}

/// The inference surface the batch controller depends on
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Wait for model loading to finish
    ///
    /// # Errors
    /// - `Model` when loading failed
    /// - `NotReady` when the worker is gone
    async fn wait_until_ready(&self) -> Result<()>;

    /// Run inference on one buffer under a caller-chosen id
    ///
    /// # Errors
    /// - `NotReady` synchronously when the model is not loaded
    /// - Any error reported by the worker for this call
    async fn process_image(&self, id: &str, buffer: PixelBuffer, quality: Quality) -> Result<PixelBuffer>;
}

/// Adapter that correlates worker responses with in-flight calls
#[derive(Debug)]
pub struct WorkerClient {
    requests: Option<mpsc::UnboundedSender<WorkerRequest>>,
    correlation: Arc<CorrelationTable>,
    state_tx: Arc<watch::Sender<ReadinessState>>,
    state: watch::Receiver<ReadinessState>,
    dispatcher: Option<JoinHandle<()>>,
    worker_thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerClient {
    /// Start a worker thread for `loader` and connect to it
    ///
    /// # Errors
    /// - `Internal` when no Tokio runtime is running or the thread cannot start
    pub fn spawn(loader: Box<dyn ModelLoader>, config: EngineConfig) -> Result<Self> {
        let transport = WorkerTransport::spawn(InferenceWorker::new(loader, config))?;
        Self::new(transport)
    }

    /// Attach to a transport, start the response dispatcher and request the model
    ///
    /// # Errors
    /// - `Internal` when called outside a Tokio runtime
    pub fn new(transport: WorkerTransport) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DewatermarkError::internal(format!("WorkerClient requires a Tokio runtime: {e}")))?;

        let (requests, responses, worker_thread) = transport.into_parts();
        let correlation = Arc::new(CorrelationTable::new());
        let (state_tx, state) = watch::channel(ReadinessState {
            initialized: true,
            loading: true,
            model_loaded: false,
            last_error: None,
        });
        let state_tx = Arc::new(state_tx);

        let dispatcher = runtime.spawn(Self::dispatch(
            responses,
            Arc::clone(&correlation),
            Arc::clone(&state_tx),
        ));

        let client = Self {
            requests: Some(requests),
            correlation,
            state_tx,
            state,
            dispatcher: Some(dispatcher),
            worker_thread,
        };

        client.send(WorkerRequest::LoadModel)?;
        debug!("Requested model load");
        Ok(client)
    }

    /// Persistent response loop; ends when the worker side closes
    async fn dispatch(
        mut responses: mpsc::UnboundedReceiver<WorkerResponse>,
        correlation: Arc<CorrelationTable>,
        state: Arc<watch::Sender<ReadinessState>>,
    ) {
        while let Some(response) = responses.recv().await {
            match response {
                WorkerResponse::ModelLoaded {
                    success,
                    error_message,
                } => {
                    if success {
                        info!("Worker reported model loaded");
                    } else {
                        warn!(error = ?error_message, "Worker reported model load failure");
                    }
                    state.send_modify(|s| {
                        s.loading = false;
                        s.model_loaded = success;
                        s.last_error = if success {
                            None
                        } else {
                            Some(error_message.unwrap_or_else(|| "Unknown load error".to_string()))
                        };
                    });
                },
                WorkerResponse::ProcessingComplete {
                    id,
                    success,
                    buffer,
                    error_message,
                    error_kind,
                } => {
                    let completion = completion_result(success, buffer, error_message, error_kind);
                    correlation.resolve(&id, completion);
                },
            }
        }

        state.send_modify(|s| {
            s.initialized = false;
            s.loading = false;
        });
        let failed = correlation.fail_all(|| DewatermarkError::processing("Worker terminated before responding"));
        if failed > 0 {
            warn!(failed, "Worker channel closed with calls in flight");
        }
    }

    /// Current readiness snapshot
    #[must_use]
    pub fn status(&self) -> ReadinessState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.check_ready().is_ok()
    }

    /// Fail fast unless the model is loaded
    ///
    /// # Errors
    /// - `NotReady` with "Worker not initialized", "Model is still loading" or
    ///   the load failure
    pub fn check_ready(&self) -> Result<()> {
        if self.requests.is_none() {
            return Err(DewatermarkError::not_ready("Worker not initialized"));
        }
        self.state.borrow().check()
    }

    /// Number of calls awaiting a response
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.correlation.len()
    }

    /// Register and send a `ProcessImage`, returning a future for its result
    ///
    /// Readiness is checked before anything is sent.
    ///
    /// # Errors
    /// - `NotReady` when the model is not loaded
    /// - `Processing` when `id` is already in flight
    pub fn submit(&self, id: &str, buffer: PixelBuffer, quality: Quality) -> Result<PendingResult> {
        self.check_ready()?;
        let (sender, receiver) = oneshot::channel();
        self.dispatch_request(id, buffer, quality, PendingCompletion::Channel(sender))?;
        Ok(PendingResult {
            id: id.to_string(),
            receiver,
        })
    }

    /// Callback form of `process_image`; `callback` runs once on the dispatcher task
    ///
    /// # Errors
    /// - Same synchronous failures as [`WorkerClient::submit`]; the callback is
    ///   not invoked in that case
    pub fn process_image_with<F>(&self, id: &str, buffer: PixelBuffer, quality: Quality, callback: F) -> Result<()>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.check_ready()?;
        self.dispatch_request(id, buffer, quality, PendingCompletion::Callback(Box::new(callback)))
    }

    fn dispatch_request(
        &self,
        id: &str,
        buffer: PixelBuffer,
        quality: Quality,
        completion: PendingCompletion,
    ) -> Result<()> {
        self.correlation.register(id, completion)?;
        if let Err(e) = self.send(WorkerRequest::process_image(id, buffer, quality)) {
            self.correlation.cancel(id);
            return Err(e);
        }
        Ok(())
    }

    fn send(&self, request: WorkerRequest) -> Result<()> {
        let sender = self
            .requests
            .as_ref()
            .ok_or_else(|| DewatermarkError::not_ready("Worker not initialized"))?;
        sender
            .send(request)
            .map_err(|_| DewatermarkError::not_ready("Worker not initialized"))
    }

    /// Shut the worker down; calls still in flight fail
    ///
    /// Pending calls are resolved with "Worker terminated before responding"
    /// rather than left unresolved, so no awaiting task hangs on disposal.
    pub fn terminate(&mut self) {
        if self.requests.take().is_none() {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
        let failed = self
            .correlation
            .fail_all(|| DewatermarkError::processing("Worker terminated before responding"));
        self.state_tx.send_modify(|s| {
            s.initialized = false;
            s.loading = false;
        });
        // The worker thread exits on its own once it sees the closed channel
        drop(self.worker_thread.take());
        info!(failed, "Worker terminated");
    }
}

impl Drop for WorkerClient {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[async_trait]
impl InferenceClient for WorkerClient {
    async fn wait_until_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !s.loading || !s.initialized)
            .await
            .map(|s| s.clone())
            .map_err(|_| DewatermarkError::not_ready("Worker not initialized"))?;

        if let Some(error) = settled.last_error {
            return Err(DewatermarkError::model(format!("Model failed to load: {}", error)));
        }
        if !settled.initialized || self.requests.is_none() {
            return Err(DewatermarkError::not_ready("Worker not initialized"));
        }
        Ok(())
    }

    async fn process_image(&self, id: &str, buffer: PixelBuffer, quality: Quality) -> Result<PixelBuffer> {
        self.submit(id, buffer, quality)?.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockEngine, MockLoader};
    use std::sync::Mutex;

    fn buffer() -> PixelBuffer {
        PixelBuffer::new(32, 32, vec![100; 32 * 32 * 4]).unwrap()
    }

    fn manual_client() -> (
        WorkerClient,
        mpsc::UnboundedReceiver<WorkerRequest>,
        mpsc::UnboundedSender<WorkerResponse>,
    ) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let client = WorkerClient::new(WorkerTransport::from_channels(request_tx, response_rx)).unwrap();
        (client, request_rx, response_tx)
    }

    #[test]
    fn test_requires_runtime() {
        let (request_tx, _request_rx) = mpsc::unbounded_channel();
        let (_response_tx, response_rx) = mpsc::unbounded_channel();
        let err = WorkerClient::new(WorkerTransport::from_channels(request_tx, response_rx)).unwrap_err();
        assert!(matches!(err, DewatermarkError::Internal(_)));
    }

    #[tokio::test]
    async fn test_load_model_sent_on_construction() {
        let (client, mut requests, _responses) = manual_client();
        assert_eq!(requests.recv().await, Some(WorkerRequest::LoadModel));

        let status = client.status();
        assert!(status.loading && !status.model_loaded && status.initialized);
    }

    #[tokio::test]
    async fn test_not_ready_while_loading() {
        let (client, mut requests, _responses) = manual_client();
        requests.recv().await;

        let err = client.submit("a", buffer(), Quality::Standard).unwrap_err();
        assert!(matches!(err, DewatermarkError::NotReady(ref m) if m == "Model is still loading"));
        assert!(requests.try_recv().is_err(), "nothing may be sent before the model is loaded");
    }

    #[tokio::test]
    async fn test_not_initialized_after_terminate() {
        let (mut client, _requests, _responses) = manual_client();
        client.terminate();
        let err = client.submit("a", buffer(), Quality::Standard).unwrap_err();
        assert!(matches!(err, DewatermarkError::NotReady(ref m) if m == "Worker not initialized"));
        assert!(client.wait_until_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_load_failure_reported_by_wait() {
        let (client, _requests, responses) = manual_client();
        responses.send(WorkerResponse::model_failed("weights missing")).unwrap();

        let err = client.wait_until_ready().await.unwrap_err();
        assert!(matches!(err, DewatermarkError::Model(_)));
        assert!(err.to_string().contains("weights missing"));

        let err = client.check_ready().unwrap_err();
        assert!(err.to_string().contains("Model failed to load: weights missing"));
    }

    #[tokio::test]
    async fn test_duplicate_response_resolves_once() {
        let (client, mut requests, responses) = manual_client();
        responses.send(WorkerResponse::model_loaded()).unwrap();
        client.wait_until_ready().await.unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        client
            .process_image_with("dup", buffer(), Quality::Standard, move |completion| {
                sink.lock().unwrap().push(completion.is_ok());
            })
            .unwrap();

        assert_eq!(requests.recv().await, Some(WorkerRequest::LoadModel));
        assert!(matches!(requests.recv().await, Some(WorkerRequest::ProcessImage { ref id, .. }) if id == "dup"));

        responses.send(WorkerResponse::processed("dup", buffer())).unwrap();
        responses.send(WorkerResponse::processed("dup", buffer())).unwrap();

        // A later call round-trips after both duplicates have been dispatched
        let pending = client.submit("after", buffer(), Quality::Standard).unwrap();
        responses.send(WorkerResponse::processed("after", buffer())).unwrap();
        pending.await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec![true]);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_worker_error_kind_is_preserved() {
        let (client, _requests, responses) = manual_client();
        responses.send(WorkerResponse::model_loaded()).unwrap();
        client.wait_until_ready().await.unwrap();

        let pending = client.submit("big", buffer(), Quality::Standard).unwrap();
        responses
            .send(WorkerResponse::failed("big", &DewatermarkError::capacity("exceeds maximum texture size")))
            .unwrap();

        let err = pending.await.unwrap_err();
        assert!(matches!(err, DewatermarkError::Capacity(_)));
        assert!(err.is_capacity_related());
    }

    #[tokio::test]
    async fn test_channel_close_fails_pending_calls() {
        let (client, _requests, responses) = manual_client();
        responses.send(WorkerResponse::model_loaded()).unwrap();
        client.wait_until_ready().await.unwrap();

        let pending = client.submit("orphan", buffer(), Quality::Standard).unwrap();
        drop(responses);

        let err = pending.await.unwrap_err();
        assert!(err.to_string().contains("Worker terminated before responding"));
    }

    #[tokio::test]
    async fn test_terminate_resolves_pending_calls() {
        let (mut client, _requests, responses) = manual_client();
        responses.send(WorkerResponse::model_loaded()).unwrap();
        client.wait_until_ready().await.unwrap();

        let pending = client.submit("in-flight", buffer(), Quality::Standard).unwrap();
        client.terminate();

        let err = pending.await.unwrap_err();
        assert!(err.to_string().contains("Worker terminated before responding"));
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_rejected() {
        let (client, _requests, responses) = manual_client();
        responses.send(WorkerResponse::model_loaded()).unwrap();
        client.wait_until_ready().await.unwrap();

        let _first = client.submit("same", buffer(), Quality::Standard).unwrap();
        assert!(client.submit("same", buffer(), Quality::Standard).is_err());
        assert_eq!(client.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_end_to_end_with_spawned_worker() {
        let client = WorkerClient::spawn(Box::new(MockLoader::new(MockEngine::new())), EngineConfig::default())
            .unwrap();
        client.wait_until_ready().await.unwrap();
        assert!(client.is_ready());

        let output = client.process_image("e2e", buffer(), Quality::Standard).await.unwrap();
        assert_eq!(output, buffer());
    }
}
