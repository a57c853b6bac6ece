//! Channel transport between the host and the worker thread

use crate::{
    error::{DewatermarkError, Result},
    worker::{
        inference_worker::InferenceWorker,
        protocol::{WorkerRequest, WorkerResponse},
    },
};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

const WORKER_THREAD_NAME: &str = "dewatermark-inference";

/// Host-side ends of the worker's message channels
///
/// Dropping the request sender is the shutdown signal: the worker finishes
/// the request in hand and its thread exits.
#[derive(Debug)]
pub struct WorkerTransport {
    requests: mpsc::UnboundedSender<WorkerRequest>,
    responses: mpsc::UnboundedReceiver<WorkerResponse>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerTransport {
    /// Move `worker` onto its own OS thread and connect to it
    ///
    /// # Errors
    /// - `Internal` when the OS refuses to spawn the thread
    pub fn spawn(worker: InferenceWorker) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker.run(request_rx, response_tx))
            .map_err(|e| DewatermarkError::internal(format!("Failed to spawn inference worker thread: {e}")))?;

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            thread: Some(thread),
        })
    }

    /// Transport over caller-supplied channels with no worker thread
    ///
    /// Lets a test play the worker's side of the protocol by hand.
    #[must_use]
    pub fn from_channels(
        requests: mpsc::UnboundedSender<WorkerRequest>,
        responses: mpsc::UnboundedReceiver<WorkerResponse>,
    ) -> Self {
        Self {
            requests,
            responses,
            thread: None,
        }
    }

    /// Split into the request sender, response receiver and worker thread handle
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<WorkerRequest>,
        mpsc::UnboundedReceiver<WorkerResponse>,
        Option<JoinHandle<()>>,
    ) {
        (self.requests, self.responses, self.thread)
    }
}
