//! Host-side client for the inference worker

pub mod correlation;
pub mod worker_client;

pub use correlation::{Completion, CompletionCallback, CorrelationTable, PendingCompletion};
pub use worker_client::{InferenceClient, PendingResult, ReadinessState, WorkerClient};
