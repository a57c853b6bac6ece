//! Isolated inference worker
//!
//! The worker runs on a dedicated OS thread, owns the only engine instance,
//! and talks to the host exclusively through [`protocol`] messages.

pub mod inference_worker;
pub mod protocol;
pub mod resources;
pub mod transport;

pub use inference_worker::{InferenceWorker, WorkerState};
pub use protocol::{WorkerRequest, WorkerResponse};
pub use resources::{ResourceSnapshot, ResourceTracker, TensorLease, Tracked};
pub use transport::WorkerTransport;
