//! Request/response correlation for in-flight worker calls
//!
//! Each pending call is registered under its request id and resolved at most
//! once. Resolving removes the entry, so the table never grows past the
//! number of calls actually in flight.

use crate::error::{DewatermarkError, Result};
use crate::types::PixelBuffer;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Outcome delivered to a pending call
pub type Completion = Result<PixelBuffer>;

/// Callback form of a pending completion
pub type CompletionCallback = Box<dyn FnOnce(Completion) + Send + 'static>;

/// How a pending call wants its completion delivered
pub enum PendingCompletion {
    Channel(oneshot::Sender<Completion>),
    Callback(CompletionCallback),
}

impl PendingCompletion {
    fn deliver(self, completion: Completion) {
        match self {
            // The awaiting side may have given up; nothing left to notify
            Self::Channel(sender) => {
                let _ = sender.send(completion);
            },
            Self::Callback(callback) => callback(completion),
        }
    }
}

impl std::fmt::Debug for PendingCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Channel(_) => write!(f, "PendingCompletion::Channel"),
            Self::Callback(_) => write!(f, "PendingCompletion::Callback"),
        }
    }
}

/// Map from request id to its pending completion
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingCompletion>>,
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending call under `id`
    ///
    /// # Errors
    /// - `Processing` when `id` is already in flight
    pub fn register(&self, id: &str, completion: PendingCompletion) -> Result<()> {
        let mut pending = self.lock()?;
        if pending.contains_key(id) {
            return Err(DewatermarkError::processing(format!(
                "Request id '{}' is already in flight",
                id
            )));
        }
        pending.insert(id.to_string(), completion);
        Ok(())
    }

    /// Resolve and remove the call registered under `id`
    ///
    /// Returns `false` for unknown or already-resolved ids; the completion is
    /// dropped in that case.
    pub fn resolve(&self, id: &str, completion: Completion) -> bool {
        let entry = match self.lock() {
            Ok(mut pending) => pending.remove(id),
            Err(e) => {
                tracing::error!(error = %e, "Correlation table unavailable");
                None
            },
        };

        match entry {
            Some(pending) => {
                pending.deliver(completion);
                true
            },
            None => {
                tracing::warn!(id, "Dropping response for unknown or already resolved request");
                false
            },
        }
    }

    /// Remove a registration without delivering anything
    pub fn cancel(&self, id: &str) -> bool {
        self.lock().map(|mut pending| pending.remove(id).is_some()).unwrap_or(false)
    }

    /// Fail every pending call with a fresh error from `make_error`
    pub fn fail_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> DewatermarkError,
    {
        let drained: Vec<PendingCompletion> = match self.lock() {
            Ok(mut pending) => pending.drain().map(|(_, completion)| completion).collect(),
            Err(_) => Vec::new(),
        };

        let count = drained.len();
        for completion in drained {
            completion.deliver(Err(make_error()));
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map(|pending| pending.len()).unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.lock().map(|pending| pending.contains_key(id)).unwrap_or(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, PendingCompletion>>> {
        self.pending
            .lock()
            .map_err(|_| DewatermarkError::internal("Correlation table lock poisoned"))
    }
}
