//! Tracked tensor leases for the inference worker
//!
//! Every tensor the worker or an engine allocates during a call is wrapped in a
//! [`Tracked`] value. Dropping the wrapper returns its lease, so the live count
//! falls back to its baseline on every exit path, early returns included.

use ndarray::{ArrayBase, Dimension, OwnedRepr};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct TrackerState {
    live: AtomicUsize,
    live_bytes: AtomicU64,
    peak: AtomicUsize,
}

/// Point-in-time view of the tracker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub live: usize,
    pub live_bytes: u64,
}

/// Shared counter of live tensors; clones observe the same counts
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    state: Arc<TrackerState>,
}

impl ResourceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an allocation of `bytes`; released when the lease drops
    #[must_use]
    pub fn lease(&self, bytes: u64) -> TensorLease {
        let live = self.state.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.live_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.state.peak.fetch_max(live, Ordering::Relaxed);
        TensorLease {
            tracker: self.clone(),
            bytes,
        }
    }

    /// Wrap a value whose footprint is `bytes`
    #[must_use]
    pub fn track<T>(&self, value: T, bytes: u64) -> Tracked<T> {
        Tracked {
            value,
            lease: self.lease(bytes),
        }
    }

    /// Wrap an owned ndarray, sized from its element count
    #[must_use]
    pub fn track_array<A, D>(&self, array: ArrayBase<OwnedRepr<A>, D>) -> Tracked<ArrayBase<OwnedRepr<A>, D>>
    where
        D: Dimension,
    {
        let bytes = (array.len() * std::mem::size_of::<A>()) as u64;
        self.track(array, bytes)
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.state.live_bytes.load(Ordering::SeqCst)
    }

    /// Highest simultaneous live count seen
    #[must_use]
    pub fn peak_count(&self) -> usize {
        self.state.peak.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            live: self.live_count(),
            live_bytes: self.live_bytes(),
        }
    }

    fn release(&self, bytes: u64) {
        self.state.live.fetch_sub(1, Ordering::SeqCst);
        self.state.live_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

/// RAII handle for one tracked allocation
#[derive(Debug)]
pub struct TensorLease {
    tracker: ResourceTracker,
    bytes: u64,
}

impl TensorLease {
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for TensorLease {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

/// A value paired with its lease
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    lease: TensorLease,
}

impl<T> Tracked<T> {
    /// Release the lease and hand back the untracked value
    pub fn into_inner(self) -> T {
        let Self { value, lease } = self;
        drop(lease);
        value
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.lease.bytes()
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
