//! Admission gate bounding concurrent generation calls.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Semaphore, SemaphorePermit};

use crate::error::GenerationError;

/// Default number of generation calls allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 5;

/// Counting gate in front of the remote service.
///
/// Wraps a [`Semaphore`] and tracks how many permits are held right now and
/// the highest number ever held at once.
#[derive(Debug)]
pub struct AdmissionGate {
    semaphore: Semaphore,
    capacity: usize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl AdmissionGate {
    /// Creates a gate with `capacity` permits. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity),
            capacity,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Waits for a permit. The permit is returned when the guard is dropped.
    pub async fn acquire(&self) -> Result<AdmissionPermit<'_>, GenerationError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| {
                GenerationError::RequestFailed("admission gate closed".to_string())
            })?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        Ok(AdmissionPermit {
            gate: self,
            _permit: permit,
        })
    }

    /// Maximum number of concurrent holders.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at the same time since creation.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_GENERATIONS)
    }
}

/// Guard for one admitted call.
#[derive(Debug)]
pub struct AdmissionPermit<'a> {
    gate: &'a AdmissionGate,
    _permit: SemaphorePermit<'a>,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        // Runs before the semaphore permit field is released.
        self.gate.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
