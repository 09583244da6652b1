//! Startup gate
//!
//! Serializes the window between closing a container's reservation
//! listeners and the runtime binding the same host ports. Nothing else in
//! container startup runs under the gate.
//!
//! This only orders containers started through the same gate. A foreign
//! process can still bind a released port before the runtime does; that
//! race is accepted because the ports must be known before the container
//! exists.

use crate::port::PortReservation;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Mutual exclusion over port handoff. Clones share one gate.
#[derive(Debug, Clone, Default)]
pub struct StartupGate {
    lock: Arc<Mutex<()>>,
}

impl StartupGate {
    /// Create an isolated gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Release `reservation` and run `start` while holding the gate
    ///
    /// `start` must not have been polled yet; futures are lazy, so the
    /// runtime call it wraps is only issued once the listeners are closed.
    pub async fn hand_off<F, T>(&self, reservation: Option<PortReservation>, start: F) -> T
    where
        F: Future<Output = T>,
    {
        let _guard = self.lock.lock().await;

        if let Some(mut reservation) = reservation {
            let released = reservation.release();
            debug!(released, "Handed reserved ports to runtime");
        }

        start.await
    }
}
