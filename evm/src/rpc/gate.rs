//! Bounds the number of in-flight requests, serving waiters by priority.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::oneshot;

#[derive(Clone)]
pub struct PriorityGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    capacity: usize,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    in_flight: usize,
    sequence: u64,
    /// Waiters keyed by `(priority, arrival)`.
    waiters: BTreeMap<(u64, u64), oneshot::Sender<()>>,
}

/// Releases the slot on drop.
pub struct GatePermit {
    inner: Arc<GateInner>,
}

/// Returns the slot if the waiter is dropped after being granted one.
struct Waiter {
    inner: Arc<GateInner>,
    key: (u64, u64),
    rx: Option<oneshot::Receiver<()>>,
}

impl PriorityGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(GateInner {
                capacity: capacity.max(1),
                state: Mutex::new(GateState::default()),
            }),
        }
    }

    /// Waits for a free slot. Lower `priority` values are served first.
    pub async fn acquire(&self, priority: u64) -> GatePermit {
        let mut waiter = {
            let mut state = self.inner.lock();
            if state.in_flight < self.inner.capacity {
                state.in_flight += 1;
                return GatePermit {
                    inner: self.inner.clone(),
                };
            }

            let (tx, rx) = oneshot::channel();
            let key = (priority, state.sequence);
            state.sequence += 1;
            state.waiters.insert(key, tx);

            Waiter {
                inner: self.inner.clone(),
                key,
                rx: Some(rx),
            }
        };

        if let Some(rx) = waiter.rx.as_mut() {
            // The sender is only dropped after sending.
            let _ = rx.await;
        }
        waiter.rx = None;

        GatePermit {
            inner: self.inner.clone(),
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }
}

impl GateInner {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        // The state is always left consistent, recover from poisoning.
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Hands the slot to the next waiter or frees it.
    fn release(&self) {
        let mut state = self.lock();
        while let Some((_, tx)) = state.waiters.pop_first() {
            if tx.send(()).is_ok() {
                return;
            }
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.inner.release();
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else {
            return;
        };

        let removed = self.inner.lock().waiters.remove(&self.key).is_some();
        if !removed && rx.try_recv().is_ok() {
            self.inner.release();
        }
    }
}
