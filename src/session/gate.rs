//! Readiness gate and pending queue
//!
//! Work submitted while the gate is shut waits in a FIFO queue. Opening the
//! gate drains that queue in submission order before the gate reports
//! ready, so late arrivals can never overtake queued work. Operations run
//! outside the lock and may submit more work without deadlocking.

use parking_lot::Mutex;
use std::collections::VecDeque;

/// A deferred action, handed the value the gate was opened with
pub type Operation<T> = Box<dyn FnOnce(T) + Send + 'static>;

pub struct ReadinessGate<T> {
    state: Mutex<GateState<T>>,
}

struct GateState<T> {
    ready: Option<T>,
    pending: VecDeque<Operation<T>>,
    /// Bumped by every `shut`; a drain stops when it sees a newer epoch
    epoch: u64,
}

impl<T: Clone + Send + 'static> ReadinessGate<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                ready: None,
                pending: VecDeque::new(),
                epoch: 0,
            }),
        }
    }

    /// Run `op` now if the gate is open, otherwise queue it
    pub fn when_ready<F>(&self, op: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut state = self.state.lock();
        match state.ready.clone() {
            Some(value) => {
                drop(state);
                op(value);
            }
            None => state.pending.push_back(Box::new(op)),
        }
    }

    /// Current epoch; pass it to [`open`](Self::open)
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Drain queued operations in order, then mark the gate open.
    ///
    /// Returns the number of operations run, or `None` when the gate was
    /// shut after `epoch` was read. In that case the drain stops early and
    /// the rest stays queued.
    pub fn open(&self, epoch: u64, value: T) -> Option<usize> {
        let mut ran = 0;
        loop {
            let op = {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    return None;
                }
                match state.pending.pop_front() {
                    Some(op) => op,
                    None => {
                        state.ready = Some(value);
                        return Some(ran);
                    }
                }
            };
            op(value.clone());
            ran += 1;
        }
    }

    /// Shut the gate; queued and future work waits for the next `open`
    pub fn shut(&self) -> Option<T> {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.ready.take()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().ready.is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }
}

impl<T: Clone + Send + 'static> Default for ReadinessGate<T> {
    fn default() -> Self {
        Self::new()
    }
}
