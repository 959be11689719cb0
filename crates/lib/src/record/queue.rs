//! Counting completion queue for fan-out writes.
//!
//! Every underlying write takes a [`Slot`] before any write is issued. Once the
//! queue is armed and every slot has reported, the completion runs exactly
//! once with `Ok(())` or with all collected errors.

use std::sync::{Arc, Mutex};

use super::RecordError;
use super::write::{WriteCallback, WriteResult};
use crate::Error;

struct QueueState {
    pending: usize,
    armed: bool,
    errors: Vec<Error>,
    done: Option<WriteCallback>,
}

pub(crate) struct WriteQueue {
    state: Arc<Mutex<QueueState>>,
}

impl WriteQueue {
    pub(crate) fn new(done: WriteCallback) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState {
                pending: 0,
                armed: false,
                errors: Vec::new(),
                done: Some(done),
            })),
        }
    }

    /// Registers one more outstanding write.
    pub(crate) fn slot(&self, target: String) -> Slot {
        self.state.lock().unwrap().pending += 1;
        Slot {
            state: Some(Arc::clone(&self.state)),
            target,
        }
    }

    /// Declares that every slot has been taken.
    pub(crate) fn arm(&self) {
        self.state.lock().unwrap().armed = true;
        finalize(&self.state);
    }
}

fn finalize(state: &Arc<Mutex<QueueState>>) {
    let finished = {
        let mut state = state.lock().unwrap();
        if state.armed && state.pending == 0 {
            state
                .done
                .take()
                .map(|done| (done, std::mem::take(&mut state.errors)))
        } else {
            None
        }
    };
    if let Some((done, errors)) = finished {
        if errors.is_empty() {
            done(Ok(()));
        } else {
            done(Err(errors));
        }
    }
}

/// One outstanding write. Dropping a slot without completing it reports
/// [`RecordError::WriteAbandoned`].
pub(crate) struct Slot {
    state: Option<Arc<Mutex<QueueState>>>,
    target: String,
}

impl Slot {
    pub(crate) fn complete(mut self, result: WriteResult) {
        self.report(result);
    }

    fn report(&mut self, result: WriteResult) {
        let Some(state) = self.state.take() else {
            return;
        };
        {
            let mut guard = state.lock().unwrap();
            guard.pending -= 1;
            if let Err(errors) = result {
                guard.errors.extend(errors);
            }
        }
        finalize(&state);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.state.is_some() {
            let target = std::mem::take(&mut self.target);
            self.report(Err(vec![RecordError::WriteAbandoned { target }.into()]));
        }
    }
}
