//! Completion bookkeeping for batch submissions

use super::Callback;
use crate::context::Context;
use crate::result::Try;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Countdown over a batch; cancels the shared context after the last unit
#[derive(Clone)]
pub(crate) struct Remaining {
    count: Arc<AtomicUsize>,
    shared: Context,
}

impl Remaining {
    pub(crate) fn new(count: usize, shared: Context) -> Self {
        Self {
            count: Arc::new(AtomicUsize::new(count)),
            shared,
        }
    }

    pub(crate) fn complete_one(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.cancel();
        }
    }
}

struct GatherState<T> {
    results: Vec<Option<T>>,
    remaining: usize,
    callback: Option<Callback<Vec<T>>>,
}

/// Collects unit results in input order and reports once
///
/// The first failure wins: it takes the callback, cancels the siblings
/// through the shared context, and every later completion is ignored.
pub(crate) struct Gather<T> {
    state: Mutex<GatherState<T>>,
    shared: Context,
}

impl<T> Gather<T> {
    pub(crate) fn new(count: usize, callback: Callback<Vec<T>>, shared: Context) -> Arc<Self> {
        let mut results = Vec::with_capacity(count);
        results.resize_with(count, || None);
        Arc::new(Self {
            state: Mutex::new(GatherState {
                results,
                remaining: count,
                callback: Some(callback),
            }),
            shared,
        })
    }

    pub(crate) fn complete(&self, index: usize, result: Try<T>) {
        let ready = {
            let mut state = self.state.lock();
            if state.callback.is_none() {
                return;
            }
            match result {
                Try::Failure(error) => state
                    .callback
                    .take()
                    .map(|callback| (callback, Try::Failure(error))),
                Try::Success(value) => {
                    state.results[index] = Some(value);
                    state.remaining -= 1;
                    if state.remaining == 0 {
                        let values = state.results.iter_mut().filter_map(Option::take).collect();
                        state
                            .callback
                            .take()
                            .map(|callback| (callback, Try::Success(values)))
                    } else {
                        None
                    }
                }
            }
        };

        // Callback runs outside the lock.
        if let Some((callback, result)) = ready {
            self.shared.cancel();
            callback(result);
        }
    }
}
