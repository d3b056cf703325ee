//! Microtask scheduler
//!
//! Single-threaded FIFO of microtasks. Future listeners, resumptions of
//! suspended computations, and stream pumps are all microtasks, so work
//! runs in the order it became ready.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use tracing::{trace, warn};

use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::suspend::FutureRef;

/// A unit of deferred work
pub type Microtask = Box<dyn FnOnce(&Runtime)>;

/// Microtask queue plus uncaught-failure bookkeeping
#[derive(Default)]
pub struct Scheduler {
    queue: RefCell<VecDeque<Microtask>>,
    failed: RefCell<Vec<FutureRef>>,
    uncaught: RefCell<Vec<RuntimeError>>,
    executed: Cell<u64>,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a microtask
    pub fn schedule(&self, task: Microtask) {
        self.queue.borrow_mut().push_back(task);
    }

    /// Number of queued microtasks
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Whether the queue is empty
    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Total microtasks executed so far
    pub fn executed(&self) -> u64 {
        self.executed.get()
    }

    /// Remember a failed future; reported if it is still unhandled when idle
    pub(crate) fn note_failure(&self, future: FutureRef) {
        self.failed.borrow_mut().push(future);
    }

    fn pop(&self) -> Option<Microtask> {
        self.queue.borrow_mut().pop_front()
    }

    fn collect_uncaught(&self) {
        let failed: Vec<FutureRef> = self.failed.borrow_mut().drain(..).collect();
        for future in failed {
            if future.is_handled() {
                continue;
            }
            if let Some(Err(err)) = future.result() {
                warn!(error = %err, "uncaught computation failure");
                self.uncaught
                    .borrow_mut()
                    .push(RuntimeError::UncaughtComputationFailure(Box::new(err)));
            }
        }
    }

    /// Drain recorded uncaught failures
    pub fn take_uncaught(&self) -> Vec<RuntimeError> {
        self.uncaught.borrow_mut().drain(..).collect()
    }
}

impl Runtime {
    /// Queue a microtask
    pub fn schedule_microtask<F>(&self, task: F)
    where
        F: FnOnce(&Runtime) + 'static,
    {
        self.scheduler().schedule(Box::new(task));
    }

    /// Run microtasks until the queue is empty or the configured budget is
    /// spent; returns how many ran.
    ///
    /// When the queue empties, failed futures that never got a listener are
    /// recorded as uncaught (see [`Runtime::take_uncaught_failures`]).
    pub fn run_until_idle(&self) -> usize {
        let budget = self.options().max_microtasks_per_drain;
        let mut ran = 0;
        loop {
            if budget.is_some_and(|limit| ran >= limit) {
                trace!(ran, "microtask budget exhausted");
                return ran;
            }
            let Some(task) = self.scheduler().pop() else {
                break;
            };
            task(self);
            ran += 1;
            let scheduler = self.scheduler();
            scheduler.executed.set(scheduler.executed.get() + 1);
        }
        trace!(ran, "scheduler idle");
        if self.options().report_uncaught {
            self.scheduler().collect_uncaught();
        } else {
            self.scheduler().failed.borrow_mut().clear();
        }
        ran
    }

    /// Drain failures recorded as [`RuntimeError::UncaughtComputationFailure`]
    pub fn take_uncaught_failures(&self) -> Vec<RuntimeError> {
        self.scheduler().take_uncaught()
    }
}
