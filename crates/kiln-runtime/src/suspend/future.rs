//! Single-result computations

use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;
use tracing::trace;

use super::{await_value, ComputationState, Generator, Resume, Step, Suspend};
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeRef;
use crate::value::Value;

type Listener = Box<dyn FnOnce(&Runtime, RtResult<Value>)>;

enum FutureState {
    Pending(Vec<Listener>),
    Completed(Value),
    Failed(RuntimeError),
}

/// A value that settles once, with a result or a failure
pub struct FutureObject {
    type_arg: TypeRef,
    state: RefCell<FutureState>,
    handled: Cell<bool>,
}

/// Shared future handle
pub type FutureRef = Rc<FutureObject>;

impl FutureObject {
    pub(crate) fn pending(type_arg: TypeRef) -> FutureRef {
        Rc::new(FutureObject {
            type_arg,
            state: RefCell::new(FutureState::Pending(Vec::new())),
            handled: Cell::new(false),
        })
    }

    /// Declared result type (`T` of `Future<T>`)
    pub fn type_arg(&self) -> &TypeRef {
        &self.type_arg
    }

    /// Whether the future has not settled yet
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.borrow(), FutureState::Pending(_))
    }

    /// Settled outcome, if any
    pub fn result(&self) -> Option<RtResult<Value>> {
        match &*self.state.borrow() {
            FutureState::Pending(_) => None,
            FutureState::Completed(value) => Some(Ok(value.clone())),
            FutureState::Failed(err) => Some(Err(err.clone())),
        }
    }

    /// Whether anyone has listened for the outcome
    pub fn is_handled(&self) -> bool {
        self.handled.get()
    }

    /// Treat a failure as observed without attaching a listener
    pub fn mark_handled(&self) {
        self.handled.set(true);
    }

    /// Run `listener` with the outcome as a microtask once the future settles
    pub fn subscribe<F>(self: &Rc<Self>, rt: &Runtime, listener: F)
    where
        F: FnOnce(&Runtime, RtResult<Value>) + 'static,
    {
        self.handled.set(true);
        let mut state = self.state.borrow_mut();
        match &mut *state {
            FutureState::Pending(listeners) => listeners.push(Box::new(listener)),
            FutureState::Completed(value) => {
                let value = value.clone();
                rt.schedule_microtask(move |rt| listener(rt, Ok(value)));
            }
            FutureState::Failed(err) => {
                let err = err.clone();
                rt.schedule_microtask(move |rt| listener(rt, Err(err)));
            }
        }
    }

    /// A future of `on_value`'s result; failures pass through untouched.
    ///
    /// If `on_value` returns a future, the new future follows it.
    pub fn then<F>(self: &Rc<Self>, rt: &Runtime, result_type: TypeRef, on_value: F) -> FutureRef
    where
        F: FnOnce(&Runtime, Value) -> RtResult<Value> + 'static,
    {
        let next = FutureObject::pending(result_type);
        let target = next.clone();
        self.subscribe(rt, move |rt, result| match result.and_then(|value| on_value(rt, value)) {
            Ok(Value::Future(inner)) => {
                inner.subscribe(rt, move |rt, result| {
                    let _ = target.settle(rt, result);
                });
            }
            other => {
                let _ = target.settle(rt, other);
            }
        });
        next
    }

    /// Settle the future and queue its listeners.
    ///
    /// A failure nobody listens to is handed to the scheduler for
    /// uncaught-failure reporting.
    pub(crate) fn settle(self: &Rc<Self>, rt: &Runtime, result: RtResult<Value>) -> RtResult<()> {
        let settled = match &result {
            Ok(value) => FutureState::Completed(value.clone()),
            Err(err) => FutureState::Failed(err.clone()),
        };
        let listeners = {
            let mut state = self.state.borrow_mut();
            if !matches!(*state, FutureState::Pending(_)) {
                return Err(RuntimeError::AlreadyCompleted);
            }
            match mem::replace(&mut *state, settled) {
                FutureState::Pending(listeners) => listeners,
                _ => Vec::new(),
            }
        };
        if result.is_err() && listeners.is_empty() && !self.is_handled() {
            rt.scheduler().note_failure(self.clone());
        }
        for listener in listeners {
            let outcome = result.clone();
            rt.schedule_microtask(move |rt| listener(rt, outcome));
        }
        Ok(())
    }
}

/// Settles a future from outside a computation
pub struct Completer {
    future: FutureRef,
}

impl Completer {
    /// The controlled future
    pub fn future(&self) -> FutureRef {
        self.future.clone()
    }

    /// Whether the future has settled
    pub fn is_completed(&self) -> bool {
        !self.future.is_pending()
    }

    /// Complete with a value checked against the future's type argument
    pub fn complete(&self, rt: &Runtime, value: Value) -> RtResult<()> {
        if self.is_completed() {
            return Err(RuntimeError::AlreadyCompleted);
        }
        let value = rt.types().check(self.future.type_arg(), value)?;
        self.future.settle(rt, Ok(value))
    }

    /// Complete with a failure
    pub fn complete_error(&self, rt: &Runtime, error: RuntimeError) -> RtResult<()> {
        self.future.settle(rt, Err(error))
    }
}

// ============================================================================
// Async driver
// ============================================================================

struct AsyncDriver {
    generator: RefCell<Option<Box<dyn Generator>>>,
    future: FutureRef,
    state: Cell<ComputationState>,
}

impl AsyncDriver {
    fn transition(&self, state: ComputationState) {
        trace!(from = ?self.state.get(), to = ?state, "async computation");
        self.state.set(state);
    }

    fn step(self: &Rc<Self>, rt: &Runtime, input: Resume) {
        let Some(mut generator) = self.generator.borrow_mut().take() else {
            return;
        };
        self.transition(ComputationState::Running);
        match generator.resume(rt, input) {
            Step::Yield(Suspend::Await(value)) => {
                *self.generator.borrow_mut() = Some(generator);
                self.transition(ComputationState::Suspended);
                let driver = self.clone();
                await_value(rt, value, move |rt, resume| driver.step(rt, resume));
            }
            Step::Yield(_) => {
                *self.generator.borrow_mut() = Some(generator);
                let err = RuntimeError::InvalidSuspension("yield in a single-result body");
                self.step(rt, Resume::Throw(err));
            }
            Step::Return(Value::Future(inner)) => {
                // Returning a future completes with its outcome
                self.transition(ComputationState::Suspended);
                let driver = self.clone();
                inner.subscribe(rt, move |rt, result| driver.complete(rt, result));
            }
            Step::Return(value) => self.complete(rt, Ok(value)),
            Step::Throw(err) => self.complete(rt, Err(err)),
        }
    }

    fn complete(&self, rt: &Runtime, result: RtResult<Value>) {
        let result = result.and_then(|value| rt.types().check(self.future.type_arg(), value));
        self.transition(if result.is_ok() {
            ComputationState::Completed
        } else {
            ComputationState::Failed
        });
        let _ = self.future.settle(rt, result);
    }
}

impl Runtime {
    /// A completer for a new `Future<type_arg>`
    pub fn completer(&self, type_arg: TypeRef) -> Completer {
        Completer {
            future: FutureObject::pending(type_arg),
        }
    }

    /// An already completed future
    pub fn future_value(&self, type_arg: TypeRef, value: Value) -> FutureRef {
        let future = FutureObject::pending(type_arg);
        let _ = future.settle(self, Ok(value));
        future
    }

    /// An already failed future
    pub fn future_error(&self, type_arg: TypeRef, error: RuntimeError) -> FutureRef {
        let future = FutureObject::pending(type_arg);
        let _ = future.settle(self, Err(error));
        future
    }

    /// Start a single-result computation.
    ///
    /// The body runs synchronously up to its first suspension; from then on
    /// it is resumed from microtasks. A throw, even before the first
    /// suspension, fails the returned future rather than this call.
    pub fn run_async<G>(&self, result_type: TypeRef, body: G) -> FutureRef
    where
        G: Generator + 'static,
    {
        let future = FutureObject::pending(result_type);
        let driver = Rc::new(AsyncDriver {
            generator: RefCell::new(Some(Box::new(body))),
            future: future.clone(),
            state: Cell::new(ComputationState::Pending),
        });
        driver.step(self, Resume::Next(Value::Null));
        future
    }
}
