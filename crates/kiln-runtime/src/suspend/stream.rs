//! Demand-driven asynchronous streams
//!
//! The body runs only when the consumer asks for an element: `move_next`
//! resumes it until the next `Emit`, where it parks until the following
//! `move_next`. Nothing is produced ahead of demand.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::trace;

use super::{await_value, ComputationState, FutureObject, FutureRef, Generator, Resume, Step, Suspend};
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeRef;
use crate::value::Value;

/// Where the body currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    NotStarted,
    Running,
    AtEmit,
    Delegating,
    Awaiting,
    Completed,
    Failed,
}

impl Position {
    fn state(self) -> ComputationState {
        match self {
            Position::NotStarted => ComputationState::Pending,
            Position::Running => ComputationState::Running,
            Position::AtEmit | Position::Delegating | Position::Awaiting => ComputationState::Suspended,
            Position::Completed => ComputationState::Completed,
            Position::Failed => ComputationState::Failed,
        }
    }

    fn is_done(self) -> bool {
        matches!(self, Position::Completed | Position::Failed)
    }
}

struct StreamDriver {
    element_type: TypeRef,
    generator: RefCell<Option<Box<dyn Generator>>>,
    position: Cell<Position>,
    current: RefCell<Value>,
    pending: RefCell<Option<FutureRef>>,
    delegate: RefCell<Option<StreamIterator>>,
    cancelling: Cell<bool>,
    cancel_future: RefCell<Option<FutureRef>>,
}

impl StreamDriver {
    fn move_to(&self, position: Position) {
        trace!(from = ?self.position.get(), to = ?position, "stream computation");
        self.position.set(position);
    }

    fn move_next(self: &Rc<Self>, rt: &Runtime) -> RtResult<FutureRef> {
        if self.pending.borrow().is_some() {
            return Err(RuntimeError::ConcurrentMoveNext);
        }
        if self.cancelling.get() || self.position.get().is_done() {
            return Ok(rt.future_value(rt.types().bool(), Value::Bool(false)));
        }
        let future = FutureObject::pending(rt.types().bool());
        *self.pending.borrow_mut() = Some(future.clone());
        let driver = self.clone();
        rt.schedule_microtask(move |rt| driver.pull(rt));
        Ok(future)
    }

    fn pull(self: &Rc<Self>, rt: &Runtime) {
        if self.cancelling.get() || self.pending.borrow().is_none() {
            return;
        }
        match self.position.get() {
            Position::NotStarted | Position::AtEmit => self.advance(rt, Resume::Next(Value::Null)),
            Position::Delegating => self.pull_delegate(rt),
            _ => {}
        }
    }

    fn pull_delegate(self: &Rc<Self>, rt: &Runtime) {
        let Some(inner) = self.delegate.borrow().clone() else {
            return;
        };
        let next = match inner.move_next(rt) {
            Ok(next) => next,
            Err(err) => {
                self.delegate.borrow_mut().take();
                self.advance(rt, Resume::Throw(err));
                return;
            }
        };
        let driver = self.clone();
        next.subscribe(rt, move |rt, result| {
            if driver.cancelling.get() {
                return;
            }
            match result {
                Ok(Value::Bool(true)) => match rt.types().check(&driver.element_type, inner.current()) {
                    Ok(value) => {
                        *driver.current.borrow_mut() = value;
                        driver.deliver(rt, Ok(Value::Bool(true)));
                    }
                    Err(err) => {
                        driver.delegate.borrow_mut().take();
                        let _ = inner.cancel(rt);
                        driver.advance(rt, Resume::Throw(err));
                    }
                },
                Ok(_) => {
                    driver.delegate.borrow_mut().take();
                    driver.advance(rt, Resume::Next(Value::Null));
                }
                Err(err) => {
                    driver.delegate.borrow_mut().take();
                    driver.advance(rt, Resume::Throw(err));
                }
            }
        });
    }

    fn advance(self: &Rc<Self>, rt: &Runtime, input: Resume) {
        let Some(mut generator) = self.generator.borrow_mut().take() else {
            return;
        };
        self.move_to(Position::Running);
        let suspend = match generator.resume(rt, input) {
            Step::Yield(suspend) => {
                *self.generator.borrow_mut() = Some(generator);
                suspend
            }
            Step::Return(_) => return self.finish(rt, Ok(())),
            Step::Throw(err) => return self.finish(rt, Err(err)),
        };

        match suspend {
            Suspend::Await(value) => {
                self.move_to(Position::Awaiting);
                let driver = self.clone();
                await_value(rt, value, move |rt, resume| driver.advance(rt, resume));
            }
            // Suspensions reached while unwinding are answered with another Return
            Suspend::Emit(_) | Suspend::EmitAll(_) if self.cancelling.get() => {
                self.advance(rt, Resume::Return);
            }
            Suspend::Emit(value) => match rt.types().check(&self.element_type, value) {
                Ok(value) => {
                    self.move_to(Position::AtEmit);
                    *self.current.borrow_mut() = value;
                    self.deliver(rt, Ok(Value::Bool(true)));
                }
                Err(err) => self.advance(rt, Resume::Throw(err)),
            },
            Suspend::EmitAll(Value::Stream(source)) => match source.iterator() {
                Ok(inner) => {
                    self.move_to(Position::Delegating);
                    *self.delegate.borrow_mut() = Some(inner);
                    self.pull_delegate(rt);
                }
                Err(err) => self.advance(rt, Resume::Throw(err)),
            },
            Suspend::EmitAll(_) => {
                let err = RuntimeError::InvalidSuspension("yield* of a non-stream in an async stream");
                self.advance(rt, Resume::Throw(err));
            }
        }
    }

    fn finish(&self, rt: &Runtime, result: RtResult<()>) {
        self.move_to(if result.is_ok() {
            Position::Completed
        } else {
            Position::Failed
        });
        *self.current.borrow_mut() = Value::Null;
        if self.cancelling.get() {
            let cancel = self.cancel_future.borrow().clone();
            if let Some(cancel) = cancel {
                let _ = cancel.settle(rt, result.map(|_| Value::Null));
            }
        } else {
            self.deliver(rt, result.map(|_| Value::Bool(false)));
        }
    }

    fn deliver(&self, rt: &Runtime, result: RtResult<Value>) {
        let pending = self.pending.borrow_mut().take();
        if let Some(future) = pending {
            let _ = future.settle(rt, result);
        }
    }

    fn cancel(self: &Rc<Self>, rt: &Runtime) -> FutureRef {
        if let Some(existing) = self.cancel_future.borrow().clone() {
            return existing;
        }
        let cancel = FutureObject::pending(rt.types().void());
        *self.cancel_future.borrow_mut() = Some(cancel.clone());
        self.cancelling.set(true);
        self.deliver(rt, Ok(Value::Bool(false)));

        match self.position.get() {
            Position::NotStarted => {
                self.generator.borrow_mut().take();
                self.move_to(Position::Completed);
                let _ = cancel.settle(rt, Ok(Value::Null));
            }
            Position::Completed | Position::Failed => {
                let _ = cancel.settle(rt, Ok(Value::Null));
            }
            Position::AtEmit => {
                let driver = self.clone();
                rt.schedule_microtask(move |rt| driver.advance(rt, Resume::Return));
            }
            Position::Delegating => {
                let inner = self.delegate.borrow_mut().take();
                if let Some(inner) = inner {
                    let driver = self.clone();
                    inner.cancel(rt).subscribe(rt, move |rt, result| {
                        let resume = match result {
                            Ok(_) => Resume::Return,
                            Err(err) => Resume::Throw(err),
                        };
                        driver.advance(rt, resume);
                    });
                }
            }
            // The body reaches its next suspension or finishes on its own
            Position::Running | Position::Awaiting => {}
        }
        cancel
    }
}

/// Pull cursor over a stream
#[derive(Clone)]
pub struct StreamIterator {
    driver: Rc<StreamDriver>,
}

impl StreamIterator {
    /// Request the next element.
    ///
    /// The future completes with `true` once an element is available in
    /// [`current`](Self::current), `false` at the end of the stream or after
    /// a cancel, or fails with the body's error. Calling again before it
    /// settles is a [`RuntimeError::ConcurrentMoveNext`].
    pub fn move_next(&self, rt: &Runtime) -> RtResult<FutureRef> {
        self.driver.move_next(rt)
    }

    /// Element delivered by the last successful `move_next`
    pub fn current(&self) -> Value {
        self.driver.current.borrow().clone()
    }

    /// Stop the stream, running the body's cleanup.
    ///
    /// Idempotent. The returned future settles once cleanup finishes, and
    /// fails if cleanup throws.
    pub fn cancel(&self, rt: &Runtime) -> FutureRef {
        self.driver.cancel(rt)
    }

    /// State of the underlying computation
    pub fn state(&self) -> ComputationState {
        self.driver.position.get().state()
    }

    /// Whether `cancel` has been called
    pub fn is_cancelled(&self) -> bool {
        self.driver.cancelling.get()
    }
}

/// Event pushed to a [`StreamObject::listen`] sink
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One element
    Data(Value),
    /// The stream failed; no further events follow
    Error(RuntimeError),
    /// The stream ended
    Done,
}

/// Single-subscription stream
pub struct StreamObject {
    element_type: TypeRef,
    driver: Rc<StreamDriver>,
    listened: Cell<bool>,
}

/// Shared stream handle
pub type StreamRef = Rc<StreamObject>;

impl StreamObject {
    /// Declared element type
    pub fn element_type(&self) -> &TypeRef {
        &self.element_type
    }

    /// Whether an iterator or listener has been attached
    pub fn is_listened(&self) -> bool {
        self.listened.get()
    }

    /// Attach the one pull cursor this stream allows
    pub fn iterator(&self) -> RtResult<StreamIterator> {
        if self.listened.replace(true) {
            return Err(RuntimeError::StreamAlreadyListened);
        }
        Ok(StreamIterator {
            driver: self.driver.clone(),
        })
    }

    /// Push every event to `sink`, pulling one element at a time.
    ///
    /// Returns the underlying iterator so the subscription can be cancelled.
    pub fn listen<F>(&self, rt: &Runtime, sink: F) -> RtResult<StreamIterator>
    where
        F: Fn(&Runtime, StreamEvent) + 'static,
    {
        let iterator = self.iterator()?;
        pump(rt, iterator.clone(), Rc::new(sink));
        Ok(iterator)
    }
}

fn pump(rt: &Runtime, iterator: StreamIterator, sink: Rc<dyn Fn(&Runtime, StreamEvent)>) {
    let next = match iterator.move_next(rt) {
        Ok(next) => next,
        Err(err) => return sink(rt, StreamEvent::Error(err)),
    };
    next.subscribe(rt, move |rt, result| {
        if iterator.is_cancelled() {
            return;
        }
        match result {
            Ok(Value::Bool(true)) => {
                sink(rt, StreamEvent::Data(iterator.current()));
                if !iterator.is_cancelled() {
                    pump(rt, iterator, sink);
                }
            }
            Ok(_) => sink(rt, StreamEvent::Done),
            Err(err) => sink(rt, StreamEvent::Error(err)),
        }
    });
}

impl Runtime {
    /// Wrap `body` as a `Stream<element_type>`.
    ///
    /// The body does not start until the first `move_next`.
    pub fn run_async_stream<G>(&self, element_type: TypeRef, body: G) -> StreamRef
    where
        G: Generator + 'static,
    {
        let driver = Rc::new(StreamDriver {
            element_type: element_type.clone(),
            generator: RefCell::new(Some(Box::new(body))),
            position: Cell::new(Position::NotStarted),
            current: RefCell::new(Value::Null),
            pending: RefCell::new(None),
            delegate: RefCell::new(None),
            cancelling: Cell::new(false),
            cancel_future: RefCell::new(None),
        });
        Rc::new(StreamObject {
            element_type,
            driver,
            listened: Cell::new(false),
        })
    }
}
