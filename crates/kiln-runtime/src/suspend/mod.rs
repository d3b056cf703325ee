//! Suspension Bridge
//!
//! Resumable bodies are explicit state machines implementing [`Generator`].
//! Each resume hands the body a [`Resume`] input and gets back a [`Step`]:
//! a suspension point, a return, or a throw. Three drivers turn that
//! protocol into control-flow shapes:
//!
//! - [`Runtime::run_async`]: a single-result [`FutureObject`]; every
//!   `Await` suspends until the awaited value settles
//! - [`Runtime::run_async_stream`]: a demand-driven [`StreamObject`]; every
//!   `Emit` hands one element to the consumer and waits for the next pull
//! - [`Runtime::run_sync_iterable`]: a re-iterable [`IterableObject`]
//!   driven synchronously by [`SyncIterator`]
//!
//! Cancellation resumes the body with [`Resume::Return`] so its cleanup
//! code runs; suspensions reached during cleanup are answered with another
//! `Return`.

mod future;
mod iterable;
mod stream;

pub use future::{Completer, FutureObject, FutureRef};
pub use iterable::{GeneratorFactory, IterableObject, IterableRef, SyncIterator};
pub use stream::{StreamEvent, StreamIterator, StreamObject, StreamRef};

use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::value::Value;

/// A suspension point reached by a body
#[derive(Debug, Clone)]
pub enum Suspend {
    /// Wait for a value; a future suspends until it settles
    Await(Value),
    /// Produce one element (`yield`)
    Emit(Value),
    /// Produce every element of a stream or iterable (`yield*`)
    EmitAll(Value),
}

/// Result of one resume
#[derive(Debug, Clone)]
pub enum Step {
    /// The body suspended
    Yield(Suspend),
    /// The body returned
    Return(Value),
    /// The body threw
    Throw(RuntimeError),
}

impl Step {
    /// `await value`
    pub fn wait(value: impl Into<Value>) -> Self {
        Step::Yield(Suspend::Await(value.into()))
    }

    /// `yield value`
    pub fn emit(value: impl Into<Value>) -> Self {
        Step::Yield(Suspend::Emit(value.into()))
    }

    /// `yield* source`
    pub fn emit_all(source: impl Into<Value>) -> Self {
        Step::Yield(Suspend::EmitAll(source.into()))
    }
}

/// Input to one resume
#[derive(Debug, Clone)]
pub enum Resume {
    /// Continue; carries the awaited value (null after `Emit`)
    Next(Value),
    /// Raise at the suspension point
    Throw(RuntimeError),
    /// Unwind: run cleanup and return
    Return,
}

impl Resume {
    /// `Next` on success, `Throw` on failure
    pub fn from_result(result: RtResult<Value>) -> Self {
        match result {
            Ok(value) => Resume::Next(value),
            Err(err) => Resume::Throw(err),
        }
    }
}

/// A resumable body
pub trait Generator {
    /// Run the body until its next suspension point, return, or throw
    fn resume(&mut self, rt: &Runtime, input: Resume) -> Step;
}

impl<F> Generator for F
where
    F: FnMut(&Runtime, Resume) -> Step,
{
    fn resume(&mut self, rt: &Runtime, input: Resume) -> Step {
        self(rt, input)
    }
}

/// Lifecycle of a suspended computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputationState {
    /// Created, body not started
    Pending,
    /// Body executing
    Running,
    /// Body parked at a suspension point
    Suspended,
    /// Body returned
    Completed,
    /// Body threw
    Failed,
}

impl ComputationState {
    /// Whether the computation can no longer resume
    pub fn is_terminal(self) -> bool {
        matches!(self, ComputationState::Completed | ComputationState::Failed)
    }
}

/// Resume `resume` once `value` is available: when a future settles, or on
/// the next microtask for any other value.
pub(crate) fn await_value<F>(rt: &Runtime, value: Value, resume: F)
where
    F: FnOnce(&Runtime, Resume) + 'static,
{
    match value {
        Value::Future(future) => {
            future.subscribe(rt, move |rt, result| resume(rt, Resume::from_result(result)));
        }
        other => rt.schedule_microtask(move |rt| resume(rt, Resume::Next(other))),
    }
}
