//! Synchronous iterables
//!
//! Each iteration builds a fresh body from the iterable's factory and drives
//! it directly from [`Iterator::next`]. Dropping a [`SyncIterator`] early
//! unwinds the body so its cleanup runs.

use std::rc::Rc;
use std::vec;
use tracing::warn;

use super::{ComputationState, Generator, Resume, Step, Suspend};
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeRef;
use crate::value::Value;

/// Builds one fresh body per iteration
pub type GeneratorFactory = Rc<dyn Fn(&Runtime) -> Box<dyn Generator>>;

/// A re-iterable sequence backed by a body factory
pub struct IterableObject {
    element_type: TypeRef,
    factory: GeneratorFactory,
}

/// Shared iterable handle
pub type IterableRef = Rc<IterableObject>;

impl IterableObject {
    /// Declared element type
    pub fn element_type(&self) -> &TypeRef {
        &self.element_type
    }

    /// Start a new iteration from the beginning of the body
    pub fn iter<'rt>(&self, rt: &'rt Runtime) -> SyncIterator<'rt> {
        SyncIterator {
            rt,
            generator: Some((self.factory)(rt)),
            delegate: None,
            element_type: self.element_type.clone(),
            state: ComputationState::Pending,
        }
    }

    /// Run one full iteration, stopping at the first failure
    pub fn to_vec(&self, rt: &Runtime) -> RtResult<Vec<Value>> {
        self.iter(rt).collect()
    }
}

enum Delegate<'rt> {
    Nested(Box<SyncIterator<'rt>>),
    Items(vec::IntoIter<Value>),
}

impl Delegate<'_> {
    fn next(&mut self) -> Option<RtResult<Value>> {
        match self {
            Delegate::Nested(inner) => inner.next(),
            Delegate::Items(items) => items.next().map(Ok),
        }
    }
}

/// One pass over an [`IterableObject`]
pub struct SyncIterator<'rt> {
    rt: &'rt Runtime,
    generator: Option<Box<dyn Generator>>,
    delegate: Option<Delegate<'rt>>,
    element_type: TypeRef,
    state: ComputationState,
}

impl SyncIterator<'_> {
    /// State of the underlying computation
    pub fn state(&self) -> ComputationState {
        self.state
    }

    /// Stop early and run the body's cleanup, reporting a cleanup failure
    pub fn close(mut self) -> RtResult<()> {
        self.finish()
    }

    fn finish(&mut self) -> RtResult<()> {
        let mut input = Resume::Return;
        if let Some(Delegate::Nested(mut inner)) = self.delegate.take() {
            if let Err(err) = inner.finish() {
                input = Resume::Throw(err);
            }
        }
        if self.state == ComputationState::Pending {
            self.generator = None;
            self.state = ComputationState::Completed;
            return Ok(());
        }
        while let Some(mut generator) = self.generator.take() {
            match generator.resume(self.rt, input) {
                Step::Yield(_) => {
                    self.generator = Some(generator);
                    input = Resume::Return;
                }
                Step::Return(_) => {
                    self.state = ComputationState::Completed;
                    return Ok(());
                }
                Step::Throw(err) => {
                    self.state = ComputationState::Failed;
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl Iterator for SyncIterator<'_> {
    type Item = RtResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut input = Resume::Next(Value::Null);
        loop {
            if let Some(delegate) = self.delegate.as_mut() {
                match delegate.next() {
                    Some(Ok(value)) => match self.rt.types().check(&self.element_type, value) {
                        Ok(value) => return Some(Ok(value)),
                        Err(err) => input = Resume::Throw(err),
                    },
                    Some(Err(err)) => input = Resume::Throw(err),
                    None => input = Resume::Next(Value::Null),
                }
                self.delegate = None;
            }

            let mut generator = self.generator.take()?;
            self.state = ComputationState::Running;
            let suspend = match generator.resume(self.rt, input) {
                Step::Yield(suspend) => {
                    self.generator = Some(generator);
                    self.state = ComputationState::Suspended;
                    suspend
                }
                Step::Return(_) => {
                    self.state = ComputationState::Completed;
                    return None;
                }
                Step::Throw(err) => {
                    self.state = ComputationState::Failed;
                    return Some(Err(err));
                }
            };

            input = match suspend {
                Suspend::Emit(value) => match self.rt.types().check(&self.element_type, value) {
                    Ok(value) => return Some(Ok(value)),
                    Err(err) => Resume::Throw(err),
                },
                Suspend::EmitAll(Value::Iterable(source)) => {
                    self.delegate = Some(Delegate::Nested(Box::new(source.iter(self.rt))));
                    Resume::Next(Value::Null)
                }
                Suspend::EmitAll(Value::List(list)) => {
                    self.delegate = Some(Delegate::Items(list.snapshot().into_iter()));
                    Resume::Next(Value::Null)
                }
                Suspend::EmitAll(_) => {
                    Resume::Throw(RuntimeError::InvalidSuspension("yield* of a non-iterable in a sync body"))
                }
                Suspend::Await(_) => Resume::Throw(RuntimeError::InvalidSuspension("await in a sync body")),
            };
        }
    }
}

impl Drop for SyncIterator<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(error = %err, "cleanup of an abandoned iterator failed");
        }
    }
}

impl Runtime {
    /// Wrap a body factory as an `Iterable<element_type>`.
    ///
    /// Every call to [`IterableObject::iter`] runs `factory` again, so each
    /// iteration starts the body from the top.
    pub fn run_sync_iterable<F, G>(&self, element_type: TypeRef, factory: F) -> IterableRef
    where
        F: Fn(&Runtime) -> G + 'static,
        G: Generator + 'static,
    {
        let factory: GeneratorFactory = Rc::new(move |rt: &Runtime| Box::new(factory(rt)) as Box<dyn Generator>);
        Rc::new(IterableObject {
            element_type,
            factory,
        })
    }
}
