//! Lazily initialized statics
//!
//! A [`LazyStatic`] is the getter/setter pair behind static fields and
//! top-level library variables: the first read runs the initializer and
//! memoizes its value.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::value::Value;

/// Initializer of a lazy static
pub type LazyInit = Rc<dyn Fn(&Runtime) -> RtResult<Value>>;

#[derive(Debug, Clone)]
enum LazyState {
    Uninitialized,
    Initializing,
    Ready(Value),
}

/// A compute-once field with an explicit setter
pub struct LazyStatic {
    name: Rc<str>,
    init: Option<LazyInit>,
    state: RefCell<LazyState>,
}

impl LazyStatic {
    /// A field computed by `init` on first read
    pub fn new<F>(name: &str, init: F) -> Self
    where
        F: Fn(&Runtime) -> RtResult<Value> + 'static,
    {
        Self {
            name: Rc::from(name),
            init: Some(Rc::new(init)),
            state: RefCell::new(LazyState::Uninitialized),
        }
    }

    /// A field that already holds `value`
    pub fn ready(name: &str, value: Value) -> Self {
        Self {
            name: Rc::from(name),
            init: None,
            state: RefCell::new(LazyState::Ready(value)),
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the field holds a value
    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.borrow(), LazyState::Ready(_))
    }

    /// Read the field, running the initializer on first access.
    ///
    /// A failing initializer leaves the field uninitialized, so the next
    /// read runs it again.
    pub fn get(&self, rt: &Runtime) -> RtResult<Value> {
        let current = self.state.borrow().clone();
        match current {
            LazyState::Ready(value) => Ok(value),
            LazyState::Initializing => Err(RuntimeError::CyclicInitialization(self.name.to_string())),
            LazyState::Uninitialized => {
                let Some(init) = self.init.clone() else {
                    return Ok(Value::Null);
                };
                *self.state.borrow_mut() = LazyState::Initializing;
                match init(rt) {
                    Ok(value) => {
                        *self.state.borrow_mut() = LazyState::Ready(value.clone());
                        Ok(value)
                    }
                    Err(err) => {
                        *self.state.borrow_mut() = LazyState::Uninitialized;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Overwrite the field without running the initializer
    pub fn set(&self, value: Value) {
        *self.state.borrow_mut() = LazyState::Ready(value);
    }
}
