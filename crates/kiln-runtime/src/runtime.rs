//! Runtime facade
//!
//! [`Runtime`] owns every registry and the scheduler. All operations take
//! `&self`: state lives behind `RefCell`s and no borrow is held across a
//! call back into user code, so member bodies, loaders, and generator steps
//! may re-enter the runtime freely.

use std::rc::Rc;
use tracing::debug;

use crate::class::{ClassBuilder, ClassRegistry};
use crate::dispatch::{Interceptor, InterceptorTable};
use crate::error::{RtResult, RuntimeError};
use crate::module::LibraryRegistry;
use crate::names::{PrivacyTable, PrivateName};
use crate::options::RuntimeOptions;
use crate::scheduler::Scheduler;
use crate::signature::SignatureRegistry;
use crate::types::{FunctionType, Primitive, TypePool, TypeRef};
use crate::value::{Arguments, Function, Value};

/// A single-threaded runtime instance
pub struct Runtime {
    options: RuntimeOptions,
    types: TypePool,
    privacy: PrivacyTable,
    classes: ClassRegistry,
    signatures: SignatureRegistry,
    interceptors: InterceptorTable,
    libraries: LibraryRegistry,
    scheduler: Scheduler,
}

impl Runtime {
    /// Create a runtime with default options
    pub fn new() -> Self {
        Self::with_options(RuntimeOptions::default())
    }

    /// Create a runtime with the given options
    pub fn with_options(options: RuntimeOptions) -> Self {
        debug!(?options, "creating runtime");
        Self {
            options,
            types: TypePool::new(),
            privacy: PrivacyTable::new(),
            classes: ClassRegistry::new(),
            signatures: SignatureRegistry::new(),
            interceptors: InterceptorTable::new(),
            libraries: LibraryRegistry::new(),
            scheduler: Scheduler::new(),
        }
    }

    /// Active options
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Canonical type pool
    pub fn types(&self) -> &TypePool {
        &self.types
    }

    /// Class registry
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Signature registry
    pub fn signatures(&self) -> &SignatureRegistry {
        &self.signatures
    }

    /// Interceptor table
    pub fn interceptors(&self) -> &InterceptorTable {
        &self.interceptors
    }

    /// Library registry
    pub fn libraries(&self) -> &LibraryRegistry {
        &self.libraries
    }

    /// Microtask scheduler
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    /// Start declaring a class in `library`
    pub fn class(&self, library: &str, name: &str) -> ClassBuilder<'_> {
        ClassBuilder::from_class(self, self.classes.allocate(library, name))
    }

    /// Private member token for `name` in `library`
    pub fn private_name(&self, library: &str, name: &str) -> PrivateName {
        self.privacy.token(library, name)
    }

    /// Install the interceptor for a host-native runtime tag
    pub fn register_interceptor(&self, tag: &str, interceptor: Interceptor) {
        debug!(tag, "registering interceptor");
        self.interceptors.register(tag, interceptor);
    }

    /// Create a first-class function value.
    ///
    /// Without a signature the function accepts any arguments and its
    /// reified type is `Function`.
    pub fn function<F>(&self, name: &str, signature: Option<FunctionType>, body: F) -> Value
    where
        F: Fn(&Runtime, Arguments) -> RtResult<Value> + 'static,
    {
        let reified = match &signature {
            Some(ft) => self.types.function(ft.clone()),
            None => self.types.primitive(Primitive::Function),
        };
        Value::Function(Rc::new(Function::new(
            Rc::from(name),
            signature,
            reified,
            Rc::new(body),
        )))
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Reified type of any value
    pub fn runtime_type(&self, value: &Value) -> TypeRef {
        self.types.runtime_type(value)
    }

    /// `value is ty`
    pub fn is(&self, value: &Value, ty: &TypeRef) -> bool {
        ty.is(value)
    }

    /// `value as ty`
    pub fn cast(&self, value: Value, ty: &TypeRef) -> RtResult<Value> {
        self.types.cast(ty, value)
    }

    /// Placeholder primitive: always fails
    pub fn unimplemented(&self, what: &str) -> RuntimeError {
        RuntimeError::Unimplemented(what.to_string())
    }

    // ========================================================================
    // Program entry
    // ========================================================================

    /// Resolve `library`, call its exported `entry` function with `args`,
    /// and drain the scheduler.
    ///
    /// A future result is awaited; if the scheduler goes idle while it is
    /// still pending the call fails with [`RuntimeError::NeverCompleted`].
    pub fn run_main(&self, library: &str, entry: &str, args: impl Into<Arguments>) -> RtResult<Value> {
        let ns = Value::Namespace(self.resolve(library)?);
        let result = self.invoke(&ns, entry, args)?;
        match result {
            Value::Future(future) => {
                future.mark_handled();
                self.run_until_idle();
                match future.result() {
                    Some(outcome) => outcome,
                    None => Err(RuntimeError::NeverCompleted(format!("{}.{}", library, entry))),
                }
            }
            other => {
                self.run_until_idle();
                Ok(other)
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::LibraryDescriptor;

    #[test]
    fn test_function_types() {
        let rt = Runtime::new();
        let untyped = rt.function("f", None, |_, _| Ok(Value::Null));
        assert_eq!(rt.runtime_type(&untyped), rt.types().primitive(Primitive::Function));

        let ft = FunctionType::new(rt.types().int()).required(rt.types().int());
        let typed = rt.function("g", Some(ft.clone()), |_, args| Ok(args.arg(0)));
        assert_eq!(rt.runtime_type(&typed), rt.types().function(ft));
        assert!(rt.is(&typed, &rt.types().primitive(Primitive::Function)));
    }

    #[test]
    fn test_unimplemented_fails_loudly() {
        let rt = Runtime::new();
        let err = rt.unimplemented("reflection");
        assert!(matches!(err, RuntimeError::Unimplemented(ref what) if what == "reflection"));
    }

    #[test]
    fn test_run_main_sync_entry() {
        let rt = Runtime::new();
        rt.register_library(LibraryDescriptor::new("app", |rt, ns, _| {
            ns.export(
                "main",
                rt.function("main", None, |_, args| Ok(Value::Int(args.len() as i64))),
            );
            Ok(())
        }))
        .unwrap();
        let result = rt.run_main("app", "main", vec![Value::Null, Value::Null]).unwrap();
        assert!(matches!(result, Value::Int(2)));
    }

    #[test]
    fn test_run_main_pending_future() {
        let rt = Runtime::new();
        rt.register_library(LibraryDescriptor::new("app", |rt, ns, _| {
            ns.export(
                "main",
                rt.function("main", None, |rt, _| {
                    let completer = rt.completer(rt.types().void());
                    Ok(Value::Future(completer.future()))
                }),
            );
            Ok(())
        }))
        .unwrap();
        let err = rt.run_main("app", "main", Arguments::new()).unwrap_err();
        assert!(matches!(err, RuntimeError::NeverCompleted(_)));
    }
}
