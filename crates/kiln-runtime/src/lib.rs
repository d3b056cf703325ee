//! Kiln Runtime
//!
//! The support layer that translated Kiln programs run against:
//! - **Module Registry**: lazily resolved libraries with cycle-tolerant
//!   placeholder namespaces and deferred imports (`module`)
//! - **Generics**: reified types, canonical instantiation caches, and
//!   call-site type caches (`types`, `generic`)
//! - **Dispatch**: dynamic member access with signature checks, interceptors
//!   for host values, and no-such-method fallbacks (`dispatch`, `signature`)
//! - **Mixins**: class composition with linearised super calls (`mixin`)
//! - **Suspension Bridge**: resumable bodies driven as futures, streams, or
//!   iterables on a microtask scheduler (`suspend`, `scheduler`)
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_runtime::{Arguments, LibraryDescriptor, Runtime, Value};
//!
//! let rt = Runtime::new();
//! rt.register_library(LibraryDescriptor::new("app", |rt, ns, _imports| {
//!     ns.export("main", rt.function("main", None, |_, _| Ok(Value::str("hi"))));
//!     Ok(())
//! }))?;
//! let result = rt.run_main("app", "main", Arguments::new())?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

pub mod class;
pub mod defaults;
pub mod dispatch;
pub mod error;
pub mod generic;
pub mod lazy;
pub mod mixin;
pub mod module;
pub mod names;
pub mod options;
pub mod runtime;
pub mod scheduler;
pub mod signature;
pub mod suspend;
pub mod types;
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use class::{ClassBuilder, ClassId, ClassRef, ObjectRef, Receiver};
pub use dispatch::{Interceptor, Invocation, InvocationKind};
pub use error::{CastFailure, MissingReason, NoSuchMember, RtResult, RuntimeError};
pub use generic::{GenericFunctionRef, TemplateRef, TypeCache};
pub use lazy::LazyStatic;
pub use module::{Imports, LibraryDescriptor, LibraryState, NamespaceRef};
pub use names::{MemberName, PrivateName};
pub use options::RuntimeOptions;
pub use runtime::Runtime;
pub use signature::{ArityError, ClassSignature};
pub use suspend::{
    Completer, ComputationState, FutureRef, Generator, IterableRef, Resume, Step, StreamEvent,
    StreamIterator, StreamRef, Suspend,
};
pub use types::{FunctionType, Primitive, TypeKind, TypeRef};
pub use value::{Arguments, HostObject, ListObject, MapObject, Value};
