//! Runtime error types.
//!
//! Every primitive the runtime exposes returns [`RtResult`]. Failures raised
//! by dispatch and casts carry the structured data a standard library needs
//! to build a diagnostic; the `Display` impls here stay terse.

use std::fmt;
use std::rc::Rc;

use crate::dispatch::Invocation;
use crate::signature::ArityError;
use crate::types::TypeRef;
use crate::value::Value;

/// Result type for runtime operations
pub type RtResult<T> = Result<T, RuntimeError>;

/// Why a dynamic dispatch could not reach a target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingReason {
    /// No member with that name exists on the receiver
    Missing,
    /// The member exists but the arguments do not fit its signature
    Arity(ArityError),
    /// The member is a final field and has no setter
    ReadOnly,
}

/// Structured description of a failed dynamic dispatch
#[derive(Debug, Clone)]
pub struct NoSuchMember {
    /// The receiver the member was looked up on
    pub receiver: Value,
    /// What was attempted: member name, access kind, arguments
    pub invocation: Invocation,
    /// Why the lookup failed
    pub reason: MissingReason,
}

impl fmt::Display for NoSuchMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no {} '{}' on {}",
            self.invocation.kind,
            self.invocation.member,
            self.receiver.type_name()
        )?;
        match &self.reason {
            MissingReason::Missing => Ok(()),
            MissingReason::Arity(arity) => write!(f, " ({})", arity),
            MissingReason::ReadOnly => write!(f, " (read-only)"),
        }
    }
}

/// Structured description of a rejected `as`/`check`
#[derive(Debug, Clone)]
pub struct CastFailure {
    /// The value that failed the test
    pub value: Value,
    /// The type it was cast to
    pub expected: TypeRef,
    /// The runtime type of the value
    pub actual: TypeRef,
    /// `true` when raised by an implicit argument/return check rather than `as`
    pub implicit: bool,
}

impl fmt::Display for CastFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type '{}' is not a subtype of type '{}'",
            self.actual, self.expected
        )?;
        if self.implicit {
            write!(f, " in type check")?;
        }
        Ok(())
    }
}

/// Errors raised by the runtime
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    /// Dispatch target absent, arity mismatch, or write to a read-only member
    #[error("NoSuchMember: {0}")]
    NoSuchMember(Box<NoSuchMember>),

    /// A reified type rejected a value
    #[error("CastFailure: {0}")]
    CastFailure(Box<CastFailure>),

    /// A primitive that is deliberately left unimplemented
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// A failed computation whose failure was never observed by a listener
    #[error("Uncaught computation failure: {0}")]
    UncaughtComputationFailure(Box<RuntimeError>),

    /// A source-language exception value
    #[error("Thrown: {0:?}")]
    Thrown(Value),

    /// `resolve` was called for a library nobody registered
    #[error("Library not found: {0}")]
    LibraryNotFound(Rc<str>),

    /// A library name was registered twice
    #[error("Library already registered: {0}")]
    DuplicateLibrary(Rc<str>),

    /// A class with the same qualified name was registered twice
    #[error("Class already registered: {0}")]
    DuplicateClass(String),

    /// A deferred accessor was asked for a library the loader never declared as lazy
    #[error("Library {library} does not lazily import {import}")]
    UndeclaredDeferredImport {
        /// Library whose loader asked
        library: Rc<str>,
        /// The requested import
        import: Rc<str>,
    },

    /// A generic template was given the wrong number of type arguments
    #[error("{template} expects {expected} type arguments, got {got}")]
    TypeArgumentCount {
        /// Template name
        template: Rc<str>,
        /// Declared type parameter count
        expected: usize,
        /// Supplied type argument count
        got: usize,
    },

    /// A lazy value was read while its own initializer was running
    #[error("Cyclic initialization of {0}")]
    CyclicInitialization(String),

    /// A completer was completed twice
    #[error("Future already completed")]
    AlreadyCompleted,

    /// A single-subscription stream was listened to twice
    #[error("Stream has already been listened to")]
    StreamAlreadyListened,

    /// `move_next` was called while a previous `move_next` was still pending
    #[error("Already waiting for next stream element")]
    ConcurrentMoveNext,

    /// A suspension kind that the current computation shape cannot honor
    #[error("Invalid suspension: {0}")]
    InvalidSuspension(&'static str),

    /// The scheduler went idle while a required result was still pending
    #[error("Computation never completed: {0}")]
    NeverCompleted(String),

    /// Runtime options could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Wrap a source-language exception value
    pub fn thrown(value: impl Into<Value>) -> Self {
        RuntimeError::Thrown(value.into())
    }

    /// The thrown value, if this is a source-language exception
    pub fn thrown_value(&self) -> Option<&Value> {
        match self {
            RuntimeError::Thrown(value) => Some(value),
            _ => None,
        }
    }

    /// The structured no-such-member payload, if any
    pub fn as_no_such_member(&self) -> Option<&NoSuchMember> {
        match self {
            RuntimeError::NoSuchMember(nsm) => Some(nsm),
            _ => None,
        }
    }

    /// The structured cast payload, if any
    pub fn as_cast_failure(&self) -> Option<&CastFailure> {
        match self {
            RuntimeError::CastFailure(cast) => Some(cast),
            _ => None,
        }
    }
}

impl From<NoSuchMember> for RuntimeError {
    fn from(nsm: NoSuchMember) -> Self {
        RuntimeError::NoSuchMember(Box::new(nsm))
    }
}

impl From<CastFailure> for RuntimeError {
    fn from(cast: CastFailure) -> Self {
        RuntimeError::CastFailure(Box::new(cast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thrown_roundtrip() {
        let err = RuntimeError::thrown(Value::Int(7));
        assert!(matches!(err.thrown_value(), Some(Value::Int(7))));
        assert!(err.as_no_such_member().is_none());
    }

    #[test]
    fn test_error_messages() {
        let err = RuntimeError::TypeArgumentCount {
            template: "Box".into(),
            expected: 1,
            got: 2,
        };
        assert_eq!(err.to_string(), "Box expects 1 type arguments, got 2");
        assert_eq!(
            RuntimeError::LibraryNotFound("app".into()).to_string(),
            "Library not found: app"
        );
    }
}
