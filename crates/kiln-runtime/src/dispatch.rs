//! Dynamic Dispatch Engine
//!
//! Member loads, stores, invocations, indexing, and first-class calls
//! against values whose shape is only known at runtime.
//!
//! Instances resolve members class by class along the superclass chain; the
//! first class that declares a getter, field, or method under the name wins.
//! Every other receiver goes through the interceptor registered for its
//! runtime tag and then, for opaque host values, the value's own properties.
//! When nothing matches, an instance whose class declares a fallback handler
//! gets the [`Invocation`] instead of a [`NoSuchMember`] failure.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};

use crate::class::{ClassRef, FieldDecl, Getter, Method, ObjectRef, Receiver, Setter, StaticMember};
use crate::defaults::{CALL_MEMBER, INDEX_OPERATOR, INDEX_SET_OPERATOR};
use crate::error::{MissingReason, NoSuchMember, RtResult, RuntimeError};
use crate::names::MemberName;
use crate::runtime::Runtime;
use crate::signature::{check_argument_types, check_arity};
use crate::types::{FunctionType, TypeRef};
use crate::value::{Arguments, FunctionRef, Value};

/// What kind of access an [`Invocation`] describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationKind {
    /// Property read
    Getter,
    /// Property write
    Setter,
    /// Method call
    Method,
    /// Calling the receiver itself
    Call,
    /// `receiver[key]`
    Index,
    /// `receiver[key] = value`
    IndexSet,
    /// Constructor invocation
    Constructor,
}

impl fmt::Display for InvocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvocationKind::Getter => "getter",
            InvocationKind::Setter => "setter",
            InvocationKind::Method => "method",
            InvocationKind::Call => "call",
            InvocationKind::Index => "index operator",
            InvocationKind::IndexSet => "index assignment",
            InvocationKind::Constructor => "constructor",
        };
        f.write_str(text)
    }
}

/// Description of an attempted dynamic access
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Access kind
    pub kind: InvocationKind,
    /// Member name or private token
    pub member: MemberName,
    /// Supplied arguments (a setter carries its value as the only positional)
    pub args: Arguments,
}

impl Invocation {
    /// A property read
    pub fn getter(member: MemberName) -> Self {
        Self {
            kind: InvocationKind::Getter,
            member,
            args: Arguments::new(),
        }
    }

    /// A property write
    pub fn setter(member: MemberName, value: Value) -> Self {
        Self {
            kind: InvocationKind::Setter,
            member,
            args: Arguments::positional(vec![value]),
        }
    }

    /// A method call
    pub fn method(member: MemberName, args: Arguments) -> Self {
        Self {
            kind: InvocationKind::Method,
            member,
            args,
        }
    }

    /// Whether this reads a property
    pub fn is_getter(&self) -> bool {
        self.kind == InvocationKind::Getter
    }

    /// Whether this writes a property
    pub fn is_setter(&self) -> bool {
        self.kind == InvocationKind::Setter
    }
}

// ============================================================================
// Interceptors
// ============================================================================

/// Interceptor method body; the receiver is passed explicitly
pub type InterceptorFn = Rc<dyn Fn(&Runtime, &Value, Arguments) -> RtResult<Value>>;
/// Interceptor getter body
pub type InterceptorGetter = Rc<dyn Fn(&Runtime, &Value) -> RtResult<Value>>;
/// Interceptor setter body
pub type InterceptorSetter = Rc<dyn Fn(&Runtime, &Value, Value) -> RtResult<()>>;

#[derive(Clone)]
struct InterceptorMethod {
    signature: Option<FunctionType>,
    body: InterceptorFn,
}

/// Member table for one host-native runtime tag
#[derive(Default)]
pub struct Interceptor {
    methods: FxHashMap<MemberName, InterceptorMethod>,
    getters: FxHashMap<MemberName, InterceptorGetter>,
    setters: FxHashMap<MemberName, InterceptorSetter>,
}

impl Interceptor {
    /// Empty interceptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method that accepts any arguments
    pub fn method<F>(mut self, name: impl Into<MemberName>, body: F) -> Self
    where
        F: Fn(&Runtime, &Value, Arguments) -> RtResult<Value> + 'static,
    {
        self.methods.insert(
            name.into(),
            InterceptorMethod {
                signature: None,
                body: Rc::new(body),
            },
        );
        self
    }

    /// Add a method whose calls are validated against `signature`
    pub fn method_with_signature<F>(mut self, name: impl Into<MemberName>, signature: FunctionType, body: F) -> Self
    where
        F: Fn(&Runtime, &Value, Arguments) -> RtResult<Value> + 'static,
    {
        self.methods.insert(
            name.into(),
            InterceptorMethod {
                signature: Some(signature),
                body: Rc::new(body),
            },
        );
        self
    }

    /// Add a getter
    pub fn getter<F>(mut self, name: impl Into<MemberName>, body: F) -> Self
    where
        F: Fn(&Runtime, &Value) -> RtResult<Value> + 'static,
    {
        self.getters.insert(name.into(), Rc::new(body));
        self
    }

    /// Add a setter
    pub fn setter<F>(mut self, name: impl Into<MemberName>, body: F) -> Self
    where
        F: Fn(&Runtime, &Value, Value) -> RtResult<()> + 'static,
    {
        self.setters.insert(name.into(), Rc::new(body));
        self
    }
}

/// Interceptors keyed by runtime tag
#[derive(Default)]
pub struct InterceptorTable {
    by_tag: RefCell<FxHashMap<Rc<str>, Rc<Interceptor>>>,
}

impl InterceptorTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the interceptor for `tag`
    pub fn register(&self, tag: &str, interceptor: Interceptor) {
        self.by_tag
            .borrow_mut()
            .insert(Rc::from(tag), Rc::new(interceptor));
    }

    /// Interceptor for `tag`
    pub fn get(&self, tag: &str) -> Option<Rc<Interceptor>> {
        self.by_tag.borrow().get(tag).cloned()
    }

    /// Number of registered tags
    pub fn len(&self) -> usize {
        self.by_tag.borrow().len()
    }

    /// Whether no interceptors are registered
    pub fn is_empty(&self) -> bool {
        self.by_tag.borrow().is_empty()
    }
}

// ============================================================================
// Member resolution
// ============================================================================

enum Resolved {
    Getter(ClassRef, Getter),
    Field(FieldDecl),
    Method(ClassRef, Method),
}

enum SetTarget {
    Setter(ClassRef, Setter),
    Field(ClassRef, FieldDecl),
}

fn resolve_member(start: Option<ClassRef>, name: &MemberName) -> Option<Resolved> {
    for class in start?.chain() {
        if let Some(getter) = class.local_getter(name) {
            return Some(Resolved::Getter(class, getter));
        }
        if let Some(field) = class.local_field(name) {
            return Some(Resolved::Field(field));
        }
        if let Some(method) = class.local_method(name) {
            return Some(Resolved::Method(class, method));
        }
    }
    None
}

fn resolve_setter(start: Option<ClassRef>, name: &MemberName) -> Option<SetTarget> {
    for class in start?.chain() {
        if let Some(setter) = class.local_setter(name) {
            return Some(SetTarget::Setter(class, setter));
        }
        if let Some(field) = class.local_field(name) {
            return Some(SetTarget::Field(class, field));
        }
    }
    None
}

fn missing(receiver: &Value, invocation: Invocation, reason: MissingReason) -> RuntimeError {
    NoSuchMember {
        receiver: receiver.clone(),
        invocation,
        reason,
    }
    .into()
}

impl Runtime {
    // ========================================================================
    // Public primitives
    // ========================================================================

    /// Read a member
    pub fn load(&self, receiver: &Value, name: impl Into<MemberName>) -> RtResult<Value> {
        let name = name.into();
        match receiver {
            Value::Object(obj) => self.load_instance(obj, Some(obj.class().clone()), name),
            Value::Class(class) => self.load_static(class, name),
            Value::Namespace(ns) => match ns.get(self, &name)? {
                Some(value) => Ok(value),
                None => Err(missing(receiver, Invocation::getter(name), MissingReason::Missing)),
            },
            Value::Function(_) if name.as_str() == CALL_MEMBER && !name.is_private() => {
                Ok(receiver.clone())
            }
            _ => self.load_host(receiver, name),
        }
    }

    /// Write a member
    pub fn store(&self, receiver: &Value, name: impl Into<MemberName>, value: Value) -> RtResult<()> {
        let name = name.into();
        match receiver {
            Value::Object(obj) => self.store_instance(obj, Some(obj.class().clone()), name, value),
            Value::Class(class) => self.store_static(class, name, value),
            Value::Namespace(ns) => {
                if ns.set(&name, value.clone()) {
                    Ok(())
                } else {
                    Err(missing(receiver, Invocation::setter(name, value), MissingReason::Missing))
                }
            }
            _ => self.store_host(receiver, name, value),
        }
    }

    /// Call a method
    pub fn invoke(&self, receiver: &Value, name: impl Into<MemberName>, args: impl Into<Arguments>) -> RtResult<Value> {
        self.invoke_as(receiver, name.into(), args.into(), InvocationKind::Method)
    }

    /// `receiver[key]`
    pub fn index(&self, receiver: &Value, key: Value) -> RtResult<Value> {
        self.invoke_as(
            receiver,
            MemberName::public(INDEX_OPERATOR),
            Arguments::positional(vec![key]),
            InvocationKind::Index,
        )
    }

    /// `receiver[key] = value`
    pub fn set_index(&self, receiver: &Value, key: Value, value: Value) -> RtResult<()> {
        self.invoke_as(
            receiver,
            MemberName::public(INDEX_SET_OPERATOR),
            Arguments::positional(vec![key, value]),
            InvocationKind::IndexSet,
        )
        .map(|_| ())
    }

    /// Call a first-class value
    pub fn call(&self, callee: &Value, args: impl Into<Arguments>) -> RtResult<Value> {
        let args = args.into();
        match callee {
            Value::Function(func) => self.call_function(func, args),
            _ => self.invoke_as(callee, MemberName::public(CALL_MEMBER), args, InvocationKind::Call),
        }
    }

    /// `super.name` from inside a member body
    pub fn load_super(&self, receiver: &Receiver, name: impl Into<MemberName>) -> RtResult<Value> {
        self.load_instance(&receiver.this, receiver.holder.superclass(), name.into())
    }

    /// `super.name = value` from inside a member body
    pub fn store_super(&self, receiver: &Receiver, name: impl Into<MemberName>, value: Value) -> RtResult<()> {
        self.store_instance(&receiver.this, receiver.holder.superclass(), name.into(), value)
    }

    /// `super.name(args)` from inside a member body
    pub fn invoke_super(
        &self,
        receiver: &Receiver,
        name: impl Into<MemberName>,
        args: impl Into<Arguments>,
    ) -> RtResult<Value> {
        self.invoke_instance(
            &receiver.this,
            receiver.holder.superclass(),
            name.into(),
            args.into(),
            InvocationKind::Method,
        )
    }

    // ========================================================================
    // Construction
    // ========================================================================

    /// Allocate an instance, run field initializers, then the named constructor
    pub fn construct(
        &self,
        class: &ClassRef,
        ctor: impl Into<MemberName>,
        args: impl Into<Arguments>,
    ) -> RtResult<ObjectRef> {
        let name = ctor.into();
        let args = args.into();
        if class.find_constructor(&name).is_none() {
            return Err(missing(
                &Value::Class(class.clone()),
                Invocation {
                    kind: InvocationKind::Constructor,
                    member: name,
                    args,
                },
                MissingReason::Missing,
            ));
        }
        let obj = crate::class::Instance::allocate(class);
        class.initialize_fields(self, &obj)?;
        self.run_constructor(class, &obj, name, args)?;
        Ok(obj)
    }

    /// Run a constructor of `class` against an already initialized instance
    pub fn run_constructor(
        &self,
        class: &ClassRef,
        this: &ObjectRef,
        ctor: impl Into<MemberName>,
        args: impl Into<Arguments>,
    ) -> RtResult<()> {
        let name = ctor.into();
        let args = args.into();
        let invocation = |args: Arguments, name: MemberName| Invocation {
            kind: InvocationKind::Constructor,
            member: name,
            args,
        };
        let Some(target) = class.find_constructor(&name) else {
            return Err(missing(
                &Value::Class(class.clone()),
                invocation(args, name),
                MissingReason::Missing,
            ));
        };
        let Some((holder, body)) = target else {
            // Implicit constructor of a root class
            let implicit = FunctionType::new(self.types().void());
            return match check_arity(&implicit, &args) {
                Ok(()) => Ok(()),
                Err(arity) => Err(missing(
                    &Value::Class(class.clone()),
                    invocation(args, name),
                    MissingReason::Arity(arity),
                )),
            };
        };
        if let Some(ft) = self.signatures().constructor(holder.id(), &name) {
            if let Err(arity) = check_arity(&ft, &args) {
                return Err(missing(
                    &Value::Class(holder),
                    invocation(args, name),
                    MissingReason::Arity(arity),
                ));
            }
            if self.options().check_arguments {
                check_argument_types(self.types(), &ft, &args)?;
            }
        }
        body(
            self,
            &Receiver {
                this: this.clone(),
                holder,
            },
            args,
        )
    }

    /// `super(args)` / `super.name(args)` from inside a constructor body
    pub fn construct_super(
        &self,
        receiver: &Receiver,
        ctor: impl Into<MemberName>,
        args: impl Into<Arguments>,
    ) -> RtResult<()> {
        let name = ctor.into();
        let args = args.into();
        match receiver.holder.superclass() {
            Some(parent) => self.run_constructor(&parent, &receiver.this, name, args),
            None if name.as_str().is_empty() && args.is_empty() => Ok(()),
            None => Err(missing(
                &receiver.this_value(),
                Invocation {
                    kind: InvocationKind::Constructor,
                    member: name,
                    args,
                },
                MissingReason::Missing,
            )),
        }
    }

    // ========================================================================
    // Instances
    // ========================================================================

    fn fallback(&self, obj: &ObjectRef, invocation: Invocation, reason: MissingReason) -> RtResult<Value> {
        let Some((holder, handler)) = obj.class().no_such_method_handler() else {
            return Err(missing(&Value::Object(obj.clone()), invocation, reason));
        };
        if self.options().trace_dispatch_fallbacks {
            debug!(
                class = obj.class().name(),
                member = %invocation.member,
                kind = %invocation.kind,
                "no-such-method fallback"
            );
        } else {
            trace!(class = obj.class().name(), member = %invocation.member, "no-such-method fallback");
        }
        handler(
            self,
            &Receiver {
                this: obj.clone(),
                holder,
            },
            invocation,
        )
    }

    fn load_instance(&self, obj: &ObjectRef, start: Option<ClassRef>, name: MemberName) -> RtResult<Value> {
        match resolve_member(start, &name) {
            Some(Resolved::Getter(holder, getter)) => getter(
                self,
                &Receiver {
                    this: obj.clone(),
                    holder,
                },
            ),
            Some(Resolved::Field(field)) => Ok(obj.field(field.name).unwrap_or(Value::Null)),
            Some(Resolved::Method(holder, method)) => Ok(self.tear_off(obj, holder, name, method)),
            None => self.fallback(obj, Invocation::getter(name), MissingReason::Missing),
        }
    }

    fn store_instance(&self, obj: &ObjectRef, start: Option<ClassRef>, name: MemberName, value: Value) -> RtResult<()> {
        match resolve_setter(start, &name) {
            Some(SetTarget::Setter(holder, setter)) => {
                let value = self.check_store(&holder, &name, value)?;
                setter(
                    self,
                    &Receiver {
                        this: obj.clone(),
                        holder,
                    },
                    value,
                )
            }
            Some(SetTarget::Field(holder, field)) if !field.is_final => {
                let value = self.check_store(&holder, &name, value)?;
                obj.set_field(name, value);
                Ok(())
            }
            Some(SetTarget::Field(..)) => self
                .fallback(obj, Invocation::setter(name, value), MissingReason::ReadOnly)
                .map(|_| ()),
            None => self
                .fallback(obj, Invocation::setter(name, value), MissingReason::Missing)
                .map(|_| ()),
        }
    }

    fn check_store(&self, holder: &ClassRef, name: &MemberName, value: Value) -> RtResult<Value> {
        if !self.options().check_arguments {
            return Ok(value);
        }
        match self.signatures().setter_type(holder.id(), name) {
            Some(ty) => self.types().check(&ty, value),
            None => Ok(value),
        }
    }

    fn invoke_instance(
        &self,
        obj: &ObjectRef,
        start: Option<ClassRef>,
        name: MemberName,
        args: Arguments,
        kind: InvocationKind,
    ) -> RtResult<Value> {
        let receiver = |holder: ClassRef| Receiver {
            this: obj.clone(),
            holder,
        };
        match resolve_member(start, &name) {
            Some(Resolved::Method(holder, method)) => {
                if let Some(ft) = self.signatures().method(holder.id(), &name) {
                    if let Err(arity) = check_arity(&ft, &args) {
                        let invocation = Invocation {
                            kind,
                            member: name,
                            args,
                        };
                        return self.fallback(obj, invocation, MissingReason::Arity(arity));
                    }
                    if self.options().check_arguments {
                        check_argument_types(self.types(), &ft, &args)?;
                    }
                }
                method(self, &receiver(holder), args)
            }
            Some(Resolved::Getter(holder, getter)) => {
                let target = getter(self, &receiver(holder))?;
                self.call(&target, args)
            }
            Some(Resolved::Field(field)) => {
                let target = obj.field(field.name).unwrap_or(Value::Null);
                self.call(&target, args)
            }
            None => {
                let invocation = Invocation {
                    kind,
                    member: name,
                    args,
                };
                self.fallback(obj, invocation, MissingReason::Missing)
            }
        }
    }

    fn tear_off(&self, obj: &ObjectRef, holder: ClassRef, name: MemberName, method: Method) -> Value {
        let signature = self.signatures().method(holder.id(), &name);
        let label = format!("{}.{}", holder.name(), name);
        let receiver = Receiver {
            this: obj.clone(),
            holder,
        };
        self.function(&label, signature, move |rt, args| method(rt, &receiver, args))
    }

    // ========================================================================
    // First-class functions
    // ========================================================================

    fn call_function(&self, func: &FunctionRef, args: Arguments) -> RtResult<Value> {
        if let Some(ft) = func.signature() {
            if let Err(arity) = check_arity(ft, &args) {
                let invocation = Invocation {
                    kind: InvocationKind::Call,
                    member: MemberName::public(CALL_MEMBER),
                    args,
                };
                return Err(missing(
                    &Value::Function(func.clone()),
                    invocation,
                    MissingReason::Arity(arity),
                ));
            }
            if self.options().check_arguments {
                check_argument_types(self.types(), ft, &args)?;
            }
        }
        let body = func.body();
        body(self, args)
    }

    fn invoke_as(&self, receiver: &Value, name: MemberName, args: Arguments, kind: InvocationKind) -> RtResult<Value> {
        match receiver {
            Value::Object(obj) => self.invoke_instance(obj, Some(obj.class().clone()), name, args, kind),
            Value::Function(func) if name.as_str() == CALL_MEMBER && !name.is_private() => {
                self.call_function(func, args)
            }
            Value::Class(class) => self.invoke_static(class, name, args),
            Value::Namespace(ns) => match ns.get(self, &name)? {
                Some(target) => self.call(&target, args),
                None => Err(missing(
                    receiver,
                    Invocation {
                        kind,
                        member: name,
                        args,
                    },
                    MissingReason::Missing,
                )),
            },
            _ => self.invoke_host(receiver, name, args, kind),
        }
    }

    // ========================================================================
    // Statics
    // ========================================================================

    fn load_static(&self, class: &ClassRef, name: MemberName) -> RtResult<Value> {
        match class.static_member(&name) {
            Some(StaticMember::Field(field)) => field.get(self),
            Some(StaticMember::Method(body)) => {
                let signature = self.signatures().static_method(class.id(), &name);
                let label = format!("{}.{}", class.name(), name);
                Ok(self.function(&label, signature, move |rt, args| body(rt, args)))
            }
            None => Err(missing(
                &Value::Class(class.clone()),
                Invocation::getter(name),
                MissingReason::Missing,
            )),
        }
    }

    fn store_static(&self, class: &ClassRef, name: MemberName, value: Value) -> RtResult<()> {
        let reason = match class.static_member(&name) {
            Some(StaticMember::Field(field)) => {
                field.set(value);
                return Ok(());
            }
            Some(StaticMember::Method(_)) => MissingReason::ReadOnly,
            None => MissingReason::Missing,
        };
        Err(missing(
            &Value::Class(class.clone()),
            Invocation::setter(name, value),
            reason,
        ))
    }

    fn invoke_static(&self, class: &ClassRef, name: MemberName, args: Arguments) -> RtResult<Value> {
        match class.static_member(&name) {
            Some(StaticMember::Method(body)) => {
                if let Some(ft) = self.signatures().static_method(class.id(), &name) {
                    if let Err(arity) = check_arity(&ft, &args) {
                        return Err(missing(
                            &Value::Class(class.clone()),
                            Invocation::method(name, args),
                            MissingReason::Arity(arity),
                        ));
                    }
                    if self.options().check_arguments {
                        check_argument_types(self.types(), &ft, &args)?;
                    }
                }
                body(self, args)
            }
            Some(StaticMember::Field(field)) => {
                let target = field.get(self)?;
                self.call(&target, args)
            }
            None => Err(missing(
                &Value::Class(class.clone()),
                Invocation::method(name, args),
                MissingReason::Missing,
            )),
        }
    }

    // ========================================================================
    // Host-native receivers
    // ========================================================================

    fn load_host(&self, receiver: &Value, name: MemberName) -> RtResult<Value> {
        if let Some(interceptor) = self.interceptors().get(receiver.runtime_tag()) {
            if let Some(getter) = interceptor.getters.get(&name) {
                return getter(self, receiver);
            }
            if let Some(method) = interceptor.methods.get(&name).cloned() {
                let label = format!("{}.{}", receiver.runtime_tag(), name);
                let this = receiver.clone();
                let body = method.body;
                return Ok(self.function(&label, method.signature, move |rt, args| body(rt, &this, args)));
            }
        }
        if let Value::Host(host) = receiver {
            if let Some(value) = host.get(&name) {
                return Ok(value);
            }
        }
        Err(missing(receiver, Invocation::getter(name), MissingReason::Missing))
    }

    fn store_host(&self, receiver: &Value, name: MemberName, value: Value) -> RtResult<()> {
        if let Some(interceptor) = self.interceptors().get(receiver.runtime_tag()) {
            if let Some(setter) = interceptor.setters.get(&name) {
                return setter(self, receiver, value);
            }
        }
        if let Value::Host(host) = receiver {
            host.set(name, value);
            return Ok(());
        }
        Err(missing(receiver, Invocation::setter(name, value), MissingReason::Missing))
    }

    fn invoke_host(&self, receiver: &Value, name: MemberName, args: Arguments, kind: InvocationKind) -> RtResult<Value> {
        if let Some(interceptor) = self.interceptors().get(receiver.runtime_tag()) {
            if let Some(method) = interceptor.methods.get(&name) {
                if let Some(ft) = &method.signature {
                    if let Err(arity) = check_arity(ft, &args) {
                        let invocation = Invocation {
                            kind,
                            member: name,
                            args,
                        };
                        return Err(missing(receiver, invocation, MissingReason::Arity(arity)));
                    }
                    if self.options().check_arguments {
                        check_argument_types(self.types(), ft, &args)?;
                    }
                }
                return (method.body)(self, receiver, args);
            }
            if let Some(getter) = interceptor.getters.get(&name) {
                let target = getter(self, receiver)?;
                return self.call(&target, args);
            }
        }
        if let Value::Host(host) = receiver {
            if let Some(target) = host.get(&name) {
                return self.call(&target, args);
            }
        }
        let invocation = Invocation {
            kind,
            member: name,
            args,
        };
        Err(missing(receiver, invocation, MissingReason::Missing))
    }

    /// Implicit check of a value against a declared type
    pub fn check_value(&self, ty: &TypeRef, value: Value) -> RtResult<Value> {
        self.types().check(ty, value)
    }
}
