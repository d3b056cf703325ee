//! Reified types
//!
//! A [`TypeRef`] is a runtime value that denotes a type. All type objects are
//! produced by a [`TypePool`], which hash-conses them: two structurally equal
//! type descriptions intern to the same object, so the generic instantiation
//! cache can key on [`TypeId`]s and downstream identity checks hold.
//!
//! Membership follows the source language's runtime model: `null` is a
//! member of every type, `dynamic`/`Object`/`void` accept everything, and
//! generic class instantiations are covariant in their type arguments.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::class::ClassRef;
use crate::error::{CastFailure, RtResult};
use crate::value::Value;

/// Identity of an interned type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    /// Raw id value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Host-primitive type variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    /// `bool`
    Bool,
    /// `int`
    Int,
    /// `double`
    Double,
    /// `num`, the supertype of `int` and `double`
    Num,
    /// `String`
    String,
    /// `Function`, the supertype of every function type
    Function,
    /// `Type`, the type of class and type literals
    Type,
}

impl Primitive {
    fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::Int => "int",
            Primitive::Double => "double",
            Primitive::Num => "num",
            Primitive::String => "String",
            Primitive::Function => "Function",
            Primitive::Type => "Type",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Primitive::Bool, Value::Bool(_))
                | (Primitive::Int, Value::Int(_))
                | (Primitive::Double, Value::Double(_))
                | (Primitive::Num, Value::Int(_) | Value::Double(_))
                | (Primitive::String, Value::Str(_))
                | (Primitive::Function, Value::Function(_))
                | (Primitive::Type, Value::Class(_) | Value::Type(_))
        )
    }
}

/// Structural description of a type
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// `dynamic`
    Dynamic,
    /// `void`
    Void,
    /// `Object`
    Object,
    /// `Never` (bottom)
    Never,
    /// `Null`
    Null,
    /// Host primitive
    Primitive(Primitive),
    /// `List<E>`
    List(TypeRef),
    /// `Map<K, V>`
    Map(TypeRef, TypeRef),
    /// `Future<T>`
    Future(TypeRef),
    /// `Stream<T>`
    Stream(TypeRef),
    /// `Iterable<T>`
    Iterable(TypeRef),
    /// A declared class or an instantiated generic class
    Interface(ClassRef),
    /// A function type
    Function(FunctionType),
    /// Opaque host value with the given runtime tag
    Host(Rc<str>),
}

/// An interned type object
pub struct ReifiedType {
    id: TypeId,
    kind: TypeKind,
}

/// Shared handle to an interned type
#[derive(Clone)]
pub struct TypeRef(Rc<ReifiedType>);

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0.kind == other.0.kind
    }
}

impl Eq for TypeRef {}

impl Hash for TypeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.kind.hash(state);
    }
}

impl TypeRef {
    /// Interned id
    pub fn id(&self) -> TypeId {
        self.0.id
    }

    /// Structural description
    pub fn kind(&self) -> &TypeKind {
        &self.0.kind
    }

    /// Reference identity
    pub fn ptr_eq(&self, other: &TypeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Whether the type accepts every value
    pub fn is_top(&self) -> bool {
        matches!(
            self.kind(),
            TypeKind::Dynamic | TypeKind::Object | TypeKind::Void
        )
    }

    /// Membership test (the `is` operation)
    pub fn is(&self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self.kind() {
            TypeKind::Dynamic | TypeKind::Void | TypeKind::Object => true,
            TypeKind::Never | TypeKind::Null => false,
            TypeKind::Primitive(p) => p.accepts(value),
            TypeKind::List(elem) => match value {
                Value::List(list) => list.element_type().is_subtype_of(elem),
                _ => false,
            },
            TypeKind::Iterable(elem) => match value {
                Value::Iterable(it) => it.element_type().is_subtype_of(elem),
                Value::List(list) => list.element_type().is_subtype_of(elem),
                _ => false,
            },
            TypeKind::Map(key, val) => match value {
                Value::Map(map) => {
                    map.key_type().is_subtype_of(key) && map.value_type().is_subtype_of(val)
                }
                _ => false,
            },
            TypeKind::Future(arg) => match value {
                Value::Future(future) => future.type_arg().is_subtype_of(arg),
                _ => false,
            },
            TypeKind::Stream(elem) => match value {
                Value::Stream(stream) => stream.element_type().is_subtype_of(elem),
                _ => false,
            },
            TypeKind::Interface(class) => match value {
                Value::Object(obj) => obj.class().conforms_to(class),
                _ => false,
            },
            TypeKind::Function(_) => match value {
                Value::Function(func) => func.reified_type().is_subtype_of(self),
                _ => false,
            },
            TypeKind::Host(tag) => match value {
                Value::Host(host) => host.tag() == tag.as_ref(),
                Value::Namespace(_) => tag.as_ref() == "Library",
                _ => false,
            },
        }
    }

    /// Subtype relation between two types
    pub fn is_subtype_of(&self, other: &TypeRef) -> bool {
        if self.ptr_eq(other) || other.is_top() {
            return true;
        }
        match (self.kind(), other.kind()) {
            (TypeKind::Never | TypeKind::Null, _) => true,
            (TypeKind::Primitive(a), TypeKind::Primitive(b)) => {
                a == b || (matches!(a, Primitive::Int | Primitive::Double) && *b == Primitive::Num)
            }
            (TypeKind::List(a), TypeKind::List(b))
            | (TypeKind::List(a), TypeKind::Iterable(b))
            | (TypeKind::Iterable(a), TypeKind::Iterable(b))
            | (TypeKind::Future(a), TypeKind::Future(b))
            | (TypeKind::Stream(a), TypeKind::Stream(b)) => a.is_subtype_of(b),
            (TypeKind::Map(ka, va), TypeKind::Map(kb, vb)) => {
                ka.is_subtype_of(kb) && va.is_subtype_of(vb)
            }
            (TypeKind::Interface(a), TypeKind::Interface(b)) => a.conforms_to(b),
            (TypeKind::Function(_), TypeKind::Primitive(Primitive::Function)) => true,
            (TypeKind::Function(a), TypeKind::Function(b)) => a.is_subtype_of(b),
            (TypeKind::Host(a), TypeKind::Host(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TypeKind::Dynamic => write!(f, "dynamic"),
            TypeKind::Void => write!(f, "void"),
            TypeKind::Object => write!(f, "Object"),
            TypeKind::Never => write!(f, "Never"),
            TypeKind::Null => write!(f, "Null"),
            TypeKind::Primitive(p) => write!(f, "{}", p.name()),
            TypeKind::List(elem) => write!(f, "List<{}>", elem),
            TypeKind::Map(key, val) => write!(f, "Map<{}, {}>", key, val),
            TypeKind::Future(arg) => write!(f, "Future<{}>", arg),
            TypeKind::Stream(elem) => write!(f, "Stream<{}>", elem),
            TypeKind::Iterable(elem) => write!(f, "Iterable<{}>", elem),
            TypeKind::Interface(class) => write!(f, "{}", class.name()),
            TypeKind::Function(ft) => write!(f, "{}", ft),
            TypeKind::Host(tag) => write!(f, "{}", tag),
        }
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

// ============================================================================
// Function types
// ============================================================================

/// An optional positional parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OptionalParam {
    /// Parameter type
    pub ty: TypeRef,
    /// Whether the declaration supplies a default value
    pub has_default: bool,
}

/// A named parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedParam {
    /// Parameter name
    pub name: Rc<str>,
    /// Parameter type
    pub ty: TypeRef,
    /// Whether the declaration supplies a default value
    pub has_default: bool,
    /// Whether callers must supply it
    pub required: bool,
}

/// Parameter and return type descriptor of a function, method, or constructor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    /// Required positional parameter types
    pub required: Vec<TypeRef>,
    /// Optional positional parameters
    pub optional: Vec<OptionalParam>,
    /// Named parameters
    pub named: Vec<NamedParam>,
    /// Return type
    pub returns: TypeRef,
}

impl FunctionType {
    /// A function type with no parameters
    pub fn new(returns: TypeRef) -> Self {
        Self {
            required: Vec::new(),
            optional: Vec::new(),
            named: Vec::new(),
            returns,
        }
    }

    /// Append a required positional parameter
    pub fn required(mut self, ty: TypeRef) -> Self {
        self.required.push(ty);
        self
    }

    /// Append an optional positional parameter
    pub fn optional(mut self, ty: TypeRef, has_default: bool) -> Self {
        self.optional.push(OptionalParam { ty, has_default });
        self
    }

    /// Add an optional named parameter
    pub fn named(mut self, name: &str, ty: TypeRef, has_default: bool) -> Self {
        self.named.push(NamedParam {
            name: Rc::from(name),
            ty,
            has_default,
            required: false,
        });
        self
    }

    /// Add a required named parameter
    pub fn required_named(mut self, name: &str, ty: TypeRef) -> Self {
        self.named.push(NamedParam {
            name: Rc::from(name),
            ty,
            has_default: false,
            required: true,
        });
        self
    }

    /// Minimum positional argument count
    pub fn min_positional(&self) -> usize {
        self.required.len()
    }

    /// Maximum positional argument count
    pub fn max_positional(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    /// Type of the positional parameter at `index`
    pub fn positional_type(&self, index: usize) -> Option<&TypeRef> {
        match index.checked_sub(self.required.len()) {
            None => self.required.get(index),
            Some(offset) => self.optional.get(offset).map(|p| &p.ty),
        }
    }

    /// Named parameter by name
    pub fn named_param(&self, name: &str) -> Option<&NamedParam> {
        self.named.iter().find(|p| p.name.as_ref() == name)
    }

    /// Function subtyping: contravariant parameters, covariant return
    pub fn is_subtype_of(&self, other: &FunctionType) -> bool {
        if !(other.returns.is_top() || self.returns.is_subtype_of(&other.returns)) {
            return false;
        }
        // Must accept every call shape `other` accepts
        if self.min_positional() > other.min_positional()
            || self.max_positional() < other.max_positional()
        {
            return false;
        }
        for index in 0..other.max_positional() {
            let (Some(mine), Some(theirs)) =
                (self.positional_type(index), other.positional_type(index))
            else {
                return false;
            };
            if !theirs.is_subtype_of(mine) {
                return false;
            }
        }
        for theirs in &other.named {
            match self.named_param(&theirs.name) {
                Some(mine) if theirs.ty.is_subtype_of(&mine.ty) => {}
                _ => return false,
            }
        }
        self.named
            .iter()
            .filter(|p| p.required)
            .all(|mine| other.named_param(&mine.name).is_some_and(|p| p.required))
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Function(", self.returns)?;
        let mut first = true;
        for ty in &self.required {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}", ty)?;
        }
        if !self.optional.is_empty() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let params: Vec<String> = self.optional.iter().map(|p| p.ty.to_string()).collect();
            write!(f, "[{}]", params.join(", "))?;
        }
        if !self.named.is_empty() {
            if !first {
                write!(f, ", ")?;
            }
            let params: Vec<String> = self
                .named
                .iter()
                .map(|p| {
                    let req = if p.required { "required " } else { "" };
                    format!("{}{} {}", req, p.ty, p.name)
                })
                .collect();
            write!(f, "{{{}}}", params.join(", "))?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// Type pool
// ============================================================================

/// Canonical pool of type objects
pub struct TypePool {
    by_kind: RefCell<FxHashMap<TypeKind, TypeRef>>,
    next_id: Cell<u32>,
    dynamic: TypeRef,
    void: TypeRef,
    object: TypeRef,
    never: TypeRef,
    null: TypeRef,
}

fn intern_into(
    by_kind: &RefCell<FxHashMap<TypeKind, TypeRef>>,
    next_id: &Cell<u32>,
    kind: TypeKind,
) -> TypeRef {
    if let Some(existing) = by_kind.borrow().get(&kind) {
        return existing.clone();
    }
    let id = TypeId(next_id.get());
    next_id.set(id.0 + 1);
    let ty = TypeRef(Rc::new(ReifiedType {
        id,
        kind: kind.clone(),
    }));
    by_kind.borrow_mut().insert(kind, ty.clone());
    ty
}

impl TypePool {
    /// Create a pool seeded with the sentinel types
    pub fn new() -> Self {
        let by_kind = RefCell::new(FxHashMap::default());
        let next_id = Cell::new(0);
        let dynamic = intern_into(&by_kind, &next_id, TypeKind::Dynamic);
        let void = intern_into(&by_kind, &next_id, TypeKind::Void);
        let object = intern_into(&by_kind, &next_id, TypeKind::Object);
        let never = intern_into(&by_kind, &next_id, TypeKind::Never);
        let null = intern_into(&by_kind, &next_id, TypeKind::Null);
        Self {
            by_kind,
            next_id,
            dynamic,
            void,
            object,
            never,
            null,
        }
    }

    /// Intern a type description
    pub fn intern(&self, kind: TypeKind) -> TypeRef {
        intern_into(&self.by_kind, &self.next_id, kind)
    }

    /// The pool's representative for a type that may come from elsewhere
    pub fn canonical(&self, ty: &TypeRef) -> TypeRef {
        self.intern(ty.kind().clone())
    }

    /// Number of interned types
    pub fn len(&self) -> usize {
        self.by_kind.borrow().len()
    }

    /// Whether the pool is empty (never true after construction)
    pub fn is_empty(&self) -> bool {
        self.by_kind.borrow().is_empty()
    }

    /// `dynamic`
    pub fn dynamic(&self) -> TypeRef {
        self.dynamic.clone()
    }

    /// `void`
    pub fn void(&self) -> TypeRef {
        self.void.clone()
    }

    /// `Object`
    pub fn object(&self) -> TypeRef {
        self.object.clone()
    }

    /// `Never`
    pub fn never(&self) -> TypeRef {
        self.never.clone()
    }

    /// `Null`
    pub fn null(&self) -> TypeRef {
        self.null.clone()
    }

    /// A host primitive
    pub fn primitive(&self, primitive: Primitive) -> TypeRef {
        self.intern(TypeKind::Primitive(primitive))
    }

    /// `bool`
    pub fn bool(&self) -> TypeRef {
        self.primitive(Primitive::Bool)
    }

    /// `int`
    pub fn int(&self) -> TypeRef {
        self.primitive(Primitive::Int)
    }

    /// `double`
    pub fn double(&self) -> TypeRef {
        self.primitive(Primitive::Double)
    }

    /// `num`
    pub fn num(&self) -> TypeRef {
        self.primitive(Primitive::Num)
    }

    /// `String`
    pub fn string(&self) -> TypeRef {
        self.primitive(Primitive::String)
    }

    /// `List<elem>`
    pub fn list(&self, elem: TypeRef) -> TypeRef {
        self.intern(TypeKind::List(elem))
    }

    /// `Map<key, value>`
    pub fn map(&self, key: TypeRef, value: TypeRef) -> TypeRef {
        self.intern(TypeKind::Map(key, value))
    }

    /// `Future<arg>`
    pub fn future(&self, arg: TypeRef) -> TypeRef {
        self.intern(TypeKind::Future(arg))
    }

    /// `Stream<elem>`
    pub fn stream(&self, elem: TypeRef) -> TypeRef {
        self.intern(TypeKind::Stream(elem))
    }

    /// `Iterable<elem>`
    pub fn iterable(&self, elem: TypeRef) -> TypeRef {
        self.intern(TypeKind::Iterable(elem))
    }

    /// The type of instances of `class`
    pub fn interface(&self, class: &ClassRef) -> TypeRef {
        self.intern(TypeKind::Interface(class.clone()))
    }

    /// A function type
    pub fn function(&self, ft: FunctionType) -> TypeRef {
        self.intern(TypeKind::Function(ft))
    }

    /// An opaque host type
    pub fn host(&self, tag: &str) -> TypeRef {
        self.intern(TypeKind::Host(Rc::from(tag)))
    }

    /// Reified type of a value
    pub fn runtime_type(&self, value: &Value) -> TypeRef {
        match value {
            Value::Null => self.null(),
            Value::Bool(_) => self.bool(),
            Value::Int(_) => self.int(),
            Value::Double(_) => self.double(),
            Value::Str(_) => self.string(),
            Value::List(list) => self.list(list.element_type().clone()),
            Value::Map(map) => self.map(map.key_type().clone(), map.value_type().clone()),
            Value::Object(obj) => self.interface(obj.class()),
            Value::Function(func) => func.reified_type().clone(),
            Value::Class(_) | Value::Type(_) => self.primitive(Primitive::Type),
            Value::Namespace(_) => self.host("Library"),
            Value::Future(future) => self.future(future.type_arg().clone()),
            Value::Stream(stream) => self.stream(stream.element_type().clone()),
            Value::Iterable(it) => self.iterable(it.element_type().clone()),
            Value::Host(host) => self.host(host.tag()),
        }
    }

    /// The `as` operation: the value unchanged if it is a member of `ty`
    pub fn cast(&self, ty: &TypeRef, value: Value) -> RtResult<Value> {
        self.cast_with(ty, value, false)
    }

    /// Like [`cast`](Self::cast), used for implicit argument and return checks
    pub fn check(&self, ty: &TypeRef, value: Value) -> RtResult<Value> {
        self.cast_with(ty, value, true)
    }

    fn cast_with(&self, ty: &TypeRef, value: Value, implicit: bool) -> RtResult<Value> {
        if ty.is(&value) {
            return Ok(value);
        }
        let actual = self.runtime_type(&value);
        Err(CastFailure {
            value,
            expected: ty.clone(),
            actual,
            implicit,
        }
        .into())
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ListObject;

    #[test]
    fn test_interning_is_identity() {
        let pool = TypePool::new();
        let a = pool.list(pool.int());
        let b = pool.list(pool.int());
        assert!(a.ptr_eq(&b));
        assert_eq!(a.id(), b.id());
        assert_ne!(a, pool.list(pool.string()));
    }

    #[test]
    fn test_function_types_compare_structurally() {
        let pool = TypePool::new();
        let f1 = FunctionType::new(pool.int()).required(pool.string());
        let f2 = FunctionType::new(pool.int()).required(pool.string());
        assert_eq!(pool.function(f1), pool.function(f2));
    }

    #[test]
    fn test_null_is_member_of_every_type() {
        let pool = TypePool::new();
        for ty in [pool.object(), pool.int(), pool.never(), pool.list(pool.string())] {
            assert!(ty.is(&Value::Null), "null should be a {}", ty);
        }
    }

    #[test]
    fn test_cast_returns_value_or_fails() {
        let pool = TypePool::new();
        let v = pool.cast(&pool.num(), Value::Int(4)).unwrap();
        assert!(matches!(v, Value::Int(4)));

        let err = pool.cast(&pool.int(), Value::str("x")).unwrap_err();
        let cast = err.as_cast_failure().unwrap();
        assert_eq!(cast.expected, pool.int());
        assert_eq!(cast.actual, pool.string());
        assert!(!cast.implicit);
        assert!(pool.check(&pool.int(), Value::str("x")).unwrap_err().as_cast_failure().unwrap().implicit);
    }

    #[test]
    fn test_list_covariance() {
        let pool = TypePool::new();
        let ints = Value::List(Rc::new(ListObject::new(pool.int(), vec![])));
        assert!(pool.list(pool.num()).is(&ints));
        assert!(pool.iterable(pool.int()).is(&ints));
        assert!(!pool.list(pool.string()).is(&ints));

        let dyns = Value::List(Rc::new(ListObject::new(pool.dynamic(), vec![])));
        assert!(!pool.list(pool.int()).is(&dyns));
    }

    #[test]
    fn test_function_subtyping() {
        let pool = TypePool::new();
        // int Function(num) <: num Function(int)
        let sub = FunctionType::new(pool.int()).required(pool.num());
        let sup = FunctionType::new(pool.num()).required(pool.int());
        assert!(sub.is_subtype_of(&sup));
        assert!(!sup.is_subtype_of(&sub));

        // An extra optional parameter is fine, an extra required one is not
        let wider = FunctionType::new(pool.int())
            .required(pool.num())
            .optional(pool.int(), false);
        assert!(wider.is_subtype_of(&sup));
        let narrower = FunctionType::new(pool.int())
            .required(pool.num())
            .required(pool.int());
        assert!(!narrower.is_subtype_of(&sup));
    }

    #[test]
    fn test_display() {
        let pool = TypePool::new();
        let ft = FunctionType::new(pool.void())
            .required(pool.int())
            .optional(pool.string(), true)
            .named("flag", pool.bool(), false);
        assert_eq!(
            pool.function(ft).to_string(),
            "void Function(int, [String], {bool flag})"
        );
        assert_eq!(pool.map(pool.string(), pool.int()).to_string(), "Map<String, int>");
    }
}
