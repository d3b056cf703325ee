//! Dynamic value model
//!
//! `Value` is a closed set of primitive variants plus reference variants for
//! every heap shape the runtime manages. `Host` is the catch-all for opaque
//! host-native values: it carries a runtime tag (used for interceptor lookup)
//! and a direct property table.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::class::{ClassRef, ObjectRef};
use crate::error::RtResult;
use crate::module::NamespaceRef;
use crate::names::MemberName;
use crate::runtime::Runtime;
use crate::suspend::{FutureRef, IterableRef, StreamRef};
use crate::types::{FunctionType, TypeRef};

/// Shared list handle
pub type ListRef = Rc<ListObject>;
/// Shared map handle
pub type MapRef = Rc<MapObject>;
/// Shared function handle
pub type FunctionRef = Rc<Function>;
/// Shared host value handle
pub type HostRef = Rc<HostObject>;

/// A runtime value
#[derive(Clone)]
pub enum Value {
    /// The null value; a member of every type
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Double(f64),
    /// Immutable string
    Str(Rc<str>),
    /// Host-native growable list
    List(ListRef),
    /// Host-native insertion-ordered map
    Map(MapRef),
    /// Instance of a runtime class
    Object(ObjectRef),
    /// First-class function (closures, tear-offs, library functions)
    Function(FunctionRef),
    /// A class used as a value (static dispatch target)
    Class(ClassRef),
    /// A reified type used as a value
    Type(TypeRef),
    /// A library namespace
    Namespace(NamespaceRef),
    /// Single-result asynchronous computation
    Future(FutureRef),
    /// Asynchronous pull-based stream
    Stream(StreamRef),
    /// Synchronous re-iterable sequence
    Iterable(IterableRef),
    /// Opaque host value
    Host(HostRef),
}

impl Value {
    /// Build a string value
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    /// Whether this is `null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer payload
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload, widening integers
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Boolean payload
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Instance payload
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// List payload
    pub fn as_list(&self) -> Option<&ListRef> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Future payload
    pub fn as_future(&self) -> Option<&FutureRef> {
        match self {
            Value::Future(future) => Some(future),
            _ => None,
        }
    }

    /// Tag used to find an interceptor for host-native receivers
    pub fn runtime_tag(&self) -> &str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "String",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Object(_) => "Object",
            Value::Function(_) => "Function",
            Value::Class(_) | Value::Type(_) => "Type",
            Value::Namespace(_) => "Library",
            Value::Future(_) => "Future",
            Value::Stream(_) => "Stream",
            Value::Iterable(_) => "Iterable",
            Value::Host(host) => host.tag(),
        }
    }

    /// Human-readable type name for diagnostics
    pub fn type_name(&self) -> String {
        match self {
            Value::Object(obj) => obj.class().name().to_string(),
            Value::Class(class) => format!("Type<{}>", class.name()),
            Value::Namespace(ns) => format!("library {}", ns.library()),
            other => other.runtime_tag().to_string(),
        }
    }

    /// Identity: reference identity for heap values, value equality for scalars
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => Rc::ptr_eq(a, b),
            (Value::Future(a), Value::Future(b)) => Rc::ptr_eq(a, b),
            (Value::Stream(a), Value::Stream(b)) => Rc::ptr_eq(a, b),
            (Value::Iterable(a), Value::Iterable(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(list) => f.debug_list().entries(list.items.borrow().iter()).finish(),
            Value::Map(map) => f
                .debug_map()
                .entries(map.entries.borrow().iter().map(|(k, v)| (k, v)))
                .finish(),
            Value::Object(obj) => write!(f, "Instance of '{}'", obj.class().name()),
            Value::Function(func) => write!(f, "Closure '{}'", func.name()),
            Value::Class(class) => write!(f, "{}", class.name()),
            Value::Type(ty) => write!(f, "{}", ty),
            Value::Namespace(ns) => write!(f, "library {}", ns.library()),
            Value::Future(_) => write!(f, "Future"),
            Value::Stream(_) => write!(f, "Stream"),
            Value::Iterable(_) => write!(f, "Iterable"),
            Value::Host(host) => write!(f, "<{}>", host.tag()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Double(d)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Object(obj)
    }
}

impl From<FunctionRef> for Value {
    fn from(func: FunctionRef) -> Self {
        Value::Function(func)
    }
}

impl From<ClassRef> for Value {
    fn from(class: ClassRef) -> Self {
        Value::Class(class)
    }
}

impl From<TypeRef> for Value {
    fn from(ty: TypeRef) -> Self {
        Value::Type(ty)
    }
}

impl From<NamespaceRef> for Value {
    fn from(ns: NamespaceRef) -> Self {
        Value::Namespace(ns)
    }
}

impl From<FutureRef> for Value {
    fn from(future: FutureRef) -> Self {
        Value::Future(future)
    }
}

impl From<StreamRef> for Value {
    fn from(stream: StreamRef) -> Self {
        Value::Stream(stream)
    }
}

impl From<IterableRef> for Value {
    fn from(iterable: IterableRef) -> Self {
        Value::Iterable(iterable)
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Positional and named arguments of one call
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    /// Positional arguments in order
    pub positional: Vec<Value>,
    /// Named arguments in call-site order
    pub named: Vec<(Rc<str>, Value)>,
}

impl Arguments {
    /// No arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional-only arguments
    pub fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: Vec::new(),
        }
    }

    /// Add a named argument
    pub fn with_named(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.named.push((Rc::from(name), value.into()));
        self
    }

    /// Positional argument at `index`
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Positional argument at `index`, or null when omitted
    pub fn arg(&self, index: usize) -> Value {
        self.positional.get(index).cloned().unwrap_or(Value::Null)
    }

    /// Positional argument at `index`, or `default` when omitted
    pub fn arg_or(&self, index: usize, default: Value) -> Value {
        self.positional.get(index).cloned().unwrap_or(default)
    }

    /// Named argument by name
    pub fn named(&self, name: &str) -> Option<&Value> {
        self.named
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value)
    }

    /// Named argument by name, or `default` when omitted
    pub fn named_or(&self, name: &str, default: Value) -> Value {
        self.named(name).cloned().unwrap_or(default)
    }

    /// Number of positional arguments
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Whether there are no arguments at all
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Arguments::positional(values)
    }
}

// ============================================================================
// Functions
// ============================================================================

/// Native body of a first-class function
pub type NativeFn = Rc<dyn Fn(&Runtime, Arguments) -> RtResult<Value>>;

/// First-class function value
pub struct Function {
    name: Rc<str>,
    signature: Option<FunctionType>,
    reified: TypeRef,
    body: NativeFn,
}

impl Function {
    /// Create a function; `reified` must describe `signature`
    pub(crate) fn new(
        name: Rc<str>,
        signature: Option<FunctionType>,
        reified: TypeRef,
        body: NativeFn,
    ) -> Self {
        Self {
            name,
            signature,
            reified,
            body,
        }
    }

    /// Function name (for diagnostics)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared signature; `None` means the function accepts any arguments
    pub fn signature(&self) -> Option<&FunctionType> {
        self.signature.as_ref()
    }

    /// Reified type of the function
    pub fn reified_type(&self) -> &TypeRef {
        &self.reified
    }

    pub(crate) fn body(&self) -> NativeFn {
        self.body.clone()
    }
}

// ============================================================================
// Host-native containers
// ============================================================================

/// Growable list with a reified element type
pub struct ListObject {
    element_type: TypeRef,
    items: RefCell<Vec<Value>>,
}

impl ListObject {
    /// Create a list
    pub fn new(element_type: TypeRef, items: Vec<Value>) -> Self {
        Self {
            element_type,
            items: RefCell::new(items),
        }
    }

    /// Reified element type
    pub fn element_type(&self) -> &TypeRef {
        &self.element_type
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Whether the list has no elements
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Element at `index`
    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.borrow().get(index).cloned()
    }

    /// Overwrite element at `index`; returns false when out of range
    pub fn set(&self, index: usize, value: Value) -> bool {
        match self.items.borrow_mut().get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Append an element
    pub fn push(&self, value: Value) {
        self.items.borrow_mut().push(value);
    }

    /// Copy of the current elements
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }
}

/// Insertion-ordered map with reified key and value types.
///
/// Keys are compared with [`Value::identical`].
pub struct MapObject {
    key_type: TypeRef,
    value_type: TypeRef,
    entries: RefCell<Vec<(Value, Value)>>,
}

impl MapObject {
    /// Create an empty map
    pub fn new(key_type: TypeRef, value_type: TypeRef) -> Self {
        Self {
            key_type,
            value_type,
            entries: RefCell::new(Vec::new()),
        }
    }

    /// Reified key type
    pub fn key_type(&self) -> &TypeRef {
        &self.key_type
    }

    /// Reified value type
    pub fn value_type(&self) -> &TypeRef {
        &self.value_type
    }

    /// Value stored under `key`
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.entries
            .borrow()
            .iter()
            .find(|(k, _)| k.identical(key))
            .map(|(_, v)| v.clone())
    }

    /// Insert or overwrite `key`
    pub fn insert(&self, key: Value, value: Value) {
        let mut entries = self.entries.borrow_mut();
        match entries.iter_mut().find(|(k, _)| k.identical(&key)) {
            Some(entry) => entry.1 = value,
            None => entries.push((key, value)),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().iter().map(|(k, _)| k.clone()).collect()
    }
}

/// Opaque host value with a runtime tag and direct properties
pub struct HostObject {
    tag: Rc<str>,
    properties: RefCell<FxHashMap<MemberName, Value>>,
}

impl HostObject {
    /// Create a host value with no properties
    pub fn new(tag: &str) -> Self {
        Self {
            tag: Rc::from(tag),
            properties: RefCell::new(FxHashMap::default()),
        }
    }

    /// Runtime tag
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Direct property read
    pub fn get(&self, name: &MemberName) -> Option<Value> {
        self.properties.borrow().get(name).cloned()
    }

    /// Direct property write
    pub fn set(&self, name: MemberName, value: Value) {
        self.properties.borrow_mut().insert(name, value);
    }

    /// Whether a direct property exists
    pub fn has(&self, name: &MemberName) -> bool {
        self.properties.borrow().contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_scalars_and_strings() {
        assert!(Value::Int(3).identical(&Value::Int(3)));
        assert!(!Value::Int(3).identical(&Value::Double(3.0)));
        assert!(Value::str("a").identical(&Value::str("a")));
        assert!(Value::Null.identical(&Value::Null));
    }

    #[test]
    fn test_host_identity_is_by_reference() {
        let a = Value::Host(Rc::new(HostObject::new("Element")));
        let b = Value::Host(Rc::new(HostObject::new("Element")));
        assert!(a.identical(&a.clone()));
        assert!(!a.identical(&b));
        assert_eq!(a.runtime_tag(), "Element");
    }

    #[test]
    fn test_arguments_access() {
        let args = Arguments::positional(vec![Value::Int(1)]).with_named("flag", true);
        assert_eq!(args.len(), 1);
        assert!(matches!(args.arg(0), Value::Int(1)));
        assert!(args.arg(1).is_null());
        assert!(matches!(args.arg_or(1, Value::Int(9)), Value::Int(9)));
        assert!(matches!(args.named("flag"), Some(Value::Bool(true))));
        assert!(args.named("missing").is_none());
    }
}
