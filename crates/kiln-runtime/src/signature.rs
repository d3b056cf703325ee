//! Signature Registry
//!
//! Per-class parameter and return type descriptors for constructors,
//! methods, statics, fields, and accessors. Dispatch consults the registry
//! to validate arity and, when enabled, to type-check arguments.

use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::class::ClassId;
use crate::error::RtResult;
use crate::names::MemberName;
use crate::types::{FunctionType, TypePool, TypeRef};
use crate::value::Arguments;

/// Why a call shape does not fit a [`FunctionType`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArityError {
    /// Fewer positional arguments than required parameters
    TooFew {
        /// Minimum positional count
        expected: usize,
        /// Supplied positional count
        got: usize,
    },
    /// More positional arguments than required + optional parameters
    TooMany {
        /// Maximum positional count
        expected: usize,
        /// Supplied positional count
        got: usize,
    },
    /// A named argument the target does not declare
    UnknownNamed(Rc<str>),
    /// A required named parameter was omitted
    MissingRequiredNamed(Rc<str>),
}

impl fmt::Display for ArityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArityError::TooFew { expected, got } => {
                write!(f, "expected at least {} positional arguments, got {}", expected, got)
            }
            ArityError::TooMany { expected, got } => {
                write!(f, "expected at most {} positional arguments, got {}", expected, got)
            }
            ArityError::UnknownNamed(name) => write!(f, "no named parameter '{}'", name),
            ArityError::MissingRequiredNamed(name) => {
                write!(f, "missing required named argument '{}'", name)
            }
        }
    }
}

/// Validate the shape of a call against a function type
pub fn check_arity(ft: &FunctionType, args: &Arguments) -> Result<(), ArityError> {
    let got = args.positional.len();
    if got < ft.min_positional() {
        return Err(ArityError::TooFew {
            expected: ft.min_positional(),
            got,
        });
    }
    if got > ft.max_positional() {
        return Err(ArityError::TooMany {
            expected: ft.max_positional(),
            got,
        });
    }
    if let Some((name, _)) = args.named.iter().find(|(name, _)| ft.named_param(name).is_none()) {
        return Err(ArityError::UnknownNamed(name.clone()));
    }
    if let Some(param) = ft
        .named
        .iter()
        .find(|p| p.required && args.named(&p.name).is_none())
    {
        return Err(ArityError::MissingRequiredNamed(param.name.clone()));
    }
    Ok(())
}

/// Implicitly check every supplied argument against its parameter type.
///
/// Assumes the call already passed [`check_arity`].
pub fn check_argument_types(types: &TypePool, ft: &FunctionType, args: &Arguments) -> RtResult<()> {
    for (index, value) in args.positional.iter().enumerate() {
        if let Some(ty) = ft.positional_type(index) {
            types.check(ty, value.clone())?;
        }
    }
    for (name, value) in &args.named {
        if let Some(param) = ft.named_param(name) {
            types.check(&param.ty, value.clone())?;
        }
    }
    Ok(())
}

/// Declared member signatures of one class
#[derive(Debug, Clone, Default)]
pub struct ClassSignature {
    /// Constructors by name (`""` is the unnamed constructor)
    pub constructors: FxHashMap<MemberName, FunctionType>,
    /// Instance methods
    pub methods: FxHashMap<MemberName, FunctionType>,
    /// Static methods
    pub static_methods: FxHashMap<MemberName, FunctionType>,
    /// Instance field types
    pub fields: FxHashMap<MemberName, TypeRef>,
    /// Getter return types
    pub getters: FxHashMap<MemberName, TypeRef>,
    /// Setter parameter types
    pub setters: FxHashMap<MemberName, TypeRef>,
}

impl ClassSignature {
    /// Empty signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a constructor
    pub fn constructor(mut self, name: impl Into<MemberName>, ft: FunctionType) -> Self {
        self.constructors.insert(name.into(), ft);
        self
    }

    /// Declare an instance method
    pub fn method(mut self, name: impl Into<MemberName>, ft: FunctionType) -> Self {
        self.methods.insert(name.into(), ft);
        self
    }

    /// Declare a static method
    pub fn static_method(mut self, name: impl Into<MemberName>, ft: FunctionType) -> Self {
        self.static_methods.insert(name.into(), ft);
        self
    }

    /// Declare an instance field
    pub fn field(mut self, name: impl Into<MemberName>, ty: TypeRef) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    /// Declare a getter
    pub fn getter(mut self, name: impl Into<MemberName>, ty: TypeRef) -> Self {
        self.getters.insert(name.into(), ty);
        self
    }

    /// Declare a setter
    pub fn setter(mut self, name: impl Into<MemberName>, ty: TypeRef) -> Self {
        self.setters.insert(name.into(), ty);
        self
    }

    /// Merge `other` into `self`; entries in `other` win
    pub fn merge_from(&mut self, other: &ClassSignature) {
        self.methods.extend(other.methods.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.fields.extend(other.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.getters.extend(other.getters.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.setters.extend(other.setters.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// Registry of class signatures keyed by class identity
#[derive(Default)]
pub struct SignatureRegistry {
    by_class: RefCell<FxHashMap<ClassId, Rc<ClassSignature>>>,
}

impl SignatureRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the signature of a class, replacing any earlier declaration
    pub fn declare(&self, class: ClassId, signature: ClassSignature) {
        self.by_class.borrow_mut().insert(class, Rc::new(signature));
    }

    /// Record a static method declared after the class signature
    pub fn declare_static(&self, class: ClassId, name: impl Into<MemberName>, ft: FunctionType) {
        let mut by_class = self.by_class.borrow_mut();
        let entry = by_class.entry(class).or_default();
        Rc::make_mut(entry).static_methods.insert(name.into(), ft);
    }

    /// Signature of a class
    pub fn get(&self, class: ClassId) -> Option<Rc<ClassSignature>> {
        self.by_class.borrow().get(&class).cloned()
    }

    /// Signature of an instance method
    pub fn method(&self, class: ClassId, name: &MemberName) -> Option<FunctionType> {
        self.by_class.borrow().get(&class)?.methods.get(name).cloned()
    }

    /// Signature of a static method
    pub fn static_method(&self, class: ClassId, name: &MemberName) -> Option<FunctionType> {
        self.by_class.borrow().get(&class)?.static_methods.get(name).cloned()
    }

    /// Signature of a constructor
    pub fn constructor(&self, class: ClassId, name: &MemberName) -> Option<FunctionType> {
        self.by_class.borrow().get(&class)?.constructors.get(name).cloned()
    }

    /// Declared type of a settable member (setter first, then field)
    pub fn setter_type(&self, class: ClassId, name: &MemberName) -> Option<TypeRef> {
        let by_class = self.by_class.borrow();
        let sig = by_class.get(&class)?;
        sig.setters.get(name).or_else(|| sig.fields.get(name)).cloned()
    }

    /// Number of classes with a declared signature
    pub fn len(&self) -> usize {
        self.by_class.borrow().len()
    }

    /// Whether no signatures are declared
    pub fn is_empty(&self) -> bool {
        self.by_class.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn two_plus_one(pool: &TypePool) -> FunctionType {
        FunctionType::new(pool.dynamic())
            .required(pool.int())
            .required(pool.int())
            .optional(pool.int(), true)
    }

    #[test]
    fn test_arity_two_required_one_optional() {
        let pool = TypePool::new();
        let ft = two_plus_one(&pool);
        let call = |n: usize| Arguments::positional((0..n as i64).map(Value::Int).collect());

        assert_eq!(
            check_arity(&ft, &call(1)),
            Err(ArityError::TooFew { expected: 2, got: 1 })
        );
        assert!(check_arity(&ft, &call(2)).is_ok());
        assert!(check_arity(&ft, &call(3)).is_ok());
        assert_eq!(
            check_arity(&ft, &call(4)),
            Err(ArityError::TooMany { expected: 3, got: 4 })
        );
    }

    #[test]
    fn test_named_arity() {
        let pool = TypePool::new();
        let ft = FunctionType::new(pool.void())
            .named("label", pool.string(), true)
            .required_named("id", pool.int());

        let ok = Arguments::new().with_named("id", 1);
        assert!(check_arity(&ft, &ok).is_ok());

        let missing = Arguments::new().with_named("label", "x");
        assert_eq!(
            check_arity(&ft, &missing),
            Err(ArityError::MissingRequiredNamed("id".into()))
        );

        let unknown = Arguments::new().with_named("id", 1).with_named("other", 2);
        assert_eq!(
            check_arity(&ft, &unknown),
            Err(ArityError::UnknownNamed("other".into()))
        );
    }

    #[test]
    fn test_argument_types_checked() {
        let pool = TypePool::new();
        let ft = two_plus_one(&pool);
        let bad = Arguments::positional(vec![Value::Int(1), Value::str("two")]);
        let err = check_argument_types(&pool, &ft, &bad).unwrap_err();
        assert!(err.as_cast_failure().unwrap().implicit);

        let with_null = Arguments::positional(vec![Value::Int(1), Value::Null]);
        assert!(check_argument_types(&pool, &ft, &with_null).is_ok());
    }

    #[test]
    fn test_statics_added_after_declaration() {
        let pool = TypePool::new();
        let registry = SignatureRegistry::new();
        let id = ClassId::from_raw(7);
        registry.declare(
            id,
            ClassSignature::new().method("f", FunctionType::new(pool.int())),
        );
        registry.declare_static(id, "create", FunctionType::new(pool.dynamic()));

        assert!(registry.method(id, &"f".into()).is_some());
        assert!(registry.static_method(id, &"create".into()).is_some());
        assert!(registry.method(id, &"create".into()).is_none());
        assert_eq!(registry.len(), 1);
    }
}
