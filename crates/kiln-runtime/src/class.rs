//! Class object model
//!
//! Classes are explicit member tables linked through a superclass chain.
//! Every table sits behind a `RefCell` so that a class object can exist
//! before its members are installed: generic instantiation caches the
//! shell first and lets the template body populate it.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;

use crate::dispatch::Invocation;
use crate::error::{RtResult, RuntimeError};
use crate::lazy::LazyStatic;
use crate::names::MemberName;
use crate::runtime::Runtime;
use crate::signature::ClassSignature;
use crate::types::{FunctionType, TypeRef};
use crate::value::{Arguments, NativeFn, Value};

/// Unique class identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub(crate) fn from_raw(raw: u32) -> Self {
        ClassId(raw)
    }

    /// Raw id value
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// The object a member body runs against
#[derive(Clone)]
pub struct Receiver {
    /// The instance (`this`)
    pub this: ObjectRef,
    /// The class in the chain that declared the running member; super
    /// dispatch starts above it
    pub holder: ClassRef,
}

impl Receiver {
    /// `this` as a value
    pub fn this_value(&self) -> Value {
        Value::Object(self.this.clone())
    }
}

/// Instance method body
pub type Method = Rc<dyn Fn(&Runtime, &Receiver, Arguments) -> RtResult<Value>>;
/// Getter body
pub type Getter = Rc<dyn Fn(&Runtime, &Receiver) -> RtResult<Value>>;
/// Setter body
pub type Setter = Rc<dyn Fn(&Runtime, &Receiver, Value) -> RtResult<()>>;
/// Constructor body; runs after field initializers
pub type Constructor = Rc<dyn Fn(&Runtime, &Receiver, Arguments) -> RtResult<()>>;
/// Field initializer
pub type FieldInit = Rc<dyn Fn(&Runtime, &ObjectRef) -> RtResult<Value>>;
/// Catch-all fallback invoked when dispatch finds no target
pub type NoSuchMethodHandler = Rc<dyn Fn(&Runtime, &Receiver, Invocation) -> RtResult<Value>>;

/// Declared instance field
#[derive(Clone)]
pub struct FieldDecl {
    /// Field name
    pub name: MemberName,
    /// Initializer expression; `None` initializes to null
    pub init: Option<FieldInit>,
    /// Whether stores through dispatch are rejected
    pub is_final: bool,
}

/// Static member of a class
#[derive(Clone)]
pub enum StaticMember {
    /// Static method
    Method(NativeFn),
    /// Static field (lazily initialized)
    Field(Rc<LazyStatic>),
}

/// Where an instantiated generic class came from
#[derive(Debug, Clone)]
pub struct GenericOrigin {
    /// Identity of the template
    pub template_id: u32,
    /// Template name
    pub template: Rc<str>,
    /// Canonical type arguments
    pub args: Vec<TypeRef>,
}

/// A runtime class
pub struct Class {
    id: ClassId,
    name: Rc<str>,
    library: Rc<str>,
    superclass: RefCell<Option<ClassRef>>,
    mixin: RefCell<Option<ClassRef>>,
    interfaces: RefCell<Vec<ClassRef>>,
    origin: RefCell<Option<GenericOrigin>>,
    methods: RefCell<FxHashMap<MemberName, Method>>,
    getters: RefCell<FxHashMap<MemberName, Getter>>,
    setters: RefCell<FxHashMap<MemberName, Setter>>,
    fields: RefCell<Vec<FieldDecl>>,
    constructors: RefCell<FxHashMap<MemberName, Constructor>>,
    statics: RefCell<FxHashMap<MemberName, StaticMember>>,
    no_such_method: RefCell<Option<NoSuchMethodHandler>>,
}

impl Class {
    /// Class id
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Display name (`Box<int>`, `Base&M1`)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring library
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Qualified name used by the class registry
    pub fn qualified_name(&self) -> String {
        format!("{}::{}", self.library, self.name)
    }

    /// Direct superclass; `None` means the class extends `Object`
    pub fn superclass(&self) -> Option<ClassRef> {
        self.superclass.borrow().clone()
    }

    /// The mixin this class applies, for mixin application classes
    pub fn mixin(&self) -> Option<ClassRef> {
        self.mixin.borrow().clone()
    }

    /// Declared `implements` clauses
    pub fn interfaces(&self) -> Vec<ClassRef> {
        self.interfaces.borrow().clone()
    }

    /// Generic origin of an instantiated class
    pub fn origin(&self) -> Option<GenericOrigin> {
        self.origin.borrow().clone()
    }

    /// Type arguments of an instantiated class
    pub fn type_args(&self) -> Vec<TypeRef> {
        self.origin
            .borrow()
            .as_ref()
            .map(|o| o.args.clone())
            .unwrap_or_default()
    }

    /// Method declared directly on this class
    pub fn local_method(&self, name: &MemberName) -> Option<Method> {
        self.methods.borrow().get(name).cloned()
    }

    /// Getter declared directly on this class
    pub fn local_getter(&self, name: &MemberName) -> Option<Getter> {
        self.getters.borrow().get(name).cloned()
    }

    /// Setter declared directly on this class
    pub fn local_setter(&self, name: &MemberName) -> Option<Setter> {
        self.setters.borrow().get(name).cloned()
    }

    /// Field declared directly on this class
    pub fn local_field(&self, name: &MemberName) -> Option<FieldDecl> {
        self.fields.borrow().iter().find(|f| &f.name == name).cloned()
    }

    /// Fields declared directly on this class, in declaration order
    pub fn local_fields(&self) -> Vec<FieldDecl> {
        self.fields.borrow().clone()
    }

    /// Constructor declared directly on this class
    pub fn local_constructor(&self, name: &MemberName) -> Option<Constructor> {
        self.constructors.borrow().get(name).cloned()
    }

    /// Whether the class declares any constructor of its own
    pub fn has_constructors(&self) -> bool {
        !self.constructors.borrow().is_empty()
    }

    /// Static member by name
    pub fn static_member(&self, name: &MemberName) -> Option<StaticMember> {
        self.statics.borrow().get(name).cloned()
    }

    /// Fallback handler declared directly on this class
    pub fn local_no_such_method(&self) -> Option<NoSuchMethodHandler> {
        self.no_such_method.borrow().clone()
    }

    /// Number of instance methods declared directly on this class
    pub fn method_count(&self) -> usize {
        self.methods.borrow().len()
    }
}

/// Shared class handle; equality is class identity
#[derive(Clone)]
pub struct ClassRef(Rc<Class>);

impl Deref for ClassRef {
    type Target = Class;

    fn deref(&self) -> &Class {
        &self.0
    }
}

impl PartialEq for ClassRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ClassRef {}

impl Hash for ClassRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}#{}", self.0.name, self.0.id.0)
    }
}

impl ClassRef {
    fn new(id: ClassId, library: &str, name: &str) -> Self {
        ClassRef(Rc::new(Class {
            id,
            name: Rc::from(name),
            library: Rc::from(library),
            superclass: RefCell::new(None),
            mixin: RefCell::new(None),
            interfaces: RefCell::new(Vec::new()),
            origin: RefCell::new(None),
            methods: RefCell::new(FxHashMap::default()),
            getters: RefCell::new(FxHashMap::default()),
            setters: RefCell::new(FxHashMap::default()),
            fields: RefCell::new(Vec::new()),
            constructors: RefCell::new(FxHashMap::default()),
            statics: RefCell::new(FxHashMap::default()),
            no_such_method: RefCell::new(None),
        }))
    }

    /// This class followed by its superclasses, most derived first
    pub fn chain(&self) -> Vec<ClassRef> {
        let mut chain = vec![self.clone()];
        let mut current = self.superclass();
        while let Some(class) = current {
            current = class.superclass();
            chain.push(class);
        }
        chain
    }

    /// Whether instances of `self` are instances of `target`.
    ///
    /// Follows superclass, mixin, and `implements` edges; instantiations of
    /// the same template conform when their arguments are pairwise subtypes.
    pub fn conforms_to(&self, target: &ClassRef) -> bool {
        let target_origin = target.origin();
        self.chain().iter().any(|class| {
            if class == target {
                return true;
            }
            if let (Some(mine), Some(theirs)) = (class.origin(), target_origin.as_ref()) {
                if mine.template_id == theirs.template_id
                    && mine.args.len() == theirs.args.len()
                    && mine
                        .args
                        .iter()
                        .zip(&theirs.args)
                        .all(|(a, b)| a.is_subtype_of(b))
                {
                    return true;
                }
            }
            class.mixin().is_some_and(|m| m.conforms_to(target))
                || class.interfaces().iter().any(|i| i.conforms_to(target))
        })
    }

    /// First class in the chain declaring a fallback handler
    pub fn no_such_method_handler(&self) -> Option<(ClassRef, NoSuchMethodHandler)> {
        self.chain()
            .into_iter()
            .find_map(|class| class.local_no_such_method().map(|h| (class, h)))
    }

    /// Resolve a constructor, following implicit forwarding.
    ///
    /// A class without constructors of its own forwards every constructor
    /// name to its superclass; a root class without constructors has an
    /// implicit unnamed one, reported as `Ok(None)`.
    pub fn find_constructor(&self, name: &MemberName) -> Option<Option<(ClassRef, Constructor)>> {
        if self.has_constructors() {
            return self
                .local_constructor(name)
                .map(|ctor| Some((self.clone(), ctor)));
        }
        match self.superclass() {
            Some(parent) => parent.find_constructor(name),
            None if name.as_str().is_empty() => Some(None),
            None => None,
        }
    }

    /// Constructor names reachable on this class
    pub fn constructor_names(&self) -> Vec<MemberName> {
        if self.has_constructors() {
            return self.constructors.borrow().keys().cloned().collect();
        }
        match self.superclass() {
            Some(parent) => parent.constructor_names(),
            None => vec![MemberName::unnamed()],
        }
    }

    /// Run field initializers for a fresh instance, base class first
    pub(crate) fn initialize_fields(&self, rt: &Runtime, obj: &ObjectRef) -> RtResult<()> {
        for class in self.chain().into_iter().rev() {
            for field in class.local_fields() {
                let value = match &field.init {
                    Some(init) => init(rt, obj)?,
                    None => Value::Null,
                };
                obj.set_field(field.name.clone(), value);
            }
        }
        Ok(())
    }

    pub(crate) fn set_superclass(&self, parent: ClassRef) {
        *self.0.superclass.borrow_mut() = Some(parent);
    }

    pub(crate) fn set_mixin(&self, mixin: ClassRef) {
        *self.0.mixin.borrow_mut() = Some(mixin);
    }

    pub(crate) fn set_origin(&self, origin: GenericOrigin) {
        *self.0.origin.borrow_mut() = Some(origin);
    }

    pub(crate) fn add_interface(&self, interface: ClassRef) {
        self.0.interfaces.borrow_mut().push(interface);
    }

    pub(crate) fn insert_method(&self, name: MemberName, body: Method) {
        self.0.methods.borrow_mut().insert(name, body);
    }

    pub(crate) fn insert_getter(&self, name: MemberName, body: Getter) {
        self.0.getters.borrow_mut().insert(name, body);
    }

    pub(crate) fn insert_setter(&self, name: MemberName, body: Setter) {
        self.0.setters.borrow_mut().insert(name, body);
    }

    pub(crate) fn insert_field(&self, field: FieldDecl) {
        let mut fields = self.0.fields.borrow_mut();
        match fields.iter_mut().find(|f| f.name == field.name) {
            Some(slot) => *slot = field,
            None => fields.push(field),
        }
    }

    pub(crate) fn insert_constructor(&self, name: MemberName, body: Constructor) {
        self.0.constructors.borrow_mut().insert(name, body);
    }

    pub(crate) fn insert_static(&self, name: MemberName, member: StaticMember) {
        self.0.statics.borrow_mut().insert(name, member);
    }

    pub(crate) fn set_no_such_method(&self, handler: NoSuchMethodHandler) {
        *self.0.no_such_method.borrow_mut() = Some(handler);
    }

    /// Copy every instance member declared on `source` into this class
    pub(crate) fn copy_members_from(&self, source: &ClassRef) {
        for (name, body) in source.methods.borrow().iter() {
            self.insert_method(name.clone(), body.clone());
        }
        for (name, body) in source.getters.borrow().iter() {
            self.insert_getter(name.clone(), body.clone());
        }
        for (name, body) in source.setters.borrow().iter() {
            self.insert_setter(name.clone(), body.clone());
        }
        for field in source.local_fields() {
            self.insert_field(field);
        }
        if let Some(handler) = source.local_no_such_method() {
            self.set_no_such_method(handler);
        }
    }
}

// ============================================================================
// Instances
// ============================================================================

/// An instance of a runtime class
#[derive(Debug)]
pub struct Instance {
    class: ClassRef,
    fields: RefCell<FxHashMap<MemberName, Value>>,
}

/// Shared instance handle
pub type ObjectRef = Rc<Instance>;

impl Instance {
    pub(crate) fn allocate(class: &ClassRef) -> ObjectRef {
        Rc::new(Instance {
            class: class.clone(),
            fields: RefCell::new(FxHashMap::default()),
        })
    }

    /// The instance's class
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Raw field read, bypassing dispatch
    pub fn field(&self, name: impl Into<MemberName>) -> Option<Value> {
        self.fields.borrow().get(&name.into()).cloned()
    }

    /// Raw field write, bypassing dispatch
    pub fn set_field(&self, name: impl Into<MemberName>, value: Value) {
        self.fields.borrow_mut().insert(name.into(), value);
    }

    /// Whether a field slot exists
    pub fn has_field(&self, name: &MemberName) -> bool {
        self.fields.borrow().contains_key(name)
    }
}

// ============================================================================
// Class builder
// ============================================================================

/// Installs members on a class.
///
/// Also handed to generic template bodies, which populate the shell class
/// of an instantiation.
pub struct ClassBuilder<'rt> {
    rt: &'rt Runtime,
    class: ClassRef,
}

impl<'rt> ClassBuilder<'rt> {
    pub(crate) fn from_class(rt: &'rt Runtime, class: ClassRef) -> Self {
        Self { rt, class }
    }

    /// The class under construction
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    /// Set the superclass
    pub fn extends(&self, parent: &ClassRef) -> &Self {
        self.class.set_superclass(parent.clone());
        self
    }

    /// Add an `implements` clause
    pub fn implements(&self, interface: &ClassRef) -> &Self {
        self.class.add_interface(interface.clone());
        self
    }

    /// Install an instance method
    pub fn method<F>(&self, name: impl Into<MemberName>, body: F) -> &Self
    where
        F: Fn(&Runtime, &Receiver, Arguments) -> RtResult<Value> + 'static,
    {
        self.class.insert_method(name.into(), Rc::new(body));
        self
    }

    /// Install a getter
    pub fn getter<F>(&self, name: impl Into<MemberName>, body: F) -> &Self
    where
        F: Fn(&Runtime, &Receiver) -> RtResult<Value> + 'static,
    {
        self.class.insert_getter(name.into(), Rc::new(body));
        self
    }

    /// Install a setter
    pub fn setter<F>(&self, name: impl Into<MemberName>, body: F) -> &Self
    where
        F: Fn(&Runtime, &Receiver, Value) -> RtResult<()> + 'static,
    {
        self.class.insert_setter(name.into(), Rc::new(body));
        self
    }

    /// Declare a mutable field initialized to null
    pub fn field(&self, name: impl Into<MemberName>) -> &Self {
        self.class.insert_field(FieldDecl {
            name: name.into(),
            init: None,
            is_final: false,
        });
        self
    }

    /// Declare a field with an initializer
    pub fn field_with<F>(&self, name: impl Into<MemberName>, is_final: bool, init: F) -> &Self
    where
        F: Fn(&Runtime, &ObjectRef) -> RtResult<Value> + 'static,
    {
        self.class.insert_field(FieldDecl {
            name: name.into(),
            init: Some(Rc::new(init)),
            is_final,
        });
        self
    }

    /// Declare a final field assigned by a constructor
    pub fn final_field(&self, name: impl Into<MemberName>) -> &Self {
        self.class.insert_field(FieldDecl {
            name: name.into(),
            init: None,
            is_final: true,
        });
        self
    }

    /// Install a constructor (`""` is the unnamed one)
    pub fn constructor<F>(&self, name: impl Into<MemberName>, body: F) -> &Self
    where
        F: Fn(&Runtime, &Receiver, Arguments) -> RtResult<()> + 'static,
    {
        self.class.insert_constructor(name.into(), Rc::new(body));
        self
    }

    /// Install a static method
    pub fn static_method<F>(&self, name: impl Into<MemberName>, body: F) -> &Self
    where
        F: Fn(&Runtime, Arguments) -> RtResult<Value> + 'static,
    {
        self.class
            .insert_static(name.into(), StaticMember::Method(Rc::new(body)));
        self
    }

    /// Declare a lazily initialized static field
    pub fn lazy_static<F>(&self, name: impl Into<MemberName>, init: F) -> &Self
    where
        F: Fn(&Runtime) -> RtResult<Value> + 'static,
    {
        let name = name.into();
        let field = LazyStatic::new(name.as_str(), init);
        self.class
            .insert_static(name, StaticMember::Field(Rc::new(field)));
        self
    }

    /// Install the catch-all fallback handler
    pub fn no_such_method<F>(&self, handler: F) -> &Self
    where
        F: Fn(&Runtime, &Receiver, Invocation) -> RtResult<Value> + 'static,
    {
        self.class.set_no_such_method(Rc::new(handler));
        self
    }

    /// Declare the class signature in the runtime's signature registry
    pub fn signature(&self, signature: ClassSignature) -> &Self {
        self.rt.signatures().declare(self.class.id(), signature);
        self
    }

    /// Declare a static method signature after the fact
    pub fn static_signature(&self, name: impl Into<MemberName>, ft: FunctionType) -> &Self {
        self.rt.signatures().declare_static(self.class.id(), name, ft);
        self
    }

    /// Register the class by qualified name and return it
    pub fn build(&self) -> RtResult<ClassRef> {
        self.rt.classes().register(&self.class)?;
        Ok(self.class.clone())
    }

    /// Return the class without registering it by name
    pub fn finish(&self) -> ClassRef {
        self.class.clone()
    }
}

// ============================================================================
// Class registry
// ============================================================================

/// Allocates class ids and indexes declared classes by qualified name
#[derive(Default)]
pub struct ClassRegistry {
    next_id: Cell<u32>,
    by_name: RefCell<FxHashMap<String, ClassRef>>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new class object (not yet registered by name)
    pub fn allocate(&self, library: &str, name: &str) -> ClassRef {
        let id = ClassId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        ClassRef::new(id, library, name)
    }

    /// Register a class under its qualified name
    pub fn register(&self, class: &ClassRef) -> RtResult<()> {
        let key = class.qualified_name();
        let mut by_name = self.by_name.borrow_mut();
        if by_name.contains_key(&key) {
            return Err(RuntimeError::DuplicateClass(key));
        }
        by_name.insert(key, class.clone());
        Ok(())
    }

    /// Look up a registered class
    pub fn get(&self, library: &str, name: &str) -> Option<ClassRef> {
        self.by_name
            .borrow()
            .get(&format!("{}::{}", library, name))
            .cloned()
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.by_name.borrow().len()
    }

    /// Whether no classes are registered
    pub fn is_empty(&self) -> bool {
        self.by_name.borrow().is_empty()
    }
}
