//! Generic Instantiation Cache
//!
//! A [`GenericTemplate`] maps a tuple of type arguments to a concrete class.
//! Arguments are canonicalized through the runtime's [`TypePool`] and looked
//! up in a nested cache, one level per type parameter, so equal tuples
//! always produce the identical class object.
//!
//! [`TypeCache`] is the call-site layer: a compute-once cell that memoizes
//! the canonical cache's answer and never computes one of its own.
//!
//! [`TypePool`]: crate::types::TypePool

use once_cell::unsync::OnceCell;
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

use crate::class::{ClassBuilder, ClassRef, GenericOrigin};
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::{TypeId, TypeRef};
use crate::value::Value;

thread_local! {
    static NEXT_TEMPLATE_ID: Cell<u32> = const { Cell::new(0) };
}

fn next_template_id() -> u32 {
    NEXT_TEMPLATE_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// Nested cache: one level per type argument, keyed by interned type id
struct CacheNode<T> {
    children: FxHashMap<TypeId, CacheNode<T>>,
    leaf: Option<T>,
}

impl<T: Clone> CacheNode<T> {
    fn new() -> Self {
        Self {
            children: FxHashMap::default(),
            leaf: None,
        }
    }

    fn get(&self, key: &[TypeRef]) -> Option<T> {
        match key.split_first() {
            None => self.leaf.clone(),
            Some((head, rest)) => self.children.get(&head.id())?.get(rest),
        }
    }

    fn insert(&mut self, key: &[TypeRef], value: T) {
        match key.split_first() {
            None => self.leaf = Some(value),
            Some((head, rest)) => self
                .children
                .entry(head.id())
                .or_insert_with(CacheNode::new)
                .insert(rest, value),
        }
    }

    fn remove(&mut self, key: &[TypeRef]) {
        match key.split_first() {
            None => self.leaf = None,
            Some((head, rest)) => {
                if let Some(child) = self.children.get_mut(&head.id()) {
                    child.remove(rest);
                }
            }
        }
    }

    fn len(&self) -> usize {
        usize::from(self.leaf.is_some()) + self.children.values().map(CacheNode::len).sum::<usize>()
    }
}

/// Body of a generic class template; populates the shell class
pub type TemplateBody = Rc<dyn Fn(&Runtime, &ClassBuilder<'_>, &[TypeRef]) -> RtResult<()>>;

/// A generic class template with its instantiation cache
pub struct GenericTemplate {
    id: u32,
    library: Rc<str>,
    name: Rc<str>,
    params: Vec<Rc<str>>,
    body: TemplateBody,
    cache: RefCell<CacheNode<ClassRef>>,
}

/// Shared template handle
pub type TemplateRef = Rc<GenericTemplate>;

impl GenericTemplate {
    /// Template name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring library
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Type parameter names
    pub fn params(&self) -> &[Rc<str>] {
        &self.params
    }

    /// Number of cached instantiations
    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }
}

fn normalize_args(
    rt: &Runtime,
    template: &str,
    arity: usize,
    args: &[TypeRef],
) -> RtResult<Vec<TypeRef>> {
    if args.is_empty() {
        return Ok(vec![rt.types().dynamic(); arity]);
    }
    if args.len() != arity {
        return Err(RuntimeError::TypeArgumentCount {
            template: Rc::from(template),
            expected: arity,
            got: args.len(),
        });
    }
    Ok(args.iter().map(|ty| rt.types().canonical(ty)).collect())
}

fn display_args(args: &[TypeRef]) -> String {
    args.iter()
        .map(|ty| ty.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Generic functions
// ============================================================================

#[derive(Clone)]
enum FunctionSlot {
    Computing,
    Ready(Value),
}

/// Body of a generic function template; returns the specialized function
pub type GenericFnBody = Rc<dyn Fn(&Runtime, &[TypeRef]) -> RtResult<Value>>;

/// A generic function whose specializations are cached per type tuple
pub struct GenericFunction {
    name: Rc<str>,
    arity: usize,
    body: GenericFnBody,
    cache: RefCell<CacheNode<FunctionSlot>>,
}

/// Shared generic function handle
pub type GenericFunctionRef = Rc<GenericFunction>;

impl GenericFunction {
    /// Function name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of type parameters
    pub fn arity(&self) -> usize {
        self.arity
    }
}

impl Runtime {
    /// Declare a generic class template
    pub fn generic_class<F>(&self, library: &str, name: &str, params: &[&str], body: F) -> TemplateRef
    where
        F: Fn(&Runtime, &ClassBuilder<'_>, &[TypeRef]) -> RtResult<()> + 'static,
    {
        Rc::new(GenericTemplate {
            id: next_template_id(),
            library: Rc::from(library),
            name: Rc::from(name),
            params: params.iter().map(|p| Rc::from(*p)).collect(),
            body: Rc::new(body),
            cache: RefCell::new(CacheNode::new()),
        })
    }

    /// Concrete class for `template<args>`.
    ///
    /// An empty `args` means `dynamic` for every parameter. The shell class
    /// is cached before the template body runs, so the body may refer to its
    /// own instantiation; if the body fails the entry is dropped again.
    pub fn instantiate(&self, template: &TemplateRef, args: &[TypeRef]) -> RtResult<ClassRef> {
        let key = normalize_args(self, &template.name, template.params.len(), args)?;
        if let Some(class) = template.cache.borrow().get(&key) {
            return Ok(class);
        }

        let name = format!("{}<{}>", template.name, display_args(&key));
        debug!(template = %template.name, class = %name, "instantiating generic class");
        let class = self.classes().allocate(&template.library, &name);
        class.set_origin(GenericOrigin {
            template_id: template.id,
            template: template.name.clone(),
            args: key.clone(),
        });
        template.cache.borrow_mut().insert(&key, class.clone());

        let body = template.body.clone();
        let builder = ClassBuilder::from_class(self, class.clone());
        match body(self, &builder, &key) {
            Ok(()) => Ok(class),
            Err(err) => {
                debug!(class = %name, error = %err, "generic instantiation failed");
                template.cache.borrow_mut().remove(&key);
                Err(err)
            }
        }
    }

    /// Reified type of `template<args>`
    pub fn instantiate_type(&self, template: &TemplateRef, args: &[TypeRef]) -> RtResult<TypeRef> {
        let class = self.instantiate(template, args)?;
        Ok(self.types().interface(&class))
    }

    /// Declare a generic function
    pub fn generic_function<F>(&self, name: &str, arity: usize, body: F) -> GenericFunctionRef
    where
        F: Fn(&Runtime, &[TypeRef]) -> RtResult<Value> + 'static,
    {
        Rc::new(GenericFunction {
            name: Rc::from(name),
            arity,
            body: Rc::new(body),
            cache: RefCell::new(CacheNode::new()),
        })
    }

    /// Specialization of a generic function for `args`.
    ///
    /// Unlike class templates nothing can be handed out before the body
    /// finishes, so re-entering the same specialization fails with
    /// [`RuntimeError::CyclicInitialization`].
    pub fn instantiate_function(&self, function: &GenericFunctionRef, args: &[TypeRef]) -> RtResult<Value> {
        let key = normalize_args(self, &function.name, function.arity, args)?;
        let label = format!("{}<{}>", function.name, display_args(&key));
        match function.cache.borrow().get(&key) {
            Some(FunctionSlot::Ready(value)) => return Ok(value),
            Some(FunctionSlot::Computing) => return Err(RuntimeError::CyclicInitialization(label)),
            None => {}
        }

        debug!(function = %label, "instantiating generic function");
        function.cache.borrow_mut().insert(&key, FunctionSlot::Computing);
        let body = function.body.clone();
        match body(self, &key) {
            Ok(value) => {
                function
                    .cache
                    .borrow_mut()
                    .insert(&key, FunctionSlot::Ready(value.clone()));
                Ok(value)
            }
            Err(err) => {
                function.cache.borrow_mut().remove(&key);
                Err(err)
            }
        }
    }
}

// ============================================================================
// Call-site cache
// ============================================================================

/// Call-site memo for one fixed instantiation.
///
/// Always defers to [`Runtime::instantiate`] on first use, so it can never
/// disagree with the canonical cache.
#[derive(Default)]
pub struct TypeCache {
    cell: OnceCell<ClassRef>,
}

impl TypeCache {
    /// Empty cache
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// The memoized class, computing it through the canonical cache once
    pub fn get_or_instantiate<F>(&self, rt: &Runtime, template: &TemplateRef, args: F) -> RtResult<ClassRef>
    where
        F: FnOnce(&Runtime) -> Vec<TypeRef>,
    {
        if let Some(class) = self.cell.get() {
            return Ok(class.clone());
        }
        let class = rt.instantiate(template, &args(rt))?;
        Ok(self.cell.get_or_init(|| class).clone())
    }

    /// Whether the call site has memoized its class
    pub fn is_memoized(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Arguments;

    fn box_template(rt: &Runtime) -> TemplateRef {
        rt.generic_class("core", "Box", &["T"], |_, builder, args| {
            let elem = args[0].clone();
            builder.field("value").method("elementType", move |_, _, _| Ok(Value::Type(elem.clone())));
            Ok(())
        })
    }

    #[test]
    fn test_instantiation_is_idempotent() {
        let rt = Runtime::new();
        let template = box_template(&rt);
        let a = rt.instantiate(&template, &[rt.types().int()]).unwrap();
        let b = rt.instantiate(&template, &[rt.types().int()]).unwrap();
        let c = rt.instantiate(&template, &[rt.types().string()]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.name(), "Box<int>");
        assert_eq!(template.cached_count(), 2);
    }

    #[test]
    fn test_zero_args_means_dynamic() {
        let rt = Runtime::new();
        let template = box_template(&rt);
        let raw = rt.instantiate(&template, &[]).unwrap();
        let dynamic = rt.instantiate(&template, &[rt.types().dynamic()]).unwrap();
        assert_eq!(raw, dynamic);
    }

    #[test]
    fn test_wrong_argument_count() {
        let rt = Runtime::new();
        let template = box_template(&rt);
        let err = rt
            .instantiate(&template, &[rt.types().int(), rt.types().int()])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::TypeArgumentCount { expected: 1, got: 2, .. }));
    }

    #[test]
    fn test_self_referential_template_sees_shell() {
        let rt = Runtime::new();
        let seen: Rc<RefCell<Option<ClassRef>>> = Rc::new(RefCell::new(None));
        let slot = seen.clone();
        let holder: Rc<RefCell<Option<TemplateRef>>> = Rc::new(RefCell::new(None));
        let me = holder.clone();
        let node = rt.generic_class("core", "Node", &["T"], move |rt, _, args| {
            let template = me.borrow().clone().unwrap();
            *slot.borrow_mut() = Some(rt.instantiate(&template, args)?);
            Ok(())
        });
        *holder.borrow_mut() = Some(node.clone());

        let class = rt.instantiate(&node, &[rt.types().int()]).unwrap();
        assert_eq!(seen.borrow().clone().unwrap(), class);
    }

    #[test]
    fn test_failed_body_is_not_cached() {
        let rt = Runtime::new();
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();
        let template = rt.generic_class("core", "Flaky", &["T"], move |_, _, _| {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                Err(RuntimeError::thrown("boom"))
            } else {
                Ok(())
            }
        });
        assert!(rt.instantiate(&template, &[rt.types().int()]).is_err());
        assert_eq!(template.cached_count(), 0);
        assert!(rt.instantiate(&template, &[rt.types().int()]).is_ok());
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn test_covariant_instantiations() {
        let rt = Runtime::new();
        let template = box_template(&rt);
        let ints = rt.instantiate(&template, &[rt.types().int()]).unwrap();
        let nums = rt.instantiate(&template, &[rt.types().num()]).unwrap();
        let obj = Value::Object(rt.construct(&ints, "", Arguments::new()).unwrap());

        assert!(rt.is(&obj, &rt.types().interface(&nums)));
        let strings = rt.instantiate_type(&template, &[rt.types().string()]).unwrap();
        assert!(!rt.is(&obj, &strings));
    }

    #[test]
    fn test_call_site_cache_agrees_with_canonical() {
        let rt = Runtime::new();
        let template = box_template(&rt);
        let site_a = TypeCache::new();
        let site_b = TypeCache::new();
        let a = site_a
            .get_or_instantiate(&rt, &template, |rt| vec![rt.types().list(rt.types().int())])
            .unwrap();
        let b = site_b
            .get_or_instantiate(&rt, &template, |rt| vec![rt.types().list(rt.types().int())])
            .unwrap();
        assert!(site_a.is_memoized());
        assert_eq!(a, b);
        assert_eq!(a, rt.instantiate(&template, &[rt.types().list(rt.types().int())]).unwrap());
    }

    #[test]
    fn test_generic_function_cache() {
        let rt = Runtime::new();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let identity = rt.generic_function("identity", 1, move |rt, args| {
            counter.set(counter.get() + 1);
            let ty = args[0].clone();
            Ok(rt.function("identity", None, move |rt, args| rt.cast(args.arg(0), &ty)))
        });

        let a = rt.instantiate_function(&identity, &[rt.types().int()]).unwrap();
        let b = rt.instantiate_function(&identity, &[rt.types().int()]).unwrap();
        assert!(a.identical(&b));
        assert_eq!(runs.get(), 1);
        assert!(rt.call(&a, vec![Value::str("x")]).is_err());
    }

    #[test]
    fn test_generic_function_reentry_is_cyclic() {
        let rt = Runtime::new();
        let holder: Rc<RefCell<Option<GenericFunctionRef>>> = Rc::new(RefCell::new(None));
        let me = holder.clone();
        let f = rt.generic_function("loop", 1, move |rt, args| {
            let this = me.borrow().clone().unwrap();
            rt.instantiate_function(&this, args)
        });
        *holder.borrow_mut() = Some(f.clone());
        let err = rt.instantiate_function(&f, &[rt.types().int()]).unwrap_err();
        assert!(matches!(err, RuntimeError::CyclicInitialization(_)));
    }
}
