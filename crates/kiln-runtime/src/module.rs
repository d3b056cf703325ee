//! Module registry for library loading
//!
//! A library is registered with its eager imports, lazy imports, and a
//! loader. Resolving a library allocates its namespace *before* anything
//! else happens, so a cycle of eager imports hands the re-entrant caller the
//! same (still incomplete) namespace instead of recursing.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

use crate::error::{RtResult, RuntimeError};
use crate::lazy::LazyStatic;
use crate::names::MemberName;
use crate::runtime::Runtime;
use crate::value::Value;

/// Loader body: populates `exports` given the resolved imports
pub type Loader = Rc<dyn Fn(&Runtime, &NamespaceRef, &Imports) -> RtResult<()>>;

/// Registration record of one library
#[derive(Clone)]
pub struct LibraryDescriptor {
    /// Globally unique library name
    pub name: Rc<str>,
    /// Imports resolved before the loader runs, in order
    pub eager_imports: Vec<Rc<str>>,
    /// Imports resolved on first access through [`DeferredImports`]
    pub lazy_imports: Vec<Rc<str>>,
    /// Loader body, run exactly once
    pub loader: Loader,
}

impl LibraryDescriptor {
    /// Descriptor with no imports
    pub fn new<F>(name: &str, loader: F) -> Self
    where
        F: Fn(&Runtime, &NamespaceRef, &Imports) -> RtResult<()> + 'static,
    {
        Self {
            name: Rc::from(name),
            eager_imports: Vec::new(),
            lazy_imports: Vec::new(),
            loader: Rc::new(loader),
        }
    }

    /// Add an eager import
    pub fn import(mut self, name: &str) -> Self {
        self.eager_imports.push(Rc::from(name));
        self
    }

    /// Add a lazy import
    pub fn lazy_import(mut self, name: &str) -> Self {
        self.lazy_imports.push(Rc::from(name));
        self
    }
}

impl fmt::Debug for LibraryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryDescriptor")
            .field("name", &self.name)
            .field("eager_imports", &self.eager_imports)
            .field("lazy_imports", &self.lazy_imports)
            .finish()
    }
}

// ============================================================================
// Namespaces
// ============================================================================

#[derive(Clone)]
enum Export {
    Value(Value),
    Lazy(Rc<LazyStatic>),
}

/// Export mapping of one library
pub struct Namespace {
    library: Rc<str>,
    exports: RefCell<FxHashMap<MemberName, Export>>,
    complete: Cell<bool>,
}

/// Shared namespace handle
pub type NamespaceRef = Rc<Namespace>;

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("library", &self.library)
            .field("complete", &self.complete.get())
            .finish_non_exhaustive()
    }
}

impl Namespace {
    fn new(library: Rc<str>) -> Self {
        Self {
            library,
            exports: RefCell::new(FxHashMap::default()),
            complete: Cell::new(false),
        }
    }

    /// Owning library
    pub fn library(&self) -> &str {
        &self.library
    }

    /// Export a value
    pub fn export(&self, name: impl Into<MemberName>, value: Value) {
        self.exports
            .borrow_mut()
            .insert(name.into(), Export::Value(value));
    }

    /// Export a top-level variable computed on first read
    pub fn export_lazy<F>(&self, name: impl Into<MemberName>, init: F)
    where
        F: Fn(&Runtime) -> RtResult<Value> + 'static,
    {
        let name = name.into();
        let field = LazyStatic::new(name.as_str(), init);
        self.exports
            .borrow_mut()
            .insert(name, Export::Lazy(Rc::new(field)));
    }

    /// Read an export, running its initializer if it is lazy
    pub fn get(&self, rt: &Runtime, name: &MemberName) -> RtResult<Option<Value>> {
        let export = self.exports.borrow().get(name).cloned();
        match export {
            Some(Export::Value(value)) => Ok(Some(value)),
            Some(Export::Lazy(field)) => field.get(rt).map(Some),
            None => Ok(None),
        }
    }

    /// Overwrite an existing export; returns false if the name is not exported
    pub fn set(&self, name: &MemberName, value: Value) -> bool {
        let mut exports = self.exports.borrow_mut();
        match exports.get(name) {
            Some(Export::Lazy(field)) => {
                field.set(value);
                true
            }
            Some(Export::Value(_)) => {
                exports.insert(name.clone(), Export::Value(value));
                true
            }
            None => false,
        }
    }

    /// Whether `name` is exported
    pub fn has(&self, name: &MemberName) -> bool {
        self.exports.borrow().contains_key(name)
    }

    /// Exported names
    pub fn names(&self) -> Vec<MemberName> {
        self.exports.borrow().keys().cloned().collect()
    }

    /// Number of exports
    pub fn len(&self) -> usize {
        self.exports.borrow().len()
    }

    /// Whether nothing has been exported yet
    pub fn is_empty(&self) -> bool {
        self.exports.borrow().is_empty()
    }

    /// Whether the owning loader has finished successfully
    pub fn is_complete(&self) -> bool {
        self.complete.get()
    }
}

// ============================================================================
// Imports handed to a loader
// ============================================================================

/// Accessor for a library's lazy imports
pub struct DeferredImports {
    library: Rc<str>,
    declared: Vec<Rc<str>>,
    resolved: RefCell<FxHashMap<Rc<str>, NamespaceRef>>,
}

impl DeferredImports {
    /// Resolve a lazy import, loading it on first access
    ///
    /// # Arguments
    /// * `rt` - The runtime
    /// * `name` - A library named in the descriptor's lazy imports
    ///
    /// # Returns
    /// * `Ok(NamespaceRef)` - The import's namespace
    /// * `Err(UndeclaredDeferredImport)` - `name` was not declared lazy
    pub fn get(&self, rt: &Runtime, name: &str) -> RtResult<NamespaceRef> {
        if let Some(ns) = self.resolved.borrow().get(name) {
            return Ok(ns.clone());
        }
        let Some(declared) = self.declared.iter().find(|d| d.as_ref() == name) else {
            return Err(RuntimeError::UndeclaredDeferredImport {
                library: self.library.clone(),
                import: Rc::from(name),
            });
        };
        debug!(library = %self.library, import = name, "loading deferred import");
        let ns = rt.resolve(name)?;
        self.resolved
            .borrow_mut()
            .insert(declared.clone(), ns.clone());
        Ok(ns)
    }

    /// Whether a lazy import has been resolved through this accessor
    pub fn is_loaded(&self, name: &str) -> bool {
        self.resolved.borrow().contains_key(name)
    }
}

/// Resolved imports passed to a loader
pub struct Imports {
    names: Vec<Rc<str>>,
    eager: Vec<NamespaceRef>,
    deferred: Rc<DeferredImports>,
}

impl Imports {
    /// Eager import by position
    pub fn get(&self, index: usize) -> Option<&NamespaceRef> {
        self.eager.get(index)
    }

    /// Eager import by library name
    pub fn by_name(&self, name: &str) -> Option<&NamespaceRef> {
        self.names
            .iter()
            .position(|n| n.as_ref() == name)
            .and_then(|i| self.eager.get(i))
    }

    /// All eager imports in declaration order
    pub fn namespaces(&self) -> &[NamespaceRef] {
        &self.eager
    }

    /// Accessor for lazy imports; clone it into closures that load later
    pub fn deferred(&self) -> &Rc<DeferredImports> {
        &self.deferred
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Load state of a registered library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryState {
    /// Registered, never resolved
    Registered,
    /// Namespace allocated, imports or loader still running
    Loading,
    /// Loader finished
    Loaded,
    /// An import or the loader failed; the namespace keeps what was assigned
    Failed,
}

struct LibraryEntry {
    descriptor: Rc<LibraryDescriptor>,
    namespace: Option<NamespaceRef>,
    state: LibraryState,
}

/// Registry of libraries by name
#[derive(Default)]
pub struct LibraryRegistry {
    entries: RefCell<FxHashMap<Rc<str>, LibraryEntry>>,
}

impl LibraryRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, descriptor: LibraryDescriptor) -> RtResult<()> {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(&descriptor.name) {
            return Err(RuntimeError::DuplicateLibrary(descriptor.name.clone()));
        }
        entries.insert(
            descriptor.name.clone(),
            LibraryEntry {
                descriptor: Rc::new(descriptor),
                namespace: None,
                state: LibraryState::Registered,
            },
        );
        Ok(())
    }

    fn set_state(&self, name: &str, state: LibraryState) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(name) {
            entry.state = state;
        }
    }

    /// Load state of a library
    pub fn state(&self, name: &str) -> Option<LibraryState> {
        self.entries.borrow().get(name).map(|e| e.state)
    }

    /// Namespace of a library, if it has been allocated
    pub fn namespace(&self, name: &str) -> Option<NamespaceRef> {
        self.entries.borrow().get(name)?.namespace.clone()
    }

    /// Whether a library is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Number of registered libraries
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether no libraries are registered
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Runtime {
    /// Register a library
    ///
    /// # Returns
    /// * `Ok(())` - Registered
    /// * `Err(DuplicateLibrary)` - The name is already taken
    pub fn register_library(&self, descriptor: LibraryDescriptor) -> RtResult<()> {
        debug!(
            library = %descriptor.name,
            eager = descriptor.eager_imports.len(),
            lazy = descriptor.lazy_imports.len(),
            "registering library"
        );
        self.libraries().register(descriptor)
    }

    /// Namespace of `name`, loading the library if needed.
    ///
    /// Eager imports resolve depth-first, left to right, before the loader
    /// runs. A re-entrant call for a library that is still loading returns
    /// its partially populated namespace. A failing import or loader
    /// propagates to the caller; the library is then marked failed and is
    /// never loaded again.
    pub fn resolve(&self, name: &str) -> RtResult<NamespaceRef> {
        let descriptor = {
            let entries = self.libraries().entries.borrow();
            let Some(entry) = entries.get(name) else {
                return Err(RuntimeError::LibraryNotFound(Rc::from(name)));
            };
            if let Some(ns) = &entry.namespace {
                return Ok(ns.clone());
            }
            entry.descriptor.clone()
        };

        let ns = Rc::new(Namespace::new(descriptor.name.clone()));
        if let Some(entry) = self.libraries().entries.borrow_mut().get_mut(name) {
            entry.namespace = Some(ns.clone());
            entry.state = LibraryState::Loading;
        }
        debug!(library = name, "loading library");

        let mut eager = Vec::with_capacity(descriptor.eager_imports.len());
        for import in &descriptor.eager_imports {
            match self.resolve(import) {
                Ok(dep) => eager.push(dep),
                Err(err) => {
                    self.libraries().set_state(name, LibraryState::Failed);
                    return Err(err);
                }
            }
        }

        let imports = Imports {
            names: descriptor.eager_imports.clone(),
            eager,
            deferred: Rc::new(DeferredImports {
                library: descriptor.name.clone(),
                declared: descriptor.lazy_imports.clone(),
                resolved: RefCell::new(FxHashMap::default()),
            }),
        };
        let loader = descriptor.loader.clone();
        match loader(self, &ns, &imports) {
            Ok(()) => {
                ns.complete.set(true);
                self.libraries().set_state(name, LibraryState::Loaded);
                debug!(library = name, exports = ns.len(), "library loaded");
                Ok(ns)
            }
            Err(err) => {
                debug!(library = name, error = %err, "library loader failed");
                self.libraries().set_state(name, LibraryState::Failed);
                Err(err)
            }
        }
    }
}
