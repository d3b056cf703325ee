//! Member names and library-private tokens
//!
//! Public member names are plain strings. Library-private names are opaque
//! tokens minted per `(library, literal)` pair: the same literal in two
//! libraries yields two tokens that never compare equal, while asking the
//! same library twice yields the same token.

use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

#[derive(Debug)]
struct PrivateNameInner {
    id: u32,
    library: Rc<str>,
    name: Rc<str>,
}

/// Opaque library-private member token.
///
/// Equality and hashing use the token id only; the literal is kept for
/// diagnostics.
#[derive(Clone)]
pub struct PrivateName(Rc<PrivateNameInner>);

impl PrivateName {
    /// Unique token id
    pub fn id(&self) -> u32 {
        self.0.id
    }

    /// Library that minted the token
    pub fn library(&self) -> &str {
        &self.0.library
    }

    /// The literal member name
    pub fn name(&self) -> &str {
        &self.0.name
    }
}

impl PartialEq for PrivateName {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for PrivateName {}

impl Hash for PrivateName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for PrivateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.0.name, self.0.library, self.0.id)
    }
}

/// A member name as seen by dispatch: a plain string or a private token
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum MemberName {
    /// Publicly visible name
    Public(Rc<str>),
    /// Library-private token
    Private(PrivateName),
}

impl MemberName {
    /// Public name from a string
    pub fn public(name: &str) -> Self {
        MemberName::Public(Rc::from(name))
    }

    /// The unnamed constructor
    pub fn unnamed() -> Self {
        MemberName::Public(Rc::from(""))
    }

    /// The literal text of the name
    pub fn as_str(&self) -> &str {
        match self {
            MemberName::Public(name) => name,
            MemberName::Private(token) => token.name(),
        }
    }

    /// Whether this is a library-private token
    pub fn is_private(&self) -> bool {
        matches!(self, MemberName::Private(_))
    }

    /// Owning library of a private token
    pub fn library(&self) -> Option<&str> {
        match self {
            MemberName::Public(_) => None,
            MemberName::Private(token) => Some(token.library()),
        }
    }
}

impl fmt::Display for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for MemberName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberName::Public(name) => write!(f, "{:?}", name),
            MemberName::Private(token) => write!(f, "{:?}", token),
        }
    }
}

impl From<&str> for MemberName {
    fn from(name: &str) -> Self {
        MemberName::public(name)
    }
}

impl From<String> for MemberName {
    fn from(name: String) -> Self {
        MemberName::Public(Rc::from(name))
    }
}

impl From<Rc<str>> for MemberName {
    fn from(name: Rc<str>) -> Self {
        MemberName::Public(name)
    }
}

impl From<&MemberName> for MemberName {
    fn from(name: &MemberName) -> Self {
        name.clone()
    }
}

impl From<PrivateName> for MemberName {
    fn from(token: PrivateName) -> Self {
        MemberName::Private(token)
    }
}

impl From<&PrivateName> for MemberName {
    fn from(token: &PrivateName) -> Self {
        MemberName::Private(token.clone())
    }
}

/// Mints and memoizes private tokens per library
#[derive(Default)]
pub struct PrivacyTable {
    tokens: RefCell<FxHashMap<(Rc<str>, Rc<str>), PrivateName>>,
    next_id: Cell<u32>,
}

impl PrivacyTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `name` private to `library`
    pub fn token(&self, library: &str, name: &str) -> PrivateName {
        let key: (Rc<str>, Rc<str>) = (Rc::from(library), Rc::from(name));
        if let Some(token) = self.tokens.borrow().get(&key) {
            return token.clone();
        }

        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let token = PrivateName(Rc::new(PrivateNameInner {
            id,
            library: key.0.clone(),
            name: key.1.clone(),
        }));
        self.tokens.borrow_mut().insert(key, token.clone());
        token
    }

    /// Number of tokens minted so far
    pub fn len(&self) -> usize {
        self.tokens.borrow().len()
    }

    /// Whether no tokens have been minted
    pub fn is_empty(&self) -> bool {
        self.tokens.borrow().is_empty()
    }
}
