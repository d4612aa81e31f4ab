//! String interning for identifiers and literals.
//!
//! Interning keeps the lexer and definition table from allocating a fresh
//! `String` every time the same identifier is seen, and lets later stages
//! compare identifiers by a cheap `u32` equality check instead of a string
//! compare.

use std::sync::Mutex;

use ahash::AHashMap;

/// An interned string handle.
///
/// Cheap to copy and compare; resolve back to text with [`Interner::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Thread-safe string interner shared by every compilation lane.
///
/// A single `Interner` is created per [`crate::compile::Workspace`] and
/// shared behind an `Arc` across the parallel lexing/parsing passes, so all
/// lanes agree on the same `StringId` space.
pub struct Interner {
    inner: Mutex<InternerInner>,
}

struct InternerInner {
    map: AHashMap<Box<str>, StringId>,
    strings: Vec<Box<str>>,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(InternerInner { map: AHashMap::new(), strings: Vec::new() }) }
    }

    /// Interns `text`, returning an existing id if it was already seen.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` distinct strings are interned.
    pub fn intern(&self, text: &str) -> StringId {
        let mut inner = self.inner.lock().expect("interner mutex poisoned");
        if let Some(id) = inner.map.get(text) {
            return *id;
        }
        let id = StringId(u32::try_from(inner.strings.len()).expect("too many interned strings"));
        inner.strings.push(Box::from(text));
        inner.map.insert(Box::from(text), id);
        id
    }

    /// Resolves an id back to its text.
    ///
    /// The returned string is cloned out of the interner since callers may
    /// hold the handle across further `intern` calls, which would otherwise
    /// deadlock on the same mutex.
    #[must_use]
    pub fn resolve(&self, id: StringId) -> String {
        let inner = self.inner.lock().expect("interner mutex poisoned");
        inner.strings[id.index()].to_string()
    }
}

/// Property names recognised directly by the runtime without a definition
/// table lookup (array `.size`, enum `.name`/`.value`; struct field access
/// is resolved through the struct's own definition instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinProperty {
    Size,
    Count,
    Index,
    Value,
    Name,
}

impl BuiltinProperty {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "size" => Self::Size,
            "count" => Self::Count,
            "index" => Self::Index,
            "value" => Self::Value,
            "name" => Self::Name,
            _ => return None,
        })
    }
}
