//! String interning for identifiers and string literals.
//!
//! The interner stores unique strings in a vector and hands out `StringId`
//! indices for cheap storage and comparison. It is populated during parsing
//! and preparation and then owned by the evaluator; during evaluation,
//! lookups are needed for member resolution, error messages, and rendering.

use ahash::AHashMap;

/// Index into the string interner's storage.
///
/// Uses `u32` to save space (4 bytes vs 8 bytes for `usize`). This limits us
/// to ~4 billion unique interns, which is more than sufficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage for all interned strings.
///
/// Interning the same string twice returns the same id, so identifier
/// comparison during member lookup is a `u32` compare.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Interns {
    strings: Vec<Box<str>>,
    #[serde(skip)]
    index: AHashMap<Box<str>, StringId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the existing id if already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(id) = self.index.get(s) {
            return *id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interner overflow"));
        self.strings.push(s.into());
        self.index.insert(s.into(), id);
        id
    }

    /// Returns the string for an id.
    ///
    /// # Panics
    /// Panics if the id was not produced by this interner.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    /// Looks up a string without interning it.
    #[must_use]
    pub fn lookup(&self, s: &str) -> Option<StringId> {
        self.index.get(s).copied()
    }

    /// Number of interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedupes() {
        let mut interns = Interns::new();
        let a = interns.intern("hello");
        let b = interns.intern("world");
        let c = interns.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interns.get(a), "hello");
        assert_eq!(interns.get(b), "world");
        assert_eq!(interns.len(), 2);
    }
}
