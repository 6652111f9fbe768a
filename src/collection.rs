//! Ordered key/value container
//!
//! Collections map variant keys to variant values and preserve insertion
//! order, which is observable through `loop over` iteration. Collections are
//! plain values: cloning one clones its entries.

use indexmap::IndexMap;

use crate::variant::Variant;

/// An insertion-ordered mapping from [`Variant`] keys to [`Variant`] values.
///
/// Any variant kind except a collection may serve as a key; the VM rejects
/// collection keys before they reach this container.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    entries: IndexMap<Variant, Variant>,
}

// Structural comparison over the ordered entry sequence. IndexMap's own
// equality ignores order, which is too weak here: two collections are equal
// only if their entries match pairwise in iteration order.
impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().zip(other.entries.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for Collection {}

impl Collection {
    pub fn new() -> Self {
        Collection {
            entries: IndexMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite an entry. Overwriting keeps the key's original
    /// position in the iteration order.
    pub fn insert(&mut self, key: Variant, value: Variant) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &Variant) -> Option<&Variant> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &Variant) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &Variant) -> Option<Variant> {
        self.entries.shift_remove(key)
    }

    /// Entry at an iteration position.
    pub fn get_index(&self, index: usize) -> Option<(&Variant, &Variant)> {
        self.entries.get_index(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variant, &Variant)> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl FromIterator<(Variant, Variant)> for Collection {
    fn from_iter<T: IntoIterator<Item = (Variant, Variant)>>(iter: T) -> Self {
        Collection {
            entries: iter.into_iter().collect(),
        }
    }
}
