//! # Indexed Collection
//!
//! Purpose: An order-preserving list of `(key, value)` pairs that can be
//! addressed both by position and by key, used for column metadata, query
//! parameters and session settings.
//!
//! ## Design Principles
//! 1. **Vec Is the Source of Truth**: Positions come from the entry vector.
//! 2. **Position-Only Index**: The key index stores positions, never keys, so
//!    keys are not duplicated and lookups borrow the stored key.
//! 3. **Incremental Renumbering**: Inserts and removals shift only the
//!    positions at or after the mutated slot.
//! 4. **Pluggable Equality**: A `KeyComparer` decides hashing and equality,
//!    e.g. ASCII case-insensitive column names.
//!
//! ## Structure Overview
//!
//! ```text
//! IndexedCollection
//!   ├── entries: Vec<(K, V)>        position -> entry
//!   ├── index: HashTable<usize>     hash(key) -> position
//!   ├── hash_builder: ahash::RandomState
//!   └── comparer: C                 hash/eq policy
//! ```
//!
//! Every `&mut self` method leaves `entries` and `index` consistent before it
//! returns, so no reader can observe a half-renumbered collection.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::ops::Index;
use std::slice;

use ahash::RandomState;
use hashbrown::HashTable;

use crate::error::{ChwError, ChwResult};

/// Hashing and equality policy for collection keys.
///
/// Implementations must keep `hash_key` consistent with `keys_equal`, and a
/// key must hash the same whether seen as the stored type or a borrowed form.
pub trait KeyComparer<Q: ?Sized> {
    /// Feeds the key into the hasher.
    fn hash_key<H: Hasher>(&self, key: &Q, state: &mut H);

    /// Returns true when both keys denote the same entry.
    fn keys_equal(&self, left: &Q, right: &Q) -> bool;
}

/// Comparer backed by the key's own `Hash` and `Eq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultComparer;

impl<Q: Hash + Eq + ?Sized> KeyComparer<Q> for DefaultComparer {
    #[inline]
    fn hash_key<H: Hasher>(&self, key: &Q, state: &mut H) {
        key.hash(state);
    }

    #[inline]
    fn keys_equal(&self, left: &Q, right: &Q) -> bool {
        left == right
    }
}

/// Comparer for string keys that ignores ASCII case.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiCaseInsensitive;

impl<Q: AsRef<str> + ?Sized> KeyComparer<Q> for AsciiCaseInsensitive {
    fn hash_key<H: Hasher>(&self, key: &Q, state: &mut H) {
        let key = key.as_ref();
        for byte in key.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_usize(key.len());
    }

    fn keys_equal(&self, left: &Q, right: &Q) -> bool {
        left.as_ref().eq_ignore_ascii_case(right.as_ref())
    }
}

/// Ordered collection addressable by position and by key.
#[derive(Clone)]
pub struct IndexedCollection<K, V, C = DefaultComparer> {
    entries: Vec<(K, V)>,
    index: HashTable<usize>,
    hash_builder: RandomState,
    comparer: C,
}

impl<K: Hash + Eq, V> IndexedCollection<K, V, DefaultComparer> {
    /// Creates an empty collection using the key's own equality.
    pub fn new() -> Self {
        Self::with_comparer(DefaultComparer)
    }

    /// Creates an empty collection with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_comparer(capacity, DefaultComparer)
    }
}

impl<K: Hash + Eq, V> Default for IndexedCollection<K, V, DefaultComparer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C: KeyComparer<K>> IndexedCollection<K, V, C> {
    /// Creates an empty collection with a custom key comparer.
    pub fn with_comparer(comparer: C) -> Self {
        Self::with_capacity_and_comparer(0, comparer)
    }

    /// Creates an empty collection with a custom comparer and capacity.
    pub fn with_capacity_and_comparer(capacity: usize, comparer: C) -> Self {
        IndexedCollection {
            entries: Vec::with_capacity(capacity),
            index: HashTable::with_capacity(capacity),
            hash_builder: RandomState::new(),
            comparer,
        }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the collection holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the comparer used for keys.
    pub fn comparer(&self) -> &C {
        &self.comparer
    }

    /// Appends an entry at the end.
    ///
    /// # Errors
    /// Returns `ChwError::DuplicateKey` if the key is already present; the
    /// collection is left unchanged.
    pub fn push(&mut self, key: K, value: V) -> ChwResult<()> {
        let len = self.entries.len();
        self.insert(len, key, value)
    }

    /// Inserts an entry at `position`, shifting later entries up by one.
    ///
    /// # Errors
    /// - `ChwError::IndexOutOfRange` if `position > len`.
    /// - `ChwError::DuplicateKey` if the key is already present.
    pub fn insert(&mut self, position: usize, key: K, value: V) -> ChwResult<()> {
        let len = self.entries.len();
        if position > len {
            return Err(ChwError::IndexOutOfRange {
                index: position,
                len,
            });
        }
        if self.index_of_key(&key).is_some() {
            return Err(ChwError::DuplicateKey);
        }

        let hash = make_hash(&self.hash_builder, &self.comparer, &key);

        // The vector must already match the renumbered index before the table
        // may rehash through it.
        self.entries.insert(position, (key, value));
        if position < len {
            for slot in self.index.iter_mut() {
                if *slot >= position {
                    *slot += 1;
                }
            }
        }
        let entries = &self.entries;
        let hash_builder = &self.hash_builder;
        let comparer = &self.comparer;
        self.index.insert_unique(hash, position, |&pos| {
            make_hash(hash_builder, comparer, &entries[pos].0)
        });
        Ok(())
    }

    /// Returns the entry at `position`.
    pub fn get_index(&self, position: usize) -> Option<(&K, &V)> {
        self.entries.get(position).map(|(key, value)| (key, value))
    }

    /// Returns the entry at `position` with a mutable value.
    ///
    /// Keys stay immutable; use `set_index` to re-key a position.
    pub fn get_index_mut(&mut self, position: usize) -> Option<(&K, &mut V)> {
        self.entries
            .get_mut(position)
            .map(|(key, value)| (&*key, value))
    }

    /// Replaces the entry at `position`, returning the previous one.
    ///
    /// # Errors
    /// - `ChwError::IndexOutOfRange` if `position >= len`.
    /// - `ChwError::DuplicateKey` if `key` belongs to a different position.
    pub fn set_index(&mut self, position: usize, key: K, value: V) -> ChwResult<(K, V)> {
        let len = self.entries.len();
        if position >= len {
            return Err(ChwError::IndexOutOfRange {
                index: position,
                len,
            });
        }
        if let Some(existing) = self.index_of_key(&key) {
            if existing != position {
                return Err(ChwError::DuplicateKey);
            }
        }

        let old_hash = make_hash(&self.hash_builder, &self.comparer, &self.entries[position].0);
        let new_hash = make_hash(&self.hash_builder, &self.comparer, &key);
        if let Ok(entry) = self.index.find_entry(old_hash, |&pos| pos == position) {
            entry.remove();
        }
        let previous = std::mem::replace(&mut self.entries[position], (key, value));
        let entries = &self.entries;
        let hash_builder = &self.hash_builder;
        let comparer = &self.comparer;
        self.index.insert_unique(new_hash, position, |&pos| {
            make_hash(hash_builder, comparer, &entries[pos].0)
        });
        Ok(previous)
    }

    /// Returns the value stored for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        self.index_of_key(key).map(|pos| &self.entries[pos].1)
    }

    /// Returns the value stored for `key`, mutably.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        let pos = self.index_of_key(key)?;
        Some(&mut self.entries[pos].1)
    }

    /// Returns the current position of `key`.
    pub fn index_of_key<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        if self.entries.is_empty() {
            return None;
        }
        let hash = make_hash(&self.hash_builder, &self.comparer, key);
        let entries = &self.entries;
        let comparer = &self.comparer;
        self.index
            .find(hash, |&pos| key_matches(comparer, &entries[pos].0, key))
            .copied()
    }

    /// Returns the position of the entry `(key, value)`.
    ///
    /// Matches only when the key is present and its stored value equals `value`.
    pub fn index_of<Q>(&self, key: &Q, value: &V) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: PartialEq,
    {
        self.index_of_key(key)
            .filter(|&pos| self.entries[pos].1 == *value)
    }

    /// Returns true when `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        self.index_of_key(key).is_some()
    }

    /// Returns true when the entry `(key, value)` is present.
    pub fn contains<Q>(&self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: PartialEq,
    {
        self.index_of(key, value).is_some()
    }

    /// Removes the entry at `position`, shifting later entries down by one.
    ///
    /// # Errors
    /// Returns `ChwError::IndexOutOfRange` if `position >= len`.
    pub fn remove_at(&mut self, position: usize) -> ChwResult<(K, V)> {
        let len = self.entries.len();
        if position >= len {
            return Err(ChwError::IndexOutOfRange {
                index: position,
                len,
            });
        }

        let hash = make_hash(&self.hash_builder, &self.comparer, &self.entries[position].0);
        if let Ok(entry) = self.index.find_entry(hash, |&pos| pos == position) {
            entry.remove();
        }
        let removed = self.entries.remove(position);
        if position + 1 < len {
            for slot in self.index.iter_mut() {
                if *slot > position {
                    *slot -= 1;
                }
            }
        }
        Ok(removed)
    }

    /// Removes the entry for `key`, returning it when present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
    {
        let pos = self.index_of_key(key)?;
        self.remove_at(pos).ok()
    }

    /// Removes the entry `(key, value)` only if the stored value equals `value`.
    pub fn remove_item<Q>(&mut self, key: &Q, value: &V) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized,
        C: KeyComparer<Q>,
        V: PartialEq,
    {
        match self.index_of(key, value) {
            Some(pos) => self.remove_at(pos).is_ok(),
            None => false,
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Iterates entries in positional order.
    pub fn iter(&self) -> slice::Iter<'_, (K, V)> {
        self.entries.iter()
    }

    /// Iterates keys in positional order.
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + ExactSizeIterator + '_ {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Iterates values in positional order.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = &V> + ExactSizeIterator + '_ {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Returns the entries as a slice.
    pub fn as_slice(&self) -> &[(K, V)] {
        &self.entries
    }
}

impl<K, V, C> Index<usize> for IndexedCollection<K, V, C> {
    type Output = (K, V);

    fn index(&self, position: usize) -> &(K, V) {
        &self.entries[position]
    }
}

impl<'a, K, V, C> IntoIterator for &'a IndexedCollection<K, V, C> {
    type Item = &'a (K, V);
    type IntoIter = slice::Iter<'a, (K, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C> fmt::Debug for IndexedCollection<K, V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(key, value)| (key, value)))
            .finish()
    }
}

fn make_hash<C, Q>(hash_builder: &RandomState, comparer: &C, key: &Q) -> u64
where
    C: KeyComparer<Q>,
    Q: ?Sized,
{
    let mut state = hash_builder.build_hasher();
    comparer.hash_key(key, &mut state);
    state.finish()
}

#[inline]
fn key_matches<C, K, Q>(comparer: &C, stored: &K, key: &Q) -> bool
where
    C: KeyComparer<Q>,
    K: Borrow<Q>,
    Q: ?Sized,
{
    comparer.keys_equal(Borrow::<Q>::borrow(stored), key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn abc() -> IndexedCollection<String, i32> {
        let mut items = IndexedCollection::new();
        items.push("a".to_string(), 1).unwrap();
        items.push("b".to_string(), 2).unwrap();
        items.push("c".to_string(), 3).unwrap();
        items
    }

    fn assert_consistent(items: &IndexedCollection<String, i32>) {
        for (pos, (key, value)) in items.iter().enumerate() {
            assert_eq!(items.index_of_key(key.as_str()), Some(pos));
            assert_eq!(items.index_of(key.as_str(), value), Some(pos));
            assert_eq!(&items[pos].0, key);
        }
    }

    #[test]
    fn contains_requires_key_and_value() {
        let items = abc();
        assert!(items.contains("b", &2));
        assert!(!items.contains("b", &3));
        assert!(!items.contains("z", &2));
    }

    #[test]
    fn get_index_is_bounds_checked() {
        let items = abc();
        assert_eq!(items.get_index(1), Some((&"b".to_string(), &2)));
        assert_eq!(items.get_index(3), None);
        assert_eq!(IndexedCollection::<String, i32>::new().get_index(0), None);
    }

    #[test]
    fn remove_at_front_renumbers() {
        let mut items = abc();
        let removed = items.remove_at(0).unwrap();
        assert_eq!(removed, ("a".to_string(), 1));
        assert_eq!(items[0], ("b".to_string(), 2));
        assert_eq!(items.index_of_key("c"), Some(1));
        assert_eq!(items.index_of_key("a"), None);
        assert_consistent(&items);
    }

    #[test]
    fn insert_in_middle_shifts_suffix() {
        let mut items = abc();
        items.insert(1, "x".to_string(), 9).unwrap();
        let keys: Vec<&str> = items.keys().map(String::as_str).collect();
        assert_eq!(keys, ["a", "x", "b", "c"]);
        assert_eq!(items.index_of_key("c"), Some(3));
        assert_consistent(&items);
    }

    #[test]
    fn insert_past_end_is_rejected() {
        let mut items = abc();
        let err = items.insert(5, "z".to_string(), 0).unwrap_err();
        assert_eq!(err, ChwError::IndexOutOfRange { index: 5, len: 3 });
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn duplicate_key_leaves_state_unchanged() {
        let mut items = abc();
        assert_eq!(items.push("b".to_string(), 7), Err(ChwError::DuplicateKey));
        assert_eq!(items.insert(0, "c".to_string(), 7), Err(ChwError::DuplicateKey));
        assert_eq!(items.len(), 3);
        assert_eq!(items.get("b"), Some(&2));
        assert_consistent(&items);
    }

    #[test]
    fn remove_item_requires_matching_value() {
        let mut items = abc();
        assert!(!items.remove_item("b", &5));
        assert_eq!(items.len(), 3);
        assert!(items.remove_item("b", &2));
        assert_eq!(items.index_of_key("c"), Some(1));
        assert!(!items.contains_key("b"));
    }

    #[test]
    fn remove_by_key_reports_absence() {
        let mut items = abc();
        assert_eq!(items.remove("zz"), None);
        assert_eq!(items.remove("a"), Some(("a".to_string(), 1)));
        assert_consistent(&items);
    }

    #[test]
    fn set_index_rekeys_in_place() {
        let mut items = abc();
        let previous = items.set_index(1, "q".to_string(), 20).unwrap();
        assert_eq!(previous, ("b".to_string(), 2));
        assert_eq!(items.index_of_key("q"), Some(1));
        assert!(!items.contains_key("b"));

        // Same key at the same position is a plain value update.
        items.set_index(1, "q".to_string(), 21).unwrap();
        assert_eq!(items.get("q"), Some(&21));

        assert_eq!(
            items.set_index(0, "c".to_string(), 0),
            Err(ChwError::DuplicateKey)
        );
        assert_eq!(items[0], ("a".to_string(), 1));
        assert_consistent(&items);
    }

    #[test]
    fn get_mut_and_get_index_mut_update_values() {
        let mut items = abc();
        *items.get_mut("a").unwrap() += 10;
        if let Some((_, value)) = items.get_index_mut(2) {
            *value = 30;
        }
        let values: Vec<i32> = items.values().copied().collect();
        assert_eq!(values, [11, 2, 30]);
    }

    #[test]
    fn clear_empties_both_views() {
        let mut items = abc();
        items.clear();
        assert!(items.is_empty());
        assert_eq!(items.index_of_key("a"), None);
        items.push("a".to_string(), 1).unwrap();
        assert_eq!(items.index_of_key("a"), Some(0));
    }

    #[test]
    fn case_insensitive_comparer_folds_ascii() {
        let mut items: IndexedCollection<String, &str, AsciiCaseInsensitive> =
            IndexedCollection::with_comparer(AsciiCaseInsensitive);
        items.push("max_threads".to_string(), "8").unwrap();
        assert_eq!(items.get("MAX_Threads"), Some(&"8"));
        assert_eq!(
            items.push("MAX_THREADS".to_string(), "4"),
            Err(ChwError::DuplicateKey)
        );
    }

    #[test]
    fn debug_lists_entries_in_order() {
        let items = abc();
        assert_eq!(format!("{:?}", items), r#"{"a": 1, "b": 2, "c": 3}"#);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u8),
        Insert(usize, u8),
        RemoveAt(usize),
        Remove(u8),
        Set(usize, u8),
        RemoveItem(u8, bool),
        Clear,
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            6 => (0u8..24).prop_map(Op::Push),
            6 => (0usize..32, 0u8..24).prop_map(|(pos, key)| Op::Insert(pos, key)),
            4 => (0usize..32).prop_map(Op::RemoveAt),
            4 => (0u8..24).prop_map(Op::Remove),
            4 => (0usize..32, 0u8..24).prop_map(|(pos, key)| Op::Set(pos, key)),
            4 => (0u8..24, any::<bool>()).prop_map(|(key, same)| Op::RemoveItem(key, same)),
            1 => Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_vec_model(ops in prop::collection::vec(arb_op(), 1..200)) {
            let mut items: IndexedCollection<String, i32> = IndexedCollection::new();
            let mut model: Vec<(String, i32)> = Vec::new();

            for (step, op) in ops.into_iter().enumerate() {
                let value = step as i32;
                match op {
                    Op::Push(key) => {
                        let key = key.to_string();
                        let dup = model.iter().any(|(k, _)| *k == key);
                        let result = items.push(key.clone(), value);
                        prop_assert_eq!(result.is_err(), dup);
                        if !dup {
                            model.push((key, value));
                        }
                    }
                    Op::Insert(pos, key) => {
                        let key = key.to_string();
                        let ok = pos <= model.len() && !model.iter().any(|(k, _)| *k == key);
                        let result = items.insert(pos, key.clone(), value);
                        prop_assert_eq!(result.is_ok(), ok);
                        if ok {
                            model.insert(pos, (key, value));
                        }
                    }
                    Op::RemoveAt(pos) => {
                        let result = items.remove_at(pos);
                        if pos < model.len() {
                            prop_assert_eq!(result.ok(), Some(model.remove(pos)));
                        } else {
                            prop_assert!(result.is_err());
                        }
                    }
                    Op::Remove(key) => {
                        let key = key.to_string();
                        let expected = model
                            .iter()
                            .position(|(k, _)| *k == key)
                            .map(|pos| model.remove(pos));
                        prop_assert_eq!(items.remove(key.as_str()), expected);
                    }
                    Op::Set(pos, key) => {
                        let key = key.to_string();
                        let owner = model.iter().position(|(k, _)| *k == key);
                        let ok = pos < model.len() && owner.map_or(true, |o| o == pos);
                        let result = items.set_index(pos, key.clone(), value);
                        prop_assert_eq!(result.is_ok(), ok);
                        if ok {
                            model[pos] = (key, value);
                        }
                    }
                    Op::RemoveItem(key, same) => {
                        let key = key.to_string();
                        let found = model.iter().position(|(k, _)| *k == key);
                        // Stored values are step numbers, so -1 never matches.
                        let candidate = match (found, same) {
                            (Some(pos), true) => model[pos].1,
                            _ => -1,
                        };
                        let removed = items.remove_item(key.as_str(), &candidate);
                        prop_assert_eq!(removed, found.is_some() && same);
                        if removed {
                            if let Some(pos) = found {
                                model.remove(pos);
                            }
                        }
                    }
                    Op::Clear => {
                        items.clear();
                        model.clear();
                    }
                }

                prop_assert_eq!(items.as_slice(), model.as_slice());
                for (pos, (key, value)) in model.iter().enumerate() {
                    prop_assert_eq!(items.index_of_key(key.as_str()), Some(pos));
                    prop_assert_eq!(items.index_of(key.as_str(), value), Some(pos));
                }
            }
        }
    }
}
