//! A small map keyed by unit ids and pin numbers, stored as a sorted list of pairs.
//!
//! The editor never has more than a handful of scripts running on a board at once,
//! so a flat vector beats the tree and hash maps for the id lookups done on every incoming device line.

use alloc::vec::Vec;
use alloc::borrow::Borrow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry<K: Ord, V> {
    key: K,
    value: V,
}

/// A map type implemented as a list of key/value pairs kept in ascending key order.
///
/// Lookups are `O(log(n))` and insertions are `O(n)`. Iteration is always in key order,
/// which is also the order units are declared in generated programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecMap<K: Ord, V> {
    values: Vec<Entry<K, V>>,
}
impl<K: Ord, V> VecMap<K, V> {
    pub fn new() -> Self {
        Self { values: vec![] }
    }
    fn position<Q: ?Sized + Ord>(&self, key: &Q) -> Result<usize, usize> where K: Borrow<Q> {
        self.values.binary_search_by(|x| x.key.borrow().cmp(key))
    }
    pub fn get<Q: ?Sized + Ord>(&self, key: &Q) -> Option<&V> where K: Borrow<Q> {
        self.position(key).ok().map(|i| &self.values[i].value)
    }
    pub fn get_mut<Q: ?Sized + Ord>(&mut self, key: &Q) -> Option<&mut V> where K: Borrow<Q> {
        self.position(key).ok().map(|i| &mut self.values[i].value)
    }
    pub fn contains_key<Q: ?Sized + Ord>(&self, key: &Q) -> bool where K: Borrow<Q> {
        self.position(key).is_ok()
    }
    /// Inserts a value, returning the one previously stored under `key` (if any).
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        match self.position(&key) {
            Ok(i) => Some(core::mem::replace(&mut self.values[i].value, value)),
            Err(i) => {
                self.values.insert(i, Entry { key, value });
                None
            }
        }
    }
    pub fn remove<Q: ?Sized + Ord>(&mut self, key: &Q) -> Option<V> where K: Borrow<Q> {
        self.position(key).ok().map(|i| self.values.remove(i).value)
    }
    pub fn clear(&mut self) {
        self.values.clear();
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    /// Iterates through the map in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.values.iter().map(|x| (&x.key, &x.value))
    }
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.values.iter_mut().map(|x| (&x.key, &mut x.value))
    }
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> {
        self.values.iter().map(|x| &x.key)
    }
}

impl<K: Ord, V> Default for VecMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord, V> IntoIterator for VecMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;
    fn into_iter(self) -> Self::IntoIter {
        IntoIter(self.values.into_iter())
    }
}

pub struct IntoIter<K: Ord, V>(alloc::vec::IntoIter<Entry<K, V>>);
impl<K: Ord, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|x| (x.key, x.value))
    }
}

#[test]
fn test_vecmap_unit_ids() {
    let mut v = VecMap::<u32, &str>::new();
    assert!(v.is_empty());
    assert_eq!(v.insert(7, "blink"), None);
    assert_eq!(v.insert(2, "button"), None);
    assert_eq!(v.insert(4, "mqtt"), None);
    assert_eq!(v.keys().copied().collect::<Vec<_>>(), [2, 4, 7]);
    assert_eq!(v.keys().last(), Some(&7));

    assert_eq!(v.insert(4, "mqtt v2"), Some("mqtt"));
    assert_eq!(v.len(), 3);
    assert_eq!(v.get(&4), Some(&"mqtt v2"));
    assert_eq!(v.get(&5), None);
    assert!(v.contains_key(&7));

    assert_eq!(v.remove(&2), Some("button"));
    assert_eq!(v.remove(&2), None);
    assert_eq!(v.iter().map(|x| (*x.0, *x.1)).collect::<Vec<_>>(), [(4, "mqtt v2"), (7, "blink")]);

    for (_, value) in v.iter_mut() {
        *value = "stopped";
    }
    *v.get_mut(&7).unwrap() = "blink fast";
    assert_eq!(v.clone().into_iter().collect::<Vec<_>>(), [(4, "stopped"), (7, "blink fast")]);
    v.clear();
    assert!(v.is_empty());
}
