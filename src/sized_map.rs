use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::buffer::View;

/// Key ordered map of views which keeps a running total of its serialized
/// size (key bytes plus value bytes), so finalizing a batch never has to walk
/// the tags again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SizedMap {
    inner: BTreeMap<View, View>,
    size: usize,
}

impl SizedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value, returning the previous value for the key.
    pub fn insert(&mut self, key: View, value: View) -> Option<View> {
        match self.inner.get_mut(key.as_bytes()) {
            Some(existing) => {
                self.size = self.size - existing.len() + value.len();
                Some(std::mem::replace(existing, value))
            }
            None => {
                self.size += key.len() + value.len();
                self.inner.insert(key, value);
                None
            }
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<View> {
        let (k, v) = self.inner.remove_entry(key)?;
        self.size -= k.len() + v.len();
        Some(v)
    }

    pub fn get(&self, key: &[u8]) -> Option<&View> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn data_size(&self) -> usize {
        self.size
    }

    pub fn iter(&self) -> btree_map::Iter<'_, View, View> {
        self.inner.iter()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.size = 0;
    }
}

impl<'a> IntoIterator for &'a SizedMap {
    type Item = (&'a View, &'a View);
    type IntoIter = btree_map::Iter<'a, View, View>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn recomputed(map: &SizedMap) -> usize {
        map.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    #[test]
    fn tracks_size_incrementally() {
        let mut map = SizedMap::new();
        assert_eq!(map.data_size(), 0);

        map.insert(View::from_static(b"host"), View::from_static(b"web-01"));
        assert_eq!(map.data_size(), 10);

        map.insert(View::from_static(b"region"), View::from_static(b"eu"));
        assert_eq!(map.data_size(), 18);

        // Update in place only changes the value contribution
        let previous = map.insert(View::from_static(b"host"), View::from_static(b"db"));
        assert_eq!(previous.unwrap(), "web-01");
        assert_eq!(map.data_size(), 14);
        assert_eq!(map.data_size(), recomputed(&map));

        assert_eq!(map.remove(b"region").unwrap(), "eu");
        assert_eq!(map.data_size(), 6);
        assert!(map.remove(b"missing").is_none());
        assert_eq!(map.data_size(), recomputed(&map));
    }

    #[test]
    fn ordered_by_key() {
        let mut map = SizedMap::new();
        map.insert(View::from_static(b"zone"), View::from_static(b"a"));
        map.insert(View::from_static(b"app"), View::from_static(b"b"));
        map.insert(View::from_static(b"mid"), View::from_static(b"c"));
        let keys: Vec<&[u8]> = map.iter().map(|(k, _)| k.as_bytes()).collect();
        assert_eq!(keys, vec![&b"app"[..], &b"mid"[..], &b"zone"[..]]);
    }

    #[test]
    fn clear_resets_size() {
        let mut map = SizedMap::new();
        map.insert(View::from_static(b"k"), View::from_static(b"v"));
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.data_size(), 0);
    }
}
