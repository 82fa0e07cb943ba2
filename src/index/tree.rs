use std::ops::Bound;

use crossbeam_skiplist::SkipMap;

/// In-memory payload for one live key: where the record lives on disk, when
/// it expires, and (in key-value-memory mode) the value itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexNode {
    pub fid: u32,
    pub offset: u64,
    pub entry_size: usize,
    pub expired_at: i64,
    /// Populated only in `IndexMode::KeyValueMem`.
    pub value: Option<Vec<u8>>,
}

/// Ordered map from byte-string key to [`IndexNode`].
///
/// One tree exists per data type (strings) or per outer key (lists, hashes,
/// sets, sorted sets). Mutation is serialized by the owning type's
/// read/write lock; the skip map underneath keeps iteration stable for
/// readers.
pub struct IndexTree {
    map: SkipMap<Vec<u8>, IndexNode>,
}

impl IndexTree {
    pub fn new() -> Self {
        Self {
            map: SkipMap::new(),
        }
    }

    /// Inserts `node` under `key`, returning the displaced node if the key
    /// was already present.
    pub fn put(&self, key: Vec<u8>, node: IndexNode) -> Option<IndexNode> {
        let old = self.map.get(&key).map(|e| e.value().clone());
        self.map.insert(key, node);
        old
    }

    pub fn get(&self, key: &[u8]) -> Option<IndexNode> {
        self.map.get(key).map(|e| e.value().clone())
    }

    /// Removes `key`, returning its node if it was present.
    pub fn remove(&self, key: &[u8]) -> Option<IndexNode> {
        self.map.remove(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// All keys in lexicographic order.
    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }

    /// Up to `count` keys sharing `prefix`, in order. An empty prefix scans
    /// from the start of the tree.
    pub fn prefix_scan(&self, prefix: &[u8], count: usize) -> Vec<Vec<u8>> {
        if count == 0 {
            return Vec::new();
        }
        let lower = Bound::Included(prefix.to_vec());
        let upper = match prefix_upper_bound(prefix) {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        self.map
            .range((lower, upper))
            .take(count)
            .map(|e| e.key().clone())
            .collect()
    }
}

impl Default for IndexTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest byte string strictly greater than every string with `prefix`.
/// None when the prefix is empty or all 0xff.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(&last) = end.last() {
        if last < 0xff {
            *end.last_mut().unwrap() = last + 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(fid: u32, offset: u64) -> IndexNode {
        IndexNode {
            fid,
            offset,
            entry_size: 16,
            expired_at: 0,
            value: None,
        }
    }

    #[test]
    fn test_put_get_remove() {
        let tree = IndexTree::new();
        assert_eq!(tree.put(b"a".to_vec(), node(0, 0)), None);
        assert_eq!(tree.get(b"a"), Some(node(0, 0)));

        let old = tree.put(b"a".to_vec(), node(0, 64));
        assert_eq!(old, Some(node(0, 0)));
        assert_eq!(tree.get(b"a"), Some(node(0, 64)));

        assert_eq!(tree.remove(b"a"), Some(node(0, 64)));
        assert_eq!(tree.get(b"a"), None);
        assert_eq!(tree.remove(b"a"), None);
    }

    #[test]
    fn test_keys_are_ordered() {
        let tree = IndexTree::new();
        for key in [b"cc".as_ref(), b"aa", b"bb"] {
            tree.put(key.to_vec(), node(0, 0));
        }
        assert_eq!(
            tree.keys(),
            vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]
        );
    }

    #[test]
    fn test_prefix_scan() {
        let tree = IndexTree::new();
        for key in [b"k-1".as_ref(), b"k-2", b"k-3", b"x-1", b"k+0"] {
            tree.put(key.to_vec(), node(0, 0));
        }
        assert_eq!(
            tree.prefix_scan(b"k-", 10),
            vec![b"k-1".to_vec(), b"k-2".to_vec(), b"k-3".to_vec()]
        );
        assert_eq!(tree.prefix_scan(b"k-", 2).len(), 2);
        assert_eq!(tree.prefix_scan(b"", 10).len(), 5);
        assert_eq!(tree.prefix_scan(b"zz", 10).len(), 0);
        assert_eq!(tree.prefix_scan(b"k-", 0).len(), 0);
    }

    #[test]
    fn test_prefix_upper_bound_edge_cases() {
        assert_eq!(prefix_upper_bound(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_upper_bound(&[0x61, 0xff]), Some(vec![0x62]));
        assert_eq!(prefix_upper_bound(&[0xff, 0xff]), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }
}
