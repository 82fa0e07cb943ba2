//! Hash commands. On disk a field lives under the compound key
//! `(outer, field)`; in memory each outer key owns a tree keyed by field
//! alone, recovered from the compound form at replay.

use rand::Rng;
use regex::bytes::Regex;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::index::IndexTree;
use crate::storage::log_entry::{EntryKind, LogEntry};
use crate::storage::log_file::DataType;

impl Db {
    /// Sets fields from a flat `[field, value, ...]` slice, creating the
    /// hash when absent and overwriting existing fields.
    pub fn hset(&self, key: &[u8], pairs: &[&[u8]]) -> Result<()> {
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(Error::InvalidNumberOfArgs);
        }
        let mut trees = self.core.hash_index.write()?;
        let tree = trees.entry(key.to_vec()).or_default();
        for pair in pairs.chunks(2) {
            self.hset_inner(tree, key, pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Sets `field` only when it does not exist yet. Returns whether the
    /// write happened.
    pub fn hset_nx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let mut trees = self.core.hash_index.write()?;
        let tree = trees.entry(key.to_vec()).or_default();
        match self.get_val(tree, field, DataType::Hash) {
            Ok(_) => Ok(false),
            Err(Error::KeyNotFound) => {
                self.hset_inner(tree, key, field, value)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Value of `field`, or `None` when the hash or field is absent.
    pub fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        let trees = self.core.hash_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(None);
        };
        match self.get_val(tree, field, DataType::Hash) {
            Ok(value) => Ok(Some(value)),
            Err(Error::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Values of the given fields, with `None` per miss. An absent hash
    /// yields all-`None`.
    pub fn hmget(&self, key: &[u8], fields: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        let trees = self.core.hash_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(vec![None; fields.len()]);
        };
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            match self.get_val(tree, field, DataType::Hash) {
                Ok(value) => values.push(Some(value)),
                Err(Error::KeyNotFound) => values.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Removes fields, returning how many existed.
    pub fn hdel(&self, key: &[u8], fields: &[&[u8]]) -> Result<usize> {
        let mut trees = self.core.hash_index.write()?;
        let Some(tree) = trees.get(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            let entry = LogEntry {
                key: Self::encode_key(key, field),
                kind: EntryKind::Delete,
                ..Default::default()
            };
            let pos = self.write_log_entry(&entry, DataType::Hash)?;
            if let Some(old) = tree.remove(field) {
                removed += 1;
                self.emit_discard(old.fid, old.entry_size, DataType::Hash);
            }
            // The tombstone itself is dead data too.
            self.emit_discard(pos.fid, pos.entry_size, DataType::Hash);
        }
        if tree.is_empty() {
            trees.remove(key);
        }
        Ok(removed)
    }

    /// Whether `field` exists.
    pub fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let trees = self.core.hash_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(false);
        };
        match self.get_val(tree, field, DataType::Hash) {
            Ok(_) => Ok(true),
            Err(Error::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Number of fields; 0 when absent.
    pub fn hlen(&self, key: &[u8]) -> usize {
        self.core
            .hash_index
            .read()
            .map_or(0, |trees| trees.get(key).map_or(0, |tree| tree.len()))
    }

    /// All field names, in order.
    pub fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.hash_index.read()?;
        Ok(trees.get(key).map_or_else(Vec::new, |tree| tree.keys()))
    }

    /// All field values, in field order.
    pub fn hvals(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.hash_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(Vec::new());
        };
        let mut values = Vec::with_capacity(tree.len());
        for field in tree.keys() {
            match self.get_val(tree, &field, DataType::Hash) {
                Ok(value) => values.push(value),
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// All fields and values as a flat `[field, value, ...]` list.
    pub fn hget_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.hash_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(Vec::new());
        };
        let mut pairs = Vec::with_capacity(tree.len() * 2);
        for field in tree.keys() {
            match self.get_val(tree, &field, DataType::Hash) {
                Ok(value) => {
                    pairs.push(field);
                    pairs.push(value);
                }
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(pairs)
    }

    /// Length of the value at `field`; 0 when the hash or field is absent.
    pub fn hstr_len(&self, key: &[u8], field: &[u8]) -> usize {
        let Ok(trees) = self.core.hash_index.read() else {
            return 0;
        };
        let Some(tree) = trees.get(key) else {
            return 0;
        };
        self.get_val(tree, field, DataType::Hash)
            .map_or(0, |value| value.len())
    }

    /// Iterates fields with `prefix`, optionally filtered by a regular
    /// expression, returning up to `count` matches as `[field, value, ...]`.
    pub fn hscan(
        &self,
        key: &[u8],
        prefix: &[u8],
        pattern: &str,
        count: usize,
    ) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        let trees = self.core.hash_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for field in tree.prefix_scan(prefix, count) {
            if let Some(regex) = &regex {
                if !regex.is_match(&field) {
                    continue;
                }
            }
            match self.get_val(tree, &field, DataType::Hash) {
                Ok(value) => {
                    out.push(field);
                    out.push(value);
                }
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Adds `delta` to the decimal integer at `field`, treating a missing
    /// field as 0.
    pub fn hincr_by(&self, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let mut trees = self.core.hash_index.write()?;
        let tree = trees.entry(key.to_vec()).or_default();
        let current = match self.get_val(tree, field, DataType::Hash) {
            Ok(value) => value,
            Err(Error::KeyNotFound) => b"0".to_vec(),
            Err(e) => return Err(e),
        };
        let current: i64 = std::str::from_utf8(&current)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::InvalidValueType)?;
        let updated = current.checked_add(delta).ok_or(Error::IntegerOverflow)?;
        self.hset_inner(tree, key, field, updated.to_string().as_bytes())?;
        Ok(updated)
    }

    /// Random fields of the hash. `count > 0` returns up to `count`
    /// distinct fields; `count < 0` returns `|count|` fields with
    /// repetition; `count = 0` returns nothing. With `with_values` each
    /// field is followed by its value.
    pub fn hrand_field(&self, key: &[u8], count: i64, with_values: bool) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let pair_len = if with_values { 2 } else { 1 };
        let values = if with_values {
            self.hget_all(key)?
        } else {
            self.hkeys(key)?
        };
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let pair_count = values.len() / pair_len;
        let mut rng = rand::thread_rng();

        if count > 0 {
            if count as usize >= pair_count {
                return Ok(values);
            }
            // Knock out random pairs until `count` remain.
            let mut remaining = values;
            for _ in 0..pair_count - count as usize {
                let idx = rng.gen_range(0..remaining.len() / pair_len) * pair_len;
                remaining.drain(idx..idx + pair_len);
            }
            return Ok(remaining);
        }

        let mut out = Vec::with_capacity(-count as usize * pair_len);
        for _ in 0..-count {
            let idx = rng.gen_range(0..pair_count) * pair_len;
            out.extend_from_slice(&values[idx..idx + pair_len]);
        }
        Ok(out)
    }

    fn hset_inner(&self, tree: &IndexTree, key: &[u8], field: &[u8], value: &[u8]) -> Result<()> {
        let entry = LogEntry::new(Self::encode_key(key, field), value.to_vec());
        let pos = self.write_log_entry(&entry, DataType::Hash)?;
        let mem_entry = LogEntry::new(field.to_vec(), value.to_vec());
        self.update_index_tree(tree, &mem_entry, &pos, true, DataType::Hash);
        Ok(())
    }
}
