//! String commands over the flat string index.

use std::collections::HashSet;
use std::time::Duration;

use regex::bytes::Regex;

use crate::db::{is_expired, unix_now, Db};
use crate::error::{Error, Result};
use crate::index::IndexTree;
use crate::storage::log_entry::{EntryKind, LogEntry};
use crate::storage::log_file::DataType;

impl Db {
    /// Sets `key` to hold `value`, overwriting any previous value and
    /// discarding any previous time to live.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let tree = self.core.str_index.write()?;
        self.set_inner(&tree, key, value, 0)
    }

    /// Returns the value of `key`, or `KeyNotFound`.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let tree = self.core.str_index.read()?;
        self.get_val(&tree, key, DataType::Str)
    }

    /// Sets multiple keys from a flat `[key, value, ...]` slice.
    pub fn mset(&self, pairs: &[&[u8]]) -> Result<()> {
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(Error::InvalidNumberOfArgs);
        }
        let tree = self.core.str_index.write()?;
        for pair in pairs.chunks(2) {
            self.set_inner(&tree, pair[0], pair[1], 0)?;
        }
        Ok(())
    }

    /// Returns the values of all given keys, with `None` for every miss.
    pub fn mget(&self, keys: &[&[u8]]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Err(Error::InvalidNumberOfArgs);
        }
        let tree = self.core.str_index.read()?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get_val(&tree, key, DataType::Str) {
                Ok(value) => values.push(Some(value)),
                Err(Error::KeyNotFound) => values.push(None),
                Err(e) => return Err(e),
            }
        }
        Ok(values)
    }

    /// Removes `key`. Succeeds whether or not the key existed.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let tree = self.core.str_index.write()?;
        self.delete_inner(&tree, key)
    }

    /// Returns the previous value of `key` and removes it. `None` when the
    /// key did not exist.
    pub fn get_del(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tree = self.core.str_index.write()?;
        match self.get_val(&tree, key, DataType::Str) {
            Ok(value) => {
                self.delete_inner(&tree, key)?;
                Ok(Some(value))
            }
            Err(Error::KeyNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sets `key` with a time to live.
    pub fn set_ex(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let tree = self.core.str_index.write()?;
        self.set_inner(&tree, key, value, unix_now() + ttl.as_secs() as i64)
    }

    /// Sets `key` only if it does not already hold a value. Returns whether
    /// the write happened.
    pub fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        let tree = self.core.str_index.write()?;
        match self.get_val(&tree, key, DataType::Str) {
            Ok(_) => Ok(false),
            Err(Error::KeyNotFound) => {
                self.set_inner(&tree, key, value, 0)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// All-or-nothing multi-key `set_nx`: if any key already exists, nothing
    /// is written. Duplicate keys within the arguments are written once.
    pub fn mset_nx(&self, pairs: &[&[u8]]) -> Result<bool> {
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(Error::InvalidNumberOfArgs);
        }
        let tree = self.core.str_index.write()?;
        for pair in pairs.chunks(2) {
            match self.get_val(&tree, pair[0], DataType::Str) {
                Ok(_) => return Ok(false),
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        let mut written = HashSet::new();
        for pair in pairs.chunks(2) {
            if written.insert(pair[0].to_vec()) {
                self.set_inner(&tree, pair[0], pair[1], 0)?;
            }
        }
        Ok(true)
    }

    /// Appends `value` to the current value of `key`, creating the key when
    /// absent. Any previous time to live is discarded.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let tree = self.core.str_index.write()?;
        let mut current = match self.get_val(&tree, key, DataType::Str) {
            Ok(value) => value,
            Err(Error::KeyNotFound) => Vec::new(),
            Err(e) => return Err(e),
        };
        current.extend_from_slice(value);
        self.set_inner(&tree, key, &current, 0)
    }

    /// Increments the decimal integer at `key` by one.
    pub fn incr(&self, key: &[u8]) -> Result<i64> {
        self.delta_by(key, 1)
    }

    /// Decrements the decimal integer at `key` by one.
    pub fn decr(&self, key: &[u8]) -> Result<i64> {
        self.delta_by(key, -1)
    }

    /// Increments the decimal integer at `key` by `delta`.
    pub fn incr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.delta_by(key, delta)
    }

    /// Decrements the decimal integer at `key` by `delta`.
    pub fn decr_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        self.delta_by(key, delta.wrapping_neg())
    }

    /// Length of the value at `key`; 0 when absent.
    pub fn str_len(&self, key: &[u8]) -> usize {
        let Ok(tree) = self.core.str_index.read() else {
            return 0;
        };
        self.get_val(&tree, key, DataType::Str)
            .map_or(0, |value| value.len())
    }

    /// Number of live string keys.
    pub fn count(&self) -> usize {
        self.core.str_index.read().map_or(0, |tree| tree.len())
    }

    /// Iterates keys with `prefix` (empty prefix scans from the start),
    /// optionally filters them with a regular expression, and returns up to
    /// `count` matches as a flat `[key, value, ...]` list.
    pub fn scan(&self, prefix: &[u8], pattern: &str, count: usize) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let regex = if pattern.is_empty() {
            None
        } else {
            Some(Regex::new(pattern)?)
        };

        let tree = self.core.str_index.read()?;
        let mut out = Vec::new();
        for key in tree.prefix_scan(prefix, count) {
            if let Some(regex) = &regex {
                if !regex.is_match(&key) {
                    continue;
                }
            }
            match self.get_val(&tree, &key, DataType::Str) {
                Ok(value) => {
                    out.push(key);
                    out.push(value);
                }
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Substring of the value at `key` between `start` and `end` inclusive.
    /// Negative offsets count back from the end; out-of-range offsets are
    /// clamped.
    pub fn get_range(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<u8>> {
        let tree = self.core.str_index.read()?;
        let value = self.get_val(&tree, key, DataType::Str)?;
        let len = value.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }

        let resolve = |i: i64| if i < 0 { len + i } else { i };
        let start = resolve(start).max(0);
        let end = resolve(end).min(len - 1);
        if start > end {
            return Ok(Vec::new());
        }
        Ok(value[start as usize..=end as usize].to_vec())
    }

    /// Sets a fresh time to live on an existing key.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> Result<()> {
        let tree = self.core.str_index.write()?;
        let value = self.get_val(&tree, key, DataType::Str)?;
        self.set_inner(&tree, key, &value, unix_now() + ttl.as_secs() as i64)
    }

    /// Remaining time to live of `key` in whole seconds; -1 when the key
    /// has no expiration.
    pub fn ttl(&self, key: &[u8]) -> Result<i64> {
        let tree = self.core.str_index.read()?;
        let node = tree.get(key).ok_or(Error::KeyNotFound)?;
        let now = unix_now();
        if is_expired(node.expired_at, now) {
            return Err(Error::KeyNotFound);
        }
        if node.expired_at == 0 {
            return Ok(-1);
        }
        Ok(node.expired_at - now)
    }

    /// Removes the time to live of an existing key by rewriting its current
    /// value without one.
    pub fn persist(&self, key: &[u8]) -> Result<()> {
        let tree = self.core.str_index.write()?;
        let value = self.get_val(&tree, key, DataType::Str)?;
        self.set_inner(&tree, key, &value, 0)
    }

    /// All live (non-expired) string keys.
    pub fn get_str_keys(&self) -> Result<Vec<Vec<u8>>> {
        let tree = self.core.str_index.read()?;
        let now = unix_now();
        let mut keys = Vec::new();
        for key in tree.keys() {
            if let Some(node) = tree.get(&key) {
                if !is_expired(node.expired_at, now) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    fn set_inner(&self, tree: &IndexTree, key: &[u8], value: &[u8], expired_at: i64) -> Result<()> {
        let entry = LogEntry {
            key: key.to_vec(),
            value: value.to_vec(),
            expired_at,
            kind: EntryKind::Normal,
        };
        let pos = self.write_log_entry(&entry, DataType::Str)?;
        self.update_index_tree(tree, &entry, &pos, true, DataType::Str);
        Ok(())
    }

    fn delete_inner(&self, tree: &IndexTree, key: &[u8]) -> Result<()> {
        let entry = LogEntry {
            key: key.to_vec(),
            kind: EntryKind::Delete,
            ..Default::default()
        };
        let pos = self.write_log_entry(&entry, DataType::Str)?;
        if let Some(old) = tree.remove(key) {
            self.emit_discard(old.fid, old.entry_size, DataType::Str);
        }
        // The tombstone record is dead the moment it lands.
        self.emit_discard(pos.fid, pos.entry_size, DataType::Str);
        Ok(())
    }

    fn delta_by(&self, key: &[u8], delta: i64) -> Result<i64> {
        let tree = self.core.str_index.write()?;
        let current = match self.get_val(&tree, key, DataType::Str) {
            Ok(value) => value,
            Err(Error::KeyNotFound) => b"0".to_vec(),
            Err(e) => return Err(e),
        };
        let current: i64 = std::str::from_utf8(&current)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::InvalidValueType)?;
        let updated = current.checked_add(delta).ok_or(Error::IntegerOverflow)?;
        self.set_inner(&tree, key, updated.to_string().as_bytes(), 0)?;
        Ok(updated)
    }
}
