//! List commands.
//!
//! A list is laid out over integer sequence numbers straddling a fixed
//! pivot:
//!
//! ```text
//! +--------+--------+---------+---------+---------+--------+-----------+
//! |   0    |   1    |   ...   | headSeq | tailSeq |  ...   | MaxUint32 |
//! +--------+--------+---------+---------+---------+--------+-----------+
//! | <------------------ lpush | rpush -----------------------------> |
//! ```
//!
//! Each element is a record under `u32-LE(seq) || key`; a meta record of
//! head and tail sequences lives under the plain key and is rewritten after
//! every push and pop.

use std::collections::HashMap;

use crate::db::{Db, INITIAL_LIST_SEQ};
use crate::error::{Error, Result};
use crate::index::IndexTree;
use crate::storage::log_entry::{EntryKind, LogEntry};
use crate::storage::log_file::DataType;

impl Db {
    /// Prepends values to the list at `key`, creating it when absent.
    /// Values are pushed one by one, so the last argument ends up at the
    /// head.
    pub fn lpush(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        let mut trees = self.core.list_index.write()?;
        trees.entry(key.to_vec()).or_default();
        for value in values {
            self.push_internal(&trees, key, value, true)?;
        }
        Ok(())
    }

    /// Prepends values only if the list already exists.
    pub fn lpush_x(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        let trees = self.core.list_index.write()?;
        if !trees.contains_key(key) {
            return Err(Error::KeyNotFound);
        }
        for value in values {
            self.push_internal(&trees, key, value, true)?;
        }
        Ok(())
    }

    /// Appends values to the list at `key`, creating it when absent.
    pub fn rpush(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        let mut trees = self.core.list_index.write()?;
        trees.entry(key.to_vec()).or_default();
        for value in values {
            self.push_internal(&trees, key, value, false)?;
        }
        Ok(())
    }

    /// Appends values only if the list already exists.
    pub fn rpush_x(&self, key: &[u8], values: &[&[u8]]) -> Result<()> {
        let trees = self.core.list_index.write()?;
        if !trees.contains_key(key) {
            return Err(Error::KeyNotFound);
        }
        for value in values {
            self.push_internal(&trees, key, value, false)?;
        }
        Ok(())
    }

    /// Removes and returns the head of the list. `None` when the list is
    /// empty or absent.
    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut trees = self.core.list_index.write()?;
        self.pop_internal(&mut trees, key, true)
    }

    /// Removes and returns the tail of the list.
    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut trees = self.core.list_index.write()?;
        self.pop_internal(&mut trees, key, false)
    }

    /// Atomically pops one end of `src` and pushes the element onto one end
    /// of `dst`, returning it.
    pub fn lmove(
        &self,
        src: &[u8],
        dst: &[u8],
        src_is_left: bool,
        dst_is_left: bool,
    ) -> Result<Option<Vec<u8>>> {
        let mut trees = self.core.list_index.write()?;
        let Some(value) = self.pop_internal(&mut trees, src, src_is_left)? else {
            return Ok(None);
        };
        trees.entry(dst.to_vec()).or_default();
        self.push_internal(&trees, dst, &value, dst_is_left)?;
        Ok(Some(value))
    }

    /// Length of the list; 0 when absent.
    pub fn llen(&self, key: &[u8]) -> usize {
        let Ok(trees) = self.core.list_index.read() else {
            return 0;
        };
        let Some(tree) = trees.get(key) else {
            return 0;
        };
        match self.list_meta(tree, key) {
            Ok((head, tail)) => (tail - head - 1) as usize,
            Err(_) => 0,
        }
    }

    /// Element at `index`: 0 is the head, negative indices count back from
    /// the tail. `None` when the list is absent; `IndexOutOfRange` when the
    /// index misses the list.
    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let trees = self.core.list_index.read()?;
        let Some(tree) = trees.get(key) else {
            return Ok(None);
        };
        let (head, tail) = self.list_meta(tree, key)?;
        let seq = Self::list_sequence(head, tail, index)?;
        let enc_key = Self::encode_list_key(key, seq);
        Ok(Some(self.get_val(tree, &enc_key, DataType::List)?))
    }

    /// Overwrites the element at `index`.
    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let trees = self.core.list_index.write()?;
        let tree = trees.get(key).ok_or(Error::KeyNotFound)?;
        let (head, tail) = self.list_meta(tree, key)?;
        let seq = Self::list_sequence(head, tail, index)?;
        let enc_key = Self::encode_list_key(key, seq);
        let entry = LogEntry::new(enc_key, value.to_vec());
        let pos = self.write_log_entry(&entry, DataType::List)?;
        self.update_index_tree(tree, &entry, &pos, true, DataType::List);
        Ok(())
    }

    /// Elements between `start` and `end` inclusive, with negative offsets
    /// counting back from the tail and out-of-bound offsets clamped.
    pub fn lrange(&self, key: &[u8], start: i64, end: i64) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.list_index.read()?;
        let tree = trees.get(key).ok_or(Error::KeyNotFound)?;
        let (head, tail) = self.list_meta(tree, key)?;

        let resolve = |index: i64| {
            if index >= 0 {
                head as i64 + index + 1
            } else {
                tail as i64 + index
            }
        };
        let start_seq = resolve(start).max(head as i64 + 1);
        let end_seq = resolve(end).min(tail as i64 - 1);
        if start_seq >= tail as i64 || end_seq <= head as i64 || start_seq > end_seq {
            return Err(Error::IndexOutOfRange);
        }

        let mut values = Vec::with_capacity((end_seq - start_seq + 1) as usize);
        for seq in start_seq..=end_seq {
            let enc_key = Self::encode_list_key(key, seq as u32);
            values.push(self.get_val(tree, &enc_key, DataType::List)?);
        }
        Ok(values)
    }

    /// Removes occurrences of `value`, returning how many were removed.
    /// `count > 0` removes from the head, `count < 0` from the tail,
    /// `count = 0` removes all. Survivors between the removals are popped
    /// and re-pushed on the same side, so this can be slow on long lists.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> Result<usize> {
        let mut trees = self.core.list_index.write()?;
        let Some(tree) = trees.get(key) else {
            return Ok(0);
        };
        let (head, tail) = self.list_meta(tree, key)?;
        let want = if count == 0 {
            u32::MAX as i64
        } else {
            count.abs()
        };
        let from_head = count >= 0;

        // Pass one: walk from the chosen side, splitting sequences into
        // matches and survivors until enough matches are found.
        let mut discard_seqs: Vec<u32> = Vec::new();
        let mut reserved: Vec<(u32, Vec<u8>)> = Vec::new();
        let seqs: Vec<u32> = if from_head {
            (head + 1..tail).collect()
        } else {
            (head + 1..tail).rev().collect()
        };
        for seq in seqs {
            let enc_key = Self::encode_list_key(key, seq);
            let val = self.get_val(tree, &enc_key, DataType::List)?;
            if val == value {
                discard_seqs.push(seq);
                if discard_seqs.len() as i64 == want {
                    break;
                }
            } else {
                reserved.push((seq, val));
            }
        }
        let Some(&last_discard) = discard_seqs.last() else {
            return Ok(0);
        };

        // Pass two: pop everything up to the furthest match, then re-push
        // the survivors that were displaced, restoring their order.
        if from_head {
            let mut seq = head + 1;
            while seq <= last_discard {
                self.pop_internal(&mut trees, key, true)?;
                seq += 1;
            }
            for (seq, val) in reserved.iter().rev() {
                if *seq < last_discard {
                    trees.entry(key.to_vec()).or_default();
                    self.push_internal(&trees, key, val, true)?;
                }
            }
        } else {
            let mut seq = tail - 1;
            while seq >= last_discard {
                self.pop_internal(&mut trees, key, false)?;
                seq -= 1;
            }
            for (seq, val) in reserved.iter().rev() {
                if *seq > last_discard {
                    trees.entry(key.to_vec()).or_default();
                    self.push_internal(&trees, key, val, false)?;
                }
            }
        }
        Ok(discard_seqs.len())
    }

    /// Head and tail sequences for `key`, falling back to the pivot for a
    /// list with no meta record yet.
    fn list_meta(&self, tree: &IndexTree, key: &[u8]) -> Result<(u32, u32)> {
        let value = match self.get_val(tree, key, DataType::List) {
            Ok(value) => value,
            Err(Error::KeyNotFound) => Vec::new(),
            Err(e) => return Err(e),
        };
        if value.len() >= 8 {
            let head = u32::from_le_bytes([value[0], value[1], value[2], value[3]]);
            let tail = u32::from_le_bytes([value[4], value[5], value[6], value[7]]);
            Ok((head, tail))
        } else {
            Ok((INITIAL_LIST_SEQ, INITIAL_LIST_SEQ + 1))
        }
    }

    fn save_list_meta(&self, tree: &IndexTree, key: &[u8], head: u32, tail: u32) -> Result<()> {
        let mut value = Vec::with_capacity(8);
        value.extend_from_slice(&head.to_le_bytes());
        value.extend_from_slice(&tail.to_le_bytes());
        let entry = LogEntry {
            key: key.to_vec(),
            value,
            expired_at: 0,
            kind: EntryKind::ListMeta,
        };
        let pos = self.write_log_entry(&entry, DataType::List)?;
        self.update_index_tree(tree, &entry, &pos, true, DataType::List);
        Ok(())
    }

    fn push_internal(
        &self,
        trees: &HashMap<Vec<u8>, IndexTree>,
        key: &[u8],
        value: &[u8],
        is_left: bool,
    ) -> Result<()> {
        let tree = trees.get(key).ok_or(Error::KeyNotFound)?;
        let (mut head, mut tail) = self.list_meta(tree, key)?;
        let seq = if is_left { head } else { tail };
        let enc_key = Self::encode_list_key(key, seq);
        let entry = LogEntry::new(enc_key, value.to_vec());
        let pos = self.write_log_entry(&entry, DataType::List)?;
        self.update_index_tree(tree, &entry, &pos, true, DataType::List);

        if is_left {
            head -= 1;
        } else {
            tail += 1;
        }
        self.save_list_meta(tree, key, head, tail)
    }

    fn pop_internal(
        &self,
        trees: &mut HashMap<Vec<u8>, IndexTree>,
        key: &[u8],
        is_left: bool,
    ) -> Result<Option<Vec<u8>>> {
        let Some(tree) = trees.get(key) else {
            return Ok(None);
        };
        let (mut head, mut tail) = self.list_meta(tree, key)?;
        if tail - head - 1 == 0 {
            return Ok(None);
        }

        let seq = if is_left { head + 1 } else { tail - 1 };
        let enc_key = Self::encode_list_key(key, seq);
        let value = self.get_val(tree, &enc_key, DataType::List)?;

        let entry = LogEntry {
            key: enc_key.clone(),
            kind: EntryKind::Delete,
            ..Default::default()
        };
        let pos = self.write_log_entry(&entry, DataType::List)?;
        let old = tree.remove(&enc_key);

        if is_left {
            head += 1;
        } else {
            tail -= 1;
        }
        self.save_list_meta(tree, key, head, tail)?;

        if let Some(old) = old {
            self.emit_discard(old.fid, old.entry_size, DataType::List);
        }
        self.emit_discard(pos.fid, pos.entry_size, DataType::List);

        if tail - head - 1 == 0 {
            // The list emptied: park the sequences back at the pivot and
            // drop the per-key tree.
            if head != INITIAL_LIST_SEQ || tail != INITIAL_LIST_SEQ + 1 {
                self.save_list_meta(tree, key, INITIAL_LIST_SEQ, INITIAL_LIST_SEQ + 1)?;
            }
            trees.remove(key);
        }
        Ok(Some(value))
    }

    /// Converts a logical index into a physical sequence, rejecting indices
    /// outside the current list bounds.
    fn list_sequence(head: u32, tail: u32, index: i64) -> Result<u32> {
        let seq = if index >= 0 {
            head as i64 + index + 1
        } else {
            tail as i64 + index
        };
        if seq <= head as i64 || seq >= tail as i64 {
            return Err(Error::IndexOutOfRange);
        }
        Ok(seq as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Db {
        Db::open(Options::new(dir.path()).log_file_size_threshold(1 << 20)).unwrap()
    }

    #[tokio::test]
    async fn test_push_pop_order() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.rpush(b"l", &[b"v1", b"v2", b"v3"]).unwrap();
        assert_eq!(db.llen(b"l"), 3);
        assert_eq!(
            db.lrange(b"l", 0, -1).unwrap(),
            vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]
        );
        assert_eq!(db.lpop(b"l").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(db.rpop(b"l").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(db.llen(b"l"), 1);
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_lpush_puts_last_first() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.lpush(b"l", &[b"a", b"b", b"c"]).unwrap();
        assert_eq!(
            db.lrange(b"l", 0, -1).unwrap(),
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_push_x_requires_existing() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.lpush_x(b"l", &[b"v"]), Err(Error::KeyNotFound));
        assert_eq!(db.rpush_x(b"l", &[b"v"]), Err(Error::KeyNotFound));
        db.rpush(b"l", &[b"v0"]).unwrap();
        db.lpush_x(b"l", &[b"v1"]).unwrap();
        db.rpush_x(b"l", &[b"v2"]).unwrap();
        assert_eq!(db.llen(b"l"), 3);
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_pop_empty() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.lpop(b"missing").unwrap(), None);
        db.rpush(b"l", &[b"only"]).unwrap();
        assert_eq!(db.rpop(b"l").unwrap(), Some(b"only".to_vec()));
        assert_eq!(db.rpop(b"l").unwrap(), None);
        assert_eq!(db.llen(b"l"), 0);
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_emptied_list_restarts_at_pivot() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.rpush(b"l", &[b"a", b"b"]).unwrap();
        db.lpop(b"l").unwrap();
        db.lpop(b"l").unwrap();
        db.rpush(b"l", &[b"c"]).unwrap();
        assert_eq!(db.lrange(b"l", 0, -1).unwrap(), vec![b"c".to_vec()]);
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_lmove() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.rpush(b"src", &[b"a", b"b", b"c"]).unwrap();

        let moved = db.lmove(b"src", b"dst", true, false).unwrap();
        assert_eq!(moved, Some(b"a".to_vec()));
        let moved = db.lmove(b"src", b"dst", false, true).unwrap();
        assert_eq!(moved, Some(b"c".to_vec()));

        assert_eq!(db.lrange(b"src", 0, -1).unwrap(), vec![b"b".to_vec()]);
        assert_eq!(
            db.lrange(b"dst", 0, -1).unwrap(),
            vec![b"c".to_vec(), b"a".to_vec()]
        );
        assert_eq!(db.lmove(b"missing", b"dst", true, true).unwrap(), None);
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_lindex() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.lindex(b"l", 0).unwrap(), None);

        db.rpush(b"l", &[b"a", b"b", b"c"]).unwrap();
        assert_eq!(db.lindex(b"l", 0).unwrap(), Some(b"a".to_vec()));
        assert_eq!(db.lindex(b"l", 2).unwrap(), Some(b"c".to_vec()));
        assert_eq!(db.lindex(b"l", -1).unwrap(), Some(b"c".to_vec()));
        assert_eq!(db.lindex(b"l", -3).unwrap(), Some(b"a".to_vec()));
        assert_eq!(db.lindex(b"l", 3), Err(Error::IndexOutOfRange));
        assert_eq!(db.lindex(b"l", -4), Err(Error::IndexOutOfRange));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_lset() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.lset(b"l", 0, b"x"), Err(Error::KeyNotFound));

        db.rpush(b"l", &[b"a", b"b", b"c"]).unwrap();
        db.lset(b"l", 1, b"B").unwrap();
        db.lset(b"l", -1, b"C").unwrap();
        assert_eq!(
            db.lrange(b"l", 0, -1).unwrap(),
            vec![b"a".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );
        assert_eq!(db.lset(b"l", 5, b"x"), Err(Error::IndexOutOfRange));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_lrange_bounds() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.lrange(b"l", 0, -1), Err(Error::KeyNotFound));

        db.rpush(b"l", &[b"a", b"b", b"c", b"d"]).unwrap();
        assert_eq!(db.lrange(b"l", 1, 2).unwrap().len(), 2);
        assert_eq!(db.lrange(b"l", -2, -1).unwrap().len(), 2);
        assert_eq!(db.lrange(b"l", 0, 100).unwrap().len(), 4);
        assert_eq!(db.lrange(b"l", -100, 0).unwrap().len(), 1);
        assert_eq!(db.lrange(b"l", 3, 1), Err(Error::IndexOutOfRange));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_lrem() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.lrem(b"l", 0, b"x").unwrap(), 0);

        db.rpush(b"l", &[b"x", b"a", b"x", b"b", b"x"]).unwrap();
        assert_eq!(db.lrem(b"l", 1, b"x").unwrap(), 1);
        assert_eq!(
            db.lrange(b"l", 0, -1).unwrap(),
            vec![b"a".to_vec(), b"x".to_vec(), b"b".to_vec(), b"x".to_vec()]
        );

        assert_eq!(db.lrem(b"l", -1, b"x").unwrap(), 1);
        assert_eq!(
            db.lrange(b"l", 0, -1).unwrap(),
            vec![b"a".to_vec(), b"x".to_vec(), b"b".to_vec()]
        );

        assert_eq!(db.lrem(b"l", 0, b"x").unwrap(), 1);
        assert_eq!(
            db.lrange(b"l", 0, -1).unwrap(),
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        db.close().unwrap();
    }
}
