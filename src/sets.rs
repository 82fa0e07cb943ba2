//! Set commands. A member's record is stored under the outer key with the
//! member as its value; the in-memory tree for each set is keyed by a
//! 128-bit fingerprint of the member bytes, which also drives cross-set
//! deduplication in the diff/inter/union family.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::Db;
use crate::error::{Error, Result};
use crate::index::IndexTree;
use crate::storage::log_entry::{EntryKind, LogEntry};
use crate::storage::log_file::DataType;
use crate::util;

impl Db {
    /// Adds members to the set at `key`, creating it when absent. Members
    /// already present and empty members are ignored.
    pub fn sadd(&self, key: &[u8], members: &[&[u8]]) -> Result<()> {
        let mut trees = self.core.set_index.write()?;
        let tree = trees.entry(key.to_vec()).or_default();
        for member in members {
            if member.is_empty() {
                continue;
            }
            self.sadd_inner(tree, key, member)?;
        }
        Ok(())
    }

    /// Removes and returns up to `count` random members.
    pub fn spop(&self, key: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
        let mut trees = self.core.set_index.write()?;
        let Some(tree) = trees.get(key) else {
            return Ok(Vec::new());
        };
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut rng = rand::thread_rng();
        let sums: Vec<Vec<u8>> = tree
            .keys()
            .choose_multiple(&mut rng, count)
            .cloned()
            .collect();

        let mut popped = Vec::with_capacity(sums.len());
        for sum in sums {
            let member = self.get_val(tree, &sum, DataType::Set)?;
            self.srem_inner(tree, key, &member)?;
            popped.push(member);
        }
        if tree.is_empty() {
            trees.remove(key);
        }
        Ok(popped)
    }

    /// Removes members, returning how many were present.
    pub fn srem(&self, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        let mut trees = self.core.set_index.write()?;
        let Some(tree) = trees.get(key) else {
            return Ok(0);
        };
        let mut removed = 0;
        for member in members {
            if self.srem_inner(tree, key, member)? {
                removed += 1;
            }
        }
        if tree.is_empty() {
            trees.remove(key);
        }
        Ok(removed)
    }

    /// Whether `member` is in the set.
    pub fn sis_member(&self, key: &[u8], member: &[u8]) -> bool {
        let Ok(trees) = self.core.set_index.read() else {
            return false;
        };
        let Some(tree) = trees.get(key) else {
            return false;
        };
        let sum = util::fingerprint128(member);
        self.get_val(tree, &sum, DataType::Set).is_ok()
    }

    /// Random members without removal. `count > 0` returns up to `count`
    /// distinct members; `count < 0` returns `|count|` members with
    /// repetition; `count = 0` returns nothing.
    pub fn srand_member(&self, key: &[u8], count: i64) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let members = self.smembers(key)?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::thread_rng();
        if count > 0 {
            return Ok(members
                .choose_multiple(&mut rng, count as usize)
                .cloned()
                .collect());
        }
        Ok((0..-count)
            .map(|_| members[rng.gen_range(0..members.len())].clone())
            .collect())
    }

    /// All members of the set.
    pub fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.set_index.read()?;
        self.set_members(&trees, key)
    }

    /// Cardinality of the set; 0 when absent.
    pub fn scard(&self, key: &[u8]) -> usize {
        self.core
            .set_index
            .read()
            .map_or(0, |trees| trees.get(key).map_or(0, |tree| tree.len()))
    }

    /// Members of the first set that are in none of the others.
    pub fn sdiff(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.set_index.read()?;
        self.sdiff_from(&trees, keys)
    }

    /// Members present in every given set.
    pub fn sinter(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.set_index.read()?;
        self.sinter_from(&trees, keys)
    }

    /// Members present in any given set, deduplicated.
    pub fn sunion(&self, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let trees = self.core.set_index.read()?;
        self.sunion_from(&trees, keys)
    }

    /// Stores the diff of `keys[1..]` into `keys[0]`, replacing its current
    /// contents. Returns the stored cardinality.
    pub fn sdiff_store(&self, keys: &[&[u8]]) -> Result<usize> {
        self.store_result(keys, |db, trees, source| db.sdiff_from(trees, source))
    }

    /// Stores the intersection of `keys[1..]` into `keys[0]`.
    pub fn sinter_store(&self, keys: &[&[u8]]) -> Result<usize> {
        self.store_result(keys, |db, trees, source| db.sinter_from(trees, source))
    }

    /// Stores the union of `keys[1..]` into `keys[0]`.
    pub fn sunion_store(&self, keys: &[&[u8]]) -> Result<usize> {
        self.store_result(keys, |db, trees, source| db.sunion_from(trees, source))
    }

    fn store_result<F>(&self, keys: &[&[u8]], compute: F) -> Result<usize>
    where
        F: Fn(&Db, &HashMap<Vec<u8>, IndexTree>, &[&[u8]]) -> Result<Vec<Vec<u8>>>,
    {
        if keys.len() < 2 {
            return Err(Error::InvalidNumberOfArgs);
        }
        let (dest, source) = (keys[0], &keys[1..]);
        let mut trees = self.core.set_index.write()?;
        let result = compute(self, &trees, source)?;

        // Replace the destination wholesale.
        if let Some(tree) = trees.get(dest) {
            for sum in tree.keys() {
                let member = self.get_val(tree, &sum, DataType::Set)?;
                self.srem_inner(tree, dest, &member)?;
            }
        }
        trees.remove(dest);

        if !result.is_empty() {
            let tree = trees.entry(dest.to_vec()).or_default();
            for member in &result {
                self.sadd_inner(tree, dest, member)?;
            }
        }
        Ok(result.len())
    }

    fn set_members(&self, trees: &HashMap<Vec<u8>, IndexTree>, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let Some(tree) = trees.get(key) else {
            return Ok(Vec::new());
        };
        let mut members = Vec::with_capacity(tree.len());
        for sum in tree.keys() {
            match self.get_val(tree, &sum, DataType::Set) {
                Ok(member) => members.push(member),
                Err(Error::KeyNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(members)
    }

    fn sdiff_from(
        &self,
        trees: &HashMap<Vec<u8>, IndexTree>,
        keys: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(Error::InvalidNumberOfArgs);
        }
        let mut others: HashSet<Vec<u8>> = HashSet::new();
        for key in &keys[1..] {
            if let Some(tree) = trees.get(*key) {
                others.extend(tree.keys());
            }
        }
        let Some(first) = trees.get(keys[0]) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for sum in first.keys() {
            if !others.contains(&sum) {
                out.push(self.get_val(first, &sum, DataType::Set)?);
            }
        }
        Ok(out)
    }

    fn sinter_from(
        &self,
        trees: &HashMap<Vec<u8>, IndexTree>,
        keys: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(Error::InvalidNumberOfArgs);
        }
        let Some(first) = trees.get(keys[0]) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        'member: for sum in first.keys() {
            for key in &keys[1..] {
                match trees.get(*key) {
                    Some(tree) if tree.get(&sum).is_some() => {}
                    _ => continue 'member,
                }
            }
            out.push(self.get_val(first, &sum, DataType::Set)?);
        }
        Ok(out)
    }

    fn sunion_from(
        &self,
        trees: &HashMap<Vec<u8>, IndexTree>,
        keys: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>> {
        if keys.is_empty() {
            return Err(Error::InvalidNumberOfArgs);
        }
        let mut seen: HashSet<Vec<u8>> = HashSet::new();
        let mut out = Vec::new();
        for key in keys {
            let Some(tree) = trees.get(*key) else {
                continue;
            };
            for sum in tree.keys() {
                if seen.insert(sum.clone()) {
                    out.push(self.get_val(tree, &sum, DataType::Set)?);
                }
            }
        }
        Ok(out)
    }

    fn sadd_inner(&self, tree: &IndexTree, key: &[u8], member: &[u8]) -> Result<()> {
        let sum = util::fingerprint128(member).to_vec();
        let entry = LogEntry::new(key.to_vec(), member.to_vec());
        let pos = self.write_log_entry(&entry, DataType::Set)?;
        let mem_entry = LogEntry::new(sum, member.to_vec());
        self.update_index_tree(tree, &mem_entry, &pos, true, DataType::Set);
        Ok(())
    }

    /// Writes a member tombstone and drops its index node. Returns whether
    /// the member was present.
    fn srem_inner(&self, tree: &IndexTree, key: &[u8], member: &[u8]) -> Result<bool> {
        let sum = util::fingerprint128(member).to_vec();
        let entry = LogEntry {
            key: key.to_vec(),
            value: member.to_vec(),
            expired_at: 0,
            kind: EntryKind::Delete,
        };
        let pos = self.write_log_entry(&entry, DataType::Set)?;
        self.emit_discard(pos.fid, pos.entry_size, DataType::Set);
        match tree.remove(&sum) {
            Some(old) => {
                self.emit_discard(old.fid, old.entry_size, DataType::Set);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
