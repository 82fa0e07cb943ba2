use std::collections::HashMap;

use super::skiplist::SkipList;

/// One sorted set: a member → score dict for O(1) score lookups, and a skip
/// list for (score, member) ordering and ranks.
#[derive(Default)]
struct SortedSetNode {
    dict: HashMap<Vec<u8>, f64>,
    skl: SkipList,
}

/// In-memory sorted-set structure, keyed by outer user key.
#[derive(Default)]
pub struct SortedSet {
    records: HashMap<Vec<u8>, SortedSetNode>,
}

impl SortedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or re-scores a member. A member that already exists under a
    /// different score is deleted and reinserted so the ordering stays
    /// consistent.
    pub fn insert(&mut self, key: &[u8], score: f64, member: &[u8]) {
        let node = self.records.entry(key.to_vec()).or_default();
        if let Some(&old) = node.dict.get(member) {
            if old == score {
                return;
            }
            node.skl.delete(old, member);
        }
        node.dict.insert(member.to_vec(), score);
        node.skl.insert(score, member);
    }

    /// Removes a member, returning its score. Drops the per-key record when
    /// it empties.
    pub fn remove(&mut self, key: &[u8], member: &[u8]) -> Option<f64> {
        let node = self.records.get_mut(key)?;
        let score = node.dict.remove(member)?;
        node.skl.delete(score, member);
        if node.dict.is_empty() {
            self.records.remove(key);
        }
        Some(score)
    }

    pub fn score(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        self.records.get(key)?.dict.get(member).copied()
    }

    pub fn contains(&self, key: &[u8], member: &[u8]) -> bool {
        self.score(key, member).is_some()
    }

    pub fn key_exists(&self, key: &[u8]) -> bool {
        self.records.contains_key(key)
    }

    pub fn card(&self, key: &[u8]) -> usize {
        self.records.get(key).map_or(0, |n| n.dict.len())
    }

    /// 0-based rank of a member, lowest score first.
    pub fn rank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        let node = self.records.get(key)?;
        let score = *node.dict.get(member)?;
        node.skl.rank(score, member).map(|r| r - 1)
    }

    /// 0-based rank from the highest score down.
    pub fn rev_rank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        let card = self.card(key);
        self.rank(key, member).map(|r| card - 1 - r)
    }

    /// Member at 0-based rank.
    pub fn by_rank(&self, key: &[u8], rank: usize) -> Option<(Vec<u8>, f64)> {
        let node = self.records.get(key)?;
        node.skl
            .by_rank(rank + 1)
            .map(|(m, s)| (m.to_vec(), s))
    }

    /// Members between 0-based ranks `start..=stop`, ascending. The caller
    /// resolves negative indices; out-of-bound ranks are clamped.
    pub fn range(&self, key: &[u8], start: usize, stop: usize) -> Vec<(Vec<u8>, f64)> {
        match self.records.get(key) {
            Some(node) if start <= stop => node.skl.slice(start + 1, stop - start + 1),
            _ => Vec::new(),
        }
    }

    /// All members with `min <= score <= max`, ascending.
    pub fn score_range(&self, key: &[u8], min: f64, max: f64) -> Vec<(Vec<u8>, f64)> {
        self.records
            .get(key)
            .map_or_else(Vec::new, |n| n.skl.score_range(min, max))
    }

    /// All members with `min <= score <= max`, descending.
    pub fn rev_score_range(&self, key: &[u8], min: f64, max: f64) -> Vec<(Vec<u8>, f64)> {
        self.records
            .get(key)
            .map_or_else(Vec::new, |n| n.skl.rev_score_range(min, max))
    }

    /// All members of a key in ascending (score, member) order.
    pub fn members(&self, key: &[u8]) -> Vec<(Vec<u8>, f64)> {
        self.records
            .get(key)
            .map_or_else(Vec::new, |n| n.skl.members())
    }

    /// Drops every member of a key.
    pub fn remove_key(&mut self, key: &[u8]) {
        self.records.remove(key);
    }
}
