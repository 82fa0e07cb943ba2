//! Sorted-set commands. Ordering queries are answered from the in-memory
//! structure (dict + skip list); the log carries one record per member
//! under the compound key `(outer, score-as-string)` so the set survives
//! restarts and compaction.

use crate::db::{Db, ZSetState};
use crate::error::{Error, Result};
use crate::storage::log_entry::{EntryKind, LogEntry};
use crate::storage::log_file::DataType;
use crate::util;

impl Db {
    /// Adds `member` with `score`, or re-scores it if already present.
    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> Result<()> {
        let mut state = self.core.zset_index.write()?;
        self.zadd_inner(&mut state, key, score, member)
    }

    /// Score of `member`, or `None`.
    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        self.core
            .zset_index
            .read()
            .ok()?
            .sorted
            .score(key, member)
    }

    /// Number of members; 0 when absent.
    pub fn zcard(&self, key: &[u8]) -> usize {
        self.core
            .zset_index
            .read()
            .map_or(0, |state| state.sorted.card(key))
    }

    /// 0-based rank of `member`, lowest score first. `None` when absent.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        self.core.zset_index.read().ok()?.sorted.rank(key, member)
    }

    /// 0-based rank of `member` from the highest score down.
    pub fn zrev_rank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        self.core
            .zset_index
            .read()
            .ok()?
            .sorted
            .rev_rank(key, member)
    }

    /// Adds `delta` to the member's score (0 when absent) and returns the
    /// new score.
    pub fn zincr_by(&self, key: &[u8], delta: f64, member: &[u8]) -> Result<f64> {
        let mut state = self.core.zset_index.write()?;
        let score = state.sorted.score(key, member).unwrap_or(0.0) + delta;
        self.zadd_inner(&mut state, key, score, member)?;
        Ok(score)
    }

    /// Members between `start` and `stop` inclusive, ascending by
    /// (score, member). Negative indices count back from the end;
    /// out-of-bound indices are clamped.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Vec<Vec<u8>> {
        self.zrange_with_scores(key, start, stop)
            .into_iter()
            .map(|(member, _)| member)
            .collect()
    }

    /// Like [`Db::zrange`] but keeps the scores.
    pub fn zrange_with_scores(&self, key: &[u8], start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        let Ok(state) = self.core.zset_index.read() else {
            return Vec::new();
        };
        match Self::resolve_range(state.sorted.card(key), start, stop) {
            Some((start, stop)) => state.sorted.range(key, start, stop),
            None => Vec::new(),
        }
    }

    /// Members between `start` and `stop` inclusive, descending.
    pub fn zrev_range(&self, key: &[u8], start: i64, stop: i64) -> Vec<Vec<u8>> {
        self.zrev_range_with_scores(key, start, stop)
            .into_iter()
            .map(|(member, _)| member)
            .collect()
    }

    /// Like [`Db::zrev_range`] but keeps the scores.
    pub fn zrev_range_with_scores(&self, key: &[u8], start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        let Ok(state) = self.core.zset_index.read() else {
            return Vec::new();
        };
        let card = state.sorted.card(key);
        match Self::resolve_range(card, start, stop) {
            Some((start, stop)) => {
                // A rank seen from the top is card-1-rank from the bottom.
                let mut out = state
                    .sorted
                    .range(key, card - 1 - stop, card - 1 - start);
                out.reverse();
                out
            }
            None => Vec::new(),
        }
    }

    /// Removes `member`, returning whether it was present.
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let mut state = self.core.zset_index.write()?;
        self.zrem_inner(&mut state, key, member)
    }

    /// Member and score at 0-based `rank`; negative ranks count back from
    /// the end.
    pub fn zget_by_rank(&self, key: &[u8], rank: i64) -> Option<(Vec<u8>, f64)> {
        let state = self.core.zset_index.read().ok()?;
        let card = state.sorted.card(key) as i64;
        let rank = if rank < 0 { card + rank } else { rank };
        if rank < 0 || rank >= card {
            return None;
        }
        state.sorted.by_rank(key, rank as usize)
    }

    /// Members with `min <= score <= max`, ascending. Empty when min > max.
    pub fn zscore_range(&self, key: &[u8], min: f64, max: f64) -> Vec<(Vec<u8>, f64)> {
        self.core
            .zset_index
            .read()
            .map_or_else(|_| Vec::new(), |state| state.sorted.score_range(key, min, max))
    }

    /// Members with `min <= score <= max`, descending.
    pub fn zrev_score_range(&self, key: &[u8], min: f64, max: f64) -> Vec<(Vec<u8>, f64)> {
        self.core
            .zset_index
            .read()
            .map_or_else(|_| Vec::new(), |state| {
                state.sorted.rev_score_range(key, min, max)
            })
    }

    /// Whether the sorted set exists.
    pub fn zkey_exists(&self, key: &[u8]) -> bool {
        self.core
            .zset_index
            .read()
            .map_or(false, |state| state.sorted.key_exists(key))
    }

    /// Removes every member of the sorted set.
    pub fn zclear(&self, key: &[u8]) -> Result<()> {
        let mut state = self.core.zset_index.write()?;
        for (member, _) in state.sorted.members(key) {
            self.zrem_inner(&mut state, key, &member)?;
        }
        state.sorted.remove_key(key);
        state.trees.remove(key);
        Ok(())
    }

    fn zadd_inner(
        &self,
        state: &mut ZSetState,
        key: &[u8],
        score: f64,
        member: &[u8],
    ) -> Result<()> {
        if state.sorted.score(key, member) == Some(score) {
            return Ok(());
        }
        let score_str = util::f64_to_str(score);
        let entry = LogEntry::new(Self::encode_key(key, score_str.as_bytes()), member.to_vec());
        let pos = self.write_log_entry(&entry, DataType::ZSet)?;

        let sum = util::fingerprint128(member).to_vec();
        let mem_entry = LogEntry::new(sum, member.to_vec());
        let tree = state.trees.entry(key.to_vec()).or_default();
        self.update_index_tree(tree, &mem_entry, &pos, true, DataType::ZSet);
        state.sorted.insert(key, score, member);
        Ok(())
    }

    fn zrem_inner(&self, state: &mut ZSetState, key: &[u8], member: &[u8]) -> Result<bool> {
        let Some(score) = state.sorted.score(key, member) else {
            return Ok(false);
        };
        let score_str = util::f64_to_str(score);
        let entry = LogEntry {
            key: Self::encode_key(key, score_str.as_bytes()),
            value: member.to_vec(),
            expired_at: 0,
            kind: EntryKind::Delete,
        };
        let pos = self.write_log_entry(&entry, DataType::ZSet)?;
        self.emit_discard(pos.fid, pos.entry_size, DataType::ZSet);

        let sum = util::fingerprint128(member);
        if let Some(tree) = state.trees.get(key) {
            if let Some(old) = tree.remove(&sum) {
                self.emit_discard(old.fid, old.entry_size, DataType::ZSet);
            }
            if tree.is_empty() {
                state.trees.remove(key);
            }
        }
        state.sorted.remove(key, member);
        Ok(true)
    }

    /// Resolves a possibly negative inclusive index pair against `card`,
    /// clamping to the set bounds. `None` when the window is empty.
    fn resolve_range(card: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
        if card == 0 {
            return None;
        }
        let card = card as i64;
        let resolve = |i: i64| if i < 0 { card + i } else { i };
        let start = resolve(start).max(0);
        let stop = resolve(stop).min(card - 1);
        if start > stop {
            return None;
        }
        Some((start as usize, stop as usize))
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

    fn sample(db: &Db) {
        db.zadd(b"z", 99.0, b"K").unwrap();
        db.zadd(b"z", 66.0, b"H").unwrap();
        db.zadd(b"z", 77.0, b"I").unwrap();
    }

    #[tokio::test]
    async fn test_zadd_zscore_zrank() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        sample(&db);

        assert_eq!(db.zcard(b"z"), 3);
        assert_eq!(db.zscore(b"z", b"K"), Some(99.0));
        assert_eq!(db.zscore(b"z", b"missing"), None);
        assert_eq!(db.zrank(b"z", b"H"), Some(0));
        assert_eq!(db.zrank(b"z", b"I"), Some(1));
        assert_eq!(db.zrank(b"z", b"K"), Some(2));
        assert_eq!(db.zrev_rank(b"z", b"K"), Some(0));
        assert_eq!(db.zrank(b"z", b"missing"), None);
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_zadd_rescore() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        sample(&db);

        db.zadd(b"z", 1.0, b"K").unwrap();
        assert_eq!(db.zcard(b"z"), 3);
        assert_eq!(db.zrank(b"z", b"K"), Some(0));
        assert_eq!(db.zscore(b"z", b"K"), Some(1.0));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_zincr_by() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        assert_eq!(db.zincr_by(b"z", 2.5, b"m").unwrap(), 2.5);
        assert_eq!(db.zincr_by(b"z", -1.0, b"m").unwrap(), 1.5);
        assert_eq!(db.zscore(b"z", b"m"), Some(1.5));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_zrange_families() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        sample(&db);

        assert_eq!(
            db.zrange(b"z", 0, -1),
            vec![b"H".to_vec(), b"I".to_vec(), b"K".to_vec()]
        );
        assert_eq!(db.zrange(b"z", 1, 1), vec![b"I".to_vec()]);
        assert_eq!(db.zrange(b"z", -2, -1), vec![b"I".to_vec(), b"K".to_vec()]);
        assert_eq!(db.zrange(b"z", 0, 100).len(), 3);
        assert!(db.zrange(b"z", 2, 1).is_empty());
        assert!(db.zrange(b"missing", 0, -1).is_empty());

        assert_eq!(
            db.zrev_range(b"z", 0, -1),
            vec![b"K".to_vec(), b"I".to_vec(), b"H".to_vec()]
        );
        assert_eq!(db.zrev_range(b"z", 0, 0), vec![b"K".to_vec()]);

        let with_scores = db.zrange_with_scores(b"z", 0, 0);
        assert_eq!(with_scores, vec![(b"H".to_vec(), 66.0)]);
        let rev_scores = db.zrev_range_with_scores(b"z", 0, 1);
        assert_eq!(
            rev_scores,
            vec![(b"K".to_vec(), 99.0), (b"I".to_vec(), 77.0)]
        );
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_zscore_range() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        sample(&db);

        assert_eq!(
            db.zscore_range(b"z", 70.0, 100.0),
            vec![(b"I".to_vec(), 77.0), (b"K".to_vec(), 99.0)]
        );
        assert_eq!(
            db.zrev_score_range(b"z", 0.0, 80.0),
            vec![(b"I".to_vec(), 77.0), (b"H".to_vec(), 66.0)]
        );
        assert!(db.zscore_range(b"z", 100.0, 70.0).is_empty());
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_zrem_and_zclear() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        sample(&db);

        assert!(db.zrem(b"z", b"I").unwrap());
        assert!(!db.zrem(b"z", b"I").unwrap());
        assert_eq!(db.zcard(b"z"), 2);
        assert_eq!(db.zrank(b"z", b"K"), Some(1));

        db.zclear(b"z").unwrap();
        assert_eq!(db.zcard(b"z"), 0);
        assert!(!db.zkey_exists(b"z"));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_zget_by_rank() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        sample(&db);

        assert_eq!(db.zget_by_rank(b"z", 0), Some((b"H".to_vec(), 66.0)));
        assert_eq!(db.zget_by_rank(b"z", -1), Some((b"K".to_vec(), 99.0)));
        assert_eq!(db.zget_by_rank(b"z", 3), None);
        assert_eq!(db.zget_by_rank(b"missing", 0), None);
        db.close().unwrap();
    }
}
