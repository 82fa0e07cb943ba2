//! Log file compaction. A periodic task scans each type's discard table for
//! segments whose dead-byte ratio crossed the configured threshold, copies
//! their surviving records through the normal write path, then deletes the
//! segment and frees its accounting slot.

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::db::{is_expired, unix_now, Core, Db};
use crate::error::{Error, Result};
use crate::scheduler::{BackgroundTask, Context};
use crate::storage::log_entry::{EntryKind, LogEntry};
use crate::storage::log_file::DataType;
use crate::util;

/// Periodic wrapper that runs a full compaction pass on the scheduler.
pub(crate) struct CompactionTask {
    db: Db,
}

impl CompactionTask {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for CompactionTask {
    fn name(&self) -> &'static str {
        "log-file-gc"
    }

    fn interval(&self) -> Duration {
        self.db.core.opts.log_file_gc_interval
    }

    async fn execute(&self, ctx: Context) -> Result<()> {
        let db = self.db.clone();
        let mut shutdown = ctx.shutdown;
        let outcome = tokio::task::spawn_blocking(move || db.run_gc(Some(&mut shutdown)))
            .await
            .map_err(|e| Error::Io(e.to_string()))?;
        match outcome {
            // Another pass is still running; this tick just skips.
            Err(Error::LogFileGcRunning) => Ok(()),
            other => other,
        }
    }
}

/// Resets the single-flight gc flag when a pass ends, however it ends.
struct GcGuard<'a> {
    core: &'a Core,
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        self.core.gc_state.store(0, Ordering::SeqCst);
    }
}

impl Db {
    /// Runs one compaction pass over every data type. Fails with
    /// `LogFileGcRunning` when a pass is already in flight.
    pub fn compact(&self) -> Result<()> {
        self.run_gc(None)
    }

    pub(crate) fn run_gc(
        &self,
        mut shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> Result<()> {
        if self
            .core
            .gc_state
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::LogFileGcRunning);
        }
        let _guard = GcGuard {
            core: self.core.as_ref(),
        };

        let ratio = self.core.opts.log_file_gc_ratio;
        for data_type in DataType::ALL {
            if self.stop_requested(&mut shutdown) {
                break;
            }
            self.run_gc_type(data_type, ratio, &mut shutdown)?;
        }
        Ok(())
    }

    fn stop_requested(&self, shutdown: &mut Option<&mut broadcast::Receiver<()>>) -> bool {
        if self.is_closed() {
            return true;
        }
        match shutdown {
            Some(rx) => !matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)),
            None => false,
        }
    }

    fn run_gc_type(
        &self,
        data_type: DataType,
        ratio: f64,
        shutdown: &mut Option<&mut broadcast::Receiver<()>>,
    ) -> Result<()> {
        let Some(active) = self.active_file(data_type) else {
            return Ok(());
        };
        self.core.discards[&data_type].sync()?;
        let ccl = self.core.discards[&data_type].get_ccl(active.fid(), ratio)?;

        for fid in ccl {
            if self.stop_requested(shutdown) {
                break;
            }
            let Some(archived) = self.archived_file(data_type, fid) else {
                continue;
            };
            tracing::info!(data_type = data_type.name(), fid, "log file gc starts");

            let now = unix_now();
            let mut offset = 0u64;
            loop {
                let (entry, size) = match archived.read_log_entry(offset) {
                    Ok(read) => read,
                    Err(Error::EndOfEntry) | Err(Error::Eof) => break,
                    Err(e) => return Err(e),
                };
                let record_offset = offset;
                offset += size as u64;

                if entry.kind == EntryKind::Delete || is_expired(entry.expired_at, now) {
                    continue;
                }
                match data_type {
                    DataType::Str => self.maybe_rewrite_str(fid, record_offset, &entry)?,
                    DataType::List => self.maybe_rewrite_list(fid, record_offset, &entry)?,
                    DataType::Hash => self.maybe_rewrite_hash(fid, record_offset, &entry)?,
                    DataType::Set => self.maybe_rewrite_set(fid, record_offset, &entry)?,
                    DataType::ZSet => self.maybe_rewrite_zset(fid, record_offset, &entry)?,
                }
            }

            if let Some(files) = self.core.archived_files.write()?.get_mut(&data_type) {
                files.remove(&fid);
            }
            if let Err(e) = archived.delete() {
                tracing::warn!(fid, error = %e, "failed to delete archived log file");
            }
            self.core.discards[&data_type].clear(fid);
            tracing::info!(data_type = data_type.name(), fid, "log file gc ends");
        }
        Ok(())
    }

    /// Re-appends a string record still referenced from its original
    /// location. Records the index displaced by an unrelated newer write in
    /// the meantime are skipped; their bytes die with the segment.
    fn maybe_rewrite_str(&self, fid: u32, offset: u64, entry: &LogEntry) -> Result<()> {
        let tree = self.core.str_index.write()?;
        let Some(node) = tree.get(&entry.key) else {
            return Ok(());
        };
        if node.fid == fid && node.offset == offset {
            let pos = self.write_log_entry(entry, DataType::Str)?;
            self.update_index_tree(&tree, entry, &pos, false, DataType::Str);
        }
        Ok(())
    }

    fn maybe_rewrite_list(&self, fid: u32, offset: u64, entry: &LogEntry) -> Result<()> {
        let trees = self.core.list_index.write()?;
        let list_key = if entry.kind == EntryKind::ListMeta {
            entry.key.clone()
        } else {
            Self::decode_list_key(&entry.key).0
        };
        let Some(tree) = trees.get(&list_key) else {
            return Ok(());
        };
        let Some(node) = tree.get(&entry.key) else {
            return Ok(());
        };
        if node.fid == fid && node.offset == offset {
            let pos = self.write_log_entry(entry, DataType::List)?;
            self.update_index_tree(tree, entry, &pos, false, DataType::List);
        }
        Ok(())
    }

    fn maybe_rewrite_hash(&self, fid: u32, offset: u64, entry: &LogEntry) -> Result<()> {
        let (key, field) = Self::decode_key(&entry.key);
        let trees = self.core.hash_index.write()?;
        let Some(tree) = trees.get(&key) else {
            return Ok(());
        };
        let Some(node) = tree.get(&field) else {
            return Ok(());
        };
        if node.fid == fid && node.offset == offset {
            let pos = self.write_log_entry(entry, DataType::Hash)?;
            let mem_entry = LogEntry {
                key: field,
                value: entry.value.clone(),
                expired_at: entry.expired_at,
                kind: entry.kind,
            };
            self.update_index_tree(tree, &mem_entry, &pos, false, DataType::Hash);
        }
        Ok(())
    }

    fn maybe_rewrite_set(&self, fid: u32, offset: u64, entry: &LogEntry) -> Result<()> {
        let sum = util::fingerprint128(&entry.value).to_vec();
        let trees = self.core.set_index.write()?;
        let Some(tree) = trees.get(&entry.key) else {
            return Ok(());
        };
        let Some(node) = tree.get(&sum) else {
            return Ok(());
        };
        if node.fid == fid && node.offset == offset {
            let pos = self.write_log_entry(entry, DataType::Set)?;
            let mem_entry = LogEntry {
                key: sum,
                value: entry.value.clone(),
                expired_at: entry.expired_at,
                kind: entry.kind,
            };
            self.update_index_tree(tree, &mem_entry, &pos, false, DataType::Set);
        }
        Ok(())
    }

    fn maybe_rewrite_zset(&self, fid: u32, offset: u64, entry: &LogEntry) -> Result<()> {
        let (key, _) = Self::decode_key(&entry.key);
        let sum = util::fingerprint128(&entry.value).to_vec();
        let state = self.core.zset_index.write()?;
        let Some(tree) = state.trees.get(&key) else {
            return Ok(());
        };
        let Some(node) = tree.get(&sum) else {
            return Ok(());
        };
        if node.fid == fid && node.offset == offset {
            let pos = self.write_log_entry(entry, DataType::ZSet)?;
            let mem_entry = LogEntry {
                key: sum,
                value: entry.value.clone(),
                expired_at: entry.expired_at,
                kind: entry.kind,
            };
            self.update_index_tree(tree, &mem_entry, &pos, false, DataType::ZSet);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::TempDir;

    fn segment_count(dir: &TempDir, name: &str) -> usize {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(name))
            .count()
    }

    fn open_small(dir: &TempDir) -> Db {
        Db::open(
            Options::new(dir.path())
                .log_file_size_threshold(2048)
                .log_file_gc_ratio(0.5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_compaction_reclaims_overwritten_strings() {
        let dir = TempDir::new().unwrap();
        let db = open_small(&dir);

        // Overwrite a small key set until plenty of segments are mostly
        // dead bytes.
        for round in 0..40 {
            for k in 0..10 {
                db.set(
                    format!("key-{k}").as_bytes(),
                    format!("value-{round:04}-{k:04}").as_bytes(),
                )
                .unwrap();
            }
        }
        let before = segment_count(&dir, "log.strs.");
        assert!(before > 3, "workload should span several segments");

        // Let the discard consumer drain the accounting channel.
        tokio::time::sleep(Duration::from_millis(200)).await;
        db.compact().unwrap();

        let after = segment_count(&dir, "log.strs.");
        assert!(after < before, "compaction should delete dead segments");

        for k in 0..10 {
            assert_eq!(
                db.get(format!("key-{k}").as_bytes()).unwrap(),
                format!("value-0039-{k:04}").as_bytes()
            );
        }
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_compaction_preserves_all_types() {
        let dir = TempDir::new().unwrap();
        let db = open_small(&dir);

        for round in 0..30 {
            db.rpush(b"list", &[format!("lv-{round}").as_bytes()]).unwrap();
            if round % 2 == 1 {
                db.lpop(b"list").unwrap();
            }
            db.hset(b"hash", &[b"field", format!("hv-{round}").as_bytes()])
                .unwrap();
            db.sadd(b"set", &[format!("sm-{round}").as_bytes()]).unwrap();
            if round % 2 == 1 {
                db.srem(b"set", &[format!("sm-{round}").as_bytes()]).unwrap();
            }
            db.zadd(b"zset", round as f64, b"member").unwrap();
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        db.compact().unwrap();

        assert_eq!(db.llen(b"list"), 15);
        assert_eq!(db.hget(b"hash", b"field").unwrap(), Some(b"hv-29".to_vec()));
        assert_eq!(db.scard(b"set"), 15);
        assert_eq!(db.zscore(b"zset", b"member"), Some(29.0));
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_compacted_data_survives_restart() {
        let dir = TempDir::new().unwrap();
        {
            let db = open_small(&dir);
            for round in 0..40 {
                for k in 0..10 {
                    db.set(
                        format!("key-{k}").as_bytes(),
                        format!("v-{round:05}-{k}").as_bytes(),
                    )
                    .unwrap();
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
            db.compact().unwrap();
            db.close().unwrap();
        }

        let db = open_small(&dir);
        for k in 0..10 {
            assert_eq!(
                db.get(format!("key-{k}").as_bytes()).unwrap(),
                format!("v-00039-{k}").as_bytes()
            );
        }
        db.close().unwrap();
    }

    #[tokio::test]
    async fn test_gc_single_flight() {
        let dir = TempDir::new().unwrap();
        let db = open_small(&dir);
        db.core.gc_state.store(1, Ordering::SeqCst);
        assert_eq!(db.compact(), Err(Error::LogFileGcRunning));
        db.core.gc_state.store(0, Ordering::SeqCst);
        db.compact().unwrap();
        db.close().unwrap();
    }
}
