use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::discard::{Discard, DISCARD_FILE_NAME};
use crate::error::{Error, Result};
use crate::flock::FileLock;
use crate::gc::CompactionTask;
use crate::index::{IndexNode, IndexTree, SortedSet};
use crate::options::{IndexMode, Options};
use crate::scheduler::Scheduler;
use crate::storage::log_entry::{self, EntryKind, LogEntry};
use crate::storage::log_file::{DataType, LogFile, FILE_PREFIX};
use crate::util;

const LOCK_FILE: &str = "FLOCK";
const DISCARD_DIR: &str = "DISCARD";

/// Midpoint of the u32 sequence space; list head and tail sequences grow
/// away from it in both directions.
pub(crate) const INITIAL_LIST_SEQ: u32 = u32::MAX / 2;

/// Location of a freshly written record.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValuePos {
    pub fid: u32,
    pub offset: u64,
    pub entry_size: usize,
}

/// Sorted-set state: the ordering structure plus one fingerprint-keyed
/// index tree per outer key.
#[derive(Default)]
pub(crate) struct ZSetState {
    pub sorted: SortedSet,
    pub trees: HashMap<Vec<u8>, IndexTree>,
}

/// All shared engine state. Commands and background tasks reach it through
/// the cheaply cloneable [`Db`] handle.
pub(crate) struct Core {
    pub opts: Options,
    pub active_files: RwLock<HashMap<DataType, Arc<LogFile>>>,
    pub archived_files: RwLock<HashMap<DataType, BTreeMap<u32, Arc<LogFile>>>>,
    pub discards: HashMap<DataType, Discard>,
    pub str_index: RwLock<IndexTree>,
    pub list_index: RwLock<HashMap<Vec<u8>, IndexTree>>,
    pub hash_index: RwLock<HashMap<Vec<u8>, IndexTree>>,
    pub set_index: RwLock<HashMap<Vec<u8>, IndexTree>>,
    pub zset_index: RwLock<ZSetState>,
    pub flock: Mutex<Option<FileLock>>,
    pub closed: AtomicBool,
    pub gc_state: AtomicI32,
    pub scheduler: Scheduler,
}

/// An embeddable log-structured key-value store with string, list, hash,
/// set and sorted-set commands.
///
/// All data lives in per-type append-only segment files; live keys are
/// indexed in memory and space is reclaimed by a background compactor.
/// The handle is cheap to clone and safe to share across threads.
///
/// Discard accounting and the periodic compactor run as tokio tasks, so
/// [`Db::open`] expects an ambient tokio runtime; without one the engine
/// still works but skips background maintenance.
#[derive(Clone)]
pub struct Db {
    pub(crate) core: Arc<Core>,
}

impl Db {
    /// Opens (or creates) a database directory, replays its segments to
    /// rebuild the in-memory indexes, and starts background maintenance.
    pub fn open(opts: Options) -> Result<Db> {
        fs::create_dir_all(&opts.db_path)?;

        // One process per directory.
        let flock = FileLock::lock(opts.db_path.join(LOCK_FILE))?;

        let discard_dir = opts.db_path.join(DISCARD_DIR);
        fs::create_dir_all(&discard_dir)?;
        let mut discards = HashMap::new();
        let mut receivers = Vec::new();
        for dt in DataType::ALL {
            let name = format!("{}{}.{}", FILE_PREFIX, dt.name(), DISCARD_FILE_NAME);
            let (discard, rx) = Discard::new(&discard_dir, &name, opts.discard_buffer_size)?;
            discards.insert(dt, discard);
            receivers.push((dt, rx));
        }

        let db = Db {
            core: Arc::new(Core {
                opts,
                active_files: RwLock::new(HashMap::new()),
                archived_files: RwLock::new(HashMap::new()),
                discards,
                str_index: RwLock::new(IndexTree::new()),
                list_index: RwLock::new(HashMap::new()),
                hash_index: RwLock::new(HashMap::new()),
                set_index: RwLock::new(HashMap::new()),
                zset_index: RwLock::new(ZSetState::default()),
                flock: Mutex::new(Some(flock)),
                closed: AtomicBool::new(false),
                gc_state: AtomicI32::new(0),
                scheduler: Scheduler::new(),
            }),
        };

        db.load_log_files()?;
        db.load_indexes()?;

        if tokio::runtime::Handle::try_current().is_ok() {
            for (dt, mut rx) in receivers {
                let core = db.core.clone();
                let shutdown = core.scheduler.subscribe();
                let handle = tokio::spawn(async move {
                    let Some(mut shutdown) = shutdown else { return };
                    loop {
                        tokio::select! {
                            item = rx.recv() => match item {
                                Some((fid, size)) => core.discards[&dt].incr_discard(fid, size),
                                None => break,
                            },
                            _ = shutdown.recv() => break,
                        }
                    }
                });
                db.core.scheduler.track(handle);
            }

            if db.core.opts.log_file_gc_interval > Duration::ZERO {
                db.core
                    .scheduler
                    .register(Arc::new(CompactionTask::new(db.clone())));
            }
        } else {
            tracing::warn!("no tokio runtime; discard accounting and periodic gc are disabled");
        }

        tracing::info!(path = %db.core.opts.db_path.display(), "database opened");
        Ok(db)
    }

    /// Flushes and closes every file, stops background tasks and releases
    /// the directory lock. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.core.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.core.scheduler.shutdown();

        for file in self.core.active_files.read()?.values() {
            if let Err(e) = file.sync().and_then(|_| file.close()) {
                tracing::warn!(error = %e, "failed to close active log file");
            }
        }
        for files in self.core.archived_files.read()?.values() {
            for file in files.values() {
                if let Err(e) = file.sync().and_then(|_| file.close()) {
                    tracing::warn!(error = %e, "failed to close archived log file");
                }
            }
        }
        for discard in self.core.discards.values() {
            if let Err(e) = discard.sync().and_then(|_| discard.close()) {
                tracing::warn!(error = %e, "failed to close discard file");
            }
        }

        if let Some(lock) = self.core.flock.lock().unwrap().take() {
            if let Err(e) = lock.unlock() {
                tracing::error!(error = %e, "failed to release file lock");
            }
        }
        tracing::info!("database closed");
        Ok(())
    }

    /// Fsyncs every active segment and discard table.
    pub fn sync(&self) -> Result<()> {
        for file in self.core.active_files.read()?.values() {
            file.sync()?;
        }
        for discard in self.core.discards.values() {
            discard.sync()?;
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn key_value_mem_mode(&self) -> bool {
        self.core.opts.index_mode == IndexMode::KeyValueMem
    }

    pub(crate) fn active_file(&self, data_type: DataType) -> Option<Arc<LogFile>> {
        self.core
            .active_files
            .read()
            .unwrap()
            .get(&data_type)
            .cloned()
    }

    pub(crate) fn archived_file(&self, data_type: DataType, fid: u32) -> Option<Arc<LogFile>> {
        self.core
            .archived_files
            .read()
            .unwrap()
            .get(&data_type)
            .and_then(|files| files.get(&fid))
            .cloned()
    }

    /// Appends an entry to the active segment for `data_type`, rotating the
    /// segment first when the entry would push it past the size threshold.
    /// The caller holds the per-type write lock; rotation briefly takes the
    /// engine-wide file locks.
    pub(crate) fn write_log_entry(&self, entry: &LogEntry, data_type: DataType) -> Result<ValuePos> {
        self.init_log_file(data_type)?;
        let mut active = self.active_file(data_type).ok_or(Error::LogFileNotFound)?;

        let (buf, entry_size) = log_entry::encode(entry);
        let threshold = self.core.opts.log_file_size_threshold;

        if active.write_at() + entry_size as u64 > threshold {
            active.sync()?;

            let mut actives = self.core.active_files.write()?;
            let mut archived = self.core.archived_files.write()?;
            let current = actives
                .get(&data_type)
                .cloned()
                .ok_or(Error::LogFileNotFound)?;
            // Rotation is idempotent under the engine lock: only the writer
            // that still sees the full segment opens its successor.
            if current.fid() == active.fid() {
                archived
                    .entry(data_type)
                    .or_default()
                    .insert(current.fid(), current.clone());
                let next = Arc::new(LogFile::open(
                    &self.core.opts.db_path,
                    current.fid() + 1,
                    threshold,
                    data_type,
                    self.core.opts.io_type,
                )?);
                self.core.discards[&data_type].set_total(next.fid(), threshold as u32);
                actives.insert(data_type, next.clone());
                tracing::info!(
                    data_type = data_type.name(),
                    fid = next.fid(),
                    "rotated active log file"
                );
                active = next;
            } else {
                active = current;
            }
        }

        let offset = active.write(&buf)?;
        if self.core.opts.sync {
            active.sync()?;
        }
        Ok(ValuePos {
            fid: active.fid(),
            offset,
            entry_size,
        })
    }

    fn init_log_file(&self, data_type: DataType) -> Result<()> {
        if self
            .core
            .active_files
            .read()?
            .contains_key(&data_type)
        {
            return Ok(());
        }
        let mut actives = self.core.active_files.write()?;
        if actives.contains_key(&data_type) {
            return Ok(());
        }
        let threshold = self.core.opts.log_file_size_threshold;
        let file = Arc::new(LogFile::open(
            &self.core.opts.db_path,
            0,
            threshold,
            data_type,
            self.core.opts.io_type,
        )?);
        self.core.discards[&data_type].set_total(file.fid(), threshold as u32);
        actives.insert(data_type, file);
        Ok(())
    }

    /// Resolves a key through an index tree: expiry check, then the inlined
    /// value in key-value-memory mode, then a positional segment read. CRC
    /// failures and tombstones surface as `KeyNotFound` so callers see
    /// uniform miss semantics.
    pub(crate) fn get_val(&self, tree: &IndexTree, key: &[u8], data_type: DataType) -> Result<Vec<u8>> {
        let node = tree.get(key).ok_or(Error::KeyNotFound)?;
        self.get_val_by_node(&node, data_type)
    }

    pub(crate) fn get_val_by_node(&self, node: &IndexNode, data_type: DataType) -> Result<Vec<u8>> {
        let now = unix_now();
        if is_expired(node.expired_at, now) {
            return Err(Error::KeyNotFound);
        }
        if self.key_value_mem_mode() {
            if let Some(value) = &node.value {
                return Ok(value.clone());
            }
        }

        let file = match self.active_file(data_type) {
            Some(active) if active.fid() == node.fid => active,
            _ => self
                .archived_file(data_type, node.fid)
                .ok_or(Error::LogFileNotFound)?,
        };
        let (entry, _) = match file.read_log_entry(node.offset) {
            Ok(read) => read,
            Err(Error::InvalidCrc) | Err(Error::EndOfEntry) => return Err(Error::KeyNotFound),
            Err(e) => return Err(e),
        };
        if entry.kind == EntryKind::Delete || is_expired(entry.expired_at, now) {
            return Err(Error::KeyNotFound);
        }
        Ok(entry.value)
    }

    /// Installs a fresh index node for `entry.key`. A displaced node's
    /// record is dead data; when `emit_discard` is set its size is queued
    /// for the segment's accounting.
    pub(crate) fn update_index_tree(
        &self,
        tree: &IndexTree,
        entry: &LogEntry,
        pos: &ValuePos,
        emit_discard: bool,
        data_type: DataType,
    ) {
        let value = self.key_value_mem_mode().then(|| entry.value.clone());
        let node = IndexNode {
            fid: pos.fid,
            offset: pos.offset,
            entry_size: pos.entry_size,
            expired_at: entry.expired_at,
            value,
        };
        if let Some(old) = tree.put(entry.key.clone(), node) {
            if emit_discard {
                self.emit_discard(old.fid, old.entry_size, data_type);
            }
        }
    }

    pub(crate) fn emit_discard(&self, fid: u32, entry_size: usize, data_type: DataType) {
        self.core.discards[&data_type].try_emit(fid, entry_size);
    }

    /// Encodes an outer key and sub key into the compound on-disk key:
    /// `varint(len(outer)) || varint(len(sub)) || outer || sub`.
    pub(crate) fn encode_key(key: &[u8], sub_key: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(10 + key.len() + sub_key.len());
        log_entry::put_varint(&mut buf, key.len() as i64);
        log_entry::put_varint(&mut buf, sub_key.len() as i64);
        buf.extend_from_slice(key);
        buf.extend_from_slice(sub_key);
        buf
    }

    /// Splits a compound key back into its outer key and sub key.
    pub(crate) fn decode_key(buf: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut header = 0usize;
        let (key_len, n) = log_entry::varint(&buf[header..]).unwrap_or((0, 1));
        header += n;
        let (_, n) = log_entry::varint(&buf[header..]).unwrap_or((0, 1));
        header += n;
        let split = header + key_len as usize;
        (buf[header..split].to_vec(), buf[split..].to_vec())
    }

    /// Scans the directory for segment files, grouping fids per type. The
    /// highest fid of each type becomes the active segment, the rest are
    /// archived.
    fn load_log_files(&self) -> Result<()> {
        let mut fid_map: HashMap<DataType, Vec<u32>> = HashMap::new();
        for dir_entry in fs::read_dir(&self.core.opts.db_path)? {
            let name = dir_entry?.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(FILE_PREFIX) {
                continue;
            }
            let parts: Vec<&str> = name.split('.').collect();
            if parts.len() != 3 {
                continue;
            }
            let Ok(data_type) = DataType::from_name(parts[1]) else {
                continue;
            };
            let Ok(fid) = parts[2].parse::<u32>() else {
                continue;
            };
            fid_map.entry(data_type).or_default().push(fid);
        }

        let threshold = self.core.opts.log_file_size_threshold;
        let mut actives = self.core.active_files.write()?;
        let mut archived = self.core.archived_files.write()?;
        for (data_type, mut fids) in fid_map {
            fids.sort_unstable();
            for (i, &fid) in fids.iter().enumerate() {
                let file = Arc::new(LogFile::open(
                    &self.core.opts.db_path,
                    fid,
                    threshold,
                    data_type,
                    self.core.opts.io_type,
                )?);
                if i == fids.len() - 1 {
                    actives.insert(data_type, file);
                } else {
                    archived.entry(data_type).or_default().insert(fid, file);
                }
            }
        }
        Ok(())
    }

    /// Replays every segment oldest to newest, rebuilding the in-memory
    /// indexes, then positions each active segment's append cursor at its
    /// replayed end. Discard counters persist in their own files, so replay
    /// never re-emits accounting updates.
    fn load_indexes(&self) -> Result<()> {
        let now = unix_now();
        for data_type in DataType::ALL {
            let active = self.active_file(data_type);
            let mut fids: Vec<u32> = self
                .core
                .archived_files
                .read()?
                .get(&data_type)
                .map(|files| files.keys().copied().collect())
                .unwrap_or_default();
            if let Some(active) = &active {
                fids.push(active.fid());
            }
            fids.sort_unstable();

            for fid in fids {
                let file = match &active {
                    Some(a) if a.fid() == fid => a.clone(),
                    _ => self
                        .archived_file(data_type, fid)
                        .ok_or(Error::LogFileNotFound)?,
                };
                let mut offset = 0u64;
                loop {
                    match file.read_log_entry(offset) {
                        Ok((entry, size)) => {
                            let pos = ValuePos {
                                fid,
                                offset,
                                entry_size: size,
                            };
                            self.build_index(data_type, &entry, &pos, now);
                            offset += size as u64;
                        }
                        Err(Error::EndOfEntry) | Err(Error::Eof) => break,
                        Err(e) => return Err(e),
                    }
                }
                if active.as_ref().map(|a| a.fid()) == Some(fid) {
                    file.set_write_at(offset);
                }
            }
        }
        Ok(())
    }

    fn build_index(&self, data_type: DataType, entry: &LogEntry, pos: &ValuePos, now: i64) {
        match data_type {
            DataType::Str => self.build_str_index(entry, pos, now),
            DataType::List => self.build_list_index(entry, pos),
            DataType::Hash => self.build_hash_index(entry, pos),
            DataType::Set => self.build_set_index(entry, pos),
            DataType::ZSet => self.build_zset_index(entry, pos),
        }
    }

    fn build_str_index(&self, entry: &LogEntry, pos: &ValuePos, now: i64) {
        let tree = self.core.str_index.write().unwrap();
        if entry.kind == EntryKind::Delete || is_expired(entry.expired_at, now) {
            tree.remove(&entry.key);
            return;
        }
        self.update_index_tree(&tree, entry, pos, false, DataType::Str);
    }

    fn build_list_index(&self, entry: &LogEntry, pos: &ValuePos) {
        let mut trees = self.core.list_index.write().unwrap();
        let list_key = if entry.kind == EntryKind::ListMeta {
            entry.key.clone()
        } else {
            Self::decode_list_key(&entry.key).0
        };
        let tree = trees.entry(list_key).or_default();
        if entry.kind == EntryKind::Delete {
            tree.remove(&entry.key);
            return;
        }
        self.update_index_tree(tree, entry, pos, false, DataType::List);
    }

    fn build_hash_index(&self, entry: &LogEntry, pos: &ValuePos) {
        let (key, field) = Self::decode_key(&entry.key);
        let mut trees = self.core.hash_index.write().unwrap();
        let tree = trees.entry(key).or_default();
        if entry.kind == EntryKind::Delete {
            tree.remove(&field);
            return;
        }
        let mem_entry = LogEntry {
            key: field,
            value: entry.value.clone(),
            expired_at: entry.expired_at,
            kind: entry.kind,
        };
        self.update_index_tree(tree, &mem_entry, pos, false, DataType::Hash);
    }

    fn build_set_index(&self, entry: &LogEntry, pos: &ValuePos) {
        let sum = util::fingerprint128(&entry.value).to_vec();
        let mut trees = self.core.set_index.write().unwrap();
        let tree = trees.entry(entry.key.clone()).or_default();
        if entry.kind == EntryKind::Delete {
            tree.remove(&sum);
            return;
        }
        let mem_entry = LogEntry {
            key: sum,
            value: entry.value.clone(),
            expired_at: entry.expired_at,
            kind: entry.kind,
        };
        self.update_index_tree(tree, &mem_entry, pos, false, DataType::Set);
    }

    fn build_zset_index(&self, entry: &LogEntry, pos: &ValuePos) {
        let (key, score_buf) = Self::decode_key(&entry.key);
        let sum = util::fingerprint128(&entry.value).to_vec();
        let mut state = self.core.zset_index.write().unwrap();
        if entry.kind == EntryKind::Delete {
            state.sorted.remove(&key, &entry.value);
            if let Some(tree) = state.trees.get(&key) {
                tree.remove(&sum);
            }
            return;
        }
        let Some(score) = std::str::from_utf8(&score_buf)
            .ok()
            .and_then(util::str_to_f64)
        else {
            tracing::warn!("skipping sorted-set record with malformed score");
            return;
        };
        state.sorted.insert(&key, score, &entry.value);
        let tree = state.trees.entry(key).or_default();
        let mem_entry = LogEntry {
            key: sum,
            value: entry.value.clone(),
            expired_at: entry.expired_at,
            kind: entry.kind,
        };
        self.update_index_tree(tree, &mem_entry, pos, false, DataType::ZSet);
    }

    /// Encodes a list element key: `u32-LE(seq) || outer`.
    pub(crate) fn encode_list_key(key: &[u8], seq: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + key.len());
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(key);
        buf
    }

    /// Splits a list element key into its outer key and sequence.
    pub(crate) fn decode_list_key(buf: &[u8]) -> (Vec<u8>, u32) {
        let seq = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        (buf[4..].to_vec(), seq)
    }
}

/// Wall-clock seconds since the epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub(crate) fn is_expired(expired_at: i64, now: i64) -> bool {
    expired_at != 0 && expired_at <= now
}
