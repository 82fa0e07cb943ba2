use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::ioselector::{FileIo, IoSelector, MmapIo};
use crate::options::IoType;

use super::log_entry::{self, LogEntry, MAX_HEADER_SIZE};

/// The five logical data structures. Every segment, index tree and discard
/// table is partitioned by this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Str = 0,
    List = 1,
    Hash = 2,
    Set = 3,
    ZSet = 4,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Str,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::ZSet,
    ];

    /// Short name used in file names: `log.<name>.<fid>`.
    pub fn name(self) -> &'static str {
        match self {
            DataType::Str => "strs",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "sets",
            DataType::ZSet => "zset",
        }
    }

    pub fn from_name(name: &str) -> Result<DataType> {
        match name {
            "strs" => Ok(DataType::Str),
            "list" => Ok(DataType::List),
            "hash" => Ok(DataType::Hash),
            "sets" => Ok(DataType::Set),
            "zset" => Ok(DataType::ZSet),
            _ => Err(Error::UnsupportedLogFileType),
        }
    }
}

/// Segment file name prefix.
pub const FILE_PREFIX: &str = "log.";

/// One append-only segment, identified by `(DataType, fid)`. Reads are
/// positional and lock-free; appends are serialized by the engine's per-type
/// write lock, with `write_at` published under release ordering so readers
/// observe a consistent extent.
pub struct LogFile {
    fid: u32,
    write_at: AtomicU64,
    io: Box<dyn IoSelector>,
}

impl LogFile {
    /// Opens (or creates) the segment `fid` of `data_type` under `dir`,
    /// pre-sized to `fsize`.
    pub fn open(dir: &Path, fid: u32, fsize: u64, data_type: DataType, io_type: IoType) -> Result<Self> {
        let path = Self::file_name(dir, fid, data_type);
        let io: Box<dyn IoSelector> = match io_type {
            IoType::FileIo => Box::new(FileIo::new(&path, fsize)?),
            IoType::Mmap => Box::new(MmapIo::new(&path, fsize)?),
        };
        Ok(Self {
            fid,
            write_at: AtomicU64::new(0),
            io,
        })
    }

    pub fn file_name(dir: &Path, fid: u32, data_type: DataType) -> PathBuf {
        dir.join(format!("{}{}.{:09}", FILE_PREFIX, data_type.name(), fid))
    }

    pub fn fid(&self) -> u32 {
        self.fid
    }

    pub fn write_at(&self) -> u64 {
        self.write_at.load(Ordering::Acquire)
    }

    /// Repositions the append cursor; used once after replay to resume at
    /// the end of the newest segment.
    pub fn set_write_at(&self, offset: u64) {
        self.write_at.store(offset, Ordering::Release);
    }

    /// Appends `buf` at the current cursor, returning the offset it landed
    /// at.
    pub fn write(&self, buf: &[u8]) -> Result<u64> {
        if buf.is_empty() {
            return Ok(self.write_at());
        }
        let offset = self.write_at.load(Ordering::Acquire);
        let n = self.io.write(buf, offset)?;
        if n != buf.len() {
            return Err(Error::WriteSizeMismatch);
        }
        self.write_at.store(offset + n as u64, Ordering::Release);
        Ok(offset)
    }

    /// Reads and verifies one record at `offset`, returning it with its
    /// encoded size. An all-zero header reports [`Error::EndOfEntry`];
    /// a checksum mismatch reports [`Error::InvalidCrc`].
    pub fn read_log_entry(&self, offset: u64) -> Result<(LogEntry, usize)> {
        let mut head = [0u8; MAX_HEADER_SIZE];
        let n = self.io.read(&mut head, offset)?;
        let (meta, header_size) = log_entry::decode_meta(&head[..n])?;

        let mut entry = LogEntry {
            expired_at: meta.expired_at,
            kind: meta.kind,
            ..Default::default()
        };
        let entry_size = header_size + meta.key_size + meta.val_size;

        if meta.key_size + meta.val_size > 0 {
            let mut kv = vec![0u8; meta.key_size + meta.val_size];
            let n = self.io.read(&mut kv, offset + header_size as u64)?;
            if n < kv.len() {
                return Err(Error::Eof);
            }
            entry.value = kv.split_off(meta.key_size);
            entry.key = kv;
        }

        if log_entry::entry_crc(&entry, &head[4..header_size]) != meta.crc32 {
            return Err(Error::InvalidCrc);
        }
        Ok((entry, entry_size))
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.io.close()
    }

    /// Removes the segment from disk. Irreversible; only the compactor and
    /// tests call this.
    pub fn delete(&self) -> Result<()> {
        self.io.delete()
    }
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("fid", &self.fid)
            .field("write_at", &self.write_at())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::log_entry::{encode, EntryKind};
    use tempfile::TempDir;

    fn open_file(dir: &TempDir, io_type: IoType) -> LogFile {
        LogFile::open(dir.path(), 0, 1 << 20, DataType::Str, io_type).unwrap()
    }

    #[test]
    fn test_file_name_layout() {
        let name = LogFile::file_name(Path::new("/db"), 7, DataType::ZSet);
        assert_eq!(name, PathBuf::from("/db/log.zset.000000007"));
    }

    #[test]
    fn test_append_and_read_back() {
        for io_type in [IoType::FileIo, IoType::Mmap] {
            let dir = TempDir::new().unwrap();
            let lf = open_file(&dir, io_type);

            let e1 = LogEntry::new(b"k1".to_vec(), b"v1".to_vec());
            let e2 = LogEntry {
                key: b"k2".to_vec(),
                value: vec![],
                expired_at: 42,
                kind: EntryKind::Delete,
            };
            let (b1, s1) = encode(&e1);
            let (b2, s2) = encode(&e2);

            assert_eq!(lf.write(&b1).unwrap(), 0);
            assert_eq!(lf.write(&b2).unwrap(), s1 as u64);
            assert_eq!(lf.write_at(), (s1 + s2) as u64);

            let (got1, n1) = lf.read_log_entry(0).unwrap();
            assert_eq!(got1, e1);
            assert_eq!(n1, s1);
            let (got2, n2) = lf.read_log_entry(s1 as u64).unwrap();
            assert_eq!(got2, e2);
            assert_eq!(n2, s2);
        }
    }

    #[test]
    fn test_read_past_written_extent_is_end_of_entry() {
        let dir = TempDir::new().unwrap();
        let lf = open_file(&dir, IoType::FileIo);
        let (buf, size) = encode(&LogEntry::new(b"k".to_vec(), b"v".to_vec()));
        lf.write(&buf).unwrap();

        // The pre-sized file is zero-filled beyond the written extent.
        assert_eq!(
            lf.read_log_entry(size as u64).unwrap_err(),
            Error::EndOfEntry
        );
    }

    #[test]
    fn test_corruption_is_detected() {
        let dir = TempDir::new().unwrap();
        let lf = open_file(&dir, IoType::FileIo);
        let (buf, _) = encode(&LogEntry::new(b"key".to_vec(), b"value".to_vec()));
        lf.write(&buf).unwrap();

        // Flip one payload byte behind the log file's back.
        let path = LogFile::file_name(dir.path(), 0, DataType::Str);
        let mut raw = std::fs::read(&path).unwrap();
        let last = buf.len() - 1;
        raw[last] ^= 0xff;
        std::fs::write(&path, raw).unwrap();

        assert_eq!(lf.read_log_entry(0).unwrap_err(), Error::InvalidCrc);
    }

    #[test]
    fn test_write_at_resumes_after_set() {
        let dir = TempDir::new().unwrap();
        let lf = open_file(&dir, IoType::FileIo);
        let (buf, size) = encode(&LogEntry::new(b"k".to_vec(), b"v".to_vec()));
        lf.write(&buf).unwrap();

        let reopened = open_file(&dir, IoType::FileIo);
        assert_eq!(reopened.write_at(), 0);
        reopened.set_write_at(size as u64);
        assert_eq!(reopened.write(&buf).unwrap(), size as u64);
        assert!(reopened.read_log_entry(size as u64).is_ok());
    }
}
