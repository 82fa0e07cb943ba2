use std::path::PathBuf;
use std::time::Duration;

/// Where index payloads keep their values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Only keys live in memory; a value read goes through the segment file.
    KeyOnlyMem,
    /// Keys and values both live in memory. Reads never touch disk, at the
    /// cost of holding every live value resident. Suitable when values are
    /// small.
    KeyValueMem,
}

/// How segment files are read and written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    /// Standard positional file I/O.
    FileIo,
    /// A writable shared memory map.
    Mmap,
}

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Options {
    /// Directory holding all database files. Created if absent.
    pub db_path: PathBuf,

    /// Index mode. Default: `KeyOnlyMem`.
    pub index_mode: IndexMode,

    /// Segment I/O strategy. Default: `FileIo`.
    pub io_type: IoType,

    /// Fsync after every write. When false, writes since the last sync may
    /// be lost if the machine crashes; a process crash alone loses nothing.
    /// Default: false.
    pub sync: bool,

    /// How often the compactor looks for segments to reclaim. Zero disables
    /// the periodic compactor. Default: 8 hours.
    pub log_file_gc_interval: Duration,

    /// A segment whose dead/total byte ratio reaches this value becomes a
    /// compaction candidate. Default: 0.5.
    pub log_file_gc_ratio: f64,

    /// Segment roll-over size. Must stay the same across restarts of the
    /// same database directory. Default: 512 MiB.
    pub log_file_size_threshold: u64,

    /// Capacity of the per-type discard accounting channel, in entries.
    /// Updates beyond this are dropped (and logged) rather than blocking
    /// writers. Default: 8 Mi entries.
    pub discard_buffer_size: usize,
}

impl Options {
    /// Options for the given directory with every other knob at its default.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            index_mode: IndexMode::KeyOnlyMem,
            io_type: IoType::FileIo,
            sync: false,
            log_file_gc_interval: Duration::from_secs(8 * 60 * 60),
            log_file_gc_ratio: 0.5,
            log_file_size_threshold: 512 << 20,
            discard_buffer_size: 8 << 20,
        }
    }

    /// Set the index mode.
    pub fn index_mode(mut self, mode: IndexMode) -> Self {
        self.index_mode = mode;
        self
    }

    /// Set the segment I/O strategy.
    pub fn io_type(mut self, io_type: IoType) -> Self {
        self.io_type = io_type;
        self
    }

    /// Fsync on every write.
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Set the compactor cadence. Zero disables the periodic compactor.
    pub fn log_file_gc_interval(mut self, interval: Duration) -> Self {
        self.log_file_gc_interval = interval;
        self
    }

    /// Set the dead/total ratio at which a segment becomes a compaction
    /// candidate.
    pub fn log_file_gc_ratio(mut self, ratio: f64) -> Self {
        self.log_file_gc_ratio = ratio;
        self
    }

    /// Set the segment roll-over size.
    pub fn log_file_size_threshold(mut self, threshold: u64) -> Self {
        self.log_file_size_threshold = threshold;
        self
    }

    /// Set the discard accounting channel capacity.
    pub fn discard_buffer_size(mut self, size: usize) -> Self {
        self.discard_buffer_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::new("/tmp/cinderdb");
        assert_eq!(opts.db_path, PathBuf::from("/tmp/cinderdb"));
        assert_eq!(opts.index_mode, IndexMode::KeyOnlyMem);
        assert_eq!(opts.io_type, IoType::FileIo);
        assert!(!opts.sync);
        assert_eq!(opts.log_file_gc_interval, Duration::from_secs(8 * 60 * 60));
        assert_eq!(opts.log_file_size_threshold, 512 << 20);
    }

    #[test]
    fn test_builder() {
        let opts = Options::new("/tmp/cinderdb")
            .index_mode(IndexMode::KeyValueMem)
            .io_type(IoType::Mmap)
            .sync_writes(true)
            .log_file_gc_interval(Duration::from_secs(60))
            .log_file_gc_ratio(0.3)
            .log_file_size_threshold(1 << 20);

        assert_eq!(opts.index_mode, IndexMode::KeyValueMem);
        assert_eq!(opts.io_type, IoType::Mmap);
        assert!(opts.sync);
        assert_eq!(opts.log_file_gc_interval, Duration::from_secs(60));
        assert_eq!(opts.log_file_gc_ratio, 0.3);
        assert_eq!(opts.log_file_size_threshold, 1 << 20);
    }
}
