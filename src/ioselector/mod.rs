//! Uniform positional I/O over either a standard file or a writable memory
//! map. Segment files and the discard table go through this trait so the
//! engine never cares which strategy backs a file.

pub mod file_io;
pub mod mmap;

use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::error::Result;

pub use file_io::FileIo;
pub use mmap::MmapIo;

/// Positional I/O over a pre-sized backing file.
///
/// `read` may return fewer bytes than requested when the read window crosses
/// the end of the file; a read starting at or past the end reports
/// [`crate::Error::Eof`]. `write` must write the whole buffer or fail.
pub trait IoSelector: Send + Sync {
    /// Write `buf` at `offset`, returning the number of bytes written.
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Read into `buf` starting at `offset`, returning the number of bytes
    /// read.
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Flush file contents to stable storage.
    fn sync(&self) -> Result<()>;

    /// Flush and release the backing resources. Further reads and writes
    /// fail.
    fn close(&self) -> Result<()>;

    /// Release the backing resources and remove the file from disk.
    fn delete(&self) -> Result<()>;
}

/// Opens `path` read-write, creating it if needed, and grows it to `size`
/// bytes so positional writes and memory maps stay in bounds. Existing
/// contents are preserved.
pub(crate) fn open_sized_file(path: &Path, size: u64) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    if file.metadata()?.len() < size {
        file.set_len(size)?;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    fn selectors(dir: &TempDir, size: u64) -> Vec<Box<dyn IoSelector>> {
        vec![
            Box::new(FileIo::new(&dir.path().join("file.io"), size).unwrap()),
            Box::new(MmapIo::new(&dir.path().join("mmap.io"), size).unwrap()),
        ]
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        for io in selectors(&dir, 4096) {
            assert_eq!(io.write(b"hello", 0).unwrap(), 5);
            assert_eq!(io.write(b"world", 512).unwrap(), 5);

            let mut buf = [0u8; 5];
            assert_eq!(io.read(&mut buf, 0).unwrap(), 5);
            assert_eq!(&buf, b"hello");
            assert_eq!(io.read(&mut buf, 512).unwrap(), 5);
            assert_eq!(&buf, b"world");
        }
    }

    #[test]
    fn test_unwritten_region_reads_zeroes() {
        let dir = TempDir::new().unwrap();
        for io in selectors(&dir, 4096) {
            let mut buf = [0xffu8; 8];
            assert_eq!(io.read(&mut buf, 100).unwrap(), 8);
            assert_eq!(buf, [0u8; 8]);
        }
    }

    #[test]
    fn test_read_past_end() {
        let dir = TempDir::new().unwrap();
        for io in selectors(&dir, 64) {
            let mut buf = [0u8; 8];
            assert_eq!(io.read(&mut buf, 64), Err(Error::Eof));
            assert_eq!(io.read(&mut buf, 1000), Err(Error::Eof));
            // A window crossing the end yields the in-bounds prefix.
            assert_eq!(io.read(&mut buf, 60).unwrap(), 4);
        }
    }

    #[test]
    fn test_invalid_size() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            FileIo::new(&dir.path().join("z.io"), 0).err(),
            Some(Error::InvalidFileSize)
        );
        assert_eq!(
            MmapIo::new(&dir.path().join("z.mm"), 0).err(),
            Some(Error::InvalidFileSize)
        );
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = TempDir::new().unwrap();
        for (i, io) in selectors(&dir, 64).into_iter().enumerate() {
            io.write(b"x", 0).unwrap();
            io.delete().unwrap();
            let survivors: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
            assert_eq!(survivors.len(), 1 - i);
        }
    }
}
