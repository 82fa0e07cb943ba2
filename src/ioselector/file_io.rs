use std::fs::File;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::FileExt;

use super::{open_sized_file, IoSelector};
use crate::error::{Error, Result};

/// Standard positional file I/O. The backing file is pre-sized to the
/// segment threshold so it can later be reopened with a memory map.
pub struct FileIo {
    file: File,
    path: PathBuf,
    size: u64,
}

impl FileIo {
    pub fn new(path: &Path, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidFileSize);
        }
        let file = open_sized_file(path, size)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }
}

impl IoSelector for FileIo {
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.size {
            return Err(Error::Eof);
        }
        let end = (offset + buf.len() as u64).min(self.size);
        let window = (end - offset) as usize;
        self.file.read_exact_at(&mut buf[..window], offset)?;
        Ok(window)
    }

    fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        // The descriptor is released when the selector drops; a close is a
        // final flush.
        self.file.sync_all()?;
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
