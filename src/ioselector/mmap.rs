use std::path::{Path, PathBuf};
use std::sync::RwLock;

use memmap2::{MmapMut, MmapOptions};

use super::{open_sized_file, IoSelector};
use crate::error::{Error, Result};

/// Writable shared memory map over a pre-sized file. The map covers the
/// whole file, so the file must be grown to its final size before mapping.
pub struct MmapIo {
    map: RwLock<Option<MmapMut>>,
    path: PathBuf,
    size: u64,
}

impl MmapIo {
    pub fn new(path: &Path, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidFileSize);
        }
        let file = open_sized_file(path, size)?;
        // Safety: the file is exclusively owned by this database instance,
        // enforced by the directory lock taken at open.
        let map = unsafe { MmapOptions::new().len(size as usize).map_mut(&file)? };
        Ok(Self {
            map: RwLock::new(Some(map)),
            path: path.to_path_buf(),
            size,
        })
    }

    fn closed() -> Error {
        Error::Io("memory map is closed".to_string())
    }
}

impl IoSelector for MmapIo {
    fn write(&self, buf: &[u8], offset: u64) -> Result<usize> {
        if offset + buf.len() as u64 > self.size {
            return Err(Error::Eof);
        }
        let mut guard = self.map.write()?;
        let map = guard.as_mut().ok_or_else(Self::closed)?;
        let start = offset as usize;
        map[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.size {
            return Err(Error::Eof);
        }
        let guard = self.map.read()?;
        let map = guard.as_ref().ok_or_else(Self::closed)?;
        let start = offset as usize;
        let window = buf.len().min(self.size as usize - start);
        buf[..window].copy_from_slice(&map[start..start + window]);
        Ok(window)
    }

    fn sync(&self) -> Result<()> {
        let guard = self.map.read()?;
        let map = guard.as_ref().ok_or_else(Self::closed)?;
        map.flush()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.map.write()?;
        if let Some(map) = guard.take() {
            map.flush()?;
        }
        Ok(())
    }

    fn delete(&self) -> Result<()> {
        self.map.write()?.take();
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}
