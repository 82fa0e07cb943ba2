use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Exclusive advisory lock on a sentinel file, preventing two processes from
/// opening the same database directory. Released when dropped.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Creates the sentinel file if needed and acquires the lock. The file
    /// holds the owning process ID for debugging.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::try_lock(&file)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking on this platform; rely on operator discipline.
        Ok(())
    }

    /// Explicit release. The lock file itself stays on disk to avoid unlink
    /// races with a concurrent opener.
    pub fn unlock(self) -> io::Result<()> {
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the advisory lock when the descriptor closes.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_writes_pid() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("FLOCK");

        let lock = FileLock::lock(&lock_path).expect("failed to acquire lock");
        assert!(lock_path.exists());
        let content = std::fs::read_to_string(&lock_path).unwrap();
        assert!(content.contains(&std::process::id().to_string()));
        lock.unlock().unwrap();
    }

    #[test]
    fn test_double_lock_fails() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("FLOCK");

        let _lock1 = FileLock::lock(&lock_path).expect("failed to acquire first lock");
        assert!(FileLock::lock(&lock_path).is_err());
    }

    #[test]
    fn test_relock_after_drop() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("FLOCK");

        {
            let _lock = FileLock::lock(&lock_path).expect("failed to acquire lock");
        }
        let _lock2 =
            FileLock::lock(&lock_path).expect("should be able to acquire lock after drop");
    }
}
