use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use byteorder::{ByteOrder, LittleEndian};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::ioselector::{IoSelector, MmapIo};

/// Size of one accounting record: fid + total bytes + dead bytes.
const DISCARD_RECORD_SIZE: usize = 12;

/// Fixed size of a discard file: 8 KiB, 682 slots.
const DISCARD_FILE_SIZE: u64 = 8 << 10;

/// Name suffix of a discard file under `<dbpath>/DISCARD/`.
pub(crate) const DISCARD_FILE_NAME: &str = "discard";

/// Per-segment dead-byte accounting for one data type.
///
/// The table is a fixed-size memory-mapped file of 12-byte little-endian
/// `(fid, total, dead)` records. Slots are handed out from a free list; an
/// all-zero `(fid, total)` prefix marks a free slot. Overwrites and deletes
/// feed `(fid, size)` pairs through a bounded channel drained by a
/// background consumer; when the channel is full the update is dropped,
/// which can only make a segment look slightly more alive than it is.
pub(crate) struct Discard {
    inner: Mutex<DiscardInner>,
    tx: mpsc::Sender<(u32, usize)>,
}

struct DiscardInner {
    file: MmapIo,
    free_list: Vec<u64>,
    location: HashMap<u32, u64>,
}

impl Discard {
    /// Opens (or creates) the discard table at `dir/name` and rebuilds the
    /// slot allocation from its contents. Returns the table and the
    /// receiving end of its accounting channel.
    pub fn new(
        dir: &Path,
        name: &str,
        buffer_size: usize,
    ) -> Result<(Self, mpsc::Receiver<(u32, usize)>)> {
        let file = MmapIo::new(&dir.join(name), DISCARD_FILE_SIZE)?;

        let mut free_list = Vec::new();
        let mut location = HashMap::new();
        let slots = DISCARD_FILE_SIZE as usize / DISCARD_RECORD_SIZE;
        for slot in 0..slots {
            let offset = (slot * DISCARD_RECORD_SIZE) as u64;
            let mut buf = [0u8; 8];
            file.read(&mut buf, offset)?;
            let fid = LittleEndian::read_u32(&buf[..4]);
            let total = LittleEndian::read_u32(&buf[4..8]);
            if fid == 0 && total == 0 {
                free_list.push(offset);
            } else {
                location.insert(fid, offset);
            }
        }
        // Allocate newest-free-slot-last, matching the order slots were
        // released.
        free_list.reverse();

        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        Ok((
            Self {
                inner: Mutex::new(DiscardInner {
                    file,
                    free_list,
                    location,
                }),
                tx,
            },
            rx,
        ))
    }

    /// Queues a dead-record update without blocking. Dropped (and logged)
    /// when the channel is full.
    pub fn try_emit(&self, fid: u32, entry_size: usize) {
        if entry_size == 0 {
            return;
        }
        if self.tx.try_send((fid, entry_size)).is_err() {
            tracing::warn!(fid, "discard channel full, dropping accounting update");
        }
    }

    /// Records the capacity of a freshly created segment. A duplicate call
    /// for the same fid is ignored.
    pub fn set_total(&self, fid: u32, total_size: u32) {
        let mut inner = self.inner.lock().unwrap();
        if inner.location.contains_key(&fid) {
            return;
        }
        let offset = match Self::alloc(&mut inner, fid) {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!(fid, error = %e, "failed to allocate discard slot");
                return;
            }
        };

        let mut buf = [0u8; 8];
        LittleEndian::write_u32(&mut buf[..4], fid);
        LittleEndian::write_u32(&mut buf[4..8], total_size);
        if let Err(e) = inner.file.write(&buf, offset) {
            tracing::warn!(fid, error = %e, "failed to record segment total");
        }
    }

    /// Adds `delta` dead bytes to a segment's slot.
    pub fn incr_discard(&self, fid: u32, delta: usize) {
        if delta == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let offset = match Self::alloc(&mut inner, fid) {
            Ok(offset) => offset,
            Err(e) => {
                tracing::warn!(fid, error = %e, "failed to allocate discard slot");
                return;
            }
        };

        let mut buf = [0u8; 4];
        if let Err(e) = inner.file.read(&mut buf, offset + 8) {
            tracing::warn!(fid, error = %e, "failed to read discard size");
            return;
        }
        let dead = LittleEndian::read_u32(&buf).saturating_add(delta as u32);
        LittleEndian::write_u32(&mut buf, dead);
        if let Err(e) = inner.file.write(&buf, offset + 8) {
            tracing::warn!(fid, error = %e, "failed to write discard size");
        }
    }

    /// Zeroes a compacted segment's slot and returns it to the free list.
    pub fn clear(&self, fid: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(offset) = inner.location.remove(&fid) {
            let zeros = [0u8; DISCARD_RECORD_SIZE];
            if let Err(e) = inner.file.write(&zeros, offset) {
                tracing::warn!(fid, error = %e, "failed to clear discard slot");
            }
            inner.free_list.push(offset);
        }
    }

    /// Compaction candidate list: every fid other than `active_fid` whose
    /// dead/total ratio reaches `ratio`, ascending so older segments are
    /// compacted first.
    pub fn get_ccl(&self, active_fid: u32, ratio: f64) -> Result<Vec<u32>> {
        let inner = self.inner.lock().unwrap();
        let mut ccl = Vec::new();
        let slots = DISCARD_FILE_SIZE as usize / DISCARD_RECORD_SIZE;
        for slot in 0..slots {
            let offset = (slot * DISCARD_RECORD_SIZE) as u64;
            let mut buf = [0u8; DISCARD_RECORD_SIZE];
            inner.file.read(&mut buf, offset)?;
            let fid = LittleEndian::read_u32(&buf[..4]);
            let total = LittleEndian::read_u32(&buf[4..8]);
            let dead = LittleEndian::read_u32(&buf[8..12]);
            if total == 0 || dead == 0 {
                continue;
            }
            if fid != active_fid && dead as f64 / total as f64 >= ratio {
                ccl.push(fid);
            }
        }
        ccl.sort_unstable();
        Ok(ccl)
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().unwrap().file.sync()
    }

    pub fn close(&self) -> Result<()> {
        self.inner.lock().unwrap().file.close()
    }

    fn alloc(inner: &mut DiscardInner, fid: u32) -> Result<u64> {
        if let Some(&offset) = inner.location.get(&fid) {
            return Ok(offset);
        }
        let offset = inner.free_list.pop().ok_or(Error::DiscardNoSpace)?;
        inner.location.insert(fid, offset);
        Ok(offset)
    }
}
