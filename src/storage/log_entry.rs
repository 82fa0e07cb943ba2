use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::{Error, Result};

/// CRC-32 with the IEEE polynomial; the wire format is fixed on it.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Upper bound of an encoded record header: 4 (crc) + 1 (kind) + 5 + 5
/// (u32 length varint ceilings) + 10 (i64 expiry varint ceiling) = 25.
pub const MAX_HEADER_SIZE: usize = 25;

/// Record kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    /// A live key/value record.
    #[default]
    Normal = 0,
    /// A tombstone: the key is deleted at replay time.
    Delete = 1,
    /// List head/tail sequence metadata, stored under the plain list key.
    ListMeta = 2,
}

impl From<u8> for EntryKind {
    fn from(b: u8) -> Self {
        match b {
            1 => EntryKind::Delete,
            2 => EntryKind::ListMeta,
            _ => EntryKind::Normal,
        }
    }
}

/// One logical record as appended to a segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expired_at: i64,
    pub kind: EntryKind,
}

impl LogEntry {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            ..Default::default()
        }
    }
}

/// Decoded header of a record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntryMeta {
    pub crc32: u32,
    pub kind: EntryKind,
    pub key_size: usize,
    pub val_size: usize,
    pub expired_at: i64,
}

/// Appends a zig-zag signed LEB128 varint, the layout the record format
/// inherits for its length and expiry fields. Compound keys reuse it for
/// their length prefixes.
pub(crate) fn put_varint(buf: &mut Vec<u8>, v: i64) {
    let mut ux = ((v << 1) ^ (v >> 63)) as u64;
    while ux >= 0x80 {
        buf.push(ux as u8 | 0x80);
        ux >>= 7;
    }
    buf.push(ux as u8);
}

/// Decodes one varint, returning the value and its encoded width.
pub(crate) fn varint(buf: &[u8]) -> Result<(i64, usize)> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        if shift >= 64 {
            return Err(Error::InvalidCrc);
        }
        ux |= u64::from(b & 0x7f) << shift;
        if b < 0x80 {
            let v = ((ux >> 1) as i64) ^ -((ux & 1) as i64);
            return Ok((v, i + 1));
        }
        shift += 7;
    }
    Err(Error::Eof)
}

/// Encodes an entry into its on-disk form, returning the buffer and its
/// length. The CRC prefix covers every byte after itself.
pub(crate) fn encode(e: &LogEntry) -> (Vec<u8>, usize) {
    let mut buf = Vec::with_capacity(MAX_HEADER_SIZE + e.key.len() + e.value.len());
    buf.extend_from_slice(&[0u8; 4]);
    buf.push(e.kind as u8);
    put_varint(&mut buf, e.key.len() as i64);
    put_varint(&mut buf, e.value.len() as i64);
    put_varint(&mut buf, e.expired_at);
    buf.extend_from_slice(&e.key);
    buf.extend_from_slice(&e.value);

    let crc = CRC32.checksum(&buf[4..]);
    LittleEndian::write_u32(&mut buf[..4], crc);
    let size = buf.len();
    (buf, size)
}

/// Decodes a record header, returning the meta fields and the header width.
///
/// An all-zero prefix (`crc = 0`, `key_size = 0`, `val_size = 0`) is the
/// end-of-log sentinel and reports [`Error::EndOfEntry`].
pub(crate) fn decode_meta(buf: &[u8]) -> Result<(EntryMeta, usize)> {
    if buf.len() <= 5 {
        return Err(Error::Eof);
    }
    let crc32 = LittleEndian::read_u32(&buf[..4]);
    let kind = EntryKind::from(buf[4]);

    let mut index = 5;
    let (key_size, n) = varint(&buf[index..])?;
    index += n;
    let (val_size, n) = varint(&buf[index..])?;
    index += n;
    let (expired_at, n) = varint(&buf[index..])?;
    index += n;

    if crc32 == 0 && key_size == 0 && val_size == 0 {
        return Err(Error::EndOfEntry);
    }

    Ok((
        EntryMeta {
            crc32,
            kind,
            key_size: key_size as usize,
            val_size: val_size as usize,
            expired_at,
        },
        index,
    ))
}

/// Recomputes the checksum of an entry given its header bytes past the CRC
/// prefix.
pub(crate) fn entry_crc(e: &LogEntry, meta: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(meta);
    digest.update(&e.key);
    digest.update(&e.value);
    digest.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_round_trip() {
        for v in [0i64, 1, -1, 63, 64, -64, -65, 300, i64::MAX, i64::MIN] {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            assert!(buf.len() <= 10);
            let (decoded, n) = varint(&buf).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(n, buf.len());
        }
    }

    #[test]
    fn test_encode_decode_meta() {
        let entry = LogEntry {
            key: b"some-key".to_vec(),
            value: b"some-value".to_vec(),
            expired_at: 1_700_000_000,
            kind: EntryKind::Normal,
        };
        let (buf, size) = encode(&entry);
        assert_eq!(buf.len(), size);

        let (meta, header) = decode_meta(&buf).unwrap();
        assert_eq!(meta.kind, EntryKind::Normal);
        assert_eq!(meta.key_size, entry.key.len());
        assert_eq!(meta.val_size, entry.value.len());
        assert_eq!(meta.expired_at, entry.expired_at);
        assert_eq!(header + meta.key_size + meta.val_size, size);
        assert_eq!(meta.crc32, entry_crc(&entry, &buf[4..header]));
    }

    #[test]
    fn test_tombstone_and_meta_kinds() {
        for kind in [EntryKind::Delete, EntryKind::ListMeta] {
            let entry = LogEntry {
                key: b"k".to_vec(),
                value: vec![],
                expired_at: 0,
                kind,
            };
            let (buf, _) = encode(&entry);
            let (meta, _) = decode_meta(&buf).unwrap();
            assert_eq!(meta.kind, kind);
        }
    }

    #[test]
    fn test_empty_key_and_value() {
        let entry = LogEntry::new(vec![], vec![]);
        let (buf, _) = encode(&entry);
        // A real record with empty key and value still carries its CRC, so
        // it is not mistaken for the end-of-log sentinel.
        let (meta, _) = decode_meta(&buf).unwrap();
        assert_eq!(meta.key_size, 0);
        assert_eq!(meta.val_size, 0);
        assert_ne!(meta.crc32, 0);
    }

    #[test]
    fn test_zero_prefix_is_end_of_entry() {
        let buf = [0u8; MAX_HEADER_SIZE];
        assert_eq!(decode_meta(&buf), Err(Error::EndOfEntry));
    }

    #[test]
    fn test_corrupted_payload_fails_crc() {
        let entry = LogEntry::new(b"key".to_vec(), b"value".to_vec());
        let (mut buf, size) = encode(&entry);
        buf[size - 1] ^= 0xff;

        let (meta, header) = decode_meta(&buf).unwrap();
        let decoded = LogEntry {
            key: buf[header..header + meta.key_size].to_vec(),
            value: buf[header + meta.key_size..size].to_vec(),
            expired_at: meta.expired_at,
            kind: meta.kind,
        };
        assert_ne!(meta.crc32, entry_crc(&decoded, &buf[4..header]));
    }
}
