//! Append-only, checksummed record log with an in-memory offset index.
//!
//! ## Format
//! - header: `BSYNCKV\0` magic + `u32` format version
//! - records: `op: u8`, `key_len: u32`, `value_len: u32`, `prefix_check: u32` (blake3 of the
//!   nine bytes before it), key, value, 16-byte blake3 checksum over everything before it in the
//!   record
//!
//! Values stay on disk and are read on demand. A record whose verified prefix says it runs past the
//! end of the file is a torn write and is dropped on open. A bad prefix check or a bad record
//! checksum is corruption and fails the open without touching the file. Dead records are reclaimed by [`PagedStore::compact`], which also runs automatically once
//! garbage outweighs live data.

use crate::backend::ByteStore;
use crate::error::{Result, StorageError};
use crate::util::atomic_write_with;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 8] = b"BSYNCKV\0";
pub const PAGED_FORMAT_VERSION: u32 = 2;
const HEADER_LEN: u64 = 12;
const LENGTHS_LEN: usize = 9;
const RECORD_PREFIX_LEN: usize = LENGTHS_LEN + 4;
const CHECKSUM_LEN: usize = 16;
const MIN_COMPACTION_GARBAGE: u64 = 1024 * 1024;

const OP_PUT: u8 = 1;
const OP_REMOVE: u8 = 2;
const OP_CLEAR: u8 = 3;

#[derive(Debug, Clone, Copy)]
struct ValueLocation {
    offset: u64,
    len: u32,
    record_len: u64,
}

struct Inner {
    file: File,
    index: HashMap<Vec<u8>, ValueLocation>,
    end: u64,
    garbage: u64,
}

pub struct PagedStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PagedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedStore")
            .field("path", &self.path)
            .finish()
    }
}

impl PagedStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let inner = open_inner(&path)?;
        tracing::debug!(
            target = "bsync.storage",
            path = %path.display(),
            entries = inner.index.len(),
            "opened paged store"
        );
        Ok(Self {
            path,
            inner: Mutex::new(inner),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the log with live entries only.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut Inner) -> Result<()> {
        let mut live = Vec::with_capacity(inner.index.len());
        for (key, loc) in &inner.index {
            live.push((key.clone(), read_value(&mut inner.file, *loc)?));
        }

        atomic_write_with(&self.path, |file| {
            file.write_all(MAGIC)?;
            file.write_all(&PAGED_FORMAT_VERSION.to_le_bytes())?;
            for (key, value) in &live {
                file.write_all(&encode_record(OP_PUT, key, value))?;
            }
            Ok(())
        })?;

        let garbage = inner.garbage;
        *inner = open_inner(&self.path)?;
        tracing::debug!(
            target = "bsync.storage",
            path = %self.path.display(),
            reclaimed_bytes = garbage,
            "compacted paged store"
        );
        Ok(())
    }

    fn append(&self, inner: &mut Inner, op: u8, key: &[u8], value: &[u8]) -> Result<u64> {
        let record = encode_record(op, key, value);
        inner.file.seek(SeekFrom::Start(inner.end))?;
        inner.file.write_all(&record)?;
        let offset = inner.end;
        inner.end += record.len() as u64;
        Ok(offset)
    }

    fn maybe_compact(&self, inner: &mut Inner) -> Result<()> {
        let live = inner.end.saturating_sub(HEADER_LEN + inner.garbage);
        if inner.garbage > MIN_COMPACTION_GARBAGE && inner.garbage > live {
            self.compact_locked(inner)?;
        }
        Ok(())
    }
}

impl ByteStore for PagedStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let Some(loc) = inner.index.get(key).copied() else {
            return Ok(None);
        };
        read_value(&mut inner.file, loc).map(Some)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let value_len = u32::try_from(value.len()).map_err(|_| {
            StorageError::Backend(format!("value of {} bytes is too large", value.len()))
        })?;
        let mut inner = self.inner.lock();
        let offset = self.append(&mut inner, OP_PUT, key, value)?;
        let record_len = (RECORD_PREFIX_LEN + key.len() + value.len() + CHECKSUM_LEN) as u64;
        let loc = ValueLocation {
            offset: offset + (RECORD_PREFIX_LEN + key.len()) as u64,
            len: value_len,
            record_len,
        };
        if let Some(previous) = inner.index.insert(key.to_vec(), loc) {
            inner.garbage += previous.record_len;
        }
        self.maybe_compact(&mut inner)
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock();
        let Some(loc) = inner.index.get(key).copied() else {
            return Ok(None);
        };
        let previous = read_value(&mut inner.file, loc)?;
        let tombstone = self.append(&mut inner, OP_REMOVE, key, &[])?;
        inner.index.remove(key);
        let reclaimed = loc.record_len + (inner.end - tombstone);
        inner.garbage += reclaimed;
        self.maybe_compact(&mut inner)?;
        Ok(Some(previous))
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(HEADER_LEN)?;
        inner.end = HEADER_LEN;
        inner.index.clear();
        inner.garbage = 0;
        self.append(&mut inner, OP_CLEAR, &[], &[])?;
        inner.file.sync_data()?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut inner = self.inner.lock();
        let locations: Vec<_> = inner
            .index
            .iter()
            .map(|(key, loc)| (key.clone(), *loc))
            .collect();
        let mut out = Vec::with_capacity(locations.len());
        for (key, loc) in locations {
            out.push((key, read_value(&mut inner.file, loc)?));
        }
        Ok(out)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.inner.lock().index.len())
    }

    fn flush(&self) -> Result<()> {
        let inner = self.inner.lock();
        inner.file.sync_data()?;
        Ok(())
    }
}

fn encode_record(op: u8, key: &[u8], value: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(RECORD_PREFIX_LEN + key.len() + value.len() + CHECKSUM_LEN);
    record.push(op);
    record.extend_from_slice(&(key.len() as u32).to_le_bytes());
    record.extend_from_slice(&(value.len() as u32).to_le_bytes());
    let prefix_check = prefix_check(&record);
    record.extend_from_slice(&prefix_check);
    record.extend_from_slice(key);
    record.extend_from_slice(value);
    let checksum = blake3::hash(&record);
    record.extend_from_slice(&checksum.as_bytes()[..CHECKSUM_LEN]);
    record
}

fn read_value(file: &mut File, loc: ValueLocation) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(loc.offset))?;
    let mut buf = vec![0u8; loc.len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn open_inner(path: &Path) -> Result<Inner> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    let file_len = file.metadata()?.len();
    if file_len == 0 {
        file.write_all(MAGIC)?;
        file.write_all(&PAGED_FORMAT_VERSION.to_le_bytes())?;
        file.sync_data()?;
        return Ok(Inner {
            file,
            index: HashMap::new(),
            end: HEADER_LEN,
            garbage: 0,
        });
    }

    let mut reader = BufReader::new(&mut file);
    let mut header = [0u8; HEADER_LEN as usize];
    if file_len < HEADER_LEN || reader.read_exact(&mut header).is_err() || &header[..8] != MAGIC {
        return Err(StorageError::Corrupted {
            path: path.display().to_string(),
            reason: "missing or invalid header".into(),
        });
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&header[8..12]);
    let version = u32::from_le_bytes(version);
    if version != PAGED_FORMAT_VERSION {
        return Err(StorageError::IncompatibleFormat {
            expected: PAGED_FORMAT_VERSION,
            found: version,
        });
    }

    let mut index: HashMap<Vec<u8>, ValueLocation> = HashMap::new();
    let mut offset = HEADER_LEN;
    let mut garbage = 0u64;
    loop {
        match read_record(&mut reader, offset, file_len - offset)? {
            RecordRead::Eof => break,
            RecordRead::Torn => {
                tracing::warn!(
                    target = "bsync.storage",
                    path = %path.display(),
                    offset,
                    "dropping torn record at end of paged store"
                );
                break;
            }
            RecordRead::Corrupted(reason) => {
                return Err(StorageError::Corrupted {
                    path: path.display().to_string(),
                    reason,
                })
            }
            RecordRead::Record { op, key, value_len } => {
                let record_len = (RECORD_PREFIX_LEN + key.len() + value_len + CHECKSUM_LEN) as u64;
                match op {
                    OP_PUT => {
                        let loc = ValueLocation {
                            offset: offset + (RECORD_PREFIX_LEN + key.len()) as u64,
                            len: value_len as u32,
                            record_len,
                        };
                        if let Some(previous) = index.insert(key, loc) {
                            garbage += previous.record_len;
                        }
                    }
                    OP_REMOVE => {
                        if let Some(previous) = index.remove(&key) {
                            garbage += previous.record_len;
                        }
                        garbage += record_len;
                    }
                    OP_CLEAR => {
                        index.clear();
                        garbage = offset + record_len - HEADER_LEN;
                    }
                    other => {
                        return Err(StorageError::Corrupted {
                            path: path.display().to_string(),
                            reason: format!("unknown record op {other} at offset {offset}"),
                        })
                    }
                }
                offset += record_len;
            }
        }
    }
    drop(reader);

    if offset < file_len {
        file.set_len(offset)?;
    }

    Ok(Inner {
        file,
        index,
        end: offset,
        garbage,
    })
}

enum RecordRead {
    Eof,
    Torn,
    Corrupted(String),
    Record {
        op: u8,
        key: Vec<u8>,
        value_len: usize,
    },
}

/// Read the record at `offset`, with `remaining` bytes left in the file from there.
fn read_record(reader: &mut impl Read, offset: u64, remaining: u64) -> Result<RecordRead> {
    let mut prefix = [0u8; RECORD_PREFIX_LEN];
    match read_fully(reader, &mut prefix)? {
        0 => return Ok(RecordRead::Eof),
        n if n < RECORD_PREFIX_LEN => return Ok(RecordRead::Torn),
        _ => {}
    }
    if prefix_check(&prefix[..LENGTHS_LEN]) != prefix[LENGTHS_LEN..] {
        return Ok(RecordRead::Corrupted(format!(
            "record header at offset {offset} fails its check"
        )));
    }
    let op = prefix[0];
    let key_len = u32::from_le_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]) as usize;
    let value_len = u32::from_le_bytes([prefix[5], prefix[6], prefix[7], prefix[8]]) as usize;

    let body_len = key_len + value_len + CHECKSUM_LEN;
    if (RECORD_PREFIX_LEN + body_len) as u64 > remaining {
        return Ok(RecordRead::Torn);
    }
    let mut body = vec![0u8; body_len];
    if read_fully(reader, &mut body)? < body.len() {
        return Ok(RecordRead::Torn);
    }

    let payload_len = key_len + value_len;
    let mut hasher = blake3::Hasher::new();
    hasher.update(&prefix);
    hasher.update(&body[..payload_len]);
    let digest = hasher.finalize();
    let expected = &digest.as_bytes()[..CHECKSUM_LEN];
    let found = &body[payload_len..];
    if expected != found {
        return Err(StorageError::ChecksumMismatch {
            offset,
            expected: hex(expected),
            found: hex(found),
        });
    }

    body.truncate(key_len);
    Ok(RecordRead::Record {
        op,
        key: body,
        value_len,
    })
}

fn prefix_check(lengths: &[u8]) -> [u8; 4] {
    let digest = blake3::hash(lengths);
    let mut check = [0u8; 4];
    check.copy_from_slice(&digest.as_bytes()[..4]);
    check
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        {
            let store = PagedStore::open(&path).unwrap();
            store.put(b"a", b"1").unwrap();
            store.put(b"b", b"2").unwrap();
            store.put(b"a", b"3").unwrap();
            assert_eq!(store.remove(b"b").unwrap(), Some(b"2".to_vec()));
            store.flush().unwrap();
        }
        let store = PagedStore::open(&path).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        {
            let store = PagedStore::open(&path).unwrap();
            store.put(b"kept", b"value").unwrap();
            store.put(b"torn", b"value").unwrap();
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        let store = PagedStore::open(&path).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.get(b"torn").unwrap(), None);

        store.put(b"after", b"x").unwrap();
        drop(store);
        let store = PagedStore::open(&path).unwrap();
        assert_eq!(store.get(b"after").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn flipped_byte_is_checksum_mismatch() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        {
            let store = PagedStore::open(&path).unwrap();
            store.put(b"key", b"value").unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let value_offset = HEADER_LEN as usize + RECORD_PREFIX_LEN + 3;
        bytes[value_offset] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        match PagedStore::open(&path).unwrap_err() {
            StorageError::ChecksumMismatch { offset, .. } => assert_eq!(offset, HEADER_LEN),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn corrupt_length_is_reported_without_truncating() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        {
            let store = PagedStore::open(&path).unwrap();
            store.put(b"a", b"1").unwrap();
            store.put(b"b", b"2").unwrap();
            store.put(b"c", b"3").unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let len = bytes.len() as u64;
        // Second byte of the first record's value_len: the record now claims to run past EOF.
        bytes[HEADER_LEN as usize + 6] = 0x01;
        std::fs::write(&path, bytes).unwrap();

        let err = PagedStore::open(&path).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
    }

    #[test]
    fn huge_length_in_last_record_is_torn_not_allocated() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        {
            let store = PagedStore::open(&path).unwrap();
            store.put(b"kept", b"value").unwrap();
        }
        let lengths = [OP_PUT, 1, 0, 0, 0, 0xff, 0xff, 0xff, 0x7f];
        let mut tail = lengths.to_vec();
        tail.extend_from_slice(&prefix_check(&lengths));
        tail.extend_from_slice(b"k");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&tail);
        std::fs::write(&path, bytes).unwrap();

        let store = PagedStore::open(&path).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"value".to_vec()));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn bad_header_is_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        std::fs::write(&path, b"not a store").unwrap();
        let err = PagedStore::open(&path).unwrap_err();
        assert!(err.is_corruption(), "{err:?}");
    }

    #[test]
    fn compaction_keeps_live_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        let store = PagedStore::open(&path).unwrap();
        for i in 0..50u32 {
            store.put(b"hot", &i.to_le_bytes()).unwrap();
        }
        store.put(b"cold", b"c").unwrap();
        let before = std::fs::metadata(&path).unwrap().len();

        store.compact().unwrap();

        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);
        assert_eq!(store.get(b"hot").unwrap(), Some(49u32.to_le_bytes().to_vec()));
        assert_eq!(store.get(b"cold").unwrap(), Some(b"c".to_vec()));
    }

    #[test]
    fn clear_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("targets.kv");
        {
            let store = PagedStore::open(&path).unwrap();
            store.put(b"a", b"1").unwrap();
            store.clear().unwrap();
            store.put(b"b", b"2").unwrap();
        }
        let store = PagedStore::open(&path).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }
}
