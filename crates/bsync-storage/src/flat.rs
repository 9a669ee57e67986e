use crate::buffer::CodecBuffer;
use crate::codec::{decode_exact, CodecContext, StoreCodec};
use crate::error::{Result, StorageError};
use crate::util::atomic_write;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

/// A single persisted value.
///
/// The file holds a little-endian `u32` format version followed by the codec payload and is
/// replaced atomically on every write.
pub struct FlatStore<T> {
    path: Option<PathBuf>,
    codec: Box<dyn StoreCodec<T>>,
    ctx: CodecContext,
    value: RwLock<Option<T>>,
}

impl<T: Clone> FlatStore<T> {
    pub fn in_memory(codec: impl StoreCodec<T> + 'static) -> Self {
        Self {
            path: None,
            codec: Box::new(codec),
            ctx: CodecContext::default(),
            value: RwLock::new(None),
        }
    }

    pub fn open(path: impl Into<PathBuf>, codec: impl StoreCodec<T> + 'static) -> Result<Self> {
        let path = path.into();
        let ctx = CodecContext::default();
        let value = match std::fs::read(&path) {
            Ok(bytes) => Some(decode_file(&path, &bytes, &codec, &ctx)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path),
            codec: Box::new(codec),
            ctx,
            value: RwLock::new(value),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    pub fn set(&self, value: T) -> Result<()> {
        let mut slot = self.value.write();
        self.persist(Some(&value))?;
        *slot = Some(value);
        Ok(())
    }

    /// Replace the value with `f(current)` while holding the write lock.
    pub fn modify(&self, f: impl FnOnce(Option<T>) -> T) -> Result<T> {
        let mut slot = self.value.write();
        let updated = f(slot.clone());
        self.persist(Some(&updated))?;
        *slot = Some(updated.clone());
        Ok(updated)
    }

    pub fn clear(&self) -> Result<()> {
        let mut slot = self.value.write();
        self.persist(None)?;
        *slot = None;
        Ok(())
    }

    fn persist(&self, value: Option<&T>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let Some(value) = value else {
            return match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            };
        };
        let mut buf = CodecBuffer::new();
        buf.write_u32(self.ctx.format_version);
        self.codec.encode(&self.ctx, value, &mut buf)?;
        atomic_write(path, buf.as_slice())
    }
}

fn decode_file<T>(
    path: &Path,
    bytes: &[u8],
    codec: &dyn StoreCodec<T>,
    ctx: &CodecContext,
) -> Result<T> {
    if bytes.len() < 4 {
        return Err(StorageError::Corrupted {
            path: path.display().to_string(),
            reason: "missing format version".into(),
        });
    }
    let version = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if version != ctx.format_version {
        return Err(StorageError::IncompatibleFormat {
            expected: ctx.format_version,
            found: version,
        });
    }
    decode_exact(codec, ctx, &bytes[4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::U64Codec;

    #[test]
    fn value_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("generation.bin");
        {
            let store = FlatStore::open(&path, U64Codec).unwrap();
            assert_eq!(store.get(), None);
            store.set(41).unwrap();
            assert_eq!(store.modify(|v| v.unwrap_or(0) + 1).unwrap(), 42);
        }
        let store = FlatStore::open(&path, U64Codec).unwrap();
        assert_eq!(store.get(), Some(42));
        store.clear().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn garbage_file_is_corruption() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("generation.bin");
        std::fs::write(&path, [1, 0]).unwrap();
        let err = FlatStore::open(&path, U64Codec).err().unwrap();
        assert!(err.is_corruption(), "{err:?}");
    }
}
