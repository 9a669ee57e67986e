use crate::error::Result;

/// Untyped byte-level backend. [`crate::CodecStore`] turns one into a typed [`crate::KvStore`].
pub trait ByteStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn clear(&self) -> Result<()>;

    /// Every live entry, in unspecified order.
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;

    fn len(&self) -> Result<usize>;

    fn flush(&self) -> Result<()>;
}
