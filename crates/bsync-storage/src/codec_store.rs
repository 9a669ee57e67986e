use crate::backend::ByteStore;
use crate::codec::{decode_exact, encode_to_vec, CodecContext, StoreCodec};
use crate::error::Result;
use crate::kv::KvStore;
use parking_lot::Mutex;

/// Typed [`KvStore`] over a [`ByteStore`], encoding keys and values with [`StoreCodec`]s.
///
/// Writes are serialized through one gate so [`KvStore::compute`] cannot interleave with a
/// concurrent `put` or `remove`.
pub struct CodecStore<K, V> {
    backend: Box<dyn ByteStore>,
    key_codec: Box<dyn StoreCodec<K>>,
    value_codec: Box<dyn StoreCodec<V>>,
    ctx: CodecContext,
    write_gate: Mutex<()>,
}

impl<K, V> CodecStore<K, V> {
    pub fn new(
        backend: impl ByteStore + 'static,
        key_codec: impl StoreCodec<K> + 'static,
        value_codec: impl StoreCodec<V> + 'static,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            key_codec: Box::new(key_codec),
            value_codec: Box::new(value_codec),
            ctx: CodecContext::default(),
            write_gate: Mutex::new(()),
        }
    }

    fn encode_key(&self, key: &K) -> Result<Vec<u8>> {
        encode_to_vec(self.key_codec.as_ref(), &self.ctx, key)
    }

    fn encode_value(&self, value: &V) -> Result<Vec<u8>> {
        encode_to_vec(self.value_codec.as_ref(), &self.ctx, value)
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<K> {
        decode_exact(self.key_codec.as_ref(), &self.ctx, bytes)
    }

    fn decode_value(&self, bytes: &[u8]) -> Result<V> {
        decode_exact(self.value_codec.as_ref(), &self.ctx, bytes)
    }
}

impl<K, V> KvStore<K, V> for CodecStore<K, V> {
    fn get(&self, key: &K) -> Result<Option<V>> {
        let key = self.encode_key(key)?;
        self.backend
            .get(&key)?
            .map(|bytes| self.decode_value(&bytes))
            .transpose()
    }

    fn put(&self, key: K, value: V) -> Result<()> {
        let key = self.encode_key(&key)?;
        let value = self.encode_value(&value)?;
        let _gate = self.write_gate.lock();
        self.backend.put(&key, &value)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        let key = self.encode_key(key)?;
        Ok(self.backend.get(&key)?.is_some())
    }

    fn remove(&self, key: &K) -> Result<Option<V>> {
        let key = self.encode_key(key)?;
        let _gate = self.write_gate.lock();
        self.backend
            .remove(&key)?
            .map(|bytes| self.decode_value(&bytes))
            .transpose()
    }

    fn clear(&self) -> Result<()> {
        let _gate = self.write_gate.lock();
        self.backend.clear()
    }

    fn keys(&self) -> Result<Vec<K>> {
        self.backend
            .scan()?
            .iter()
            .map(|(key, _)| self.decode_key(key))
            .collect()
    }

    fn values(&self) -> Result<Vec<V>> {
        self.backend
            .scan()?
            .iter()
            .map(|(_, value)| self.decode_value(value))
            .collect()
    }

    fn entries(&self) -> Result<Vec<(K, V)>> {
        self.backend
            .scan()?
            .iter()
            .map(|(key, value)| Ok((self.decode_key(key)?, self.decode_value(value)?)))
            .collect()
    }

    fn len(&self) -> Result<usize> {
        self.backend.len()
    }

    fn compute(&self, key: &K, f: &mut dyn FnMut(Option<V>) -> Option<V>) -> Result<Option<V>> {
        let key = self.encode_key(key)?;
        let _gate = self.write_gate.lock();
        let current = self
            .backend
            .get(&key)?
            .map(|bytes| self.decode_value(&bytes))
            .transpose()?;
        let updated = f(current);
        match &updated {
            Some(value) => self.backend.put(&key, &self.encode_value(value)?)?,
            None => {
                self.backend.remove(&key)?;
            }
        }
        Ok(updated)
    }

    fn flush(&self) -> Result<()> {
        self.backend.flush()
    }
}
