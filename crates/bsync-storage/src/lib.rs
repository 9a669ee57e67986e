//! Pluggable key-value persistence for sync state.
//!
//! Layers, bottom up:
//! - [`ByteStore`] backends: [`PagedStore`] (append-only checksummed log) and, with the `redb`
//!   feature, `RedbStore` (embedded B-tree)
//! - [`StoreCodec`]s over [`CodecBuffer`] / [`CodecReader`], and [`CodecStore`] turning a byte
//!   backend into a typed [`KvStore`]
//! - adapters: [`CachedStore`] (write-through LRU) and [`HashKeyStore`] (complex keys reduced to
//!   [`bsync_core::Hash128`])
//! - [`OneToManyIndex`], [`OneToOneIndex`] and [`FlatStore`] on top
//!
//! [`StorageContext`] picks a backend from [`StorageHints`] and roots every store under the
//! workspace's `.bazelbsp/` directory.

mod backend;
mod buffer;
mod cached;
mod codec;
mod codec_store;
mod context;
mod error;
mod flat;
mod hash_key;
mod index;
mod kv;
mod memory;
mod paged;
#[cfg(feature = "redb")]
mod redb_store;
mod util;

pub use backend::ByteStore;
pub use buffer::{CodecBuffer, CodecReader};
pub use cached::{CachedStore, DEFAULT_CACHE_CAPACITY};
pub use codec::{
    decode_exact, encode_to_vec, BincodeCodec, BoolCodec, CodecContext, Hash128Codec, I64Codec,
    LabelCodec, SetCodec, StoreCodec, StringCodec, U64Codec, BINCODE_PAYLOAD_LIMIT_BYTES,
};
pub use codec_store::CodecStore;
pub use context::{StorageContext, StorageHints, STORAGE_DIR_NAME};
pub use error::{Result, StorageError};
pub use flat::FlatStore;
pub use hash_key::HashKeyStore;
pub use index::{OneToManyIndex, OneToOneIndex};
pub use kv::{KvStore, KvStoreExt};
pub use memory::MemoryStore;
pub use paged::{PagedStore, PAGED_FORMAT_VERSION};
#[cfg(feature = "redb")]
pub use redb_store::RedbStore;
