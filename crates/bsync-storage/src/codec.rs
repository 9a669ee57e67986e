use crate::buffer::{CodecBuffer, CodecReader};
use crate::error::{Result, StorageError};
use bincode::Options;
use bsync_core::{Hash128, Label};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::marker::PhantomData;

/// Upper bound for a single bincode payload read back from disk.
pub const BINCODE_PAYLOAD_LIMIT_BYTES: u64 = 64 * 1024 * 1024;

/// Per-store state passed to every codec call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecContext {
    pub format_version: u32,
}

impl CodecContext {
    pub const CURRENT_FORMAT_VERSION: u32 = 1;
}

impl Default for CodecContext {
    fn default() -> Self {
        Self {
            format_version: Self::CURRENT_FORMAT_VERSION,
        }
    }
}

/// Binary encoding of `T` into a [`CodecBuffer`].
pub trait StoreCodec<T>: Send + Sync {
    fn encode(&self, ctx: &CodecContext, value: &T, buf: &mut CodecBuffer) -> Result<()>;
    fn decode(&self, ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<T>;
}

pub fn encode_to_vec<T, C: StoreCodec<T> + ?Sized>(
    codec: &C,
    ctx: &CodecContext,
    value: &T,
) -> Result<Vec<u8>> {
    let mut buf = CodecBuffer::new();
    codec.encode(ctx, value, &mut buf)?;
    Ok(buf.into_vec())
}

/// Decode a whole buffer; trailing bytes are an error.
pub fn decode_exact<T, C: StoreCodec<T> + ?Sized>(
    codec: &C,
    ctx: &CodecContext,
    bytes: &[u8],
) -> Result<T> {
    let mut reader = CodecReader::new(bytes);
    let value = codec.decode(ctx, &mut reader)?;
    reader.finish()?;
    Ok(value)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl StoreCodec<String> for StringCodec {
    fn encode(&self, _ctx: &CodecContext, value: &String, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_str(value);
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<String> {
        Ok(reader.read_str()?.to_owned())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct U64Codec;

impl StoreCodec<u64> for U64Codec {
    fn encode(&self, _ctx: &CodecContext, value: &u64, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_varint(*value);
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<u64> {
        reader.read_varint()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct I64Codec;

impl StoreCodec<i64> for I64Codec {
    fn encode(&self, _ctx: &CodecContext, value: &i64, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_varint_i64(*value);
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<i64> {
        reader.read_varint_i64()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BoolCodec;

impl StoreCodec<bool> for BoolCodec {
    fn encode(&self, _ctx: &CodecContext, value: &bool, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_bool(*value);
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<bool> {
        reader.read_bool()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LabelCodec;

impl StoreCodec<Label> for LabelCodec {
    fn encode(&self, _ctx: &CodecContext, value: &Label, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_str(value.repo_name());
        buf.write_str(value.package_name());
        buf.write_str(value.target_name());
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<Label> {
        let repo = reader.read_str()?;
        let package = reader.read_str()?;
        let target = reader.read_str()?;
        Ok(Label::new(repo, package, target))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Hash128Codec;

impl StoreCodec<Hash128> for Hash128Codec {
    fn encode(&self, _ctx: &CodecContext, value: &Hash128, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_u128(value.as_u128());
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<Hash128> {
        Ok(Hash128::from_u128(reader.read_u128()?))
    }
}

/// Sorted set of `T`, element count first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetCodec<C>(pub C);

impl<T: Ord, C: StoreCodec<T>> StoreCodec<BTreeSet<T>> for SetCodec<C> {
    fn encode(&self, ctx: &CodecContext, value: &BTreeSet<T>, buf: &mut CodecBuffer) -> Result<()> {
        buf.write_varint(value.len() as u64);
        for item in value {
            self.0.encode(ctx, item, buf)?;
        }
        Ok(())
    }

    fn decode(&self, ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<BTreeSet<T>> {
        let len = reader.read_varint()?;
        let mut out = BTreeSet::new();
        for _ in 0..len {
            out.insert(self.0.decode(ctx, reader)?);
        }
        Ok(out)
    }
}

/// Length-prefixed bincode payload for any serde type.
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for BincodeCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

fn bincode_options() -> impl bincode::Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

impl<T: Serialize + DeserializeOwned> StoreCodec<T> for BincodeCodec<T> {
    fn encode(&self, _ctx: &CodecContext, value: &T, buf: &mut CodecBuffer) -> Result<()> {
        let bytes = bincode_options().serialize(value)?;
        buf.write_bytes(&bytes);
        Ok(())
    }

    fn decode(&self, _ctx: &CodecContext, reader: &mut CodecReader<'_>) -> Result<T> {
        let bytes = reader.read_bytes()?;
        if bytes.len() as u64 > BINCODE_PAYLOAD_LIMIT_BYTES {
            return Err(StorageError::decode(format!(
                "bincode payload of {} bytes exceeds limit",
                bytes.len()
            )));
        }
        Ok(bincode_options()
            .with_limit(BINCODE_PAYLOAD_LIMIT_BYTES)
            .deserialize(bytes)?)
    }
}
