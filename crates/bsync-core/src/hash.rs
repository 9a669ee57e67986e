use crate::Label;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use xxhash_rust::xxh3::Xxh3;

/// 128-bit non-cryptographic fingerprint (xxh3).
///
/// Used for change detection and as a fixed-width stand-in for complex keys. Never used as an
/// identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash128(u128);

impl Hash128 {
    pub const ZERO: Hash128 = Hash128(0);

    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 16] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_le_bytes(bytes))
    }

    /// Hash a single value with a fresh hasher.
    pub fn of<T: HashInto + ?Sized>(value: &T) -> Self {
        let mut hasher = Hasher128::new();
        value.hash_into(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for Hash128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Streaming builder for [`Hash128`].
///
/// Every variable-length input is length-prefixed, so `("ab", "c")` and `("a", "bc")` hash
/// differently.
pub struct Hasher128 {
    inner: Xxh3,
}

impl Hasher128 {
    pub fn new() -> Self {
        Self { inner: Xxh3::new() }
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.inner.update(&[value]);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    pub fn put_i64(&mut self, value: i64) -> &mut Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u64(bytes.len() as u64);
        self.inner.update(bytes);
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    pub fn put_label(&mut self, label: &Label) -> &mut Self {
        self.put_str(label.repo_name())
            .put_str(label.package_name())
            .put_str(label.target_name())
    }

    pub fn put_hash(&mut self, hash: Hash128) -> &mut Self {
        self.inner.update(&hash.to_le_bytes());
        self
    }

    pub fn put<T: HashInto + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash_into(self);
        self
    }

    pub fn finish(&self) -> Hash128 {
        Hash128(self.inner.digest128())
    }
}

impl Default for Hasher128 {
    fn default() -> Self {
        Self::new()
    }
}

/// Values with a canonical 128-bit hash encoding.
pub trait HashInto {
    fn hash_into(&self, hasher: &mut Hasher128);
}

impl HashInto for Label {
    fn hash_into(&self, hasher: &mut Hasher128) {
        hasher.put_label(self);
    }
}

impl HashInto for str {
    fn hash_into(&self, hasher: &mut Hasher128) {
        hasher.put_str(self);
    }
}

impl HashInto for String {
    fn hash_into(&self, hasher: &mut Hasher128) {
        hasher.put_str(self);
    }
}

impl HashInto for u64 {
    fn hash_into(&self, hasher: &mut Hasher128) {
        hasher.put_u64(*self);
    }
}

impl HashInto for Hash128 {
    fn hash_into(&self, hasher: &mut Hasher128) {
        hasher.put_hash(*self);
    }
}

impl HashInto for Path {
    fn hash_into(&self, hasher: &mut Hasher128) {
        hasher.put_str(&self.to_string_lossy());
    }
}

impl<A: HashInto, B: HashInto> HashInto for (A, B) {
    fn hash_into(&self, hasher: &mut Hasher128) {
        self.0.hash_into(hasher);
        self.1.hash_into(hasher);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_same_hash() {
        let a = Hash128::of(&Label::parse("//a:b"));
        let b = Hash128::of(&Label::parse("//a:b"));
        assert_eq!(a, b);
        assert_ne!(a, Hash128::of(&Label::parse("//a:c")));
    }

    #[test]
    fn length_prefix_prevents_concatenation_collisions() {
        let mut left = Hasher128::new();
        left.put_str("ab").put_str("c");
        let mut right = Hasher128::new();
        right.put_str("a").put_str("bc");
        assert_ne!(left.finish(), right.finish());
    }

    #[test]
    fn bytes_round_trip() {
        let hash = Hash128::of("payload");
        assert_eq!(Hash128::from_le_bytes(hash.to_le_bytes()), hash);
        assert_eq!(hash.to_string().len(), 32);
    }
}
