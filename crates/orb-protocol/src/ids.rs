//! Adapter and object identifiers.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identifier of an object adapter, unique within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterId(pub u32);

impl AdapterId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Decode the big-endian adapter id carried in a routing key.
    pub fn from_key(key: &[u8]) -> Option<Self> {
        let bytes: [u8; 4] = key.try_into().ok()?;
        Some(Self(u32::from_be_bytes(bytes)))
    }

    pub fn to_key(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl std::fmt::Display for AdapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for AdapterId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Opaque object key, meaningful only to the adapter that issued it.
///
/// Backed by [`Bytes`] so that contexts and references can be cloned on the
/// hot path without copying the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(Bytes);

impl ObjectId {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s).map(|v| Self(Bytes::from(v)))
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let printable = !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic());
        if printable {
            // ascii_graphic bytes are always valid utf-8
            f.write_str(&String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "0x{}", self.to_hex())
        }
    }
}

impl From<&'static str> for ObjectId {
    fn from(s: &'static str) -> Self {
        Self::from_static(s.as_bytes())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(Bytes::from(s))
    }
}

impl From<Vec<u8>> for ObjectId {
    fn from(v: Vec<u8>) -> Self {
        Self(Bytes::from(v))
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
