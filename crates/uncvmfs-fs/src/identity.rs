//! SHA-256 content identities
//!
//! A [`ContentId`] names a blob by the digest of its bytes. It is used both to
//! detect changes between syncs and to address the local content store.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Size of a content identity in bytes
pub const IDENTITY_LEN: usize = 32;

/// Fixed-size digest identifying file content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; IDENTITY_LEN]);

impl ContentId {
    pub const fn from_bytes(bytes: [u8; IDENTITY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// Identity of an in-memory buffer.
    pub fn of(content: &[u8]) -> Self {
        Self::from_digest(Sha256::digest(content).as_slice())
    }

    /// Identity of everything readable from `reader`.
    pub fn of_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Self::from_digest(hasher.finalize().as_slice()))
    }

    fn from_digest(digest: &[u8]) -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes.copy_from_slice(digest);
        Self(bytes)
    }

    /// Identity of a file's contents.
    pub fn of_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Self::of_reader(file).map_err(|e| Error::io(path, e))
    }

    pub fn from_hex(value: &str) -> Result<Self> {
        let mut bytes = [0u8; IDENTITY_LEN];
        hex::decode_to_slice(value, &mut bytes).map_err(|_| Error::InvalidIdentity {
            value: value.to_string(),
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Two-level fan-out used by content stores: the first byte as a
    /// directory name, the remainder as the file name.
    pub fn fan_out(&self) -> (String, String) {
        let hex = self.to_hex();
        let (head, tail) = hex.split_at(2);
        (head.to_string(), tail.to_string())
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentId({})", self.to_hex())
    }
}

impl std::str::FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
