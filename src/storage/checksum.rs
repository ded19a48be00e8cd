//! Part checksums using BLAKE3

use serde::{Serialize, Serializer};
use std::fmt;

/// BLAKE3 digest of a part payload (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartChecksum([u8; 32]);

impl PartChecksum {
    /// Hash data and return its checksum
    pub fn hash(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify that data matches this checksum
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::hash(data) == *self
    }
}

impl fmt::Debug for PartChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartChecksum({})", self.to_hex())
    }
}

impl fmt::Display for PartChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for PartChecksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_verify() {
        let sum = PartChecksum::hash(b"Hello, chunk vault!");

        assert!(sum.verify(b"Hello, chunk vault!"));
        assert!(!sum.verify(b"Hello, chunk vault?"));
    }

    #[test]
    fn test_serializes_as_hex() {
        let sum = PartChecksum::hash(b"");
        let json = serde_json::to_string(&sum).unwrap();

        assert_eq!(json, format!("\"{}\"", sum.to_hex()));
    }
}
