//! Delete vectors.
//!
//! A delete vector marks rows within one segment as logically deleted. It
//! is a roaring bitmap stamped with the version that produced it; the
//! bitmap payload is stored in delvec files located through
//! `DelvecMeta` pages.

use roaring::RoaringBitmap;
use thiserror::Error;

/// Errors raised while decoding a delete-vector payload.
#[derive(Debug, Error)]
pub enum DelVectorError {
    /// Payload bytes do not decode to a roaring bitmap
    #[error("corrupted delete vector payload: {0}")]
    Corrupted(String),
}

/// Row-deletion bitmap for one segment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelVector {
    version: u64,
    deletes: RoaringBitmap,
}

impl DelVector {
    /// Create an empty delete vector at the given version
    pub fn new(version: u64) -> Self {
        Self {
            version,
            deletes: RoaringBitmap::new(),
        }
    }

    /// Decode a serialized bitmap payload, stamping it with `version`.
    pub fn load(version: u64, bytes: &[u8]) -> Result<Self, DelVectorError> {
        let deletes = RoaringBitmap::deserialize_from(bytes)
            .map_err(|e| DelVectorError::Corrupted(e.to_string()))?;
        Ok(Self { version, deletes })
    }

    /// Serialize the bitmap payload.
    pub fn save(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.deletes.serialized_size());
        // serialization into a Vec cannot fail
        self.deletes
            .serialize_into(&mut buf)
            .unwrap_or_else(|e| unreachable!("serialize into Vec failed: {e}"));
        buf
    }

    /// Version that produced this delete vector
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mark a row as deleted
    pub fn mark_deleted(&mut self, row: u32) {
        self.deletes.insert(row);
    }

    /// True when the row is marked deleted
    pub fn is_deleted(&self, row: u32) -> bool {
        self.deletes.contains(row)
    }

    /// Number of deleted rows
    pub fn cardinality(&self) -> u64 {
        self.deletes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let mut delvec = DelVector::new(5);
        delvec.mark_deleted(3);
        delvec.mark_deleted(77);
        delvec.mark_deleted(100_000);

        let bytes = delvec.save();
        let loaded = DelVector::load(5, &bytes).unwrap();

        assert_eq!(loaded.version(), 5);
        assert_eq!(loaded.cardinality(), 3);
        assert!(loaded.is_deleted(77));
        assert!(!loaded.is_deleted(78));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let err = DelVector::load(1, &[0xde, 0xad, 0xbe]).unwrap_err();
        assert!(matches!(err, DelVectorError::Corrupted(_)));
    }
}
