//! Raw upload storage, content-addressed by SHA-256

use dashmap::DashMap;
use specmatrix_model::ContentDigest;
use std::sync::Arc;

/// Raw file store
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their digest as locator
    fn save(&self, bytes: &[u8]) -> ContentDigest;

    /// Bytes for a locator
    fn read(&self, locator: &ContentDigest) -> Option<Arc<[u8]>>;

    /// Remove bytes; returns whether they existed
    fn delete(&self, locator: &ContentDigest) -> bool;
}

/// In-memory blob store
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<ContentDigest, Arc<[u8]>>,
}

impl MemoryBlobStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite stored bytes without re-addressing them
    pub fn corrupt(&self, locator: &ContentDigest, bytes: &[u8]) {
        self.blobs.insert(*locator, Arc::from(bytes));
    }

    /// Number of stored blobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(&self, bytes: &[u8]) -> ContentDigest {
        let digest = ContentDigest::compute(bytes);
        self.blobs.entry(digest).or_insert_with(|| Arc::from(bytes));
        digest
    }

    fn read(&self, locator: &ContentDigest) -> Option<Arc<[u8]>> {
        self.blobs.get(locator).map(|b| Arc::clone(b.value()))
    }

    fn delete(&self, locator: &ContentDigest) -> bool {
        self.blobs.remove(locator).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_addressed() {
        let store = MemoryBlobStore::new();
        let a = store.save(b"hello");
        let b = store.save(b"hello");
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(&*store.read(&a).unwrap(), b"hello");
        assert!(store.delete(&a));
        assert!(store.read(&a).is_none());
    }
}
