//! Blob store adapter: whole-object get/put over an opaque key space.
//!
//! The backing store has no native append or locking primitive, so the
//! only concurrency control offered here is an optional conditional put
//! keyed by an opaque version token. Retry policy lives with the caller.

mod filesystem;
mod memory;

pub use filesystem::FsBlobStore;
pub use memory::MemoryBlobStore;

use std::io;
use thiserror::Error;

/// Opaque token identifying one observed state of a blob.
///
/// Tokens are only meaningful to the store that issued them and are
/// compared for exact equality on conditional puts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobVersion(String);

impl BlobVersion {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Full contents of a blob together with the version observed at read time.
#[derive(Clone, Debug)]
pub struct FetchedBlob {
    pub bytes: Vec<u8>,
    pub version: BlobVersion,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store failed on read or write for any reason other than
    /// "object absent" (absence is a normal branch, never an error).
    #[error("blob store unavailable: {source}")]
    Unavailable {
        #[source]
        source: io::Error,
    },
    /// A conditional put observed a version other than the expected one.
    #[error("version conflict on `{key}`")]
    VersionConflict { key: String },
    /// Keys are opaque names, not paths; separators and traversal are refused.
    #[error("invalid blob key `{key}`")]
    InvalidKey { key: String },
}

impl StoreError {
    pub(crate) fn unavailable(source: io::Error) -> Self {
        Self::Unavailable { source }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// Adapter contract for the external key→bytes blob store.
///
/// `fetch_all` must return `Ok(None)` for an absent key and reserve the
/// error path for genuine store failures. `replace_all` overwrites the
/// object whole; atomicity is whatever the backing store grants a
/// full-object put, nothing stronger. `replace_if_version` is the
/// compare-and-swap primitive the journal's append loop builds on:
/// `expected = None` means "create only if absent".
pub trait BlobStore: Send + Sync {
    fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError>;

    fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError>;

    fn replace_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&BlobVersion>,
    ) -> Result<BlobVersion, StoreError>;
}

impl<'a, S: BlobStore + ?Sized> BlobStore for &'a S {
    fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError> {
        (**self).fetch_all(key)
    }

    fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError> {
        (**self).replace_all(key, bytes)
    }

    fn replace_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&BlobVersion>,
    ) -> Result<BlobVersion, StoreError> {
        (**self).replace_if_version(key, bytes, expected)
    }
}

impl<S: BlobStore + ?Sized> BlobStore for std::sync::Arc<S> {
    fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError> {
        (**self).fetch_all(key)
    }

    fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError> {
        (**self).replace_all(key, bytes)
    }

    fn replace_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&BlobVersion>,
    ) -> Result<BlobVersion, StoreError> {
        (**self).replace_if_version(key, bytes, expected)
    }
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0');
    if bad {
        return Err(StoreError::InvalidKey {
            key: key.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_key;

    #[test]
    fn rejects_path_like_keys() {
        for key in ["", ".", "..", "a/b", "a\\b", "nul\0"] {
            assert!(validate_key(key).is_err(), "key {key:?} should be rejected");
        }
        assert!(validate_key("journal.txt").is_ok());
    }
}
