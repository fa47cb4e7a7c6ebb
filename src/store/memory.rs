use super::{validate_key, BlobStore, BlobVersion, FetchedBlob, StoreError};
use std::collections::HashMap;
use std::io;
use std::sync::Mutex;

struct StoredObject {
    bytes: Vec<u8>,
    generation: u64,
}

/// Process-local blob store keyed by generation counters.
///
/// Mostly a test double, but it honors the full adapter contract
/// including conditional puts, so the journal's append loop behaves the
/// same against it as against a real store.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredObject>>, StoreError> {
        self.objects
            .lock()
            .map_err(|_| StoreError::unavailable(io::Error::other("memory blob store poisoned")))
    }
}

impl BlobStore for MemoryBlobStore {
    fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError> {
        validate_key(key)?;
        let objects = self.lock()?;
        Ok(objects.get(key).map(|object| FetchedBlob {
            bytes: object.bytes.clone(),
            version: BlobVersion::new(object.generation.to_string()),
        }))
    }

    fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError> {
        validate_key(key)?;
        let mut objects = self.lock()?;
        let next = objects.get(key).map(|o| o.generation + 1).unwrap_or(1);
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                generation: next,
            },
        );
        Ok(BlobVersion::new(next.to_string()))
    }

    fn replace_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&BlobVersion>,
    ) -> Result<BlobVersion, StoreError> {
        validate_key(key)?;
        let mut objects = self.lock()?;
        let current = objects
            .get(key)
            .map(|o| BlobVersion::new(o.generation.to_string()));
        if current.as_ref() != expected {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
            });
        }
        let next = objects.get(key).map(|o| o.generation + 1).unwrap_or(1);
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                generation: next,
            },
        );
        Ok(BlobVersion::new(next.to_string()))
    }
}
