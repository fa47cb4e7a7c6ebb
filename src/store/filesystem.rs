use super::{validate_key, BlobStore, BlobVersion, FetchedBlob, StoreError};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Blob store backed by one file per key under a root directory.
///
/// Version tokens are SHA-256 content digests, so a conditional put can
/// detect that the object changed since it was read. The compare step
/// and the replacing rename are serialized behind an internal mutex;
/// the store therefore assumes it is the only process writing under its
/// root, and documents that as its consistency guarantee.
pub struct FsBlobStore {
    root: PathBuf,
    put_lock: Mutex<()>,
}

impl FsBlobStore {
    /// Opens (and creates if needed) the root directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(StoreError::unavailable)?;
        Ok(Self {
            root,
            put_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn read_object(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::unavailable(err)),
        }
    }

    /// Writes to a scratch file then renames over the target, so readers
    /// only ever observe a whole object.
    fn write_object(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let scratch = scratch_path(path);
        let result = (|| -> io::Result<()> {
            let mut file = File::create(&scratch)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&scratch, path)
        })();
        if result.is_err() {
            let _ = fs::remove_file(&scratch);
        }
        result.map_err(StoreError::unavailable)
    }
}

impl BlobStore for FsBlobStore {
    fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError> {
        let path = self.object_path(key)?;
        Ok(self.read_object(&path)?.map(|bytes| {
            let version = content_version(&bytes);
            FetchedBlob { bytes, version }
        }))
    }

    fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError> {
        let path = self.object_path(key)?;
        let _guard = self.lock_puts()?;
        self.write_object(&path, bytes)?;
        Ok(content_version(bytes))
    }

    fn replace_if_version(
        &self,
        key: &str,
        bytes: &[u8],
        expected: Option<&BlobVersion>,
    ) -> Result<BlobVersion, StoreError> {
        let path = self.object_path(key)?;
        let _guard = self.lock_puts()?;
        let current = self.read_object(&path)?.map(|bytes| content_version(&bytes));
        if current.as_ref() != expected {
            return Err(StoreError::VersionConflict {
                key: key.to_string(),
            });
        }
        self.write_object(&path, bytes)?;
        Ok(content_version(bytes))
    }
}

impl FsBlobStore {
    fn lock_puts(&self) -> Result<std::sync::MutexGuard<'_, ()>, StoreError> {
        self.put_lock
            .lock()
            .map_err(|_| StoreError::unavailable(io::Error::other("fs blob store poisoned")))
    }
}

fn content_version(bytes: &[u8]) -> BlobVersion {
    BlobVersion::new(hex::encode(Sha256::digest(bytes)))
}

fn scratch_path(target: &Path) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".put-{nanos}"));
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::FsBlobStore;
    use crate::store::{BlobStore, StoreError};
    use tempfile::TempDir;

    #[test]
    fn absent_object_reads_as_none() {
        let temp = TempDir::new().expect("tempdir");
        let store = FsBlobStore::open(temp.path()).expect("open");
        assert!(store.fetch_all("journal.txt").expect("fetch").is_none());
    }

    #[test]
    fn put_then_get_roundtrip() {
        let temp = TempDir::new().expect("tempdir");
        let store = FsBlobStore::open(temp.path()).expect("open");
        let version = store
            .replace_all("journal.txt", b"1700000000,hello\n")
            .expect("put");
        let fetched = store
            .fetch_all("journal.txt")
            .expect("fetch")
            .expect("present");
        assert_eq!(fetched.bytes, b"1700000000,hello\n");
        assert_eq!(fetched.version, version);
    }

    #[test]
    fn conditional_put_rejects_stale_digest() {
        let temp = TempDir::new().expect("tempdir");
        let store = FsBlobStore::open(temp.path()).expect("open");
        let stale = store.replace_all("journal.txt", b"one\n").expect("seed");
        store
            .replace_all("journal.txt", b"one\ntwo\n")
            .expect("advance");
        let err = store
            .replace_if_version("journal.txt", b"one\nthree\n", Some(&stale))
            .expect_err("stale digest");
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[test]
    fn conditional_create_only_succeeds_once() {
        let temp = TempDir::new().expect("tempdir");
        let store = FsBlobStore::open(temp.path()).expect("open");
        store
            .replace_if_version("journal.txt", b"first\n", None)
            .expect("create");
        assert!(store
            .replace_if_version("journal.txt", b"second\n", None)
            .is_err());
    }

    #[test]
    fn scratch_files_do_not_linger() {
        let temp = TempDir::new().expect("tempdir");
        let store = FsBlobStore::open(temp.path()).expect("open");
        store.replace_all("journal.txt", b"a\n").expect("put");
        store.replace_all("journal.txt", b"a\nb\n").expect("put");
        let names: Vec<_> = std::fs::read_dir(temp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("journal.txt")]);
    }
}
