//! Journal service: append and export over a single shared blob.
//!
//! The blob store offers no native append, so every append is a
//! read-modify-write over the whole object. Two writers racing on that
//! cycle would silently drop one entry, which is why the write side goes
//! through the store's conditional put: the loser of a race observes a
//! version conflict and re-runs the cycle against fresh contents under a
//! bounded backoff. An acknowledged append is therefore never lost;
//! exhausting the backoff budget fails loudly instead.

mod entry;

pub use entry::{decode_percent_text, Entry, LineError, TextError};

use crate::store::{BlobStore, StoreError};
use crate::util::RetryPolicy;
use log::{debug, warn};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Fixed key the journal blob lives under.
pub const DEFAULT_JOURNAL_KEY: &str = "journal.txt";

const APPEND_RETRY_ATTEMPTS: usize = 6;
const APPEND_RETRY_BASE_DELAY: Duration = Duration::from_millis(5);
const APPEND_RETRY_MAX_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum AppendError {
    /// Caller error: the text parameter could not be decoded or would
    /// corrupt the line format. Must never surface as a server fault.
    #[error("malformed entry text: {0}")]
    Malformed(#[from] TextError),
    /// Conditional puts kept conflicting until the retry budget ran out.
    #[error("append lost {attempts} version races in a row")]
    Contention { attempts: usize },
    /// The caller's deadline passed before the entry was durably written.
    #[error("append abandoned at its deadline")]
    DeadlineExceeded,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owns the append/export protocol for one journal blob.
///
/// Holds no cross-request state; all durable state lives in the store,
/// so any number of service instances may share one journal key as long
/// as they share the store's conditional-put semantics.
pub struct JournalService<S> {
    store: S,
    key: String,
    retry: RetryPolicy,
}

impl<S: BlobStore> JournalService<S> {
    pub fn new(store: S) -> Self {
        Self::with_key(store, DEFAULT_JOURNAL_KEY)
    }

    pub fn with_key(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            retry: RetryPolicy::exponential(APPEND_RETRY_ATTEMPTS, APPEND_RETRY_BASE_DELAY)
                .with_max_delay(APPEND_RETRY_MAX_DELAY)
                .with_jitter(0.3),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Decodes, validates, timestamps, and durably appends one entry.
    ///
    /// The raw parameter arrives percent-encoded; decoding failures are
    /// the caller's error. Existing journal contents are never parsed or
    /// validated on append, only extended.
    pub fn append(&self, raw_text: &str) -> Result<Entry, AppendError> {
        self.append_with_deadline(raw_text, None)
    }

    /// Like [`append`](Self::append), but abandons the write once
    /// `deadline` passes. The deadline is re-checked before every store
    /// read and every conditional put, so retries and backoff sleeps can
    /// never persist a line after the caller has given up.
    pub fn append_with_deadline(
        &self,
        raw_text: &str,
        deadline: Option<Instant>,
    ) -> Result<Entry, AppendError> {
        let text = decode_percent_text(raw_text)?;
        let entry = Entry::new(unix_seconds(), text)?;
        let line = entry.to_line();
        let mut handle = self.retry.handle();
        loop {
            if expired(deadline) {
                return Err(AppendError::DeadlineExceeded);
            }
            let current = self.store.fetch_all(&self.key)?;
            let (mut bytes, version) = match current {
                Some(blob) => (blob.bytes, Some(blob.version)),
                None => (Vec::new(), None),
            };
            bytes.extend_from_slice(line.as_bytes());
            if expired(deadline) {
                return Err(AppendError::DeadlineExceeded);
            }
            match self.store.replace_if_version(&self.key, &bytes, version.as_ref()) {
                Ok(_) => {
                    debug!(
                        "event=journal_append key={} timestamp={} line_bytes={} attempts={}",
                        self.key,
                        entry.timestamp(),
                        line.len(),
                        handle.attempts() + 1
                    );
                    return Ok(entry);
                }
                Err(err) if err.is_conflict() => match handle.next_delay() {
                    Some(delay) => {
                        debug!(
                            "event=journal_append_conflict key={} attempt={}",
                            self.key,
                            handle.attempts()
                        );
                        if !delay.is_zero() {
                            thread::sleep(delay);
                        }
                    }
                    None => {
                        warn!(
                            "event=journal_append_contention key={} attempts={}",
                            self.key,
                            handle.attempts() + 1
                        );
                        return Err(AppendError::Contention {
                            attempts: handle.attempts() + 1,
                        });
                    }
                },
                Err(err) => return Err(AppendError::Store(err)),
            }
        }
    }

    /// Returns the journal bytes verbatim; an absent blob is an empty
    /// journal, not an error.
    pub fn export(&self) -> Result<Vec<u8>, ExportError> {
        let bytes = self
            .store
            .fetch_all(&self.key)?
            .map(|blob| blob.bytes)
            .unwrap_or_default();
        debug!("event=journal_export key={} bytes={}", self.key, bytes.len());
        Ok(bytes)
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|at| Instant::now() >= at)
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::{AppendError, Entry, JournalService};
    use crate::store::{
        BlobStore, BlobVersion, FetchedBlob, MemoryBlobStore, StoreError,
    };
    use crate::util::RetryPolicy;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Store that fails every call, for exercising the unavailable path.
    struct OfflineStore;

    impl BlobStore for OfflineStore {
        fn fetch_all(&self, _key: &str) -> Result<Option<FetchedBlob>, StoreError> {
            Err(StoreError::unavailable(io::Error::other("store offline")))
        }

        fn replace_all(&self, _key: &str, _bytes: &[u8]) -> Result<BlobVersion, StoreError> {
            Err(StoreError::unavailable(io::Error::other("store offline")))
        }

        fn replace_if_version(
            &self,
            _key: &str,
            _bytes: &[u8],
            _expected: Option<&BlobVersion>,
        ) -> Result<BlobVersion, StoreError> {
            Err(StoreError::unavailable(io::Error::other("store offline")))
        }
    }

    /// Wrapper that injects version conflicts for the first N puts.
    struct ContendedStore {
        inner: MemoryBlobStore,
        conflicts_left: AtomicUsize,
    }

    impl ContendedStore {
        fn new(conflicts: usize) -> Self {
            Self {
                inner: MemoryBlobStore::new(),
                conflicts_left: AtomicUsize::new(conflicts),
            }
        }
    }

    impl BlobStore for ContendedStore {
        fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError> {
            self.inner.fetch_all(key)
        }

        fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError> {
            self.inner.replace_all(key, bytes)
        }

        fn replace_if_version(
            &self,
            key: &str,
            bytes: &[u8],
            expected: Option<&BlobVersion>,
        ) -> Result<BlobVersion, StoreError> {
            let left = self.conflicts_left.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::VersionConflict {
                    key: key.to_string(),
                });
            }
            self.inner.replace_if_version(key, bytes, expected)
        }
    }

    /// Wrapper whose reads stall, so a deadline can lapse mid-append.
    struct SlowReadStore {
        inner: MemoryBlobStore,
        read_delay: Duration,
    }

    impl BlobStore for SlowReadStore {
        fn fetch_all(&self, key: &str) -> Result<Option<FetchedBlob>, StoreError> {
            thread::sleep(self.read_delay);
            self.inner.fetch_all(key)
        }

        fn replace_all(&self, key: &str, bytes: &[u8]) -> Result<BlobVersion, StoreError> {
            self.inner.replace_all(key, bytes)
        }

        fn replace_if_version(
            &self,
            key: &str,
            bytes: &[u8],
            expected: Option<&BlobVersion>,
        ) -> Result<BlobVersion, StoreError> {
            self.inner.replace_if_version(key, bytes, expected)
        }
    }

    fn fast_retry(attempts: usize) -> RetryPolicy {
        RetryPolicy::exponential(attempts, Duration::ZERO)
    }

    #[test]
    fn sequential_appends_produce_one_line_each() {
        let service = JournalService::new(MemoryBlobStore::new());
        for text in ["first", "second%20entry", "third"] {
            service.append(text).expect("append");
        }
        let exported = String::from_utf8(service.export().expect("export")).expect("utf8");
        let lines: Vec<_> = exported.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            Entry::parse_line(line).expect("well-formed line");
        }
        assert!(lines[1].ends_with(",second entry"));
    }

    #[test]
    fn export_before_any_append_is_empty() {
        let service = JournalService::new(MemoryBlobStore::new());
        assert!(service.export().expect("export").is_empty());
    }

    #[test]
    fn malformed_text_is_a_caller_error_and_writes_nothing() {
        let store = MemoryBlobStore::new();
        let service = JournalService::new(&store);
        for raw in ["bad%zz", "trail%2", "nl%0Ainside", "byte%FF"] {
            let err = service.append(raw).expect_err("malformed input");
            assert!(matches!(err, AppendError::Malformed(_)), "raw={raw}");
        }
        assert!(store.fetch_all("journal.txt").expect("fetch").is_none());
    }

    #[test]
    fn store_outage_maps_to_store_error() {
        let service = JournalService::new(OfflineStore);
        assert!(matches!(
            service.append("hello").expect_err("append fails"),
            AppendError::Store(StoreError::Unavailable { .. })
        ));
        assert!(service.export().is_err());
    }

    #[test]
    fn append_retries_through_transient_conflicts() {
        let store = ContendedStore::new(2);
        let service = JournalService::new(&store).with_retry_policy(fast_retry(4));
        service.append("survives%20the%20race").expect("append");
        let blob = store
            .fetch_all("journal.txt")
            .expect("fetch")
            .expect("present");
        let text = String::from_utf8(blob.bytes).expect("utf8");
        assert!(text.ends_with(",survives the race\n"));
    }

    #[test]
    fn append_gives_up_after_retry_budget() {
        let store = ContendedStore::new(usize::MAX);
        let service = JournalService::new(&store).with_retry_policy(fast_retry(3));
        match service.append("never%20lands").expect_err("contention") {
            AppendError::Contention { attempts } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn append_abandons_once_deadline_passes() {
        let store = SlowReadStore {
            inner: MemoryBlobStore::new(),
            read_delay: Duration::from_millis(100),
        };
        let service = JournalService::new(&store);
        let deadline = Instant::now() + Duration::from_millis(10);
        let err = service
            .append_with_deadline("too%20late", Some(deadline))
            .expect_err("deadline lapses during the slow read");
        assert!(matches!(err, AppendError::DeadlineExceeded));
        assert!(
            store.inner.fetch_all("journal.txt").expect("fetch").is_none(),
            "an abandoned append must not persist a line"
        );
    }

    #[test]
    fn append_without_deadline_is_unbounded() {
        let store = SlowReadStore {
            inner: MemoryBlobStore::new(),
            read_delay: Duration::from_millis(20),
        };
        let service = JournalService::new(&store);
        service.append("still%20lands").expect("append");
        assert!(store.inner.fetch_all("journal.txt").expect("fetch").is_some());
    }

    #[test]
    fn custom_key_is_respected() {
        let store = MemoryBlobStore::new();
        let service = JournalService::with_key(&store, "scratch.txt");
        service.append("hi").expect("append");
        assert!(store.fetch_all("scratch.txt").expect("fetch").is_some());
        assert!(store.fetch_all("journal.txt").expect("fetch").is_none());
    }
}
