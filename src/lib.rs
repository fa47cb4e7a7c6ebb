//! Logbook: an authenticated append-only journal served over HTTP.
//!
//! Clients append timestamped text entries with `GET /?password=..&text=..`
//! and read the whole journal back verbatim with `GET /csv?password=..`.
//! Durable state is one blob under a fixed key in a whole-object store;
//! concurrent appends are reconciled with conditional puts keyed by a
//! version token, retried under bounded backoff, so no acknowledged
//! entry is lost to a read-modify-write race.

pub mod config;
pub mod journal;
pub mod net;
pub mod store;
pub mod util;

pub use config::SharedSecret;
pub use journal::{
    decode_percent_text, AppendError, Entry, ExportError, JournalService, LineError, TextError,
    DEFAULT_JOURNAL_KEY,
};
pub use net::{
    JournalHttpServer, JournalHttpServerConfig, JournalHttpServerHandle, NetError,
    SimpleHttpRequest,
};
pub use store::{BlobStore, BlobVersion, FetchedBlob, FsBlobStore, MemoryBlobStore, StoreError};
pub use util::{RetryHandle, RetryPolicy};
