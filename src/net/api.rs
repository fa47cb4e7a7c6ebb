//! HTTP surface for the journal: routing, authentication, and the
//! mapping from service errors onto status codes.
//!
//! Everything here is GET-only. Success bodies are plain text (empty for
//! an append); failures carry a JSON error envelope. Parameter and
//! password checks run before any store call, so a rejected request
//! never mutates the journal.

use super::http::{
    read_request, write_json_error, write_response, RequestDeadline, SimpleHttpRequest,
};
use super::server::{self, ServerHandle};
use crate::config::SharedSecret;
use crate::journal::{AppendError, ExportError, JournalService};
use crate::store::BlobStore;
use log::{info, warn};
use percent_encoding::percent_decode_str;
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_CONNECTIONS: usize = 64;

pub struct JournalHttpServerConfig {
    pub bind: SocketAddr,
    pub secret: SharedSecret,
    pub max_connections: Option<usize>,
    pub request_timeout: Duration,
}

impl JournalHttpServerConfig {
    pub fn new(bind: SocketAddr, secret: SharedSecret) -> Self {
        Self {
            bind,
            secret,
            max_connections: Some(DEFAULT_MAX_CONNECTIONS),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct JournalHttpServerHandle {
    inner: ServerHandle,
}

impl JournalHttpServerHandle {
    pub fn shutdown(&mut self) {
        if let Err(err) = self.try_shutdown(Duration::from_secs(5)) {
            warn!("event=journal_http_shutdown_error error={err}");
        }
    }

    pub fn try_shutdown(&mut self, timeout: Duration) -> Result<(), crate::net::NetError> {
        self.inner.try_shutdown(timeout)
    }
}

pub struct JournalHttpServer;

impl JournalHttpServer {
    /// Binds the listener and serves journal requests until the handle
    /// is shut down or dropped.
    pub fn spawn<S>(
        config: JournalHttpServerConfig,
        service: JournalService<S>,
    ) -> Result<JournalHttpServerHandle, crate::net::NetError>
    where
        S: BlobStore + 'static,
    {
        let listener = TcpListener::bind(config.bind)?;
        info!("event=journal_http_listening bind={}", config.bind);
        let secret = Arc::new(config.secret);
        let service = Arc::new(service);
        let request_timeout = config.request_timeout;
        let handler = move |mut stream: TcpStream,
                            addr: SocketAddr,
                            _shutdown: Arc<AtomicBool>|
              -> Result<(), crate::net::NetError> {
            configure_stream(&stream, request_timeout)?;
            let deadline = RequestDeadline::from_timeout(request_timeout);
            let request = match read_request(&mut stream) {
                Ok(request) => request,
                Err(err) => {
                    warn!("event=journal_http_bad_request addr={addr} error={err}");
                    write_json_error(&mut stream, 400, "invalid HTTP request")?;
                    return Ok(());
                }
            };
            handle_journal_request(&deadline, &request, &secret, &service, &mut stream)
        };
        let inner = server::spawn_listener(
            "journal_http",
            listener,
            config.max_connections,
            handler,
        )?;
        Ok(JournalHttpServerHandle { inner })
    }
}

/// Routes one parsed request and writes the full response.
///
/// Factored out of the connection path so tests can drive it against an
/// in-memory stream buffer.
pub(crate) fn handle_journal_request<S: BlobStore>(
    deadline: &RequestDeadline,
    request: &SimpleHttpRequest,
    secret: &SharedSecret,
    service: &JournalService<S>,
    stream: &mut (impl Write + ?Sized),
) -> Result<(), crate::net::NetError> {
    if request.method != "GET" {
        warn!(
            "event=journal_http_method_not_allowed method={} path={}",
            request.method, request.path
        );
        return write_json_error(stream, 405, "method not allowed");
    }
    match request.path.as_str() {
        "/" => handle_append(deadline, request, secret, service, stream),
        "/csv" => handle_export(deadline, request, secret, service, stream),
        _ => {
            warn!("event=journal_http_unknown_path path={}", request.path);
            write_json_error(stream, 404, "not found")
        }
    }
}

fn handle_append<S: BlobStore>(
    deadline: &RequestDeadline,
    request: &SimpleHttpRequest,
    secret: &SharedSecret,
    service: &JournalService<S>,
    stream: &mut (impl Write + ?Sized),
) -> Result<(), crate::net::NetError> {
    let query = request.query.as_deref().unwrap_or("");
    let Some(password) = raw_query_param(query, "password") else {
        return write_json_error(stream, 400, "missing `password` query parameter");
    };
    let Some(text) = raw_query_param(query, "text") else {
        return write_json_error(stream, 400, "missing `text` query parameter");
    };
    if !authenticate(secret, password) {
        warn!("event=journal_auth_failed path=/");
        return write_json_error(stream, 401, "unauthorized");
    }
    if !deadline.respond_if_expired(stream)? {
        return Ok(());
    }
    match service.append_with_deadline(text, Some(deadline.expires_at())) {
        Ok(entry) => {
            info!(
                "event=journal_entry_appended timestamp={} text_bytes={}",
                entry.timestamp(),
                entry.text().len()
            );
            write_response(stream, 200, "text/plain", b"")
        }
        Err(AppendError::Malformed(err)) => {
            warn!("event=journal_append_rejected reason={err}");
            write_json_error(stream, 400, &format!("malformed text parameter: {err}"))
        }
        Err(err @ AppendError::Contention { .. }) => {
            warn!("event=journal_append_failed error={err}");
            write_json_error(stream, 500, "journal store contention")
        }
        Err(AppendError::DeadlineExceeded) => {
            warn!("event=journal_append_failed error=deadline");
            write_json_error(stream, 500, "request deadline exceeded")
        }
        Err(AppendError::Store(err)) => {
            warn!("event=journal_append_failed error={err}");
            write_json_error(stream, 500, "journal store unavailable")
        }
    }
}

fn handle_export<S: BlobStore>(
    deadline: &RequestDeadline,
    request: &SimpleHttpRequest,
    secret: &SharedSecret,
    service: &JournalService<S>,
    stream: &mut (impl Write + ?Sized),
) -> Result<(), crate::net::NetError> {
    let query = request.query.as_deref().unwrap_or("");
    let Some(password) = raw_query_param(query, "password") else {
        return write_json_error(stream, 400, "missing `password` query parameter");
    };
    if !authenticate(secret, password) {
        warn!("event=journal_auth_failed path=/csv");
        return write_json_error(stream, 401, "unauthorized");
    }
    if !deadline.respond_if_expired(stream)? {
        return Ok(());
    }
    match service.export() {
        Ok(bytes) => write_response(stream, 200, "text/plain", &bytes),
        Err(ExportError::Store(err)) => {
            warn!("event=journal_export_failed error={err}");
            write_json_error(stream, 500, "journal store unavailable")
        }
    }
}

/// Returns the raw (still percent-encoded) value of `key`.
///
/// An empty value counts as missing: `text=` is as much a caller error
/// as omitting the parameter entirely.
fn raw_query_param<'a>(query: &'a str, key: &str) -> Option<&'a str> {
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (name == key && !value.is_empty()).then_some(value)
    })
}

/// The password arrives percent-encoded like any query value. It is
/// decoded leniently; anything that fails to decode simply fails the
/// equality check and yields a 401.
fn authenticate(secret: &SharedSecret, raw_password: &str) -> bool {
    let presented = percent_decode_str(raw_password).decode_utf8_lossy();
    secret.matches(&presented)
}

fn configure_stream(
    stream: &TcpStream,
    timeout: Duration,
) -> Result<(), crate::net::NetError> {
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    Ok(())
}
