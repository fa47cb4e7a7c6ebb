pub mod api;
mod http;
mod server;

pub use api::{JournalHttpServer, JournalHttpServerConfig, JournalHttpServerHandle};
pub use http::{read_request, SimpleHttpRequest};

use thiserror::Error;

/// Errors emitted by the built-in networking helpers.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("connection closed while reading headers")]
    ConnectionClosedBeforeHeaders,
    #[error("missing HTTP header terminator")]
    MissingHeaderTerminator,
    #[error("HTTP headers exceed limit")]
    HeadersTooLarge,
    #[error("partial HTTP request received")]
    PartialRequest,
    #[error("HTTP request timed out")]
    RequestTimeout,
    #[error("HTTP request parse error: {0:?}")]
    RequestParse(httparse::Error),
    #[error("HTTP method missing")]
    MissingMethod,
    #[error("HTTP path missing")]
    MissingPath,
    #[error("invalid header value for {name}")]
    InvalidHeaderValue { name: String },
    #[error("invalid Content-Length header value")]
    InvalidContentLengthValue,
    #[error("HTTP body exceeds limit")]
    BodyTooLarge,
    #[error("connection closed before HTTP body completed")]
    ConnectionClosedBeforeBody,
    #[error("JSON serialization error: {0}")]
    JsonSerialize(#[from] serde_json::Error),
    #[error("response formatting failed")]
    ResponseFormat,
    #[error("HTTP response write timed out")]
    ResponseTimeout,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("service lock poisoned ({context})")]
    Poisoned { context: &'static str },
    #[error("{context} server shutdown timed out")]
    ShutdownTimeout { context: &'static str },
}
