use crate::net::{HttpError, NetError};
use serde_json::json;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Writes a JSON error payload of the form `{"error": ..., "status": ...}`.
///
/// Success bodies on this service are plain text or empty; JSON is only
/// used for the informational error envelope.
pub(crate) fn write_json_error(
    stream: &mut (impl Write + ?Sized),
    status: u16,
    message: &str,
) -> Result<(), NetError> {
    let body = serde_json::to_vec(&json!({ "error": message, "status": status }))
        .map_err(HttpError::JsonSerialize)?;
    write_response(stream, status, "application/json", &body)
}

pub(crate) fn write_response(
    stream: &mut (impl Write + ?Sized),
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<(), NetError> {
    let mut header = String::new();
    write!(
        header,
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nContent-Type: {}\r\nConnection: close\r\n\r\n",
        status,
        status_text(status),
        body.len(),
        content_type
    )
    .map_err(|_| HttpError::ResponseFormat)?;
    stream
        .write_all(header.as_bytes())
        .map_err(map_write_error)?;
    stream.write_all(body).map_err(map_write_error)?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

fn map_write_error(err: io::Error) -> NetError {
    if is_timeout(&err) {
        NetError::from(HttpError::ResponseTimeout)
    } else {
        NetError::from(err)
    }
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

#[cfg(test)]
mod tests {
    use super::{write_json_error, write_response};

    #[test]
    fn renders_status_line_and_body() {
        let mut buffer = Vec::new();
        write_response(&mut buffer, 200, "text/plain", b"1,hi\n").expect("write");
        let rendered = String::from_utf8(buffer).expect("utf8");
        assert!(rendered.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(rendered.contains("Content-Type: text/plain\r\n"));
        assert!(rendered.contains("Content-Length: 5\r\n"));
        assert!(rendered.ends_with("\r\n\r\n1,hi\n"));
    }

    #[test]
    fn json_error_envelope_carries_status() {
        let mut buffer = Vec::new();
        write_json_error(&mut buffer, 401, "bad password").expect("write");
        let rendered = String::from_utf8(buffer).expect("utf8");
        assert!(rendered.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
        assert!(rendered.contains("\"status\":401"));
        assert!(rendered.contains("bad password"));
    }
}
