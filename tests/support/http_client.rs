use std::error::Error;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

pub struct HttpResponse {
    pub status: u16,
    pub headers: String,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-type")
                .then(|| value.trim())
        })
    }
}

pub fn http_request(
    addr: SocketAddr,
    method: &str,
    path_and_query: &str,
) -> Result<HttpResponse, Box<dyn Error>> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;
    let request = format!(
        "{method} {path_and_query} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(Box::new(err)),
        }
    }
    parse_http_response(&response)
}

fn parse_http_response(buffer: &[u8]) -> Result<HttpResponse, Box<dyn Error>> {
    let header_end = buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or("response missing header terminator")?;
    let headers = String::from_utf8(buffer[..header_end].to_vec())?;
    let status = parse_status_line(&headers)?;
    Ok(HttpResponse {
        status,
        headers,
        body: buffer[header_end + 4..].to_vec(),
    })
}

fn parse_status_line(headers: &str) -> Result<u16, Box<dyn Error>> {
    let status_line = headers.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let _protocol = parts.next();
    Ok(parts
        .next()
        .ok_or("missing HTTP status code")?
        .parse::<u16>()?)
}
