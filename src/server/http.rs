//! Just enough HTTP/1.1 for the viewer endpoints.
//!
//! Routing needs only the method and the path, so the request head is read up
//! to its blank line and everything past the request line is ignored. Every
//! response closes the connection.

use anyhow::{anyhow, bail, Result};
use std::io::{Read, Write};
use std::time::Duration;

const MAX_HEAD_BYTES: usize = 8192;
const HEAD_END: &[u8] = b"\r\n\r\n";

/// Read timeout applied while waiting for a request head.
pub const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Ok,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    InternalError,
    Unavailable,
}

impl Status {
    pub fn line(self) -> &'static str {
        match self {
            Status::Ok => "HTTP/1.1 200 OK",
            Status::BadRequest => "HTTP/1.1 400 Bad Request",
            Status::NotFound => "HTTP/1.1 404 Not Found",
            Status::MethodNotAllowed => "HTTP/1.1 405 Method Not Allowed",
            Status::InternalError => "HTTP/1.1 500 Internal Server Error",
            Status::Unavailable => "HTTP/1.1 503 Service Unavailable",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    /// Path with any query string removed.
    pub path: String,
}

/// Read a request head and parse its first line.
pub fn read_request<S: Read>(stream: &mut S) -> Result<RequestLine> {
    let mut head = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            bail!("connection closed before end of request head");
        }
        // Only the new bytes (plus three of overlap) can complete the terminator.
        let from = head.len().saturating_sub(HEAD_END.len() - 1);
        head.extend_from_slice(&chunk[..n]);
        if head[from..].windows(HEAD_END.len()).any(|w| w == HEAD_END) {
            break;
        }
        if head.len() > MAX_HEAD_BYTES {
            bail!("request head exceeds {} bytes", MAX_HEAD_BYTES);
        }
    }
    parse_request_line(&head)
}

pub fn parse_request_line(head: &[u8]) -> Result<RequestLine> {
    let end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    let line = std::str::from_utf8(&head[..end])?;
    let mut fields = line.split_ascii_whitespace();
    let (Some(method), Some(target), Some(version)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(anyhow!("malformed request line {:?}", line));
    };
    if !version.starts_with("HTTP/1.") {
        bail!("unsupported protocol {:?}", version);
    }
    let path = match target.split_once('?') {
        Some((path, _query)) => path,
        None => target,
    };
    Ok(RequestLine {
        method: method.to_string(),
        path: path.to_string(),
    })
}

/// Write a complete response with a fixed body.
pub fn write_response<W: Write>(
    stream: &mut W,
    status: Status,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    write!(
        stream,
        "{}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status.line(),
        content_type,
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

pub fn write_json_response<W: Write>(stream: &mut W, status: Status, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}
