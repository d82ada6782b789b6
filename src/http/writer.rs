use std::io::{self, Write};

use crate::http::request::Request;
use crate::http::response::Response;

/// Encodes a response: status line, `Content-Length` when the handler did
/// not set one, remaining headers, blank line, body.
///
/// ```
/// # use relay::http::response::Response;
/// # use relay::http::writer::serialize_response;
/// let bytes = serialize_response(&Response::default());
/// assert_eq!(bytes, b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
/// ```
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version.as_str(),
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // 1xx and 204 responses never carry a body length
    let bodyless = resp.status.as_u16() < 200 || resp.status.as_u16() == 204;
    if !bodyless && !resp.headers.contains_key("Content-Length") {
        buf.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());
    }

    // Headers
    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

/// Encodes a request in wire form. Query parameters are re-encoded with
/// `application/x-www-form-urlencoded` escaping; their order is unspecified.
pub fn serialize_request(req: &Request) -> Vec<u8> {
    let mut target = req.path.clone();
    if !req.query.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(req.query.iter())
            .finish();
        target.push('?');
        target.push_str(&query);
    }

    let mut buf = Vec::with_capacity(128 + req.body.len());
    buf.extend_from_slice(
        format!("{} {} {}\r\n", req.method.as_str(), target, req.version.as_str()).as_bytes(),
    );

    for (k, v) in &req.headers {
        buf.extend_from_slice(format!("{}: {}\r\n", k, v).as_bytes());
    }

    if !req.body.is_empty() && !req.headers.contains_key("Content-Length") {
        buf.extend_from_slice(format!("Content-Length: {}\r\n", req.body.len()).as_bytes());
    }

    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(&req.body);
    buf
}

/// Pushes a fully encoded message into a non-blocking socket.
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self::from_bytes(serialize_response(response))
    }

    pub fn from_bytes(buffer: Vec<u8>) -> Self {
        Self { buffer, written: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.written
    }

    /// Writes until the whole buffer is gone.
    ///
    /// A would-block result is retried straight away.
    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> io::Result<()> {
        while self.written < self.buffer.len() {
            match stream.write(&self.buffer[self.written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => self.written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}
