use crate::http::request::{Method, Request, Version};
use std::collections::HashMap;

/// Header blocks larger than this without a terminating blank line are rejected.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;
/// Requests announcing a larger `Content-Length` are rejected before the body is read.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Size limits applied while decoding a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed request line")]
    InvalidRequest,
    #[error("unknown method `{0}`")]
    InvalidMethod(String),
    #[error("unknown protocol version `{0}`")]
    InvalidVersion(String),
    #[error("malformed header line")]
    InvalidHeader,
    #[error("invalid Content-Length")]
    InvalidContentLength,
    #[error("header block exceeds {0} bytes")]
    HeadersTooLarge(usize),
    #[error("body exceeds {0} bytes")]
    BodyTooLarge(usize),
    #[error("request incomplete")]
    Incomplete,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_http_request_with_limits(buf, Limits::default())
}

/// Decodes one request from the front of `buf`.
///
/// Returns the request together with the number of bytes it occupied, so the
/// caller can keep whatever follows for the next exchange.
pub fn parse_http_request_with_limits(
    buf: &[u8],
    limits: Limits,
) -> Result<(Request, usize), ParseError> {

    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > limits.max_header_bytes => {
            return Err(ParseError::HeadersTooLarge(limits.max_header_bytes));
        }
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version_str = parts.next().ok_or(ParseError::InvalidRequest)?;

    let method = Method::from_str(method_str)
        .ok_or_else(|| ParseError::InvalidMethod(method_str.to_string()))?;
    let version = Version::from_str(version_str)
        .ok_or_else(|| ParseError::InvalidVersion(version_str.to_string()))?;

    let (path, query) = split_target(target);

    // Headers
    let mut headers = HashMap::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        if key.is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.insert(
           key.to_string(),
           value.trim().to_string(),
        );
    }

    // Body
    let content_length = headers
        .get("Content-Length")
        .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
        .transpose()?
        .unwrap_or(0);

    if content_length > limits.max_body_bytes {
        return Err(ParseError::BodyTooLarge(limits.max_body_bytes));
    }
    if body_bytes.len() < content_length {
        return Err(ParseError::Incomplete);
    }

    let body = body_bytes[..content_length].to_vec();

    let request = Request {
        method,
        path,
        query,
        version,
        headers,
        body,
    };

    let total_consumed = headers_end + 4 + content_length;
    Ok((request, total_consumed))

}

/// Splits a request target into its path and decoded query parameters.
///
/// `%XX` escapes and `+` are decoded in keys and values; a repeated key keeps
/// its last value.
pub fn split_target(target: &str) -> (String, HashMap<String, String>) {
    match target.split_once('?') {
        Some((path, query)) => {
            let params = url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect();
            (path.to_string(), params)
        }
        None => (target.to_string(), HashMap::new()),
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}
