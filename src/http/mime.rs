//! MIME type detection based on file extensions.

use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Maps a file name to its media type, falling back to `application/octet-stream`.
///
/// ```
/// # use relay::http::mime;
/// assert_eq!(mime::from_path("html/index.html"), "text/html");
/// assert_eq!(mime::from_path("favicon.ico"), "image/x-icon");
/// assert_eq!(mime::from_path("blob"), mime::OCTET_STREAM);
/// ```
pub fn from_path(path: impl AsRef<Path>) -> &'static str {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        _ => OCTET_STREAM,
    }
}
